//! Opportunistic end-to-end encryption orchestration (spec.md's Autocrypt
//! material, supplemented from `original_source/`): deciding whether a
//! message can and should go out encrypted, and assembling the keyring to
//! encrypt it with.
//!
//! This module owns policy only. The wire-level operations it calls out to
//! live in [`crate::pgp`]; the per-peer state it reads lives in
//! [`crate::peerstate`]. Unlike the teacher, there is no `Context` object in
//! this crate threading a live IMAP/SMTP/database connection through every
//! call, so `EncryptHelper` is built from already-resolved values and the
//! caller supplies a `Store` only where persistence is actually needed.

use anyhow::{anyhow, Context as _, Result};

use crate::aheader::{Aheader, EncryptPreference};
use crate::key::{SignedPublicKey, SignedSecretKey};
use crate::keyring::Keyring;
use crate::peerstate::{Peerstate, PeerstateVerifiedStatus};
use crate::pgp::PgpEngine;

/// One account's outbound Autocrypt identity: the key pair and stated
/// encryption preference advertised in the `Autocrypt:` header of every
/// mail it sends.
#[derive(Debug, Clone)]
pub struct EncryptHelper {
    pub prefer_encrypt: EncryptPreference,
    pub addr: String,
    pub public_key: SignedPublicKey,
}

impl EncryptHelper {
    pub fn new(addr: String, public_key: SignedPublicKey, prefer_encrypt: EncryptPreference) -> Self {
        EncryptHelper {
            prefer_encrypt,
            addr,
            public_key,
        }
    }

    pub fn get_aheader(&self) -> Aheader {
        Aheader::new(self.addr.clone(), self.public_key.clone(), self.prefer_encrypt)
    }

    /// Determines if a message to `peerstates` can and should be encrypted.
    ///
    /// For encryption to be enabled, `e2ee_guaranteed` must be true, or
    /// strictly more than half of the peerstates (counting this account's
    /// own preference as one more vote) must prefer encryption.
    ///
    /// `e2ee_guaranteed` should be set for replies to encrypted messages
    /// (Autocrypt Level 1, version 1.1) and for messages sent in a
    /// protected group.
    ///
    /// Returns an error if `e2ee_guaranteed` is true but a recipient's
    /// peerstate is missing or was reset.
    pub fn should_encrypt(
        &self,
        e2ee_guaranteed: bool,
        peerstates: &[(Option<Peerstate>, &str)],
    ) -> Result<bool> {
        let mut prefer_encrypt_count = usize::from(self.prefer_encrypt == EncryptPreference::Mutual);

        for (peerstate, addr) in peerstates {
            match peerstate {
                Some(peerstate) => match peerstate.prefer_encrypt {
                    EncryptPreference::NoPreference => {}
                    EncryptPreference::Mutual => prefer_encrypt_count += 1,
                    EncryptPreference::Reset => {
                        if !e2ee_guaranteed {
                            return Ok(false);
                        }
                    }
                },
                None => {
                    if e2ee_guaranteed {
                        return Err(anyhow!("peerstate for {addr:?} missing, cannot encrypt"));
                    }
                    return Ok(false);
                }
            }
        }

        // Recipient count includes self: our own preference counts as a
        // vote even on a message we don't keep a copy of.
        let recipients_count = peerstates.len() + 1;
        Ok(e2ee_guaranteed || 2 * prefer_encrypt_count > recipients_count)
    }

    /// Encrypts `plain` to every peer in `peerstates` plus this account's
    /// own key, signed with `secret_key`. Fails if any peerstate lacks a
    /// key at or above `min_verified` — callers are expected to have
    /// already confirmed via [`EncryptHelper::should_encrypt`] that
    /// encryption should be attempted at all.
    pub fn encrypt(
        &self,
        engine: &dyn PgpEngine,
        secret_key: &SignedSecretKey,
        min_verified: PeerstateVerifiedStatus,
        peerstates: Vec<(Option<Peerstate>, &str)>,
        plain: &[u8],
    ) -> Result<String> {
        let mut keyring: Keyring<SignedPublicKey> = Keyring::new();
        for (peerstate, addr) in peerstates
            .into_iter()
            .filter_map(|(state, addr)| state.map(|s| (s, addr)))
        {
            let key = peerstate
                .take_key(min_verified)
                .with_context(|| format!("proper enc-key for {addr} missing, cannot encrypt"))?;
            keyring.add(key);
        }
        keyring.add(self.public_key.clone());

        engine
            .pk_encrypt(plain, &keyring, Some(secret_key))
            .map_err(Into::into)
    }

    /// Detached-signs `plain` with `secret_key`, for callers that want
    /// authenticity without confidentiality (e.g. a plaintext message sent
    /// alongside a multipart/signed wrapper).
    pub fn sign(&self, engine: &dyn PgpEngine, secret_key: &SignedSecretKey, plain: &[u8]) -> Result<String> {
        engine.pk_calc_signature(plain, secret_key).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DcKey;
    use crate::pgp::RPgpEngine;
    use crate::test_utils::{alice_keypair, bob_keypair};

    fn bob_peerstate(prefer_encrypt: EncryptPreference) -> Peerstate {
        let bob = bob_keypair();
        let fp = bob.public.dc_fingerprint();
        Peerstate {
            addr: "bob@example.net".to_string(),
            last_seen: 13,
            last_seen_autocrypt: 14,
            prefer_encrypt,
            public_key: Some(bob.public.clone()),
            public_key_fingerprint: Some(fp),
            gossip_key: None,
            gossip_key_fingerprint: None,
            gossip_timestamp: 0,
            verified_key: Some(bob.public),
            verified_key_fingerprint: Some(fp),
            to_save: None,
            degrade_event: None,
        }
    }

    fn alice_helper(prefer_encrypt: EncryptPreference) -> EncryptHelper {
        let alice = alice_keypair();
        EncryptHelper::new("alice@example.org".to_string(), alice.public, prefer_encrypt)
    }

    #[test]
    fn test_should_encrypt_no_preference_requires_guarantee() {
        let helper = alice_helper(EncryptPreference::Mutual);
        let ps = vec![(
            Some(bob_peerstate(EncryptPreference::NoPreference)),
            "bob@example.net",
        )];
        assert!(helper.should_encrypt(true, &ps).unwrap());
        assert!(!helper.should_encrypt(false, &ps).unwrap());
    }

    #[test]
    fn test_should_encrypt_reset_blocks_unless_guaranteed() {
        let helper = alice_helper(EncryptPreference::Mutual);
        let ps = vec![(
            Some(bob_peerstate(EncryptPreference::Reset)),
            "bob@example.net",
        )];
        assert!(helper.should_encrypt(true, &ps).unwrap());
        assert!(!helper.should_encrypt(false, &ps).unwrap());
    }

    #[test]
    fn test_should_encrypt_mutual_majority() {
        let helper = alice_helper(EncryptPreference::Mutual);
        let ps = vec![(
            Some(bob_peerstate(EncryptPreference::Mutual)),
            "bob@example.net",
        )];
        // 2 of 2 recipients prefer mutual: strictly more than half.
        assert!(helper.should_encrypt(false, &ps).unwrap());
    }

    #[test]
    fn test_should_encrypt_missing_peerstate() {
        let helper = alice_helper(EncryptPreference::Mutual);
        let ps = vec![(None, "bob@example.net")];
        assert!(helper.should_encrypt(true, &ps).is_err());
        assert!(!helper.should_encrypt(false, &ps).unwrap());
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let alice = alice_keypair();
        let helper = alice_helper(EncryptPreference::Mutual);
        let engine = RPgpEngine::new();
        let bob = bob_keypair();
        let ps = vec![(
            Some(bob_peerstate(EncryptPreference::Mutual)),
            "bob@example.net",
        )];

        let ctext = helper
            .encrypt(
                &engine,
                &alice.secret,
                PeerstateVerifiedStatus::Unverified,
                ps,
                b"hello bob",
            )
            .unwrap();
        assert!(ctext.starts_with("-----BEGIN PGP MESSAGE-----"));

        let mut decryptors = Keyring::new();
        decryptors.add(bob.secret);
        let (plain, _valid) = engine.pk_decrypt(ctext.as_bytes(), &decryptors, None).unwrap();
        assert_eq!(plain, b"hello bob");
    }

    #[test]
    fn test_encrypt_missing_peer_key_fails() {
        let helper = alice_helper(EncryptPreference::Mutual);
        let engine = RPgpEngine::new();
        let alice = alice_keypair();
        let mut missing = bob_peerstate(EncryptPreference::Mutual);
        missing.public_key = None;
        missing.gossip_key = None;
        let ps = vec![(Some(missing), "bob@example.net")];

        assert!(helper
            .encrypt(
                &engine,
                &alice.secret,
                PeerstateVerifiedStatus::Unverified,
                ps,
                b"hello bob",
            )
            .is_err());
    }

    #[test]
    fn test_sign_produces_verifiable_signature() {
        let helper = alice_helper(EncryptPreference::Mutual);
        let engine = RPgpEngine::new();
        let alice = alice_keypair();
        let sig = helper.sign(&engine, &alice.secret, b"content").unwrap();

        let mut validators = Keyring::new();
        validators.add(alice.public.clone());
        let valid = engine.pk_validate(b"content", sig.as_bytes(), &validators).unwrap();
        assert!(valid.contains(&alice.public.dc_fingerprint()));
    }
}
