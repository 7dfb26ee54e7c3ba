//! The OpenPGP engine: key generation, encryption/decryption, detached
//! signatures and the symmetric Autocrypt-Setup-Message codec.
//!
//! Exposed as a trait ([`PgpEngine`]) with one production implementation,
//! [`RPgpEngine`], backed by rPGP. Keeping the surface as a trait means a
//! reimplementation only has to satisfy the contracts below, not match
//! rPGP's internal types.

use std::collections::HashSet;
use std::io::Cursor;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::SubsecRound;
use pgp::composed::{
    ArmorOptions, Deserializable, KeyType as PgpKeyType, Message, MessageBuilder,
    SecretKeyParamsBuilder, StandaloneSignature, SubkeyParamsBuilder, TheRing,
};
use pgp::crypto::hash::HashAlgorithm;
use pgp::crypto::sym::SymmetricKeyAlgorithm;
use pgp::packet::{SignatureConfig, SignatureType, Subpacket, SubpacketData};
use pgp::types::{CompressionAlgorithm, KeyDetails, Password, PublicKeyTrait, StringToKey};
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::constants::KEYGEN_BITS;
use crate::error::{CoreError, Result};
use crate::key::{DcKey, Fingerprint, Key, SignedPublicKey, SignedSecretKey};
use crate::keyring::Keyring;

/// Preferred symmetric cipher for encryption and for Autocrypt Setup
/// Messages.
const SYMMETRIC_KEY_ALGORITHM: SymmetricKeyAlgorithm = SymmetricKeyAlgorithm::AES128;

/// Preferred hash for signing and for Autocrypt Setup Message S2K.
const HASH_ALGORITHM: HashAlgorithm = HashAlgorithm::Sha256;

/// S2K iteration count octet for symmetric Autocrypt Setup Message
/// encryption (RFC 4880 §3.7.1.3: octet 96 decodes to 65,536 iterations).
const SETUP_MESSAGE_S2K_COUNT: u8 = 96;

/// Accumulates caller-supplied entropy additively and seeds a process-wide
/// CSPRNG from it. rPGP draws straight from the OS RNG with no seed hook of
/// its own, so this sits in front of it: every [`RPgpEngine::rand_seed`]
/// call folds new bytes into a running hash, and every operation that needs
/// randomness reseeds a fresh [`StdRng`] from the current hash. Never
/// resets, only mixes, so repeated calls can only add uncertainty.
struct EntropyPool {
    state: Mutex<[u8; 32]>,
    generation: AtomicU64,
}

impl EntropyPool {
    fn new() -> Self {
        Self {
            state: Mutex::new(*b"secmail-core-entropy-pool-seed!!"),
            generation: AtomicU64::new(0),
        }
    }

    /// Mixes `bytes` into the pool. Never replaces prior entropy: the new
    /// material is hashed together with the existing state.
    fn mix(&self, bytes: &[u8]) {
        use sha2::{Digest, Sha256};
        let mut state = self.state.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&state[..]);
        hasher.update(bytes);
        hasher.update(self.generation.fetch_add(1, Ordering::SeqCst).to_le_bytes());
        state.copy_from_slice(&hasher.finalize());
    }

    /// Derives a fresh [`StdRng`] from the current pool state, additionally
    /// salted by the OS RNG so distinct calls never produce identical
    /// streams even if no entropy was ever added.
    fn rng(&self) -> StdRng {
        use sha2::{Digest, Sha256};
        let mut os_salt = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut os_salt);
        let state = self.state.lock().unwrap();
        let mut hasher = Sha256::new();
        hasher.update(&state[..]);
        hasher.update(os_salt);
        let seed: [u8; 32] = hasher.finalize().into();
        StdRng::from_seed(seed)
    }
}

/// The operations a reimplementation of the cryptographic core must
/// provide. See spec §4.D for the exact wire-level contracts.
pub trait PgpEngine {
    fn create_keypair(&self, addr: &str) -> Result<(Key, Key)>;
    fn is_valid_key(&self, data: &[u8], expect_secret: bool) -> bool;
    fn calc_fingerprint(&self, key: &Key) -> Fingerprint;
    fn split_key(&self, private: &Key) -> Result<Key>;
    fn pk_encrypt(
        &self,
        plain: &[u8],
        recipients: &Keyring<SignedPublicKey>,
        signer: Option<&SignedSecretKey>,
    ) -> Result<String>;
    fn pk_decrypt(
        &self,
        ctext: &[u8],
        keys: &Keyring<SignedSecretKey>,
        validators: Option<&Keyring<SignedPublicKey>>,
    ) -> Result<(Vec<u8>, HashSet<Fingerprint>)>;
    fn pk_calc_signature(&self, plain: &[u8], signer: &SignedSecretKey) -> Result<String>;
    fn pk_validate(
        &self,
        content: &[u8],
        signature: &[u8],
        validators: &Keyring<SignedPublicKey>,
    ) -> Result<HashSet<Fingerprint>>;
    fn symm_encrypt(&self, passphrase: &str, plain: &[u8]) -> Result<String>;
    fn symm_decrypt(&self, passphrase: &str, ctext: &[u8]) -> Result<Vec<u8>>;
    fn rand_seed(&self, bytes: &[u8]);
}

/// rPGP-backed [`PgpEngine`].
pub struct RPgpEngine {
    entropy: EntropyPool,
}

impl Default for RPgpEngine {
    fn default() -> Self {
        Self {
            entropy: EntropyPool::new(),
        }
    }
}

impl RPgpEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn select_encryption_subkey<'a>(
        key: &'a SignedPublicKey,
    ) -> Option<&'a pgp::composed::SignedPublicSubKey> {
        key.public_subkeys
            .iter()
            .find(|subkey| subkey.is_encryption_key())
    }
}

impl PgpEngine for RPgpEngine {
    /// Generates a primary RSA signing key and an RSA encryption subkey,
    /// both at [`KEYGEN_BITS`] with public exponent 65537, per spec §4.D.1.
    fn create_keypair(&self, addr: &str) -> Result<(Key, Key)> {
        let mut rng = self.entropy.rng();

        let user_id = format!("<{addr}>");
        let key_params = SecretKeyParamsBuilder::default()
            .key_type(PgpKeyType::Rsa(KEYGEN_BITS))
            .can_certify(true)
            .can_sign(true)
            .primary_user_id(user_id)
            .passphrase(None)
            .preferred_symmetric_algorithms(smallvec::smallvec![
                SymmetricKeyAlgorithm::AES256,
                SymmetricKeyAlgorithm::AES128,
                SymmetricKeyAlgorithm::CAST5,
                SymmetricKeyAlgorithm::TripleDES,
                SymmetricKeyAlgorithm::IDEA,
            ])
            .preferred_hash_algorithms(smallvec::smallvec![
                HashAlgorithm::Sha256,
                HashAlgorithm::Sha384,
                HashAlgorithm::Sha512,
                HashAlgorithm::Sha224,
                HashAlgorithm::Sha1,
            ])
            .preferred_compression_algorithms(smallvec::smallvec![
                CompressionAlgorithm::ZLIB,
            ])
            .subkey(
                SubkeyParamsBuilder::default()
                    .key_type(PgpKeyType::Rsa(KEYGEN_BITS))
                    .can_encrypt(true)
                    .passphrase(None)
                    .build()
                    .map_err(|e| CoreError::CryptoFailure(e.to_string()))?,
            )
            .build()
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;

        let secret_key = key_params
            .generate(&mut rng)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?
            .sign(&mut rng, &Password::empty())
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        secret_key
            .verify()
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;

        let public_key = secret_key
            .public_key()
            .sign(&secret_key, String::new)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        public_key
            .verify()
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;

        Ok((Key::Public(public_key), Key::Secret(secret_key)))
    }

    fn is_valid_key(&self, data: &[u8], expect_secret: bool) -> bool {
        if expect_secret {
            Key::from_slice_secret(data).is_some()
        } else {
            Key::from_slice_public(data).is_some()
        }
    }

    fn calc_fingerprint(&self, key: &Key) -> Fingerprint {
        key.fingerprint()
    }

    fn split_key(&self, private: &Key) -> Result<Key> {
        private.split_key()
    }

    fn pk_encrypt(
        &self,
        plain: &[u8],
        recipients: &Keyring<SignedPublicKey>,
        signer: Option<&SignedSecretKey>,
    ) -> Result<String> {
        let mut rng = self.entropy.rng();
        let pkeys = recipients.keys().iter().filter_map(Self::select_encryption_subkey);

        let builder = MessageBuilder::from_bytes("", plain.to_vec());
        let mut builder = builder.seipd_v1(&mut rng, SYMMETRIC_KEY_ALGORITHM);
        for pkey in pkeys {
            builder
                .encrypt_to_key(&mut rng, pkey)
                .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        }

        if let Some(skey) = signer {
            builder.sign(&**skey, Password::empty(), HASH_ALGORITHM);
            builder.compression(CompressionAlgorithm::ZLIB);
        }

        builder
            .to_armored_string(&mut rng, Default::default())
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))
    }

    fn pk_decrypt(
        &self,
        ctext: &[u8],
        keys: &Keyring<SignedSecretKey>,
        validators: Option<&Keyring<SignedPublicKey>>,
    ) -> Result<(Vec<u8>, HashSet<Fingerprint>)> {
        let (msg, _headers) = Message::from_armor(Cursor::new(ctext))
            .map_err(|e| CoreError::ArmorParseError(e.to_string()))?;

        let skeys: Vec<&SignedSecretKey> = keys.keys().iter().collect();
        let empty_pw = Password::empty();
        let ring = TheRing {
            secret_keys: skeys,
            key_passwords: vec![&empty_pw],
            message_password: vec![],
            session_keys: vec![],
            allow_legacy: false,
        };

        let (mut msg, ring_result) = msg
            .decrypt_the_ring(ring, true)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        if ring_result.secret_keys.is_empty() {
            return Err(CoreError::CryptoFailure(
                "decryption failed: no matching secret key".into(),
            ));
        }

        let mut valid_fingerprints = HashSet::new();
        if msg.is_signed() {
            if let Some(validators) = validators {
                for pkey in validators.keys() {
                    if msg.verify(&pkey.primary_key).is_ok() {
                        valid_fingerprints.insert(pkey.dc_fingerprint());
                    }
                }
            }
        }

        let msg = msg
            .decompress()
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        let plain = msg
            .as_data_vec()
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        Ok((plain, valid_fingerprints))
    }

    fn pk_calc_signature(&self, plain: &[u8], signer: &SignedSecretKey) -> Result<String> {
        let rng = self.entropy.rng();
        let mut config = SignatureConfig::from_key(rng, &signer.primary_key, SignatureType::Binary)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;

        config.hashed_subpackets = vec![
            Subpacket::regular(SubpacketData::IssuerFingerprint(signer.fingerprint()))
                .map_err(|e| CoreError::CryptoFailure(e.to_string()))?,
            Subpacket::critical(SubpacketData::SignatureCreationTime(
                chrono::Utc::now().trunc_subsecs(0),
            ))
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?,
        ];
        config.unhashed_subpackets = vec![Subpacket::regular(SubpacketData::Issuer(signer.key_id()))
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?];

        let signature = config
            .sign(&signer.primary_key, &Password::empty(), plain)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        let sig = StandaloneSignature::new(signature);
        sig.to_armored_string(ArmorOptions::default())
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))
    }

    fn pk_validate(
        &self,
        content: &[u8],
        signature: &[u8],
        validators: &Keyring<SignedPublicKey>,
    ) -> Result<HashSet<Fingerprint>> {
        let standalone = StandaloneSignature::from_armor_single(Cursor::new(signature))
            .map_err(|e| CoreError::ArmorParseError(e.to_string()))?
            .0;

        let mut ret = HashSet::new();
        for pkey in validators.keys() {
            if standalone.verify(pkey, content).is_ok() {
                ret.insert(pkey.dc_fingerprint());
            }
        }
        Ok(ret)
    }

    /// Produces an Autocrypt Setup Message payload per spec §4.D.7: Tag 3
    /// symmetric-key-encrypted-session-key (version 4, AES-128, iterated and
    /// salted S2K with an 8-byte random salt and iteration octet `96`)
    /// followed by Tag 18 SEIPD over the literal-data packet.
    fn symm_encrypt(&self, passphrase: &str, plain: &[u8]) -> Result<String> {
        let mut rng = self.entropy.rng();
        let mut salt = [0u8; 8];
        rng.fill_bytes(&mut salt);
        let s2k = StringToKey::IteratedAndSalted {
            hash_alg: HASH_ALGORITHM,
            salt,
            count: SETUP_MESSAGE_S2K_COUNT,
        };

        let password = Password::from(passphrase.to_string());
        let builder = MessageBuilder::from_bytes("", plain.to_vec());
        let mut builder = builder.seipd_v1(&mut rng, SYMMETRIC_KEY_ALGORITHM);
        builder
            .encrypt_with_password(s2k, &password)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;

        builder
            .to_armored_string(&mut rng, Default::default())
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))
    }

    fn symm_decrypt(&self, passphrase: &str, ctext: &[u8]) -> Result<Vec<u8>> {
        let (enc_msg, _headers) = Message::from_armor(Cursor::new(ctext))
            .map_err(|e| CoreError::ArmorParseError(e.to_string()))?;
        let password = Password::from(passphrase.to_string());

        let msg = enc_msg
            .decrypt_with_password(&password)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        msg.decompress()
            .and_then(|m| m.as_data_vec())
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))
    }

    fn rand_seed(&self, bytes: &[u8]) {
        self.entropy.mix(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{alice_keypair, bob_keypair};
    use std::convert::TryInto;

    #[test]
    fn test_create_keypair_is_rsa() {
        let engine = RPgpEngine::new();
        let (public, secret) = engine.create_keypair("alice@example.org").unwrap();
        let public: SignedPublicKey = public.try_into().unwrap();
        let secret: SignedSecretKey = secret.try_into().unwrap();
        assert_eq!(public.primary_key.fingerprint().len(), 20);
        assert!(secret.public_subkeys.is_empty() || !secret.secret_subkeys.is_empty());
    }

    #[test]
    fn test_create_keypair_distinct() {
        let engine = RPgpEngine::new();
        let (pub_a, _) = engine.create_keypair("a@example.org").unwrap();
        let (pub_b, _) = engine.create_keypair("b@example.org").unwrap();
        assert_ne!(pub_a.fingerprint(), pub_b.fingerprint());
    }

    #[test]
    fn test_pk_encrypt_decrypt_signed_roundtrip() {
        let engine = RPgpEngine::new();
        let alice = alice_keypair();
        let bob = bob_keypair();

        let mut recipients = Keyring::new();
        recipients.add(bob.public.clone());

        let ctext = engine
            .pk_encrypt(b"hello bob", &recipients, Some(&alice.secret))
            .unwrap();
        assert!(ctext.starts_with("-----BEGIN PGP MESSAGE-----"));

        let mut decryptors = Keyring::new();
        decryptors.add(bob.secret.clone());
        let mut validators = Keyring::new();
        validators.add(alice.public.clone());

        let (plain, valid_fps) = engine
            .pk_decrypt(ctext.as_bytes(), &decryptors, Some(&validators))
            .unwrap();
        assert_eq!(plain, b"hello bob");
        assert!(valid_fps.contains(&alice.public.dc_fingerprint()));
    }

    #[test]
    fn test_pk_decrypt_wrong_key_fails() {
        let engine = RPgpEngine::new();
        let alice = alice_keypair();
        let bob = bob_keypair();

        let mut recipients = Keyring::new();
        recipients.add(bob.public.clone());
        let ctext = engine.pk_encrypt(b"secret", &recipients, None).unwrap();

        let mut wrong_keys = Keyring::new();
        wrong_keys.add(alice.secret.clone());
        assert!(engine
            .pk_decrypt(ctext.as_bytes(), &wrong_keys, None)
            .is_err());
    }

    #[test]
    fn test_detached_signature_roundtrip() {
        let engine = RPgpEngine::new();
        let alice = alice_keypair();
        let sig = engine.pk_calc_signature(b"content", &alice.secret).unwrap();

        let mut validators = Keyring::new();
        validators.add(alice.public.clone());
        let valid = engine
            .pk_validate(b"content", sig.as_bytes(), &validators)
            .unwrap();
        assert!(valid.contains(&alice.public.dc_fingerprint()));
    }

    #[test]
    fn test_s5_symm_encrypt_decrypt_roundtrip() {
        let engine = RPgpEngine::new();
        let key_bytes = b"0123456789abcdef0123456789abcdef";
        let armored = engine.symm_encrypt("1234-ABCD-5678-EFGH", key_bytes).unwrap();
        assert!(armored.starts_with("-----BEGIN PGP MESSAGE-----"));

        let plain = engine
            .symm_decrypt("1234-ABCD-5678-EFGH", armored.as_bytes())
            .unwrap();
        assert_eq!(plain, key_bytes);
    }

    #[test]
    fn test_symm_decrypt_wrong_passphrase_fails() {
        let engine = RPgpEngine::new();
        let armored = engine.symm_encrypt("correct-horse", b"payload").unwrap();
        assert!(engine
            .symm_decrypt("incorrect-horse", armored.as_bytes())
            .is_err());
    }

    #[test]
    fn test_rand_seed_is_additive_and_never_panics() {
        let engine = RPgpEngine::new();
        engine.rand_seed(b"");
        engine.rand_seed(b"some entropy");
        engine.rand_seed(&[0u8; 4096]);
        // Mixing entropy must never change the key type contract.
        let (public, _) = engine.create_keypair("seeded@example.org").unwrap();
        assert_eq!(public.fingerprint().as_bytes().len(), 20);
    }

    #[test]
    fn test_is_valid_key() {
        let engine = RPgpEngine::new();
        let alice = alice_keypair();
        let pub_bytes = alice.public.to_bytes_vec().unwrap();
        let sec_bytes = alice.secret.to_bytes_vec().unwrap();
        assert!(engine.is_valid_key(&pub_bytes, false));
        assert!(!engine.is_valid_key(&pub_bytes, true));
        assert!(engine.is_valid_key(&sec_bytes, true));
        assert!(!engine.is_valid_key(b"not a key", false));
    }
}
