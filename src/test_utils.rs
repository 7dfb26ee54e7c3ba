//! Test-only fixtures: pre-generated identities so crypto-heavy tests don't
//! each pay RSA keygen cost.
//!
//! The retrieval pack this crate was built from carries no embedded
//! `test-data/key/*.asc` fixtures (only source files survive the pack
//! filter), so unlike the teacher's `alice_keypair`/`bob_keypair`, these
//! keys are generated once per test binary via [`once_cell::sync::Lazy`]
//! rather than loaded from disk. Either way the cost is paid once, not per
//! test.

use std::convert::TryInto;

use once_cell::sync::Lazy;

use crate::key::{SignedPublicKey, SignedSecretKey};
use crate::pgp::{PgpEngine, RPgpEngine};

/// An identity's full key pair, as handed out by [`alice_keypair`] /
/// [`bob_keypair`].
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub addr: String,
    pub public: SignedPublicKey,
    pub secret: SignedSecretKey,
}

fn generate(addr: &str) -> KeyPair {
    let engine = RPgpEngine::new();
    let (public, secret) = engine
        .create_keypair(addr)
        .expect("test fixture keygen must succeed");
    KeyPair {
        addr: addr.to_string(),
        public: public.try_into().expect("create_keypair's first element is public"),
        secret: secret.try_into().expect("create_keypair's second element is secret"),
    }
}

static ALICE: Lazy<KeyPair> = Lazy::new(|| generate("alice@example.org"));
static BOB: Lazy<KeyPair> = Lazy::new(|| generate("bob@example.net"));

/// A fixed identity's key pair, generated once and cloned out per call.
pub(crate) fn alice_keypair() -> KeyPair {
    ALICE.clone()
}

/// As [`alice_keypair`], for a second, distinct identity.
pub(crate) fn bob_keypair() -> KeyPair {
    BOB.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::DcKey;

    #[test]
    fn test_fixtures_are_distinct_and_cached() {
        let a1 = alice_keypair();
        let a2 = alice_keypair();
        let b = bob_keypair();
        assert_eq!(a1.public.dc_fingerprint(), a2.public.dc_fingerprint());
        assert_ne!(a1.public.dc_fingerprint(), b.public.dc_fingerprint());
    }
}
