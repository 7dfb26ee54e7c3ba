//! An ordered collection of keys of a single kind.

use crate::key::{DcKey, Fingerprint};

/// Ordered sequence of keys, all of the same declared kind. Duplicates by
/// fingerprint are permitted but discouraged.
#[derive(Debug, Clone, Default)]
pub struct Keyring<T: DcKey> {
    keys: Vec<T>,
}

impl<T: DcKey> Keyring<T> {
    pub fn new() -> Self {
        Self { keys: Vec::new() }
    }

    pub fn add(&mut self, key: T) {
        self.keys.push(key);
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn keys(&self) -> &[T] {
        &self.keys
    }

    /// Lookup by full fingerprint.
    pub fn find_by_fingerprint(&self, fp: &Fingerprint) -> Option<&T> {
        self.keys.iter().find(|k| k.dc_fingerprint() == *fp)
    }

    /// Lookup by the lower 8 bytes of the fingerprint ("key id").
    pub fn find_by_key_id(&self, key_id: &[u8; 8]) -> Option<&T> {
        self.keys
            .iter()
            .find(|k| &k.dc_fingerprint().key_id() == key_id)
    }
}

impl<T: DcKey> FromIterator<T> for Keyring<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::alice_keypair;

    #[test]
    fn test_keyring_add_find() {
        let alice = alice_keypair();
        let mut keyring = Keyring::new();
        assert!(keyring.is_empty());
        keyring.add(alice.public.clone());
        assert_eq!(keyring.len(), 1);

        let fp = alice.public.dc_fingerprint();
        assert!(keyring.find_by_fingerprint(&fp).is_some());
        assert!(keyring.find_by_key_id(&fp.key_id()).is_some());
    }
}
