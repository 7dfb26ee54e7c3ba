//! Key representation: a parsed, validated OpenPGP key plus a 20-byte V4
//! fingerprint.

use std::io::Cursor;

use pgp::composed::Deserializable;
use pgp::ser::Serialize;
use pgp::types::KeyDetails;

pub use pgp::composed::{SignedPublicKey, SignedSecretKey};

use crate::error::{CoreError, Result};

/// A V4 OpenPGP fingerprint: SHA-1 over the canonical public-key packet
/// (RFC 4880 §12.2).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Fingerprint([u8; 20]);

impl Fingerprint {
    pub fn new(bytes: [u8; 20]) -> Self {
        Self(bytes)
    }

    /// The lower 8 bytes of the fingerprint, used for fast key-id lookups.
    pub fn key_id(&self) -> [u8; 8] {
        let mut id = [0u8; 8];
        id.copy_from_slice(&self.0[12..20]);
        id
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    /// Renders the fingerprint in groups of 4 hex chars, wrapping to a new
    /// line every 20 characters.
    pub fn to_formatted(&self) -> String {
        let raw = self.to_string();
        let mut res = String::new();
        for (i, c) in raw.chars().enumerate() {
            if i > 0 && i % 20 == 0 {
                res += "\n";
            } else if i > 0 && i % 4 == 0 {
                res += " ";
            }
            res.push(c);
        }
        res
    }

    /// Parses a possibly human-formatted fingerprint (spaces, newlines,
    /// lowercase) back into 40 uppercase hex characters and then raw bytes.
    pub fn from_str_normalize(fp: &str) -> Option<Self> {
        let cleaned: String = fp
            .to_uppercase()
            .chars()
            .filter(|&c| c.is_ascii_hexdigit())
            .collect();
        if cleaned.len() != 40 {
            return None;
        }
        let bytes = hex::decode(&cleaned).ok()?;
        let mut arr = [0u8; 20];
        arr.copy_from_slice(&bytes);
        Some(Self(arr))
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", hex::encode_upper(self.0))
    }
}

/// Convenience trait implemented for rPGP's [`SignedPublicKey`] and
/// [`SignedSecretKey`], unifying (de)serialization and fingerprinting.
pub trait DcKey: Serialize + Deserializable + KeyDetails {
    /// Parses a key from its binary transferable-key form.
    fn from_slice(bytes: &[u8]) -> Result<Self> {
        <Self as Deserializable>::from_bytes(Cursor::new(bytes))
            .map_err(|e| CoreError::InvalidKey(e.to_string()))
    }

    /// Parses a key from a base64-encoded transferable-key form.
    fn from_base64(data: &str) -> Result<Self> {
        let cleaned: String = data.trim().split_whitespace().collect();
        let bytes = base64::decode(cleaned.as_bytes())
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        Self::from_slice(&bytes)
    }

    /// Serializes the key to its binary transferable-key form.
    fn to_bytes_vec(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf)
            .map_err(|e| CoreError::CryptoFailure(e.to_string()))?;
        Ok(buf)
    }

    /// Serializes the key to a base64 string.
    fn to_base64(&self) -> String {
        let mut buf = Vec::new();
        // `Vec<u8>`'s Write impl never fails.
        self.to_writer(&mut buf).expect("writing to a Vec cannot fail");
        base64::encode(&buf)
    }

    /// V4 fingerprint of this key.
    fn dc_fingerprint(&self) -> Fingerprint {
        let raw = self.fingerprint();
        let mut arr = [0u8; 20];
        let n = raw.len().min(20);
        arr[..n].copy_from_slice(&raw[..n]);
        Fingerprint::new(arr)
    }
}

impl DcKey for SignedPublicKey {}
impl DcKey for SignedSecretKey {}

/// Either half of a keypair, validated at construction time by the fact
/// that it parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Key {
    Public(SignedPublicKey),
    Secret(SignedSecretKey),
}

impl From<SignedPublicKey> for Key {
    fn from(key: SignedPublicKey) -> Self {
        Key::Public(key)
    }
}

impl From<SignedSecretKey> for Key {
    fn from(key: SignedSecretKey) -> Self {
        Key::Secret(key)
    }
}

impl std::convert::TryFrom<Key> for SignedSecretKey {
    type Error = CoreError;

    fn try_from(value: Key) -> Result<Self> {
        match value {
            Key::Public(_) => Err(CoreError::InvalidKey("expected a secret key".into())),
            Key::Secret(key) => Ok(key),
        }
    }
}

impl std::convert::TryFrom<Key> for SignedPublicKey {
    type Error = CoreError;

    fn try_from(value: Key) -> Result<Self> {
        match value {
            Key::Public(key) => Ok(key),
            Key::Secret(_) => Err(CoreError::InvalidKey("expected a public key".into())),
        }
    }
}

impl Key {
    pub fn is_public(&self) -> bool {
        matches!(self, Key::Public(_))
    }

    pub fn is_secret(&self) -> bool {
        !self.is_public()
    }

    /// Parses either a public or a secret transferable key, returning
    /// `None` (never panicking) on any malformed input — `is_valid_key`'s
    /// contract in spec terms.
    pub fn from_slice_public(bytes: &[u8]) -> Option<Key> {
        SignedPublicKey::from_slice(bytes).ok().map(Key::Public)
    }

    /// As [`Key::from_slice_public`], for the secret half.
    pub fn from_slice_secret(bytes: &[u8]) -> Option<Key> {
        SignedSecretKey::from_slice(bytes).ok().map(Key::Secret)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Key::Public(k) => k.to_bytes_vec().unwrap_or_default(),
            Key::Secret(k) => k.to_bytes_vec().unwrap_or_default(),
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        match self {
            Key::Public(k) => k.dc_fingerprint(),
            Key::Secret(k) => k.dc_fingerprint(),
        }
    }

    /// Extracts the public transferable key from a secret key. Fails (per
    /// spec §4.D.4) if called on a public key.
    pub fn split_key(&self) -> Result<Key> {
        match self {
            Key::Public(_) => Err(CoreError::InvalidKey(
                "split_key requires a secret key".into(),
            )),
            Key::Secret(k) => {
                let pub_key = k.public_key();
                pub_key
                    .sign(k, String::new)
                    .map(Key::Public)
                    .map_err(|e| CoreError::CryptoFailure(e.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_fingerprint() {
        let fp = Fingerprint::from_str_normalize("1234567890ABCDABCDEFABCDEF1234567890ABCD")
            .unwrap();
        assert_eq!(
            fp.to_formatted(),
            "1234 5678 90AB CDAB CDEF\nABCD EF12 3456 7890 ABCD"
        );
    }

    #[test]
    fn test_normalize_fingerprint() {
        let fp = Fingerprint::from_str_normalize(" 1234  5678 90AB cdAB cdef ABCD EF12 3456 7890 ABCD ")
            .expect("should parse");
        assert_eq!(fp.to_string(), "1234567890ABCDABCDEFABCDEF1234567890ABCD");
    }

    #[test]
    fn test_normalize_fingerprint_rejects_wrong_length() {
        assert!(Fingerprint::from_str_normalize("ABCD").is_none());
    }

    #[test]
    fn test_from_slice_bad_data() {
        let mut bad_data = [0u8; 4096];
        for (i, b) in bad_data.iter_mut().enumerate() {
            *b = (i & 0xff) as u8;
        }
        for j in 0..(4096 / 40) {
            assert!(Key::from_slice_public(&bad_data[j..j + 4096 / 2 + j]).is_none());
            assert!(Key::from_slice_secret(&bad_data[j..j + 4096 / 2 + j]).is_none());
        }
    }
}
