//! Packed key=value parameter lists stored on [`crate::message::Message`]
//! and [`crate::contact::Contact`] rows (spec §6 "Parameter packing").
//!
//! Serialized as `k=v\n` lines, `k` a single ASCII byte. Trimmed to the
//! keys spec §6 documents plus the internal `Cmd`/`Arg` pair group
//! commands need to round-trip through storage.

use std::collections::BTreeMap;
use std::fmt;
use std::str;

use anyhow::{bail, Error, Result};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;

/// Documented parameter keys (spec §6).
#[derive(PartialEq, Eq, Debug, Clone, Copy, Hash, PartialOrd, Ord, FromPrimitive)]
#[repr(u8)]
pub enum Param {
    /// Local path of an attached file.
    File = b'f',
    /// Attachment width, in pixels.
    Width = b'w',
    /// Attachment height, in pixels.
    Height = b'h',
    /// Attachment/voice-message duration, in milliseconds.
    Duration = b'd',
    /// Outgoing: the message was (or must be) guaranteed end-to-end
    /// encrypted, or sending fails.
    GuaranteeE2ee = b'c',
    /// Incoming: the message decrypted with validation errors or without a
    /// mutual Autocrypt preference.
    ErroneousE2ee = b'e',
    /// Set if the sender expects a read receipt for this message.
    WantsMdn = b'r',
    /// Originating IMAP folder, for dedup-on-move (spec §4.G.2 / S4).
    ServerFolder = b'Z',
    /// Originating IMAP UID, for dedup-on-move.
    ServerUid = b'z',
    /// Group/profile image path.
    ProfileImage = b'i',
    /// For ghost messages: the local id of the original outbound message
    /// this ghost fans out from (spec §4.G.7).
    GhostOriginalMsgId = b'G',
    /// System-message command, interpreted as [`crate::chat::SystemMessage`].
    Cmd = b'S',
    /// Argument to `Cmd` (e.g. the added/removed member address).
    Arg = b'E',
}

/// A packed key=value parameter set.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Params {
    inner: BTreeMap<Param, String>,
}

impl fmt::Display for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (key, value)) in self.inner.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{}={}", *key as u8 as char, value)?;
        }
        Ok(())
    }
}

impl str::FromStr for Params {
    type Err = Error;

    /// Unknown keys are silently dropped: they may be left over from a
    /// newer or older build that used a key this one doesn't.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut inner = BTreeMap::new();
        for line in s.lines() {
            let Some((key, value)) = line.split_once('=') else {
                bail!("not a key=value pair: {:?}", line);
            };
            if key.len() == 1 {
                if let Some(key) = key.as_bytes().first().and_then(|b| Param::from_u8(*b)) {
                    inner.insert(key, value.to_string());
                }
            }
        }
        Ok(Params { inner })
    }
}

impl Params {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn get(&self, key: Param) -> Option<&str> {
        self.inner.get(&key).map(|s| s.as_str())
    }

    pub fn exists(&self, key: Param) -> bool {
        self.inner.contains_key(&key)
    }

    pub fn set(&mut self, key: Param, value: impl ToString) -> &mut Self {
        self.inner.insert(key, value.to_string());
        self
    }

    pub fn remove(&mut self, key: Param) -> &mut Self {
        self.inner.remove(&key);
        self
    }

    pub fn set_optional(&mut self, key: Param, value: Option<impl ToString>) -> &mut Self {
        match value {
            Some(value) => self.set(key, value),
            None => self.remove(key),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn get_int(&self, key: Param) -> Option<i32> {
        self.get(key).and_then(|s| s.parse().ok())
    }

    pub fn get_bool(&self, key: Param) -> Option<bool> {
        self.get_int(key).map(|v| v != 0)
    }

    pub fn set_int(&mut self, key: Param, value: i32) -> &mut Self {
        self.set(key, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_param_set_get_remove() {
        let mut p = Params::new();
        p.set(Param::Width, 2).set_int(Param::Duration, 4);
        assert_eq!(p.get_int(Param::Width), Some(2));
        assert_eq!(p.get_int(Param::Duration), Some(4));
        assert_eq!(p.get_int(Param::Height), None);

        p.remove(Param::Width);
        assert!(!p.exists(Param::Width));
        assert_eq!(p.len(), 1);
    }

    #[test]
    fn test_roundtrip() {
        let mut p = Params::new();
        p.set(Param::File, "$BLOBDIR/pic.jpg");
        p.set(Param::Width, 100);
        p.set(Param::GuaranteeE2ee, 1);
        let s = p.to_string();
        assert_eq!(s.parse::<Params>().unwrap(), p);
    }

    #[test]
    fn test_unknown_key_ignored() {
        let p: Params = "w=12\nQ=13\nh=14".parse().unwrap();
        assert_eq!(p.len(), 2);
        assert_eq!(p.get(Param::Width), Some("12"));
        assert_eq!(p.get(Param::Height), Some("14"));
    }

    #[test]
    fn test_ghost_and_mdn_keys() {
        let mut p = Params::new();
        p.set(Param::WantsMdn, 1);
        p.set(Param::GhostOriginalMsgId, 42);
        assert_eq!(p.get_bool(Param::WantsMdn), Some(true));
        assert_eq!(p.get_int(Param::GhostOriginalMsgId), Some(42));
    }
}
