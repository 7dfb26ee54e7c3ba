//! [Autocrypt peer state](https://autocrypt.org/level1.html#peer-state-management)
//! tracking: one row per contact address, updated as Autocrypt headers are
//! observed on incoming mail.

use crate::aheader::{Aheader, EncryptPreference};
use crate::key::{DcKey, Fingerprint, SignedPublicKey};

/// Minimum verification level a caller will accept a key at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerstateVerifiedStatus {
    Unverified,
    BidirectVerified,
}

/// Which of a peerstate's two observed keys a verification applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerstateKeyType {
    GossipKey,
    PublicKey,
}

/// Set when a change makes the peerstate worth persisting; distinguishes a
/// timestamp-only touch from a change the store must durably save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToSave {
    Timestamps,
    All,
}

/// A user-visible reason encryption with this peer became unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DegradeEvent {
    /// Recoverable once the peer sends another encrypted mail.
    EncryptionPaused,
    /// Recoverable once the peer's new key is verified.
    FingerprintChanged,
}

/// The state machine for one peer's Autocrypt key material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peerstate {
    pub addr: String,
    pub last_seen: i64,
    pub last_seen_autocrypt: i64,
    pub prefer_encrypt: EncryptPreference,
    pub public_key: Option<SignedPublicKey>,
    pub public_key_fingerprint: Option<Fingerprint>,
    pub gossip_key: Option<SignedPublicKey>,
    pub gossip_key_fingerprint: Option<Fingerprint>,
    pub gossip_timestamp: i64,
    pub verified_key: Option<SignedPublicKey>,
    pub verified_key_fingerprint: Option<Fingerprint>,
    pub to_save: Option<ToSave>,
    pub degrade_event: Option<DegradeEvent>,
}

impl Peerstate {
    pub fn new(addr: String) -> Self {
        Peerstate {
            addr,
            last_seen: 0,
            last_seen_autocrypt: 0,
            prefer_encrypt: EncryptPreference::default(),
            public_key: None,
            public_key_fingerprint: None,
            gossip_key: None,
            gossip_key_fingerprint: None,
            gossip_timestamp: 0,
            verified_key: None,
            verified_key_fingerprint: None,
            to_save: None,
            degrade_event: None,
        }
    }

    /// Builds a fresh peerstate from a just-received `Autocrypt:` header.
    pub fn from_header(header: &Aheader, message_time: i64) -> Self {
        let mut res = Self::new(header.addr.clone());
        res.last_seen = message_time;
        res.last_seen_autocrypt = message_time;
        res.to_save = Some(ToSave::All);
        res.prefer_encrypt = header.prefer_encrypt;
        res.public_key = Some(header.public_key.clone());
        res.recalc_fingerprint();
        res
    }

    /// Builds a fresh peerstate from an `Autocrypt-Gossip:` header carried
    /// by a group-chat member other than the header's addressee.
    pub fn from_gossip(gossip_header: &Aheader, message_time: i64) -> Self {
        let mut res = Self::new(gossip_header.addr.clone());
        res.gossip_timestamp = message_time;
        res.to_save = Some(ToSave::All);
        res.gossip_key = Some(gossip_header.public_key.clone());
        res.recalc_fingerprint();
        res
    }

    fn recalc_fingerprint(&mut self) {
        if let Some(ref public_key) = self.public_key {
            let old = self.public_key_fingerprint.take();
            let new = public_key.dc_fingerprint();
            self.public_key_fingerprint = Some(new);
            if old.is_none() || old != Some(new) {
                self.to_save = Some(ToSave::All);
                if old.is_some() {
                    self.degrade_event = Some(DegradeEvent::FingerprintChanged);
                }
            }
        }

        if let Some(ref gossip_key) = self.gossip_key {
            let old = self.gossip_key_fingerprint.take();
            let new = gossip_key.dc_fingerprint();
            self.gossip_key_fingerprint = Some(new);
            if old.is_none() || old != Some(new) {
                self.to_save = Some(ToSave::All);
                if old.is_some() {
                    self.degrade_event = Some(DegradeEvent::FingerprintChanged);
                }
            }
        }
    }

    /// Tears down the encryption preference after, e.g., an unencrypted
    /// mail arrives from a peer that previously preferred encryption.
    pub fn degrade_encryption(&mut self, message_time: i64) {
        if self.prefer_encrypt == EncryptPreference::Mutual {
            self.degrade_event = Some(DegradeEvent::EncryptionPaused);
        }
        self.prefer_encrypt = EncryptPreference::Reset;
        self.last_seen = message_time;
        self.to_save = Some(ToSave::All);
    }

    /// Folds a freshly observed `Autocrypt:` header into this peerstate.
    /// A no-op if the header is for a different address or stale.
    pub fn apply_header(&mut self, header: &Aheader, message_time: i64) {
        if self.addr.to_lowercase() != header.addr.to_lowercase() {
            return;
        }
        if message_time <= self.last_seen_autocrypt {
            return;
        }

        self.last_seen = message_time;
        self.last_seen_autocrypt = message_time;
        self.to_save = Some(ToSave::Timestamps);

        if header.prefer_encrypt != self.prefer_encrypt {
            if self.prefer_encrypt == EncryptPreference::Mutual
                && header.prefer_encrypt != EncryptPreference::Mutual
            {
                self.degrade_event = Some(DegradeEvent::EncryptionPaused);
            }
            self.prefer_encrypt = header.prefer_encrypt;
            self.to_save = Some(ToSave::All);
        }

        if self.public_key.as_ref() != Some(&header.public_key) {
            self.public_key = Some(header.public_key.clone());
            self.recalc_fingerprint();
            self.to_save = Some(ToSave::All);
        }
    }

    /// As [`Peerstate::apply_header`], for `Autocrypt-Gossip:` headers.
    pub fn apply_gossip(&mut self, gossip_header: &Aheader, message_time: i64) {
        if self.addr.to_lowercase() != gossip_header.addr.to_lowercase() {
            return;
        }
        if message_time <= self.gossip_timestamp {
            return;
        }

        self.gossip_timestamp = message_time;
        self.to_save = Some(ToSave::Timestamps);
        if self.gossip_key.as_ref() != Some(&gossip_header.public_key) {
            self.gossip_key = Some(gossip_header.public_key.clone());
            self.recalc_fingerprint();
            self.to_save = Some(ToSave::All);
        }
    }

    /// Consumes `self`, returning the strongest key available at or above
    /// `min_verified`.
    pub fn take_key(mut self, min_verified: PeerstateVerifiedStatus) -> Option<SignedPublicKey> {
        match min_verified {
            PeerstateVerifiedStatus::BidirectVerified => self.verified_key.take(),
            PeerstateVerifiedStatus::Unverified => {
                self.public_key.take().or_else(|| self.gossip_key.take())
            }
        }
    }

    pub fn peek_key(&self, min_verified: PeerstateVerifiedStatus) -> Option<&SignedPublicKey> {
        match min_verified {
            PeerstateVerifiedStatus::BidirectVerified => self.verified_key.as_ref(),
            PeerstateVerifiedStatus::Unverified => self
                .public_key
                .as_ref()
                .or_else(|| self.gossip_key.as_ref()),
        }
    }

    /// Marks `which_key`'s current fingerprint as bidirectionally verified,
    /// provided `fingerprint` still matches it. Returns whether it took.
    pub fn set_verified(
        &mut self,
        which_key: PeerstateKeyType,
        fingerprint: &Fingerprint,
    ) -> bool {
        let (key, key_fp) = match which_key {
            PeerstateKeyType::PublicKey => (&self.public_key, &self.public_key_fingerprint),
            PeerstateKeyType::GossipKey => (&self.gossip_key, &self.gossip_key_fingerprint),
        };
        if key_fp.as_ref() == Some(fingerprint) {
            self.verified_key = key.clone();
            self.verified_key_fingerprint = *key_fp;
            self.to_save = Some(ToSave::All);
            true
        } else {
            false
        }
    }
}
