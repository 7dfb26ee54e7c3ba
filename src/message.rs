//! Message identifiers and state transitions (spec §3 `Message`).
//!
//! The row shape itself (`MessageRow`/`NewMessage`) lives in
//! [`crate::store`] since it's the store's schema; this module owns the
//! domain logic layered on top: `rfc724_mid` generation, the
//! [`crate::store::MessageState`] transition rules, and deterministic
//! dedup-id synthesis for mail that arrives without a `Message-ID`.

use rand::distributions::Alphanumeric;
use rand::Rng;
use sha2::{Digest, Sha256};

pub use crate::store::{MessageRow as Message, MessageState, NewMessage};

impl MessageState {
    pub fn is_outgoing(self) -> bool {
        matches!(
            self,
            MessageState::OutPending
                | MessageState::OutDelivered
                | MessageState::OutRead
                | MessageState::OutError
        )
    }

    pub fn is_incoming(self) -> bool {
        !self.is_outgoing()
    }
}

/// Generates a fresh, random `Message-ID` local part, RFC 5322-quoted by
/// the caller as `<id>`.
fn random_id_part(rng: &mut impl Rng, len: usize) -> String {
    rng.sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// A non-group `Message-ID`: `<random>@<host>`.
pub fn create_rfc724_mid(host: &str) -> String {
    let mut rng = rand::thread_rng();
    format!("{}@{}", random_id_part(&mut rng, 22), host)
}

/// A group `Message-ID` of the form spec §6 mandates:
/// `Gr.<grpid>.<random>@<host>`, `grpid` drawn from `[A-Za-z0-9]`
/// (`VALID_ID_LEN` chars).
pub fn create_group_rfc724_mid(grpid: &str, host: &str) -> String {
    let mut rng = rand::thread_rng();
    format!("Gr.{}.{}@{}", grpid, random_id_part(&mut rng, 11), host)
}

/// A fresh group id: `VALID_ID_LEN` chars from `[A-Za-z0-9]`.
pub fn create_grpid() -> String {
    let mut rng = rand::thread_rng();
    random_id_part(&mut rng, crate::constants::VALID_ID_LEN)
}

/// Deterministically synthesizes a dedup key for a message that arrived
/// with no usable `Message-ID` (spec §4.G.2): a SHA-256 digest of the
/// timestamp, sender, and recipient list, so that refetching the same mail
/// (e.g. after a server-side move) collides on the same id instead of
/// being stored twice.
pub fn synthesize_rfc724_mid(ts: i64, from_id: u32, to_list: &[u32]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(ts.to_be_bytes());
    hasher.update(from_id.to_be_bytes());
    for to_id in to_list {
        hasher.update(to_id.to_be_bytes());
    }
    format!("{:x}@generated", hasher.finalize())
}
