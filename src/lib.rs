#![forbid(unsafe_code)]

//! End-to-end encryption and message-ingest core for a Delta-Chat-style
//! secure mail client: OpenPGP key handling, Autocrypt header/peerstate
//! tracking, the incoming-MIME-to-chat classifier, and the abstract store
//! the pipeline runs against.

pub mod aheader;
pub mod armor;
pub mod chat;
pub mod constants;
pub mod contact;
pub mod e2ee;
pub mod error;
pub mod events;
pub mod headerdef;
pub mod key;
pub mod keyring;
pub mod log;
pub mod mdn;
pub mod message;
pub mod param;
pub mod peerstate;
pub mod pgp;
pub mod receive_imf;
pub mod store;

#[cfg(test)]
pub(crate) mod test_utils;
