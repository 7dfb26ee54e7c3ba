//! Special ids and tunables named by the external interfaces.

/// RSA key size used for both the primary signing key and the encryption
/// subkey created by [`crate::pgp::RPgpEngine::create_keypair`].
pub const KEYGEN_BITS: u32 = 2048;

/// Length of a synthetic group id (`grpid`), drawn from
/// `[A-Za-z0-9_-]`.
pub const VALID_ID_LEN: usize = 8;

/// Reserved contact id for the local user.
pub const CONTACT_ID_SELF: u32 = 1;

/// Contacts ids at or below this value are reserved.
pub const CONTACT_ID_LAST_SPECIAL: u32 = 9;

/// Virtual chat holding unsolicited inbound mail.
pub const CHAT_ID_DEADDROP: u32 = 1;

/// Outbound messages without a known chat land here.
pub const CHAT_ID_TO_DEADDROP: u32 = 2;

/// Messages assigned here are dropped.
pub const CHAT_ID_TRASH: u32 = 3;

/// Chat ids at or below this value are reserved.
pub const CHAT_ID_LAST_SPECIAL: u32 = 9;

/// Used only for UI day-separator rendering; never a real message id.
pub const MSG_ID_DAYMARKER: u32 = 9;
