//! Error kinds shared across the crate.

use thiserror::Error;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Error kinds produced by the OpenPGP engine, the ingest pipeline and the
/// store abstraction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A key blob did not parse, or its parsed kind did not match the
    /// declared kind.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// An encrypt/decrypt/sign/verify operation failed internally.
    #[error("crypto operation failed: {0}")]
    CryptoFailure(String),

    /// The armored-block splitter could not find a BEGIN/END pair, or the
    /// labels disagreed.
    #[error("could not parse armored block: {0}")]
    ArmorParseError(String),

    /// The persistence layer failed; the caller MUST roll back the
    /// enclosing transaction.
    #[error("store error: {0}")]
    StoreError(String),

    /// A MIME header required by a header-handler was missing or malformed.
    /// Recovered by falling back to a coarser classification.
    #[error("malformed header: {0}")]
    MalformedHeader(String),

    /// External transport failure. Kept so `Store`'s error type composes
    /// cleanly with a future transport layer; this crate never returns it
    /// itself.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// True for errors that should degrade the caller (message composer /
    /// viewer) rather than abort the whole pipeline.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, CoreError::StoreError(_))
    }
}
