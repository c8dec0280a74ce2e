//! Error types for Keywitness

use thiserror::Error;

/// Core error type for recording operations.
///
/// Verification failures are *not* errors — they are structured diagnostics
/// returned by the verifier (see `verify::VerifyFailure`). This enum covers
/// the recording pipeline and canonical serialization only.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Recorder not initialized")]
    NotInitialized,

    #[error("Recorder already initialized")]
    AlreadyInitialized,

    #[error("Human attestation must be event #0 (chain already has {events} events)")]
    AttestationOrdering { events: u64 },

    #[error("Non-finite number cannot be canonically encoded")]
    NonFinite,

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Proof-of-sequential-work request {id} timed out")]
    PoswTimeout { id: u64 },

    #[error("Recorder closed")]
    RecorderClosed,
}

/// Result alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
