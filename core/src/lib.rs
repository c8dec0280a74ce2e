//! Keywitness Core - Typing-proof chain, PoSW, and verification
//!
//! This crate provides:
//! - The hash-chained event log with proof-of-sequential-work per record
//! - Canonical serialization shared with other implementations
//! - Whole-log and checkpoint-sampled verification
//! - The typing-proof hash and export artifacts
//! - IPC types and client for daemon communication
//!
//! The core does no storage I/O: callers persist the event list and
//! checkpoints through their own adapters.

pub mod canonical;
pub mod chain;
pub mod checkpoint;
pub mod error;
pub mod event;
pub mod hash;
pub mod ipc;
pub mod posw;
pub mod proof;
pub mod recorder;
pub mod stats;
pub mod verify;

#[cfg(test)]
pub(crate) mod testutil;

pub use checkpoint::{Checkpoint, CHECKPOINT_INTERVAL};
pub use error::{Error, Result};
pub use event::{
    AttestationToken, EventInput, EventKind, EventPayload, EventRecord, InputType, KeyInfo,
    MousePos, Range, ScreenshotRef, VisibilityState,
};
pub use ipc::{socket_path, IpcClient, IpcError, IpcMessage, IpcResponse};
pub use posw::{PoswProof, PoswWorker, POSW_ITERATIONS, POSW_TIMEOUT};
pub use proof::{
    build_export, build_multi_file, compact_summary, typing_proof_hash, verify_bindings,
    verify_export, BindingVerification, CompactSummary, ExportVerification, ExportedProof,
    Fingerprint, MultiFileExport, ProofMetadata, TypingProofData, PROOF_FORMAT_VERSION,
};
pub use recorder::{RecordReceipt, RecorderConfig, RecorderHandle, RecorderStats};
pub use stats::EventStats;
pub use verify::{
    verify_full, verify_sampled, FailureKind, FullVerification, SampledVerification,
    VerifyFailure,
};

/// Re-export commonly used items
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::{AttestationToken, EventInput, EventKind, EventPayload, InputType};
    pub use crate::proof::{ExportedProof, Fingerprint};
    pub use crate::recorder::{RecorderConfig, RecorderHandle};
    pub use crate::verify::{verify_full, verify_sampled};
}
