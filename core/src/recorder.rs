//! Single-writer recording pipeline
//!
//! The recorder is an actor: one task owns the chain, and every operation
//! arrives as a message over a FIFO channel. Submission order is total
//! order — sequences and timestamps are never reordered — and a record
//! that fails (PoSW timeout, serialization) is dropped without tearing the
//! chain: the next record builds on the previous successful head, so the
//! final chain is a strict prefix of the submitted stream.
//!
//! Timestamps are captured at submission, not at completion, which keeps
//! them monotonic under backpressure.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::chain::Chain;
use crate::checkpoint::{Checkpoint, CHECKPOINT_INTERVAL};
use crate::error::{Error, Result};
use crate::event::{AttestationToken, EventInput, EventKind, EventPayload, EventRecord};
use crate::posw::{PoswWorker, POSW_ITERATIONS, POSW_TIMEOUT};
use crate::proof::{self, ExportedProof, Fingerprint};
use crate::stats;

/// Tunables for one recorder instance. Defaults are the wire-contract
/// constants; tests shrink the PoSW iteration count to build long chains
/// quickly.
#[derive(Debug, Clone)]
pub struct RecorderConfig {
    pub checkpoint_interval: u64,
    pub posw_iterations: u32,
    pub posw_timeout: Duration,
    /// Cap on retained external-input payload bytes. The hash commits to
    /// the retained (possibly truncated) value.
    pub max_external_payload_bytes: Option<usize>,
    /// Reported in export metadata as `userAgent`.
    pub user_agent: String,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            checkpoint_interval: CHECKPOINT_INTERVAL,
            posw_iterations: POSW_ITERATIONS,
            posw_timeout: POSW_TIMEOUT,
            max_external_payload_bytes: None,
            user_agent: format!(
                "keywitness-core/{} ({})",
                env!("CARGO_PKG_VERSION"),
                std::env::consts::OS
            ),
        }
    }
}

/// Returned by every record operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordReceipt {
    pub hash: String,
    pub index: u64,
}

/// Live stats surface for UIs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecorderStats {
    pub total_events: u64,
    /// Last minus first event timestamp, in milliseconds.
    pub duration: u64,
    pub event_types: std::collections::BTreeMap<String, u64>,
    /// Current chain head; empty before initialization.
    pub current_hash: String,
    /// Submissions accepted but not yet appended or dropped.
    pub pending_count: u64,
}

struct Shared {
    /// Monotonic clock started at initialization.
    start: RwLock<Option<Instant>>,
    queued: AtomicUsize,
}

impl Shared {
    fn new() -> Self {
        Self {
            start: RwLock::new(None),
            queued: AtomicUsize::new(0),
        }
    }

    fn elapsed_ms(&self) -> Option<u64> {
        self.start
            .read()
            .ok()
            .and_then(|guard| (*guard).map(|start| start.elapsed().as_millis() as u64))
    }
}

enum Command {
    Initialize {
        fingerprint: Fingerprint,
        attestation: Option<AttestationToken>,
        reply: oneshot::Sender<Result<()>>,
    },
    Record {
        input: EventInput,
        timestamp: Option<u64>,
        reply: oneshot::Sender<Result<RecordReceipt>>,
    },
    Export {
        final_content: String,
        reply: oneshot::Sender<Result<ExportedProof>>,
    },
    Stats {
        reply: oneshot::Sender<RecorderStats>,
    },
    Snapshot {
        reply: oneshot::Sender<(Vec<EventRecord>, Vec<Checkpoint>)>,
    },
}

/// Handle to a running recorder. Cheap to clone; all clones feed the same
/// FIFO and the same chain.
#[derive(Clone)]
pub struct RecorderHandle {
    tx: mpsc::UnboundedSender<Command>,
    shared: Arc<Shared>,
}

impl RecorderHandle {
    /// Spawn the recorder actor and its PoSW worker.
    pub fn spawn(config: RecorderConfig) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new());
        let task = RecorderTask {
            posw: PoswWorker::spawn(config.posw_timeout),
            config,
            chain: None,
            fingerprint: None,
            shared: Arc::clone(&shared),
        };
        tokio::spawn(task.run(rx));
        Self { tx, shared }
    }

    /// Derive the initial hash from the fingerprint and start the chain's
    /// monotonic clock. When an attestation payload is supplied it becomes
    /// event #0. Fails if already initialized.
    pub async fn initialize(
        &self,
        fingerprint: Fingerprint,
        attestation: Option<AttestationToken>,
    ) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Initialize {
                fingerprint,
                attestation,
                reply,
            })
            .map_err(|_| Error::RecorderClosed)?;
        rx.await.map_err(|_| Error::RecorderClosed)?
    }

    /// Record one event. The timestamp is captured here, at submission.
    pub async fn record_event(&self, input: EventInput) -> Result<RecordReceipt> {
        let timestamp = self.shared.elapsed_ms();
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        let (reply, rx) = oneshot::channel();
        if self
            .tx
            .send(Command::Record {
                input,
                timestamp,
                reply,
            })
            .is_err()
        {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::RecorderClosed);
        }
        rx.await.map_err(|_| Error::RecorderClosed)?
    }

    /// Record a signed human attestation as event #0. Fails when the chain
    /// already has events.
    pub async fn record_human_attestation(
        &self,
        token: AttestationToken,
    ) -> Result<RecordReceipt> {
        self.record_event(EventInput::human_attestation(token)).await
    }

    /// Record a pre-export attestation, allowed at any index.
    pub async fn record_pre_export_attestation(
        &self,
        token: AttestationToken,
    ) -> Result<RecordReceipt> {
        self.record_event(EventInput::pre_export_attestation(token))
            .await
    }

    /// Record a full-content snapshot.
    pub async fn record_content_snapshot(
        &self,
        content: impl Into<String>,
    ) -> Result<RecordReceipt> {
        self.record_event(EventInput::content_snapshot(content.into()))
            .await
    }

    /// Close the checkpoint set and assemble the exported proof.
    pub async fn export_proof(&self, final_content: impl Into<String>) -> Result<ExportedProof> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Export {
                final_content: final_content.into(),
                reply,
            })
            .map_err(|_| Error::RecorderClosed)?;
        rx.await.map_err(|_| Error::RecorderClosed)?
    }

    /// Live stats without touching the chain.
    pub async fn stats(&self) -> Result<RecorderStats> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Stats { reply })
            .map_err(|_| Error::RecorderClosed)?;
        rx.await.map_err(|_| Error::RecorderClosed)
    }

    /// Consistent snapshot of events and checkpoints, taken between
    /// appends — for the storage adapter and offline verification.
    pub async fn snapshot(&self) -> Result<(Vec<EventRecord>, Vec<Checkpoint>)> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Command::Snapshot { reply })
            .map_err(|_| Error::RecorderClosed)?;
        rx.await.map_err(|_| Error::RecorderClosed)
    }

    /// Submissions accepted but not yet appended or dropped.
    pub fn queued_count(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }
}

struct RecorderTask {
    config: RecorderConfig,
    chain: Option<Chain>,
    fingerprint: Option<Fingerprint>,
    posw: PoswWorker,
    shared: Arc<Shared>,
}

impl RecorderTask {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Initialize {
                    fingerprint,
                    attestation,
                    reply,
                } => {
                    let _ = reply.send(self.handle_initialize(fingerprint, attestation).await);
                }
                Command::Record {
                    input,
                    timestamp,
                    reply,
                } => {
                    let result = self.handle_record(input, timestamp).await;
                    // Both paths: the submission is no longer pending.
                    self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                    if let Err(ref error) = result {
                        warn!(%error, "record dropped, chain continues");
                    }
                    let _ = reply.send(result);
                }
                Command::Export {
                    final_content,
                    reply,
                } => {
                    let _ = reply.send(self.handle_export(&final_content));
                }
                Command::Stats { reply } => {
                    let _ = reply.send(self.handle_stats());
                }
                Command::Snapshot { reply } => {
                    let snapshot = match &self.chain {
                        Some(chain) => (chain.events().to_vec(), chain.checkpoints().to_vec()),
                        None => (Vec::new(), Vec::new()),
                    };
                    let _ = reply.send(snapshot);
                }
            }
        }
        debug!("recorder task stopped");
    }

    async fn handle_initialize(
        &mut self,
        fingerprint: Fingerprint,
        attestation: Option<AttestationToken>,
    ) -> Result<()> {
        if self.chain.is_some() {
            return Err(Error::AlreadyInitialized);
        }
        let chain = Chain::new(&fingerprint.hash, self.config.checkpoint_interval);
        info!(head = %chain.head(), "recorder initialized");
        self.chain = Some(chain);
        self.fingerprint = Some(fingerprint);
        if let Ok(mut start) = self.shared.start.write() {
            *start = Some(Instant::now());
        }

        if let Some(token) = attestation {
            // Event #0 by construction: the chain was created just above.
            self.handle_record(EventInput::human_attestation(token), Some(0))
                .await?;
        }
        Ok(())
    }

    async fn handle_record(
        &mut self,
        mut input: EventInput,
        timestamp: Option<u64>,
    ) -> Result<RecordReceipt> {
        let chain = self.chain.as_mut().ok_or(Error::NotInitialized)?;

        if input.kind == EventKind::HumanAttestation && !chain.is_empty() {
            return Err(Error::AttestationOrdering {
                events: chain.len(),
            });
        }

        if input.kind == EventKind::ExternalInput {
            if let (Some(cap), Some(EventPayload::Text(text))) =
                (self.config.max_external_payload_bytes, input.data.as_mut())
            {
                truncate_on_char_boundary(text, cap);
            }
        }

        let timestamp = timestamp
            .or_else(|| self.shared.elapsed_ms())
            .unwrap_or(0);

        let mut record = chain.draft(input, timestamp);
        let posw_bytes = record.posw_preimage()?;
        let previous_hash = record
            .previous_hash
            .clone()
            .unwrap_or_default();

        record.posw = self
            .posw
            .compute(&previous_hash, &posw_bytes, self.config.posw_iterations)
            .await?;

        chain.seal(&mut record)?;
        let receipt = RecordReceipt {
            hash: record.hash.clone(),
            index: record.sequence,
        };
        chain.append(record)?;
        debug!(index = receipt.index, "event appended");
        Ok(receipt)
    }

    fn handle_export(&mut self, final_content: &str) -> Result<ExportedProof> {
        let chain = self.chain.as_mut().ok_or(Error::NotInitialized)?;
        let fingerprint = self.fingerprint.as_ref().ok_or(Error::NotInitialized)?;
        chain.close_checkpoint()?;
        proof::build_export(
            chain.events(),
            chain.checkpoints(),
            chain.head(),
            fingerprint,
            final_content,
            chain.started_at_ms(),
            &self.config.user_agent,
        )
    }

    fn handle_stats(&self) -> RecorderStats {
        let pending = self.shared.queued.load(Ordering::SeqCst) as u64;
        match &self.chain {
            Some(chain) => {
                let stats = stats::collect(chain.events());
                RecorderStats {
                    total_events: stats.total_events,
                    duration: stats.total_typing_time,
                    event_types: stats.event_types,
                    current_hash: chain.head().to_string(),
                    pending_count: pending,
                }
            }
            None => RecorderStats {
                pending_count: pending,
                ..RecorderStats::default()
            },
        }
    }
}

/// Truncate in place without splitting a UTF-8 code point.
fn truncate_on_char_boundary(text: &mut String, mut cap: usize) {
    if text.len() <= cap {
        return;
    }
    while cap > 0 && !text.is_char_boundary(cap) {
        cap -= 1;
    }
    text.truncate(cap);
}
