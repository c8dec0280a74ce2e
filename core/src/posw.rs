//! Proof-of-sequential-work engine
//!
//! Each record carries a proof that real time was spent between observing
//! the previous chain head and appending: k-fold iterated SHA-256 over
//! `(previousHash || eventBytes || nonce)`. Every step depends on the
//! previous digest, so the work cannot be parallelized, and the fresh
//! per-event nonce prevents precomputation across chains.
//!
//! Compute runs on a dedicated worker thread so the recording pipeline
//! never blocks the caller; requests carry monotonic ids and time out
//! individually without tearing the chain.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::hash;

/// Iteration count for production chains. Part of the wire contract.
pub const POSW_ITERATIONS: u32 = 10_000;

/// How long a single compute request may take before the record is dropped.
pub const POSW_TIMEOUT: Duration = Duration::from_secs(30);

/// The proof attached to each event record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoswProof {
    pub iterations: u32,
    /// 32 CSPRNG bytes, hex-encoded.
    pub nonce: String,
    /// The digest after `iterations` applications of SHA-256.
    pub intermediate_hash: String,
    /// META: wall-clock compute time; excluded from every hash pre-image.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compute_time_ms: Option<u64>,
}

/// Run the iterated hash: `h_1 = H(prev || bytes || nonce)`,
/// `h_i = H(h_{i-1})`, returning `h_iterations`.
pub(crate) fn iterate(
    previous_hash: &str,
    event_bytes: &[u8],
    nonce: &str,
    iterations: u32,
) -> String {
    let mut digest =
        hash::sha256_hex_parts(&[previous_hash.as_bytes(), event_bytes, nonce.as_bytes()]);
    for _ in 1..iterations {
        digest = hash::sha256_hex(digest.as_bytes());
    }
    digest
}

/// Compute a proof over the previous chain head and canonical event bytes.
pub fn compute(previous_hash: &str, event_bytes: &[u8], iterations: u32) -> PoswProof {
    let started = Instant::now();
    let nonce = hash::random_hex(hash::NONCE_BYTES);
    let intermediate_hash = iterate(previous_hash, event_bytes, &nonce, iterations);
    PoswProof {
        iterations,
        nonce,
        intermediate_hash,
        compute_time_ms: Some(started.elapsed().as_millis() as u64),
    }
}

/// Recompute the iterated hash and compare against the claimed value.
pub fn verify(
    previous_hash: &str,
    event_bytes: &[u8],
    nonce: &str,
    iterations: u32,
    expected: &str,
) -> bool {
    if iterations == 0 {
        return false;
    }
    iterate(previous_hash, event_bytes, nonce, iterations) == expected
}

struct Job {
    id: u64,
    previous_hash: String,
    event_bytes: Vec<u8>,
    iterations: u32,
    reply: oneshot::Sender<PoswProof>,
}

/// Handle to the PoSW worker thread. Cheap to clone; jobs are processed in
/// submission order on a single dedicated thread.
#[derive(Clone)]
pub struct PoswWorker {
    tx: mpsc::UnboundedSender<Job>,
    next_id: Arc<AtomicU64>,
    timeout: Duration,
}

impl PoswWorker {
    /// Spawn the worker thread. The thread exits when the last handle is
    /// dropped.
    pub fn spawn(timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();

        std::thread::Builder::new()
            .name("posw-worker".to_string())
            .spawn(move || {
                while let Some(job) = rx.blocking_recv() {
                    let proof = compute(&job.previous_hash, &job.event_bytes, job.iterations);
                    debug!(
                        id = job.id,
                        compute_time_ms = proof.compute_time_ms,
                        "posw job complete"
                    );
                    // The receiver is gone when the request already timed
                    // out; the result is simply discarded.
                    let _ = job.reply.send(proof);
                }
            })
            .expect("spawn posw worker thread");

        Self {
            tx,
            next_id: Arc::new(AtomicU64::new(0)),
            timeout,
        }
    }

    /// Submit a compute request and await its proof.
    ///
    /// Fails with `PoswTimeout` after the configured per-request timeout —
    /// the caller drops that one record and the chain continues.
    pub async fn compute(
        &self,
        previous_hash: &str,
        event_bytes: &[u8],
        iterations: u32,
    ) -> Result<PoswProof> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();

        let job = Job {
            id,
            previous_hash: previous_hash.to_string(),
            event_bytes: event_bytes.to_vec(),
            iterations,
            reply: reply_tx,
        };
        self.tx.send(job).map_err(|_| Error::RecorderClosed)?;

        match tokio::time::timeout(self.timeout, reply_rx).await {
            Ok(Ok(proof)) => Ok(proof),
            Ok(Err(_)) => Err(Error::RecorderClosed),
            Err(_) => {
                warn!(id, "posw request timed out");
                Err(Error::PoswTimeout { id })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREV: &str = "00e14ced6617b7be91d0fb1475a7b73ce51e3199288b3b88620bd8d272b29798";

    #[test]
    fn test_compute_then_verify() {
        let proof = compute(PREV, b"event-bytes", 25);
        assert_eq!(proof.iterations, 25);
        assert_eq!(proof.nonce.len(), 64);
        assert!(verify(
            PREV,
            b"event-bytes",
            &proof.nonce,
            proof.iterations,
            &proof.intermediate_hash
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_nonce() {
        let proof = compute(PREV, b"event-bytes", 25);
        let other_nonce = "ab".repeat(32);
        assert!(!verify(
            PREV,
            b"event-bytes",
            &other_nonce,
            proof.iterations,
            &proof.intermediate_hash
        ));
    }

    #[test]
    fn test_verify_rejects_wrong_bytes_and_iterations() {
        let proof = compute(PREV, b"event-bytes", 25);
        assert!(!verify(
            PREV,
            b"other-bytes",
            &proof.nonce,
            proof.iterations,
            &proof.intermediate_hash
        ));
        assert!(!verify(
            PREV,
            b"event-bytes",
            &proof.nonce,
            proof.iterations + 1,
            &proof.intermediate_hash
        ));
        assert!(!verify(
            PREV,
            b"event-bytes",
            &proof.nonce,
            0,
            &proof.intermediate_hash
        ));
    }

    #[test]
    fn test_iteration_count_is_exact() {
        // Manually unroll: k applications starting from H(prev||bytes||nonce).
        let nonce = "cd".repeat(32);
        let mut digest =
            hash::sha256_hex_parts(&[PREV.as_bytes(), b"x".as_slice(), nonce.as_bytes()]);
        for _ in 1..4 {
            digest = hash::sha256_hex(digest.as_bytes());
        }
        assert!(verify(PREV, b"x", &nonce, 4, &digest));
        assert!(!verify(PREV, b"x", &nonce, 3, &digest));
        assert!(!verify(PREV, b"x", &nonce, 5, &digest));
    }

    #[test]
    fn test_fresh_nonce_per_proof() {
        let a = compute(PREV, b"same", 2);
        let b = compute(PREV, b"same", 2);
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.intermediate_hash, b.intermediate_hash);
    }

    #[tokio::test]
    async fn test_worker_computes_off_thread() {
        let worker = PoswWorker::spawn(Duration::from_secs(5));
        let proof = worker.compute(PREV, b"event-bytes", 50).await.unwrap();
        assert!(verify(
            PREV,
            b"event-bytes",
            &proof.nonce,
            50,
            &proof.intermediate_hash
        ));
    }

    #[tokio::test]
    async fn test_worker_requests_are_correlated_in_order() {
        let worker = PoswWorker::spawn(Duration::from_secs(5));
        let a = worker.compute(PREV, b"a", 10).await.unwrap();
        let b = worker.compute(PREV, b"b", 10).await.unwrap();
        assert!(verify(PREV, b"a", &a.nonce, 10, &a.intermediate_hash));
        assert!(verify(PREV, b"b", &b.nonce, 10, &b.intermediate_hash));
    }

    #[tokio::test]
    async fn test_worker_timeout_fails_single_request() {
        // A zero timeout cannot be met even by a tiny job.
        let worker = PoswWorker::spawn(Duration::from_millis(0));
        let result = worker.compute(PREV, b"event-bytes", 10_000).await;
        assert!(matches!(result, Err(Error::PoswTimeout { .. })));
    }
}
