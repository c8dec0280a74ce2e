//! Offline chain verification, whole-log and checkpoint-sampled
//!
//! Verification failures are diagnostics, not errors: both entry points
//! always return a report. In a failure diagnostic, `expected_hash` is the
//! value the log commits to and `computed_hash` is what the verifier
//! derived; verification halts at the first failure.
//!
//! Per-event check order: sequence, timestamp, previous-hash linkage,
//! PoSW, record hash. The work proof commits to the event content, so a
//! content tamper surfaces as `PoSW` at the same index; `Hash` fires when
//! the stored record hash itself disagrees with an otherwise consistent
//! record.

use rand::rngs::StdRng;
use rand::{seq::index::sample, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::event::EventRecord;
use crate::hash;
use crate::posw;

/// Where a chain failed verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Sequence,
    Timestamp,
    PreviousHash,
    PoSW,
    Hash,
    SegmentEnd,
    CheckpointIntegrity,
}

/// Structured diagnostic for the first failure found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyFailure {
    /// Index of the event (or checkpoint target) where verification failed.
    pub error_at: u64,
    pub kind: FailureKind,
    /// The value committed in the log, when hash-shaped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_hash: Option<String>,
    /// The value the verifier derived.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub computed_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_timestamp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_timestamp: Option<u64>,
}

impl VerifyFailure {
    fn at(error_at: u64, kind: FailureKind) -> Self {
        Self {
            error_at,
            kind,
            expected_hash: None,
            computed_hash: None,
            previous_timestamp: None,
            current_timestamp: None,
        }
    }

    fn hashes(mut self, expected: impl Into<String>, computed: impl Into<String>) -> Self {
        self.expected_hash = Some(expected.into());
        self.computed_hash = Some(computed.into());
        self
    }
}

/// Result of whole-log verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FullVerification {
    pub valid: bool,
    /// Events verified before the walk stopped.
    pub events_checked: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<VerifyFailure>,
}

impl FullVerification {
    fn valid(events_checked: u64) -> Self {
        Self {
            valid: true,
            events_checked,
            failure: None,
        }
    }

    fn failed(events_checked: u64, failure: VerifyFailure) -> Self {
        Self {
            valid: false,
            events_checked,
            failure: Some(failure),
        }
    }
}

/// Result of checkpoint-sampled verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampledVerification {
    pub valid: bool,
    /// Indices of the segments that were recomputed, ascending.
    pub sampled_segments: Vec<usize>,
    pub total_segments: usize,
    pub total_events_verified: u64,
    pub total_events: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<VerifyFailure>,
}

/// Check one event against the walk state. `expected_prev` is the hash the
/// chain requires as this event's `previousHash`; `min_timestamp` is the
/// previous event's timestamp, if any.
fn check_event(
    event: &EventRecord,
    expected_index: u64,
    expected_prev: &str,
    min_timestamp: Option<u64>,
    expected_iterations: u32,
) -> Option<VerifyFailure> {
    if event.sequence != expected_index {
        return Some(VerifyFailure::at(expected_index, FailureKind::Sequence));
    }

    if let Some(min) = min_timestamp {
        if event.timestamp < min {
            let mut failure = VerifyFailure::at(expected_index, FailureKind::Timestamp);
            failure.previous_timestamp = Some(min);
            failure.current_timestamp = Some(event.timestamp);
            return Some(failure);
        }
    }

    // A null previousHash is tolerated only where the walk itself started
    // from it (sequence 0 of a foreign log); it reads as the empty string.
    let stored_prev = event.previous_hash.as_deref().unwrap_or("");
    if stored_prev != expected_prev {
        return Some(
            VerifyFailure::at(expected_index, FailureKind::PreviousHash)
                .hashes(stored_prev, expected_prev),
        );
    }

    if event.posw.iterations == 0 || event.posw.iterations != expected_iterations {
        return Some(VerifyFailure::at(expected_index, FailureKind::PoSW));
    }
    let posw_preimage = match event.posw_preimage() {
        Ok(bytes) => bytes,
        Err(_) => return Some(VerifyFailure::at(expected_index, FailureKind::PoSW)),
    };
    let recomputed_work = posw::iterate(
        expected_prev,
        &posw_preimage,
        &event.posw.nonce,
        event.posw.iterations,
    );
    if recomputed_work != event.posw.intermediate_hash {
        return Some(
            VerifyFailure::at(expected_index, FailureKind::PoSW)
                .hashes(event.posw.intermediate_hash.clone(), recomputed_work),
        );
    }

    let hash_preimage = match event.hash_preimage() {
        Ok(bytes) => bytes,
        Err(_) => return Some(VerifyFailure::at(expected_index, FailureKind::Hash)),
    };
    let computed = hash::sha256_hex_parts(&[expected_prev.as_bytes(), &hash_preimage]);
    if event.hash != computed {
        return Some(
            VerifyFailure::at(expected_index, FailureKind::Hash).hashes(event.hash.clone(), computed),
        );
    }

    None
}

/// Verify the whole chain from its committed initial hash
/// (`events[0].previousHash`). An empty chain is valid.
pub fn verify_full(events: &[EventRecord]) -> FullVerification {
    let first = match events.first() {
        Some(first) => first,
        None => return FullVerification::valid(0),
    };
    let mut expected_prev = first.previous_hash.clone().unwrap_or_default();
    let expected_iterations = first.posw.iterations;
    let mut min_timestamp = None;

    for (i, event) in events.iter().enumerate() {
        if let Some(failure) = check_event(
            event,
            i as u64,
            &expected_prev,
            min_timestamp,
            expected_iterations,
        ) {
            debug!(error_at = failure.error_at, kind = ?failure.kind, "verification failed");
            return FullVerification::failed(i as u64, failure);
        }
        expected_prev = event.hash.clone();
        min_timestamp = Some(event.timestamp);
    }

    FullVerification::valid(events.len() as u64)
}

/// A checkpoint-delimited slice of the chain.
struct Segment {
    /// First event index, inclusive.
    start: u64,
    /// Last event index, inclusive.
    end: u64,
    /// Hash the segment's first event must link to.
    start_hash: String,
    /// Hash the recomputed walk must land on.
    end_hash: String,
}

fn build_segments(events: &[EventRecord], checkpoints: &[Checkpoint]) -> Vec<Segment> {
    let initial = events[0].previous_hash.clone().unwrap_or_default();
    let mut segments = Vec::with_capacity(checkpoints.len() + 1);
    let mut start = 0u64;
    let mut start_hash = initial;

    for checkpoint in checkpoints {
        segments.push(Segment {
            start,
            end: checkpoint.event_index,
            start_hash: start_hash.clone(),
            end_hash: checkpoint.hash.clone(),
        });
        start = checkpoint.event_index + 1;
        start_hash = checkpoint.hash.clone();
    }

    let last_index = events.len() as u64 - 1;
    if start <= last_index {
        segments.push(Segment {
            start,
            end: last_index,
            start_hash,
            end_hash: events[last_index as usize].hash.clone(),
        });
    }
    segments
}

/// Validate checkpoints against the event log before any per-event work:
/// in-range, strictly monotonic, and pointing at real `(hash, timestamp)`
/// pairs.
fn check_checkpoints(events: &[EventRecord], checkpoints: &[Checkpoint]) -> Option<VerifyFailure> {
    let mut previous_index: Option<u64> = None;
    for checkpoint in checkpoints {
        let index = checkpoint.event_index;
        if let Some(prev) = previous_index {
            if index <= prev {
                return Some(VerifyFailure::at(index, FailureKind::CheckpointIntegrity));
            }
        }
        let event = match events.get(index as usize) {
            Some(event) => event,
            None => {
                return Some(VerifyFailure::at(index, FailureKind::CheckpointIntegrity));
            }
        };
        if event.hash != checkpoint.hash || event.timestamp != checkpoint.timestamp {
            return Some(
                VerifyFailure::at(index, FailureKind::CheckpointIntegrity)
                    .hashes(checkpoint.hash.clone(), event.hash.clone()),
            );
        }
        previous_index = Some(index);
    }
    None
}

/// Pick which segments to recompute: always the first and last, plus
/// uniformly random middle segments without replacement until
/// `sample_count` is reached or the segments run out.
fn select_segments(total: usize, sample_count: usize, rng: &mut StdRng) -> Vec<usize> {
    if total <= 1 {
        return (0..total).collect();
    }
    let mut selected = vec![0, total - 1];
    let middle = total - 2;
    let extra = sample_count.saturating_sub(selected.len()).min(middle);
    if extra > 0 {
        let picks = sample(rng, middle, extra);
        selected.extend(picks.iter().map(|i| i + 1));
    }
    selected.sort_unstable();
    selected
}

/// Sampled verification against embedded checkpoints.
///
/// With no checkpoints this falls back to full verification (one implicit
/// segment). `seed` fixes the segment selection for reproducible runs;
/// `None` draws from OS entropy.
pub fn verify_sampled(
    events: &[EventRecord],
    checkpoints: &[Checkpoint],
    sample_count: usize,
    seed: Option<u64>,
) -> SampledVerification {
    let total_events = events.len() as u64;

    if checkpoints.is_empty() || events.is_empty() {
        if let Some(checkpoint) = checkpoints.first() {
            // Checkpoints over an empty log cannot be grounded.
            return SampledVerification {
                valid: false,
                sampled_segments: Vec::new(),
                total_segments: 0,
                total_events_verified: 0,
                total_events,
                failure: Some(VerifyFailure::at(
                    checkpoint.event_index,
                    FailureKind::CheckpointIntegrity,
                )),
            };
        }
        let full = verify_full(events);
        return SampledVerification {
            valid: full.valid,
            sampled_segments: if events.is_empty() { Vec::new() } else { vec![0] },
            total_segments: usize::from(!events.is_empty()),
            total_events_verified: full.events_checked,
            total_events,
            failure: full.failure,
        };
    }

    let mut sorted: Vec<Checkpoint> = checkpoints.to_vec();
    sorted.sort_by_key(|c| c.event_index);

    if let Some(failure) = check_checkpoints(events, &sorted) {
        return SampledVerification {
            valid: false,
            sampled_segments: Vec::new(),
            total_segments: 0,
            total_events_verified: 0,
            total_events,
            failure: Some(failure),
        };
    }

    let segments = build_segments(events, &sorted);
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let selected = select_segments(segments.len(), sample_count, &mut rng);
    debug!(
        total_segments = segments.len(),
        sampled = selected.len(),
        "sampled verification start"
    );

    let expected_iterations = events[0].posw.iterations;
    let mut events_verified = 0u64;

    for &segment_index in &selected {
        let segment = &segments[segment_index];
        let mut expected_prev = segment.start_hash.clone();
        let mut min_timestamp = if segment.start > 0 {
            Some(events[segment.start as usize - 1].timestamp)
        } else {
            None
        };

        for index in segment.start..=segment.end {
            let event = &events[index as usize];
            if let Some(failure) =
                check_event(event, index, &expected_prev, min_timestamp, expected_iterations)
            {
                return SampledVerification {
                    valid: false,
                    sampled_segments: selected.clone(),
                    total_segments: segments.len(),
                    total_events_verified: events_verified,
                    total_events,
                    failure: Some(failure),
                };
            }
            expected_prev = event.hash.clone();
            min_timestamp = Some(event.timestamp);
            events_verified += 1;
        }

        if expected_prev != segment.end_hash {
            return SampledVerification {
                valid: false,
                sampled_segments: selected.clone(),
                total_segments: segments.len(),
                total_events_verified: events_verified,
                total_events,
                failure: Some(
                    VerifyFailure::at(segment.end, FailureKind::SegmentEnd)
                        .hashes(segment.end_hash.clone(), expected_prev),
                ),
            };
        }
    }

    SampledVerification {
        valid: true,
        sampled_segments: selected,
        total_segments: segments.len(),
        total_events_verified: events_verified,
        total_events,
        failure: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventPayload;
    use crate::testutil::typed_chain;

    #[test]
    fn test_empty_chain_is_valid() {
        let report = verify_full(&[]);
        assert!(report.valid);
        assert_eq!(report.events_checked, 0);
    }

    #[test]
    fn test_recorded_chain_verifies() {
        let chain = typed_chain(12, 5);
        let report = verify_full(chain.events());
        assert!(report.valid, "failure: {:?}", report.failure);
        assert_eq!(report.events_checked, 12);
    }

    #[test]
    fn test_data_tamper_detected_at_index() {
        let chain = typed_chain(8, 100);
        let mut events = chain.events().to_vec();
        events[5].data = Some(EventPayload::Text("tampered".to_string()));

        let report = verify_full(&events);
        assert!(!report.valid);
        let failure = report.failure.unwrap();
        assert_eq!(failure.error_at, 5);
        // The work proof commits to the payload, so the content tamper is
        // caught at the PoSW check.
        assert_eq!(failure.kind, FailureKind::PoSW);
    }

    #[test]
    fn test_timestamp_regression_detected() {
        let chain = typed_chain(4, 100);
        let mut events = chain.events().to_vec();
        // Timestamps run [0, 7, 14, 21]; pulling event 2 back to 0 breaks
        // monotonicity before any hashing is consulted.
        events[2].timestamp = 0;

        let report = verify_full(&events);
        let failure = report.failure.unwrap();
        assert_eq!(failure.error_at, 2);
        assert_eq!(failure.kind, FailureKind::Timestamp);
        assert_eq!(failure.previous_timestamp, Some(7));
        assert_eq!(failure.current_timestamp, Some(0));
    }

    #[test]
    fn test_forged_nonce_reports_posw() {
        let chain = typed_chain(6, 100);
        let mut events = chain.events().to_vec();

        // Swap the nonce without redoing the sequential work, leaving
        // intermediateHash (and everything else) as recorded.
        events[3].posw.nonce = "ab".repeat(32);

        let report = verify_full(&events);
        let failure = report.failure.unwrap();
        assert_eq!(failure.error_at, 3);
        assert_eq!(failure.kind, FailureKind::PoSW);
    }

    #[test]
    fn test_stored_hash_tamper_reports_hash() {
        let chain = typed_chain(6, 100);
        let mut events = chain.events().to_vec();
        // Swap only the stored hash of event 2: the work proof still
        // verifies, so the Hash check is what fails.
        events[2].hash = "00".repeat(32);

        let report = verify_full(&events);
        let failure = report.failure.unwrap();
        assert_eq!(failure.error_at, 2);
        assert_eq!(failure.kind, FailureKind::Hash);
    }

    #[test]
    fn test_sampled_falls_back_to_full_without_checkpoints() {
        let chain = typed_chain(7, 100);
        let report = verify_sampled(chain.events(), &[], 3, Some(1));
        assert!(report.valid);
        assert_eq!(report.total_segments, 1);
        assert_eq!(report.total_events_verified, 7);
    }

    #[test]
    fn test_sampled_selects_first_and_last() {
        // 40 events, interval 5 -> checkpoints at 4,9,...,39 -> 8 segments.
        let chain = typed_chain(40, 5);
        assert_eq!(chain.checkpoints().len(), 8);

        let report = verify_sampled(chain.events(), chain.checkpoints(), 3, Some(7));
        assert!(report.valid, "failure: {:?}", report.failure);
        assert_eq!(report.total_segments, 8);
        assert_eq!(report.sampled_segments.len(), 3);
        assert!(report.sampled_segments.contains(&0));
        assert!(report.sampled_segments.contains(&7));
        assert_eq!(report.total_events_verified, 15);
    }

    #[test]
    fn test_sampled_seed_is_reproducible() {
        let chain = typed_chain(40, 5);
        let a = verify_sampled(chain.events(), chain.checkpoints(), 4, Some(11));
        let b = verify_sampled(chain.events(), chain.checkpoints(), 4, Some(11));
        assert_eq!(a.sampled_segments, b.sampled_segments);
    }

    #[test]
    fn test_sampled_detects_tamper_in_selected_segment() {
        let chain = typed_chain(40, 5);
        let mut events = chain.events().to_vec();
        events[17].data = Some(EventPayload::Text("tampered".to_string()));

        // Sampling everything necessarily covers segment [15..19].
        let report = verify_sampled(&events, chain.checkpoints(), 8, Some(0));
        assert!(!report.valid);
        let failure = report.failure.unwrap();
        assert_eq!(failure.error_at, 17);
        assert_eq!(failure.kind, FailureKind::PoSW);
    }

    #[test]
    fn test_checkpoint_integrity_checked_before_events() {
        let chain = typed_chain(20, 5);
        let mut checkpoints = chain.checkpoints().to_vec();
        checkpoints[1].hash = "00".repeat(32);

        let report = verify_sampled(chain.events(), &checkpoints, 2, Some(0));
        assert!(!report.valid);
        let failure = report.failure.unwrap();
        assert_eq!(failure.kind, FailureKind::CheckpointIntegrity);
        assert_eq!(failure.error_at, 9);
        assert_eq!(report.total_events_verified, 0);
    }

    #[test]
    fn test_checkpoint_out_of_range_rejected() {
        let chain = typed_chain(10, 5);
        let mut checkpoints = chain.checkpoints().to_vec();
        checkpoints[0].event_index = 99;

        let report = verify_sampled(chain.events(), &checkpoints, 2, Some(0));
        assert!(!report.valid);
        assert_eq!(
            report.failure.unwrap().kind,
            FailureKind::CheckpointIntegrity
        );
    }

    #[test]
    fn test_segment_layout_with_tail() {
        // 23 events, interval 10 -> checkpoints at 9 and 19, tail [20..22].
        let chain = typed_chain(23, 10);
        let report = verify_sampled(chain.events(), chain.checkpoints(), 99, Some(0));
        assert!(report.valid);
        assert_eq!(report.total_segments, 3);
        assert_eq!(report.total_events_verified, 23);
    }

    #[test]
    fn test_single_checkpoint_boundary_chain() {
        // Exactly one interval of events: one checkpoint, one segment.
        let chain = typed_chain(5, 5);
        assert_eq!(chain.checkpoints().len(), 1);
        let report = verify_sampled(chain.events(), chain.checkpoints(), 3, Some(0));
        assert!(report.valid);
        assert_eq!(report.total_segments, 1);
        assert_eq!(report.sampled_segments, vec![0]);
    }
}
