//! Periodic chain checkpoints for sampled verification
//!
//! A checkpoint commits to one event's `(sequence, hash, timestamp)` plus a
//! hash of its payload, letting a verifier recompute only the segments
//! between checkpoints instead of the whole chain.

use serde::{Deserialize, Serialize};

use crate::canonical;
use crate::error::Result;
use crate::event::EventRecord;
use crate::hash;

/// How many events between checkpoints. Part of the wire contract.
pub const CHECKPOINT_INTERVAL: u64 = 100;

/// Snapshot of one event, stored in insertion order with strictly
/// monotonic `eventIndex`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub event_index: u64,
    pub hash: String,
    pub timestamp: u64,
    /// SHA-256 of the canonical encoding of the event's `data` field, or
    /// the empty string when the event carries no payload.
    pub content_hash: String,
}

impl Checkpoint {
    /// Build the checkpoint for `event`.
    pub fn for_event(event: &EventRecord) -> Result<Self> {
        let content_hash = match &event.data {
            Some(payload) => hash::sha256_hex(&canonical::canonical_bytes(payload)?),
            None => String::new(),
        };
        Ok(Self {
            event_index: event.sequence,
            hash: event.hash.clone(),
            timestamp: event.timestamp,
            content_hash,
        })
    }

    /// True when `sequence` lands on an interval boundary (99, 199, ...).
    pub fn is_boundary(sequence: u64, interval: u64) -> bool {
        interval > 0 && (sequence + 1) % interval == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, EventPayload, EventRecord};
    use crate::posw::PoswProof;

    fn record(sequence: u64, data: Option<EventPayload>) -> EventRecord {
        EventRecord {
            sequence,
            timestamp: sequence * 10,
            kind: EventKind::ContentChange,
            input_type: None,
            data,
            range_offset: None,
            range_length: None,
            range: None,
            previous_hash: Some("00".repeat(32)),
            posw: PoswProof::default(),
            hash: format!("{:064x}", sequence + 1),
            description: None,
            is_multi_line: None,
            deleted_length: None,
            inserted_text: None,
            insert_length: None,
            delete_direction: None,
            selected_text: None,
        }
    }

    #[test]
    fn test_boundaries() {
        assert!(Checkpoint::is_boundary(99, CHECKPOINT_INTERVAL));
        assert!(Checkpoint::is_boundary(199, CHECKPOINT_INTERVAL));
        assert!(!Checkpoint::is_boundary(0, CHECKPOINT_INTERVAL));
        assert!(!Checkpoint::is_boundary(100, CHECKPOINT_INTERVAL));
        assert!(!Checkpoint::is_boundary(98, CHECKPOINT_INTERVAL));
    }

    #[test]
    fn test_content_hash_over_payload() {
        let with_data = record(99, Some(EventPayload::Text("hello".to_string())));
        let checkpoint = Checkpoint::for_event(&with_data).unwrap();
        assert_eq!(checkpoint.event_index, 99);
        assert_eq!(checkpoint.hash, with_data.hash);
        assert_eq!(checkpoint.timestamp, with_data.timestamp);
        // Canonical form of a text payload is the quoted JSON string.
        assert_eq!(
            checkpoint.content_hash,
            crate::hash::sha256_hex(br#""hello""#)
        );
    }

    #[test]
    fn test_content_hash_empty_without_payload() {
        let without = record(42, None);
        let checkpoint = Checkpoint::for_event(&without).unwrap();
        assert_eq!(checkpoint.content_hash, "");
    }
}
