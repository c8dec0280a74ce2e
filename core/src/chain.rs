//! Chain builder: sequence assignment, linkage, append, checkpoints
//!
//! `Chain` owns the event vector and the current head. It is driven
//! exclusively by the recorder actor (single writer); everything here is
//! synchronous — the async PoSW hop happens between `draft` and `seal`.
//!
//! Build steps for one record:
//!   1. `draft` assigns sequence and timestamp and links `previousHash`
//!   2. the caller computes PoSW over `posw_preimage()` and sets `posw`
//!   3. `seal` computes `hash = H(previousHash || hash_preimage())`
//!   4. `append` publishes the whole record and emits interval checkpoints

use tracing::debug;

use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::event::{EventInput, EventRecord};
use crate::hash;
use crate::posw::PoswProof;

/// The event chain for one recording session.
pub struct Chain {
    fingerprint_hash: String,
    initial_hash: String,
    head: String,
    events: Vec<EventRecord>,
    checkpoints: Vec<Checkpoint>,
    checkpoint_interval: u64,
    /// Wall-clock ms at chain creation; export metadata only, never hashed.
    started_at_ms: u64,
}

impl Chain {
    /// Create an empty chain seeded from the device fingerprint.
    pub fn new(fingerprint_hash: &str, checkpoint_interval: u64) -> Self {
        let initial_hash = hash::initial_hash(fingerprint_hash);
        debug!(initial_hash = %initial_hash, "chain created");
        Self {
            fingerprint_hash: fingerprint_hash.to_string(),
            head: initial_hash.clone(),
            initial_hash,
            events: Vec::new(),
            checkpoints: Vec::new(),
            checkpoint_interval,
            started_at_ms: chrono::Utc::now().timestamp_millis() as u64,
        }
    }

    /// Hash of the last appended event, or the initial hash when empty.
    pub fn head(&self) -> &str {
        &self.head
    }

    /// The initial hash derived at creation (commits the random salt).
    pub fn initial_hash(&self) -> &str {
        &self.initial_hash
    }

    /// The fingerprint hash this chain was seeded from.
    pub fn fingerprint_hash(&self) -> &str {
        &self.fingerprint_hash
    }

    /// Wall-clock ms at chain creation.
    pub fn started_at_ms(&self) -> u64 {
        self.started_at_ms
    }

    pub fn len(&self) -> u64 {
        self.events.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn events(&self) -> &[EventRecord] {
        &self.events
    }

    pub fn checkpoints(&self) -> &[Checkpoint] {
        &self.checkpoints
    }

    /// Build the unsealed record for `input`: next sequence, submission
    /// timestamp (clamped to stay non-decreasing), current head as
    /// `previousHash`, empty PoSW and hash.
    pub fn draft(&self, input: EventInput, timestamp: u64) -> EventRecord {
        let timestamp = match self.events.last() {
            Some(last) => timestamp.max(last.timestamp),
            None => timestamp,
        };
        EventRecord {
            sequence: self.len(),
            timestamp,
            kind: input.kind,
            input_type: input.input_type,
            data: input.data,
            range_offset: input.range_offset,
            range_length: input.range_length,
            range: input.range,
            previous_hash: Some(self.head.clone()),
            posw: PoswProof::default(),
            hash: String::new(),
            description: input.description,
            is_multi_line: input.is_multi_line,
            deleted_length: input.deleted_length,
            inserted_text: input.inserted_text,
            insert_length: input.insert_length,
            delete_direction: input.delete_direction,
            selected_text: input.selected_text,
        }
    }

    /// Compute and set the record's final hash. The record must already
    /// carry its PoSW proof.
    pub fn seal(&self, record: &mut EventRecord) -> Result<()> {
        let preimage = record.hash_preimage()?;
        record.hash = hash::sha256_hex_parts(&[record.previous_hash_bytes(), &preimage]);
        Ok(())
    }

    /// Publish a sealed record: advance the head and emit a checkpoint on
    /// interval boundaries. The record lands in the vector in one step —
    /// readers never observe it half-built.
    pub fn append(&mut self, record: EventRecord) -> Result<Option<Checkpoint>> {
        debug_assert_eq!(record.sequence, self.len(), "sequence gap on append");
        debug_assert!(!record.hash.is_empty(), "append of unsealed record");

        self.head = record.hash.clone();
        let checkpoint = if Checkpoint::is_boundary(record.sequence, self.checkpoint_interval) {
            let checkpoint = Checkpoint::for_event(&record)?;
            debug!(event_index = checkpoint.event_index, "checkpoint emitted");
            self.checkpoints.push(checkpoint.clone());
            Some(checkpoint)
        } else {
            None
        };
        self.events.push(record);
        Ok(checkpoint)
    }

    /// Emit the closing checkpoint for the final event unless it already
    /// sits on a boundary (or was already emitted by a previous close).
    pub fn close_checkpoint(&mut self) -> Result<Option<Checkpoint>> {
        let last = match self.events.last() {
            Some(last) => last,
            None => return Ok(None),
        };
        let on_boundary = Checkpoint::is_boundary(last.sequence, self.checkpoint_interval);
        let already_emitted = self
            .checkpoints
            .last()
            .map(|c| c.event_index == last.sequence)
            .unwrap_or(false);
        if on_boundary || already_emitted {
            return Ok(None);
        }
        let checkpoint = Checkpoint::for_event(last)?;
        debug!(event_index = checkpoint.event_index, "closing checkpoint emitted");
        self.checkpoints.push(checkpoint.clone());
        Ok(Some(checkpoint))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventInput, EventKind, InputType};
    use crate::testutil::append_record;

    #[test]
    fn test_empty_chain_head_is_initial_hash() {
        let chain = Chain::new(&"f".repeat(64), 100);
        assert_eq!(chain.head(), chain.initial_hash());
        assert!(chain.is_empty());
    }

    #[test]
    fn test_append_links_and_advances_head() {
        let mut chain = Chain::new(&"f".repeat(64), 100);
        let first = append_record(
            &mut chain,
            EventInput::new(EventKind::EditorInitialized),
            0,
        );
        assert_eq!(first.sequence, 0);
        assert_eq!(first.previous_hash.as_deref(), Some(chain.initial_hash()));
        assert_eq!(chain.head(), first.hash);

        let second = append_record(
            &mut chain,
            EventInput::content_change(InputType::InsertText, "a"),
            10,
        );
        assert_eq!(second.sequence, 1);
        assert_eq!(second.previous_hash.as_deref(), Some(first.hash.as_str()));
        assert_eq!(chain.head(), second.hash);
    }

    #[test]
    fn test_timestamps_clamped_non_decreasing() {
        let mut chain = Chain::new(&"f".repeat(64), 100);
        append_record(&mut chain, EventInput::new(EventKind::EditorInitialized), 50);
        // A submission that raced and carries an older timestamp is clamped.
        let late = append_record(
            &mut chain,
            EventInput::content_change(InputType::InsertText, "b"),
            20,
        );
        assert_eq!(late.timestamp, 50);
    }

    #[test]
    fn test_checkpoint_on_interval_boundary() {
        let mut chain = Chain::new(&"f".repeat(64), 5);
        for i in 0..5 {
            append_record(
                &mut chain,
                EventInput::content_change(InputType::InsertText, "x"),
                i * 10,
            );
        }
        assert_eq!(chain.checkpoints().len(), 1);
        assert_eq!(chain.checkpoints()[0].event_index, 4);
        assert_eq!(chain.checkpoints()[0].hash, chain.events()[4].hash);
    }

    #[test]
    fn test_close_checkpoint_only_off_boundary() {
        let mut chain = Chain::new(&"f".repeat(64), 5);
        for i in 0..7 {
            append_record(
                &mut chain,
                EventInput::content_change(InputType::InsertText, "x"),
                i * 10,
            );
        }
        // Events 0..6: one interval checkpoint at 4, close adds one at 6.
        assert!(chain.close_checkpoint().unwrap().is_some());
        assert_eq!(chain.checkpoints().len(), 2);
        assert_eq!(chain.checkpoints()[1].event_index, 6);
        // A second close is a no-op.
        assert!(chain.close_checkpoint().unwrap().is_none());
        assert_eq!(chain.checkpoints().len(), 2);
    }

    #[test]
    fn test_close_checkpoint_noop_on_boundary_and_empty() {
        let mut chain = Chain::new(&"f".repeat(64), 3);
        assert!(chain.close_checkpoint().unwrap().is_none());
        for i in 0..3 {
            append_record(
                &mut chain,
                EventInput::content_change(InputType::InsertText, "x"),
                i,
            );
        }
        assert_eq!(chain.checkpoints().len(), 1);
        assert!(chain.close_checkpoint().unwrap().is_none());
    }
}
