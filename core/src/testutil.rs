//! Shared helpers for unit tests: synchronous chain building with a small
//! PoSW iteration count.

use crate::chain::Chain;
use crate::event::{EventInput, EventRecord, InputType};
use crate::posw;

/// Iteration count for test chains — small enough to build thousands of
/// events in a test run while still exercising the iterated-hash path.
pub const TEST_ITERATIONS: u32 = 3;

/// Drive the full builder pipeline synchronously for one input.
pub fn append_record(chain: &mut Chain, input: EventInput, timestamp: u64) -> EventRecord {
    let mut record = chain.draft(input, timestamp);
    let bytes = record.posw_preimage().expect("posw preimage");
    record.posw = posw::compute(
        record.previous_hash.as_deref().expect("drafts are linked"),
        &bytes,
        TEST_ITERATIONS,
    );
    chain.seal(&mut record).expect("seal record");
    chain
        .append(record.clone())
        .expect("append sealed record");
    record
}

/// A chain of `n` single-character typed inserts.
pub fn typed_chain(n: u64, checkpoint_interval: u64) -> Chain {
    let mut chain = Chain::new(&"f".repeat(64), checkpoint_interval);
    for i in 0..n {
        append_record(
            &mut chain,
            EventInput::content_change(InputType::InsertText, "x"),
            i * 7,
        );
    }
    chain
}
