//! Statistics derived from the event log
//!
//! A pure function over the recorded events, used by both the live stats
//! surface and the export path. Counting rules: paste and drop come from
//! the `inputType` sub-tag, inserts are typed insertions only (paste and
//! drop excluded), deletes cover all delete variants, and template events
//! count `templateInjection` records.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::event::{EventKind, EventRecord, InputType};

/// Aggregate counters over one chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventStats {
    pub total_events: u64,
    pub paste_events: u64,
    pub drop_events: u64,
    pub insert_events: u64,
    pub delete_events: u64,
    pub template_events: u64,
    /// Last minus first timestamp, in milliseconds.
    pub total_typing_time: u64,
    /// Typed insertions per minute, rounded to one decimal place.
    pub average_typing_speed: f64,
    /// Count per event kind, keyed by the wire tag.
    pub event_types: BTreeMap<String, u64>,
}

/// Derive statistics from the event list.
pub fn collect(events: &[EventRecord]) -> EventStats {
    let mut stats = EventStats::default();
    stats.total_events = events.len() as u64;

    for event in events {
        *stats
            .event_types
            .entry(event.kind.as_str().to_string())
            .or_insert(0) += 1;

        match event.input_type {
            Some(InputType::InsertFromPaste) => stats.paste_events += 1,
            Some(InputType::InsertFromDrop) => stats.drop_events += 1,
            Some(input_type) if input_type.is_typed_insert() => stats.insert_events += 1,
            Some(input_type) if input_type.is_delete() => stats.delete_events += 1,
            _ => {}
        }

        if event.kind == EventKind::TemplateInjection {
            stats.template_events += 1;
        }
    }

    if let (Some(first), Some(last)) = (events.first(), events.last()) {
        stats.total_typing_time = last.timestamp.saturating_sub(first.timestamp);
    }

    stats.average_typing_speed = average_speed(stats.insert_events, stats.total_typing_time);
    stats
}

/// Typed insertions per minute, rounded to 0.1. Zero when the log spans no
/// measurable time.
fn average_speed(insert_events: u64, duration_ms: u64) -> f64 {
    if duration_ms == 0 {
        return 0.0;
    }
    let minutes = duration_ms as f64 / 60_000.0;
    let raw = insert_events as f64 / minutes;
    (raw * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::event::EventInput;
    use crate::testutil::append_record;

    #[test]
    fn test_empty_log_is_all_zeros() {
        let stats = collect(&[]);
        assert_eq!(stats.total_events, 0);
        assert_eq!(stats.total_typing_time, 0);
        assert_eq!(stats.average_typing_speed, 0.0);
        assert!(stats.event_types.is_empty());
    }

    #[test]
    fn test_counts_by_input_type() {
        let mut chain = Chain::new(&"f".repeat(64), 100);
        append_record(&mut chain, EventInput::new(EventKind::EditorInitialized), 0);
        for i in 0..4 {
            append_record(
                &mut chain,
                EventInput::content_change(InputType::InsertText, "a"),
                10 + i,
            );
        }
        append_record(
            &mut chain,
            EventInput::content_change(InputType::DeleteContentBackward, ""),
            20,
        );
        append_record(
            &mut chain,
            EventInput::external_input(InputType::InsertFromPaste, "hello"),
            30,
        );
        append_record(
            &mut chain,
            EventInput::external_input(InputType::InsertFromDrop, "dropped"),
            40,
        );

        let stats = collect(chain.events());
        assert_eq!(stats.total_events, 8);
        assert_eq!(stats.insert_events, 4);
        assert_eq!(stats.delete_events, 1);
        assert_eq!(stats.paste_events, 1);
        assert_eq!(stats.drop_events, 1);
        assert_eq!(stats.event_types["contentChange"], 5);
        assert_eq!(stats.event_types["externalInput"], 2);
        assert_eq!(stats.event_types["editorInitialized"], 1);
    }

    #[test]
    fn test_duration_and_speed() {
        let mut chain = Chain::new(&"f".repeat(64), 100);
        // 30 typed inserts over exactly one minute.
        for i in 0..30 {
            append_record(
                &mut chain,
                EventInput::content_change(InputType::InsertText, "a"),
                i * 60_000 / 29,
            );
        }
        let stats = collect(chain.events());
        assert_eq!(stats.total_typing_time, 60_000);
        assert_eq!(stats.average_typing_speed, 30.0);
    }

    #[test]
    fn test_speed_rounding() {
        assert_eq!(average_speed(1, 9_000), 6.7);
        assert_eq!(average_speed(7, 120_000), 3.5);
        assert_eq!(average_speed(0, 60_000), 0.0);
    }
}
