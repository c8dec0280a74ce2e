//! Typing-proof hash and export artifacts
//!
//! The typing proof binds the final editor content, the chain head, and the
//! device identity into a single hash. The exported file embeds the full
//! event log plus checkpoints so it verifies offline, in whole or sampled.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical;
use crate::checkpoint::Checkpoint;
use crate::error::Result;
use crate::event::EventRecord;
use crate::hash;
use crate::stats::{self, EventStats};
use crate::verify::{self, FullVerification};

/// Export file format version. Part of the wire contract.
pub const PROOF_FORMAT_VERSION: &str = "3.2.0";

/// Device fingerprint as provided by the external fingerprint collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fingerprint {
    /// Opaque hex string identifying the device.
    pub hash: String,
    /// Collaborator-defined component breakdown; stored verbatim.
    #[serde(default = "empty_components")]
    pub components: Value,
}

fn empty_components() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Fingerprint {
    /// A fingerprint with no component breakdown.
    pub fn from_hash(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            components: empty_components(),
        }
    }
}

/// Aggregate counters embedded in the typing proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofMetadata {
    pub total_events: u64,
    pub paste_events: u64,
    pub drop_events: u64,
    pub insert_events: u64,
    pub delete_events: u64,
    pub total_typing_time: u64,
    pub average_typing_speed: f64,
}

impl ProofMetadata {
    pub fn from_stats(stats: &EventStats) -> Self {
        Self {
            total_events: stats.total_events,
            paste_events: stats.paste_events,
            drop_events: stats.drop_events,
            insert_events: stats.insert_events,
            delete_events: stats.delete_events,
            total_typing_time: stats.total_typing_time,
            average_typing_speed: stats.average_typing_speed,
        }
    }
}

/// The hashed core of the typing proof.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingProofData {
    pub final_content_hash: String,
    pub final_event_chain_hash: String,
    pub device_id: String,
    pub metadata: ProofMetadata,
}

/// `H(canonical(proofData))` — the single hash a relying party pins.
pub fn typing_proof_hash(data: &TypingProofData) -> Result<String> {
    Ok(hash::sha256_hex(&canonical::canonical_bytes(data)?))
}

/// Compact summary for UI display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompactSummary {
    pub typing_proof_hash: String,
    pub total_events: u64,
    /// True when the chain has zero paste and zero drop events.
    pub is_pure_typing: bool,
}

/// The sealed event log inside an export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProofEnvelope {
    pub total_events: u64,
    /// The chain head (initial hash for an empty chain).
    pub final_hash: String,
    /// Wall-clock ms at chain creation.
    pub start_time: u64,
    /// Wall-clock ms at export.
    pub end_time: u64,
    /// Self-seal over the envelope header — see [`seal_signature`].
    pub signature: String,
    pub events: Vec<EventRecord>,
}

/// Export-level metadata, outside every hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportMetadata {
    pub user_agent: String,
    /// Wall-clock ms when the export was assembled.
    pub timestamp: u64,
    pub is_pure_typing: bool,
}

/// A single-tab exported proof file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedProof {
    pub version: String,
    pub typing_proof_hash: String,
    pub typing_proof_data: TypingProofData,
    pub proof: ProofEnvelope,
    pub fingerprint: Fingerprint,
    pub metadata: ExportMetadata,
    pub checkpoints: Vec<Checkpoint>,
}

/// Multi-file export: one embedded proof per filename.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MultiFileExport {
    pub version: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub fingerprint: Fingerprint,
    pub files: BTreeMap<String, ExportedProof>,
    pub tab_switches: u64,
    pub metadata: ExportMetadata,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SealHeader<'a> {
    total_events: u64,
    final_hash: &'a str,
    start_time: u64,
    end_time: u64,
}

/// The envelope's self-seal: `H(canonical({totalEvents, finalHash,
/// startTime, endTime}))`. Not a cryptographic signature — it detects
/// accidental header edits, nothing more.
pub fn seal_signature(
    total_events: u64,
    final_hash: &str,
    start_time: u64,
    end_time: u64,
) -> Result<String> {
    let header = SealHeader {
        total_events,
        final_hash,
        start_time,
        end_time,
    };
    Ok(hash::sha256_hex(&canonical::canonical_bytes(&header)?))
}

/// Assemble a single-tab export from a finished chain.
///
/// The caller (recorder) has already emitted the closing checkpoint.
#[allow(clippy::too_many_arguments)]
pub fn build_export(
    events: &[EventRecord],
    checkpoints: &[Checkpoint],
    chain_head: &str,
    fingerprint: &Fingerprint,
    final_content: &str,
    started_at_ms: u64,
    user_agent: &str,
) -> Result<ExportedProof> {
    let stats = stats::collect(events);
    let metadata = ProofMetadata::from_stats(&stats);
    let is_pure_typing = stats.paste_events == 0 && stats.drop_events == 0;

    let data = TypingProofData {
        final_content_hash: hash::sha256_hex(final_content.as_bytes()),
        final_event_chain_hash: chain_head.to_string(),
        device_id: fingerprint.hash.clone(),
        metadata,
    };
    let proof_hash = typing_proof_hash(&data)?;

    let now_ms = chrono::Utc::now().timestamp_millis() as u64;
    let end_time = started_at_ms + events.last().map(|e| e.timestamp).unwrap_or(0);
    let total_events = events.len() as u64;

    Ok(ExportedProof {
        version: PROOF_FORMAT_VERSION.to_string(),
        typing_proof_hash: proof_hash,
        typing_proof_data: data,
        proof: ProofEnvelope {
            total_events,
            final_hash: chain_head.to_string(),
            start_time: started_at_ms,
            end_time,
            signature: seal_signature(total_events, chain_head, started_at_ms, end_time)?,
            events: events.to_vec(),
        },
        fingerprint: fingerprint.clone(),
        metadata: ExportMetadata {
            user_agent: user_agent.to_string(),
            timestamp: now_ms,
            is_pure_typing,
        },
        checkpoints: checkpoints.to_vec(),
    })
}

/// Assemble a multi-file export from per-filename proofs.
pub fn build_multi_file(
    fingerprint: &Fingerprint,
    files: BTreeMap<String, ExportedProof>,
    tab_switches: u64,
    user_agent: &str,
) -> MultiFileExport {
    let is_pure_typing = files.values().all(|p| p.metadata.is_pure_typing);
    MultiFileExport {
        version: PROOF_FORMAT_VERSION.to_string(),
        kind: "multi-file".to_string(),
        fingerprint: fingerprint.clone(),
        files,
        tab_switches,
        metadata: ExportMetadata {
            user_agent: user_agent.to_string(),
            timestamp: chrono::Utc::now().timestamp_millis() as u64,
            is_pure_typing,
        },
    }
}

/// Compact summary of an exported proof.
pub fn compact_summary(export: &ExportedProof) -> CompactSummary {
    CompactSummary {
        typing_proof_hash: export.typing_proof_hash.clone(),
        total_events: export.proof.total_events,
        is_pure_typing: export.metadata.is_pure_typing,
    }
}

/// Result of verifying an exported proof file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportVerification {
    pub valid: bool,
    /// Chain verification over the embedded events.
    pub chain: FullVerification,
    /// Recomputed typing-proof hash matches the stated one.
    pub typing_proof_hash_valid: bool,
    /// `H(content)` matches `finalContentHash`; `None` when no content was
    /// supplied.
    pub content_hash_valid: Option<bool>,
    /// Envelope self-seal recomputes.
    pub seal_valid: bool,
    /// `finalEventChainHash` / `finalHash` agree with the embedded chain.
    pub head_valid: bool,
}

/// The non-chain checks of an export, shared by full and sampled
/// verification paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingVerification {
    pub typing_proof_hash_valid: bool,
    pub content_hash_valid: Option<bool>,
    pub seal_valid: bool,
    pub head_valid: bool,
}

impl BindingVerification {
    pub fn all_valid(&self) -> bool {
        self.typing_proof_hash_valid
            && self.content_hash_valid.unwrap_or(true)
            && self.seal_valid
            && self.head_valid
    }
}

/// Recompute the typing-proof hash, optional content hash, self-seal, and
/// head consistency of an export — everything except the per-event chain
/// walk.
pub fn verify_bindings(
    export: &ExportedProof,
    final_content: Option<&str>,
) -> BindingVerification {
    let typing_proof_hash_valid = typing_proof_hash(&export.typing_proof_data)
        .map(|h| h == export.typing_proof_hash)
        .unwrap_or(false);

    let content_hash_valid = final_content.map(|content| {
        hash::sha256_hex(content.as_bytes()) == export.typing_proof_data.final_content_hash
    });

    let seal_valid = seal_signature(
        export.proof.total_events,
        &export.proof.final_hash,
        export.proof.start_time,
        export.proof.end_time,
    )
    .map(|s| s == export.proof.signature)
    .unwrap_or(false);

    let head_valid = {
        let declared = &export.typing_proof_data.final_event_chain_hash;
        let envelope_agrees = *declared == export.proof.final_hash;
        let chain_agrees = match export.proof.events.last() {
            Some(last) => last.hash == *declared,
            // Empty chain: the head is the initial hash, which the export
            // carries only here.
            None => true,
        };
        envelope_agrees
            && chain_agrees
            && export.proof.total_events == export.proof.events.len() as u64
    };

    BindingVerification {
        typing_proof_hash_valid,
        content_hash_valid,
        seal_valid,
        head_valid,
    }
}

/// Verify an exported proof offline: chain, typing-proof hash, optional
/// content hash, self-seal, and head consistency.
pub fn verify_export(export: &ExportedProof, final_content: Option<&str>) -> ExportVerification {
    let chain = verify::verify_full(&export.proof.events);
    let bindings = verify_bindings(export, final_content);

    ExportVerification {
        valid: chain.valid && bindings.all_valid(),
        chain,
        typing_proof_hash_valid: bindings.typing_proof_hash_valid,
        content_hash_valid: bindings.content_hash_valid,
        seal_valid: bindings.seal_valid,
        head_valid: bindings.head_valid,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::typed_chain;

    fn export_from(n: u64, content: &str) -> ExportedProof {
        let mut chain = typed_chain(n, 5);
        chain.close_checkpoint().unwrap();
        build_export(
            chain.events(),
            chain.checkpoints(),
            chain.head(),
            &Fingerprint::from_hash("d".repeat(64)),
            content,
            chain.started_at_ms(),
            "keywitness-test",
        )
        .unwrap()
    }

    #[test]
    fn test_export_verifies_end_to_end() {
        let export = export_from(12, "const x = 1;\n");
        let report = verify_export(&export, Some("const x = 1;\n"));
        assert!(report.valid, "{:?}", report);
        assert_eq!(report.content_hash_valid, Some(true));
    }

    #[test]
    fn test_empty_chain_export_is_well_formed() {
        let chain = typed_chain(0, 100);
        let export = build_export(
            chain.events(),
            chain.checkpoints(),
            chain.head(),
            &Fingerprint::from_hash("d".repeat(64)),
            "",
            chain.started_at_ms(),
            "keywitness-test",
        )
        .unwrap();
        // The head of an empty chain is the initial hash.
        assert_eq!(
            export.typing_proof_data.final_event_chain_hash,
            chain.initial_hash()
        );
        assert!(verify_export(&export, Some("")).valid);
    }

    #[test]
    fn test_typing_proof_hash_changes_with_content() {
        let a = export_from(3, "aaa");
        let b = export_from(3, "bbb");
        assert_ne!(a.typing_proof_hash, b.typing_proof_hash);
    }

    #[test]
    fn test_wrong_content_detected() {
        let export = export_from(5, "real content");
        let report = verify_export(&export, Some("other content"));
        assert!(!report.valid);
        assert_eq!(report.content_hash_valid, Some(false));
    }

    #[test]
    fn test_tampered_metadata_breaks_proof_hash() {
        let mut export = export_from(5, "content");
        export.typing_proof_data.metadata.paste_events = 0;
        export.typing_proof_data.metadata.insert_events += 1;
        let report = verify_export(&export, Some("content"));
        assert!(!report.typing_proof_hash_valid);
        assert!(!report.valid);
    }

    #[test]
    fn test_tampered_seal_header_detected() {
        let mut export = export_from(5, "content");
        export.proof.start_time += 1;
        let report = verify_export(&export, Some("content"));
        assert!(!report.seal_valid);
    }

    #[test]
    fn test_truncated_chain_is_valid_prefix_with_new_proof_hash() {
        let mut chain = typed_chain(9, 100);
        let full_export = build_export(
            chain.events(),
            chain.checkpoints(),
            chain.head(),
            &Fingerprint::from_hash("d".repeat(64)),
            "content",
            chain.started_at_ms(),
            "keywitness-test",
        )
        .unwrap();

        // Drop the last event: the prefix still verifies on its own, but
        // the typing proof no longer matches.
        let prefix: Vec<_> = chain.events()[..8].to_vec();
        assert!(verify::verify_full(&prefix).valid);

        chain.close_checkpoint().unwrap();
        let prefix_head = prefix.last().unwrap().hash.clone();
        let prefix_export = build_export(
            &prefix,
            &[],
            &prefix_head,
            &Fingerprint::from_hash("d".repeat(64)),
            "content",
            chain.started_at_ms(),
            "keywitness-test",
        )
        .unwrap();
        assert_ne!(
            prefix_export.typing_proof_hash,
            full_export.typing_proof_hash
        );
    }

    #[test]
    fn test_export_roundtrip_canonical_bytes() {
        let export = export_from(7, "abc");
        let encoded = canonical::canonical_string(&export).unwrap();
        let parsed: ExportedProof = serde_json::from_str(&encoded).unwrap();
        let re_encoded = canonical::canonical_string(&parsed).unwrap();
        assert_eq!(encoded, re_encoded);
        assert_eq!(parsed, export);
    }

    #[test]
    fn test_multi_file_export_purity() {
        let mut files = BTreeMap::new();
        files.insert("main.rs".to_string(), export_from(4, "fn main() {}"));
        let multi = build_multi_file(
            &Fingerprint::from_hash("d".repeat(64)),
            files,
            2,
            "keywitness-test",
        );
        assert_eq!(multi.kind, "multi-file");
        assert_eq!(multi.version, PROOF_FORMAT_VERSION);
        assert!(multi.metadata.is_pure_typing);
        assert_eq!(multi.tab_switches, 2);
    }

    #[test]
    fn test_compact_summary() {
        let export = export_from(6, "x");
        let summary = compact_summary(&export);
        assert_eq!(summary.typing_proof_hash, export.typing_proof_hash);
        assert_eq!(summary.total_events, 6);
        assert!(summary.is_pure_typing);
    }
}
