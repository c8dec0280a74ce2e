//! Event model for the typing-proof chain
//!
//! An `EventRecord` is the chained unit: every field participates in its
//! hash except the META fields, which are carried for display and tooling
//! but stripped from every pre-image. The wire format is camelCase JSON so
//! that logs recorded here verify against logs recorded by other
//! implementations of the same protocol.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::canonical;
use crate::error::Result;
use crate::posw::PoswProof;

/// Kind of a recorded editor event. The wire tag participates in the hash.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventKind {
    ContentChange,
    ContentSnapshot,
    CursorPositionChange,
    SelectionChange,
    ExternalInput,
    EditorInitialized,
    MousePositionChange,
    VisibilityChange,
    FocusChange,
    KeyDown,
    KeyUp,
    WindowResize,
    NetworkStatusChange,
    CodeExecution,
    TerminalInput,
    ScreenshotCapture,
    ScreenShareStart,
    ScreenShareStop,
    HumanAttestation,
    PreExportAttestation,
    TermsAccepted,
    TemplateInjection,
}

impl EventKind {
    /// Every kind, for iteration in stats and tests.
    pub const ALL: [EventKind; 22] = [
        EventKind::ContentChange,
        EventKind::ContentSnapshot,
        EventKind::CursorPositionChange,
        EventKind::SelectionChange,
        EventKind::ExternalInput,
        EventKind::EditorInitialized,
        EventKind::MousePositionChange,
        EventKind::VisibilityChange,
        EventKind::FocusChange,
        EventKind::KeyDown,
        EventKind::KeyUp,
        EventKind::WindowResize,
        EventKind::NetworkStatusChange,
        EventKind::CodeExecution,
        EventKind::TerminalInput,
        EventKind::ScreenshotCapture,
        EventKind::ScreenShareStart,
        EventKind::ScreenShareStop,
        EventKind::HumanAttestation,
        EventKind::PreExportAttestation,
        EventKind::TermsAccepted,
        EventKind::TemplateInjection,
    ];

    /// The wire tag for this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::ContentChange => "contentChange",
            EventKind::ContentSnapshot => "contentSnapshot",
            EventKind::CursorPositionChange => "cursorPositionChange",
            EventKind::SelectionChange => "selectionChange",
            EventKind::ExternalInput => "externalInput",
            EventKind::EditorInitialized => "editorInitialized",
            EventKind::MousePositionChange => "mousePositionChange",
            EventKind::VisibilityChange => "visibilityChange",
            EventKind::FocusChange => "focusChange",
            EventKind::KeyDown => "keyDown",
            EventKind::KeyUp => "keyUp",
            EventKind::WindowResize => "windowResize",
            EventKind::NetworkStatusChange => "networkStatusChange",
            EventKind::CodeExecution => "codeExecution",
            EventKind::TerminalInput => "terminalInput",
            EventKind::ScreenshotCapture => "screenshotCapture",
            EventKind::ScreenShareStart => "screenShareStart",
            EventKind::ScreenShareStop => "screenShareStop",
            EventKind::HumanAttestation => "humanAttestation",
            EventKind::PreExportAttestation => "preExportAttestation",
            EventKind::TermsAccepted => "termsAccepted",
            EventKind::TemplateInjection => "templateInjection",
        }
    }
}

/// Sub-tag for edit operations, mirroring the editor's input types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum InputType {
    InsertText,
    InsertLineBreak,
    InsertFromPaste,
    InsertFromDrop,
    DeleteContentBackward,
    DeleteContentForward,
    DeleteByCut,
    HistoryUndo,
    HistoryRedo,
}

impl InputType {
    /// The wire tag for this input type.
    pub fn as_str(&self) -> &'static str {
        match self {
            InputType::InsertText => "insertText",
            InputType::InsertLineBreak => "insertLineBreak",
            InputType::InsertFromPaste => "insertFromPaste",
            InputType::InsertFromDrop => "insertFromDrop",
            InputType::DeleteContentBackward => "deleteContentBackward",
            InputType::DeleteContentForward => "deleteContentForward",
            InputType::DeleteByCut => "deleteByCut",
            InputType::HistoryUndo => "historyUndo",
            InputType::HistoryRedo => "historyRedo",
        }
    }

    /// True for text-inserting operations originating from typing.
    pub fn is_typed_insert(&self) -> bool {
        matches!(self, InputType::InsertText | InputType::InsertLineBreak)
    }

    /// True for content-removing operations.
    pub fn is_delete(&self) -> bool {
        matches!(
            self,
            InputType::DeleteContentBackward
                | InputType::DeleteContentForward
                | InputType::DeleteByCut
        )
    }
}

/// Editor range touched by an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Range {
    pub start_line: u32,
    pub start_col: u32,
    pub end_line: u32,
    pub end_col: u32,
}

/// Keystroke descriptor for `keyDown` / `keyUp`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct KeyInfo {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// Pointer coordinates for `mousePositionChange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MousePos {
    pub x: i64,
    pub y: i64,
}

/// Page visibility for `visibilityChange`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VisibilityState {
    pub visible: bool,
}

/// Reference to a captured screenshot. Capture itself is external; the
/// chain commits to the image only through this hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ScreenshotRef {
    pub screenshot_hash: String,
}

/// Signed token from the human-attestation service.
///
/// The core stores this opaquely — the signature is validated elsewhere.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct AttestationToken {
    pub verified: bool,
    pub score: f64,
    pub action: String,
    pub timestamp: u64,
    pub hostname: String,
    pub signature: String,
}

/// Kind-dependent event payload.
///
/// Untagged on the wire: the `type` field of the enclosing record already
/// disambiguates, and encoding a second tag would change the hash
/// pre-image. The typed variants reject unknown fields so that arbitrary
/// structured payloads fall through to `Json` and round-trip losslessly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventPayload {
    /// Plain text: content edits, code execution, terminal input.
    Text(String),
    /// Keystroke descriptor.
    Key(KeyInfo),
    /// Pointer coordinates.
    Mouse(MousePos),
    /// Page visibility.
    Visibility(VisibilityState),
    /// Screenshot reference (hash only).
    Screenshot(ScreenshotRef),
    /// Signed human-attestation token.
    Attestation(AttestationToken),
    /// Any other structured payload.
    Json(Value),
}

impl EventPayload {
    /// The retained text for text payloads, if any.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            EventPayload::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// META field names on the record, stripped from every hash pre-image.
const META_FIELDS: [&str; 7] = [
    "description",
    "isMultiLine",
    "deletedLength",
    "insertedText",
    "insertLength",
    "deleteDirection",
    "selectedText",
];

/// A single chained event.
///
/// Records never mutate after append: the builder fills `posw` and `hash`
/// before the record becomes visible to any reader. Modifying any hashed
/// field afterwards invalidates `hash` and every later `previousHash`,
/// which the verifier detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventRecord {
    /// 0-based position in the chain; strictly monotonic and gap-free.
    pub sequence: u64,
    /// Milliseconds since chain start; monotonically non-decreasing.
    pub timestamp: u64,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    /// Chain head observed when this record was built — the initial hash
    /// for sequence 0.
    pub previous_hash: Option<String>,
    pub posw: PoswProof,
    /// Final record hash committing all non-META fields above.
    pub hash: String,

    // META: serialized for display and downstream tooling, never hashed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_multi_line: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

impl EventRecord {
    /// The previous hash as a byte slice for hashing; empty only for
    /// records that were never linked (which the builder never produces).
    pub fn previous_hash_bytes(&self) -> &[u8] {
        self.previous_hash.as_deref().unwrap_or("").as_bytes()
    }

    /// Canonical bytes fed to PoSW: the record without `posw`, `hash`,
    /// and META.
    pub fn posw_preimage(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        strip_meta(&mut value);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("hash");
            obj.remove("posw");
        }
        canonical::canonical_bytes(&value)
    }

    /// Canonical bytes of the record as hashed: `posw` included (minus its
    /// META `computeTimeMs`), `hash` and META stripped.
    pub fn hash_preimage(&self) -> Result<Vec<u8>> {
        let mut value = serde_json::to_value(self)?;
        strip_meta(&mut value);
        if let Some(obj) = value.as_object_mut() {
            obj.remove("hash");
        }
        canonical::canonical_bytes(&value)
    }
}

fn strip_meta(value: &mut Value) {
    if let Some(obj) = value.as_object_mut() {
        for key in META_FIELDS {
            obj.remove(key);
        }
        if let Some(posw) = obj.get_mut("posw").and_then(Value::as_object_mut) {
            posw.remove("computeTimeMs");
        }
    }
}

/// Caller-facing input for `recordEvent`: the event minus everything the
/// chain builder assigns (sequence, timestamp, linkage, PoSW, hash).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInput {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_type: Option<InputType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<EventPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Range>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_multi_line: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inserted_text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insert_length: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_direction: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_text: Option<String>,
}

impl EventInput {
    /// A bare event of the given kind.
    pub fn new(kind: EventKind) -> Self {
        Self {
            kind,
            input_type: None,
            data: None,
            range_offset: None,
            range_length: None,
            range: None,
            description: None,
            is_multi_line: None,
            deleted_length: None,
            inserted_text: None,
            insert_length: None,
            delete_direction: None,
            selected_text: None,
        }
    }

    /// A content edit carrying the edited text.
    pub fn content_change(input_type: InputType, text: impl Into<String>) -> Self {
        let mut input = Self::new(EventKind::ContentChange);
        input.input_type = Some(input_type);
        input.data = Some(EventPayload::Text(text.into()));
        input
    }

    /// An external input (paste or drop) carrying the inserted text.
    pub fn external_input(input_type: InputType, text: impl Into<String>) -> Self {
        let mut input = Self::new(EventKind::ExternalInput);
        input.input_type = Some(input_type);
        input.data = Some(EventPayload::Text(text.into()));
        input
    }

    /// A full-content snapshot.
    pub fn content_snapshot(content: impl Into<String>) -> Self {
        let mut input = Self::new(EventKind::ContentSnapshot);
        input.data = Some(EventPayload::Text(content.into()));
        input
    }

    /// A keystroke event.
    pub fn key(kind: EventKind, key: impl Into<String>) -> Self {
        let mut input = Self::new(kind);
        input.data = Some(EventPayload::Key(KeyInfo {
            key: key.into(),
            code: None,
        }));
        input
    }

    /// A human-attestation event (#0 only — enforced by the recorder).
    pub fn human_attestation(token: AttestationToken) -> Self {
        let mut input = Self::new(EventKind::HumanAttestation);
        input.data = Some(EventPayload::Attestation(token));
        input
    }

    /// A pre-export attestation event, allowed at any index.
    pub fn pre_export_attestation(token: AttestationToken) -> Self {
        let mut input = Self::new(EventKind::PreExportAttestation);
        input.data = Some(EventPayload::Attestation(token));
        input
    }
}
