//! Block documents and the content-shape normalization policy.
//!
//! Editor content reaches us in several shapes: a well-formed block document,
//! a JSON-encoded *string* of one (double-serialized by older clients), a
//! partially-shaped object, or nothing at all. [`BlockDocument::normalize`]
//! folds every shape into the canonical form so the rest of the engine never
//! sees a malformed document:
//!
//! ```text
//!   raw content
//!       │
//!       ├── object with array "blocks" ──→ preserve blocks,
//!       │                                  default missing time/version
//!       ├── string ──→ parse as JSON ──→ re-apply the rule above
//!       │                  └── parse failed ──→ single paragraph block
//!       └── anything else (null, {}, …) ──→ {time: now, version, blocks: []}
//! ```
//!
//! The cache-preference rule (prefer a fresh local snapshot over degenerate
//! server content) sits one layer up, in the engine — it needs the cache.
//!
//! Block payloads stay as raw JSON ([`Block::data`]); the engine only takes
//! typed views ([`NestedDocumentRef`], [`TaskData`]) of the kinds it edits,
//! so unknown block types round-trip untouched.

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::EnumString;

use crate::ids::DocumentId;
use crate::now_ms;

/// Schema version stamped on documents this crate creates.
///
/// Matches the block-editor schema the stored content originates from;
/// normalization fills it in when the stored shape predates versioning.
pub const BLOCK_SCHEMA_VERSION: &str = "2.28.2";

fn default_version() -> String {
    BLOCK_SCHEMA_VERSION.to_string()
}

fn to_json_value<T: Serialize>(v: &T) -> Value {
    // Only reachable with plain struct fields; Null is the safe fallback.
    serde_json::to_value(v).unwrap_or(Value::Null)
}

// ── Block kind ──────────────────────────────────────────────────────────────

/// Block type discriminator — the `"type"` field on the wire.
///
/// The set is open: the editor ships tools we never touch, and stored
/// documents may carry kinds from plugins we've never heard of. Unknown
/// kinds are preserved verbatim via [`BlockKind::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, EnumString)]
pub enum BlockKind {
    #[strum(serialize = "paragraph")]
    Paragraph,
    #[strum(serialize = "header")]
    Header,
    #[strum(serialize = "list")]
    List,
    #[strum(serialize = "checklist")]
    Checklist,
    #[strum(serialize = "image")]
    Image,
    #[strum(serialize = "table")]
    Table,
    #[strum(serialize = "quote")]
    Quote,
    #[strum(serialize = "code")]
    Code,
    #[strum(serialize = "delimiter")]
    Delimiter,
    /// Reference to a child document. Payload: [`NestedDocumentRef`].
    #[strum(serialize = "nestedDocument")]
    NestedDocument,
    /// Checklist item with metadata. Payload: [`TaskData`].
    #[strum(serialize = "task")]
    Task,
    /// Any other block type — carried through untouched.
    #[strum(default)]
    Other(String),
}

impl BlockKind {
    /// Parse from the wire string. Never fails; unknown names become `Other`.
    pub fn from_name(s: &str) -> Self {
        <Self as FromStr>::from_str(s).unwrap_or_else(|_| BlockKind::Other(s.to_string()))
    }

    /// The wire string (`"type"` field value).
    pub fn as_str(&self) -> &str {
        match self {
            BlockKind::Paragraph => "paragraph",
            BlockKind::Header => "header",
            BlockKind::List => "list",
            BlockKind::Checklist => "checklist",
            BlockKind::Image => "image",
            BlockKind::Table => "table",
            BlockKind::Quote => "quote",
            BlockKind::Code => "code",
            BlockKind::Delimiter => "delimiter",
            BlockKind::NestedDocument => "nestedDocument",
            BlockKind::Task => "task",
            BlockKind::Other(s) => s,
        }
    }
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for BlockKind {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for BlockKind {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(BlockKind::from_name(&s))
    }
}

// ── Block ───────────────────────────────────────────────────────────────────

/// One editor block: a kind discriminator plus a kind-specific payload.
///
/// `data` is raw JSON on purpose — the engine edits only the payloads it
/// understands and must not corrupt the rest.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Block {
    /// Editor-assigned block id, absent on blocks that predate ids.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: BlockKind,
    #[serde(default = "empty_object")]
    pub data: Value,
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

impl Block {
    pub fn new(kind: BlockKind, data: Value) -> Self {
        Self {
            id: None,
            kind,
            data,
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// A paragraph block wrapping plain text.
    pub fn paragraph(text: &str) -> Self {
        Self::new(BlockKind::Paragraph, serde_json::json!({ "text": text }))
    }

    /// A nested-document block carrying the given reference.
    pub fn nested_document(reference: &NestedDocumentRef) -> Self {
        Self::new(BlockKind::NestedDocument, reference.to_data())
    }

    /// A task block carrying the given payload.
    pub fn task(task: &TaskData) -> Self {
        Self::new(BlockKind::Task, task.to_data())
    }

    /// Typed view of a nested-document payload.
    ///
    /// `None` for other kinds or when the payload is unusable. A present but
    /// empty/unparseable `id` still yields a reference (with `id: None`) —
    /// that is the legitimate "not yet created" state.
    pub fn nested_ref(&self) -> Option<NestedDocumentRef> {
        if self.kind != BlockKind::NestedDocument {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Replace the payload with the given nested-document reference.
    pub fn set_nested_ref(&mut self, reference: &NestedDocumentRef) {
        self.data = reference.to_data();
    }

    /// Typed view of a task payload. `None` for other kinds.
    pub fn task_data(&self) -> Option<TaskData> {
        if self.kind != BlockKind::Task {
            return None;
        }
        serde_json::from_value(self.data.clone()).ok()
    }

    /// Replace the payload with the given task data.
    pub fn set_task_data(&mut self, task: &TaskData) {
        self.data = task.to_data();
    }
}

// ── Typed payloads ──────────────────────────────────────────────────────────

/// Payload of a `nestedDocument` block: a denormalized reference to a child
/// document.
///
/// `id` is `None` in the transient "not yet created" state (and for stored
/// payloads whose id field is empty or unparseable — recovered/partial data).
/// `title` is a last-known copy of the child's title; the engine self-heals
/// it against the authoritative value opportunistically.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NestedDocumentRef {
    #[serde(
        default,
        deserialize_with = "lenient_document_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub id: Option<DocumentId>,
    #[serde(default)]
    pub title: String,
}

/// Accept missing, null, empty, or malformed ids as "not yet created".
fn lenient_document_id<'de, D>(deserializer: D) -> Result<Option<DocumentId>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::String(s)) if !s.is_empty() => DocumentId::parse(&s).ok(),
        _ => None,
    })
}

impl NestedDocumentRef {
    /// A reference that is not yet backed by a document.
    pub fn pending(title: impl Into<String>) -> Self {
        Self {
            id: None,
            title: title.into(),
        }
    }

    /// A reference linked to an existing document.
    pub fn linked(id: DocumentId, title: impl Into<String>) -> Self {
        Self {
            id: Some(id),
            title: title.into(),
        }
    }

    /// Whether the referenced document exists (has an id).
    pub fn is_linked(&self) -> bool {
        self.id.is_some()
    }

    /// Serialize back into block payload JSON.
    pub fn to_data(&self) -> Value {
        to_json_value(self)
    }
}

fn is_false(b: &bool) -> bool {
    !*b
}

/// Payload of a `task` block: a checklist item with scheduling metadata.
///
/// Everything beyond `text`/`checked` is optional and serde-defaulted so
/// partial payloads written by older clients round-trip losslessly.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskData {
    pub text: String,
    pub checked: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deadline: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub assignees: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reminder: Option<String>,
    #[serde(skip_serializing_if = "is_false")]
    pub expanded: bool,
}

impl TaskData {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    /// Flip the checked state.
    pub fn toggle(&mut self) {
        self.checked = !self.checked;
    }

    /// Serialize back into block payload JSON.
    pub fn to_data(&self) -> Value {
        to_json_value(self)
    }
}

// ── Block document ──────────────────────────────────────────────────────────

/// The canonical editor content: a timestamped, versioned, ordered block list.
///
/// Invariant: `blocks` is always present (possibly empty) — anything that
/// holds a `BlockDocument` may assume it is well-formed. [`normalize`] is the
/// only way in for untrusted shapes.
///
/// [`normalize`]: BlockDocument::normalize
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockDocument {
    /// Creation/modification time, epoch milliseconds.
    #[serde(default = "now_ms")]
    pub time: i64,
    /// Editor schema version.
    #[serde(default = "default_version")]
    pub version: String,
    /// Ordered blocks; order is vertical position in the document.
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl Default for BlockDocument {
    fn default() -> Self {
        Self::empty()
    }
}

impl BlockDocument {
    /// A well-formed empty document stamped with the current time.
    pub fn empty() -> Self {
        Self {
            time: now_ms(),
            version: BLOCK_SCHEMA_VERSION.to_string(),
            blocks: Vec::new(),
        }
    }

    /// A document from the given blocks, current time, current schema.
    pub fn from_blocks(blocks: Vec<Block>) -> Self {
        Self {
            time: now_ms(),
            version: BLOCK_SCHEMA_VERSION.to_string(),
            blocks,
        }
    }

    /// Fold any stored content shape into a well-formed document.
    ///
    /// Total: never fails, never panics. See the module docs for the policy.
    /// Malformed entries inside an otherwise valid `blocks` array are dropped
    /// rather than poisoning the whole document.
    pub fn normalize(raw: &Value) -> Self {
        match raw {
            Value::Object(map) => match map.get("blocks") {
                Some(Value::Array(entries)) => {
                    let blocks = entries
                        .iter()
                        .filter_map(|entry| serde_json::from_value::<Block>(entry.clone()).ok())
                        .collect();
                    Self {
                        time: map.get("time").and_then(value_as_ms).unwrap_or_else(now_ms),
                        version: map
                            .get("version")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                            .unwrap_or_else(default_version),
                        blocks,
                    }
                }
                // Object without a blocks array: partially shaped, start over.
                _ => Self::empty(),
            },
            // Double-serialized content: parse and re-apply the rules above.
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(inner) => Self::normalize(&inner),
                Err(_) => Self::from_blocks(vec![Block::paragraph(s)]),
            },
            // Null, arrays, numbers: safe empty.
            _ => Self::empty(),
        }
    }

    /// Whether raw content carries nothing worth keeping — missing, empty, or
    /// shapeless. Degenerate server content is the trigger for preferring a
    /// cached snapshot at session open.
    pub fn is_degenerate(raw: &Value) -> bool {
        match raw {
            Value::Object(map) => match map.get("blocks") {
                Some(Value::Array(entries)) => entries.is_empty(),
                _ => true,
            },
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(inner) => Self::is_degenerate(&inner),
                // A non-JSON string normalizes to one paragraph — content.
                Err(_) => s.is_empty(),
            },
            _ => true,
        }
    }

    /// Serialize to a JSON value (the wire `content` field).
    pub fn to_value(&self) -> Value {
        to_json_value(self)
    }

    /// Insert a block, clamping the index to the current length.
    pub fn insert_block(&mut self, index: usize, block: Block) {
        let index = index.min(self.blocks.len());
        self.blocks.insert(index, block);
    }

    /// All nested-document references with their block indices.
    pub fn nested_refs(&self) -> Vec<(usize, NestedDocumentRef)> {
        self.blocks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.nested_ref().map(|r| (i, r)))
            .collect()
    }

    /// Indices of blocks referencing the given document.
    pub fn blocks_referencing(&self, target: DocumentId) -> Vec<usize> {
        self.nested_refs()
            .into_iter()
            .filter(|(_, r)| r.id == Some(target))
            .map(|(i, _)| i)
            .collect()
    }

    /// Update the denormalized title on every block referencing `target`.
    ///
    /// Idempotent: returns `false` (and leaves blocks untouched) when every
    /// copy already matches, so duplicate notifications are harmless.
    pub fn update_nested_title(&mut self, target: DocumentId, title: &str) -> bool {
        let mut changed = false;
        for block in &mut self.blocks {
            if let Some(mut reference) = block.nested_ref() {
                if reference.id == Some(target) && reference.title != title {
                    reference.title = title.to_string();
                    block.set_nested_ref(&reference);
                    changed = true;
                }
            }
        }
        changed
    }

    /// Remove every block referencing `target`. Returns how many were removed.
    pub fn strip_references(&mut self, target: DocumentId) -> usize {
        let before = self.blocks.len();
        self.blocks
            .retain(|b| b.nested_ref().is_none_or(|r| r.id != Some(target)));
        before - self.blocks.len()
    }
}

/// JS peers have been observed writing timestamps as floats.
fn value_as_ms(v: &Value) -> Option<i64> {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn valid_doc_value() -> Value {
        json!({
            "time": 1_700_000_000_000_i64,
            "version": "2.27.0",
            "blocks": [
                { "id": "b1", "type": "header", "data": { "text": "Title", "level": 1 } },
                { "id": "b2", "type": "paragraph", "data": { "text": "Body" } }
            ]
        })
    }

    // ── Normalization totality ──────────────────────────────────────────

    #[test]
    fn test_normalize_is_total() {
        let inputs = vec![
            Value::Null,
            json!({}),
            json!("not json"),
            json!({ "foo": 1 }),
            valid_doc_value(),
            json!(42),
            json!([1, 2, 3]),
            json!(true),
        ];
        for input in inputs {
            let doc = BlockDocument::normalize(&input);
            assert!(!doc.version.is_empty(), "version defined for {input}");
            assert!(doc.time > 0, "time defined for {input}");
            // blocks is a Vec by construction; reaching here is the property.
        }
    }

    #[test]
    fn test_normalize_null_is_empty() {
        let doc = BlockDocument::normalize(&Value::Null);
        assert!(doc.blocks.is_empty());
        assert_eq!(doc.version, BLOCK_SCHEMA_VERSION);
    }

    #[test]
    fn test_normalize_empty_object_is_empty() {
        let doc = BlockDocument::normalize(&json!({}));
        assert!(doc.blocks.is_empty());
    }

    #[test]
    fn test_normalize_unknown_object_is_empty() {
        let doc = BlockDocument::normalize(&json!({ "foo": 1, "bar": [2] }));
        assert!(doc.blocks.is_empty());
    }

    // ── Rule: preserve a valid blocks array ─────────────────────────────

    #[test]
    fn test_normalize_preserves_valid_document() {
        let doc = BlockDocument::normalize(&valid_doc_value());
        assert_eq!(doc.time, 1_700_000_000_000);
        assert_eq!(doc.version, "2.27.0");
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks[0].kind, BlockKind::Header);
        assert_eq!(doc.blocks[1].kind, BlockKind::Paragraph);
    }

    #[test]
    fn test_normalize_fills_missing_time_and_version() {
        let doc = BlockDocument::normalize(&json!({
            "blocks": [{ "type": "paragraph", "data": { "text": "hi" } }]
        }));
        assert_eq!(doc.blocks.len(), 1);
        assert!(doc.time > 0);
        assert_eq!(doc.version, BLOCK_SCHEMA_VERSION);
    }

    #[test]
    fn test_normalize_accepts_float_time() {
        let doc = BlockDocument::normalize(&json!({
            "time": 1.7e12,
            "blocks": []
        }));
        assert_eq!(doc.time, 1_700_000_000_000);
    }

    #[test]
    fn test_normalize_drops_malformed_block_entries() {
        let doc = BlockDocument::normalize(&json!({
            "blocks": [
                { "type": "paragraph", "data": { "text": "kept" } },
                { "data": { "no": "type field" } },
                "not an object",
                { "type": "task", "data": { "text": "also kept" } }
            ]
        }));
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(doc.blocks[1].kind, BlockKind::Task);
    }

    #[test]
    fn test_normalize_non_array_blocks_field_is_empty() {
        let doc = BlockDocument::normalize(&json!({ "blocks": { "oops": true } }));
        assert!(doc.blocks.is_empty());
    }

    // ── Rule: strings parse as JSON or wrap as a paragraph ──────────────

    #[test]
    fn test_normalize_parses_json_string() {
        let raw = Value::String(valid_doc_value().to_string());
        let doc = BlockDocument::normalize(&raw);
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.version, "2.27.0");
    }

    #[test]
    fn test_normalize_wraps_plain_string_as_paragraph() {
        let doc = BlockDocument::normalize(&json!("just some prose"));
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(doc.blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(doc.blocks[0].data["text"], "just some prose");
    }

    #[test]
    fn test_normalize_doubly_wrapped_string() {
        // A JSON string containing a JSON string containing prose.
        let raw = json!("\"inner prose\"");
        let doc = BlockDocument::normalize(&raw);
        assert_eq!(doc.blocks.len(), 1);
        assert_eq!(doc.blocks[0].data["text"], "inner prose");
    }

    // ── Degenerate content detection ────────────────────────────────────

    #[test]
    fn test_degenerate_shapes() {
        assert!(BlockDocument::is_degenerate(&Value::Null));
        assert!(BlockDocument::is_degenerate(&json!({})));
        assert!(BlockDocument::is_degenerate(&json!({ "blocks": [] })));
        assert!(BlockDocument::is_degenerate(&json!({ "foo": 1 })));
        assert!(BlockDocument::is_degenerate(&json!(17)));
        assert!(BlockDocument::is_degenerate(&json!("")));
    }

    #[test]
    fn test_non_degenerate_shapes() {
        assert!(!BlockDocument::is_degenerate(&valid_doc_value()));
        // A plain string wraps into a paragraph: that is content.
        assert!(!BlockDocument::is_degenerate(&json!("prose")));
        // A JSON string of a non-empty document.
        let wrapped = Value::String(valid_doc_value().to_string());
        assert!(!BlockDocument::is_degenerate(&wrapped));
    }

    // ── BlockKind ───────────────────────────────────────────────────────

    #[test]
    fn test_block_kind_wire_names() {
        assert_eq!(BlockKind::Paragraph.as_str(), "paragraph");
        assert_eq!(BlockKind::NestedDocument.as_str(), "nestedDocument");
        assert_eq!(BlockKind::Task.as_str(), "task");
        assert_eq!(BlockKind::from_name("nestedDocument"), BlockKind::NestedDocument);
        // Exact case: this is a wire format, not user input.
        assert_eq!(
            BlockKind::from_name("nesteddocument"),
            BlockKind::Other("nesteddocument".into())
        );
    }

    #[test]
    fn test_block_kind_unknown_preserved() {
        let kind = BlockKind::from_name("embed");
        assert_eq!(kind, BlockKind::Other("embed".into()));
        assert_eq!(kind.as_str(), "embed");
    }

    #[test]
    fn test_block_kind_serde_roundtrip() {
        for name in ["paragraph", "nestedDocument", "task", "someExoticPlugin"] {
            let kind = BlockKind::from_name(name);
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{name}\""));
            let back: BlockKind = serde_json::from_str(&json).unwrap();
            assert_eq!(back, kind);
        }
    }

    #[test]
    fn test_block_serde_uses_type_field() {
        let block = Block::paragraph("hi").with_id("b9");
        let value = serde_json::to_value(&block).unwrap();
        assert_eq!(value["type"], "paragraph");
        assert_eq!(value["id"], "b9");
        assert_eq!(value["data"]["text"], "hi");
    }

    // ── Nested-document references ──────────────────────────────────────

    #[test]
    fn test_nested_ref_linked() {
        let id = DocumentId::new();
        let block = Block::nested_document(&NestedDocumentRef::linked(id, "Child"));
        let reference = block.nested_ref().unwrap();
        assert_eq!(reference.id, Some(id));
        assert_eq!(reference.title, "Child");
        assert!(reference.is_linked());
    }

    #[test]
    fn test_nested_ref_absent_id_is_pending() {
        let block = Block::new(
            BlockKind::NestedDocument,
            json!({ "title": "Not yet created" }),
        );
        let reference = block.nested_ref().unwrap();
        assert_eq!(reference.id, None);
        assert!(!reference.is_linked());
    }

    #[test]
    fn test_nested_ref_empty_or_invalid_id_is_pending() {
        for id in [json!(""), json!(null), json!("garbage"), json!(7)] {
            let block = Block::new(
                BlockKind::NestedDocument,
                json!({ "id": id.clone(), "title": "t" }),
            );
            let reference = block.nested_ref().expect("payload should parse");
            assert_eq!(reference.id, None, "id {id} should be pending");
        }
    }

    #[test]
    fn test_nested_ref_wrong_kind_is_none() {
        let block = Block::paragraph("hi");
        assert!(block.nested_ref().is_none());
    }

    #[test]
    fn test_nested_ref_serializes_without_id_when_pending() {
        let data = NestedDocumentRef::pending("draft").to_data();
        assert!(data.get("id").is_none());
        assert_eq!(data["title"], "draft");
    }

    // ── Task payloads ───────────────────────────────────────────────────

    #[test]
    fn test_task_data_defaults() {
        let block = Block::new(BlockKind::Task, json!({ "text": "buy milk" }));
        let task = block.task_data().unwrap();
        assert_eq!(task.text, "buy milk");
        assert!(!task.checked);
        assert!(task.assignees.is_empty());
        assert_eq!(task.deadline, None);
    }

    #[test]
    fn test_task_toggle_roundtrip() {
        let mut block = Block::task(&TaskData::new("review"));
        let mut task = block.task_data().unwrap();
        task.toggle();
        block.set_task_data(&task);
        assert!(block.task_data().unwrap().checked);
    }

    #[test]
    fn test_task_partial_payload_roundtrips() {
        let data = json!({ "text": "t", "checked": true, "deadline": "2026-09-01" });
        let task: TaskData = serde_json::from_value(data).unwrap();
        let back = task.to_data();
        assert_eq!(back["deadline"], "2026-09-01");
        assert!(back.get("description").is_none());
        assert!(back.get("assignees").is_none());
    }

    // ── Document operations ─────────────────────────────────────────────

    #[test]
    fn test_insert_block_clamps_index() {
        let mut doc = BlockDocument::from_blocks(vec![Block::paragraph("a")]);
        doc.insert_block(99, Block::paragraph("z"));
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks[1].data["text"], "z");
        doc.insert_block(0, Block::paragraph("first"));
        assert_eq!(doc.blocks[0].data["text"], "first");
    }

    #[test]
    fn test_update_nested_title_is_idempotent() {
        let id = DocumentId::new();
        let mut doc = BlockDocument::from_blocks(vec![
            Block::paragraph("intro"),
            Block::nested_document(&NestedDocumentRef::linked(id, "Old")),
        ]);

        assert!(doc.update_nested_title(id, "New"));
        let snapshot = doc.clone();
        // Second application: no-op.
        assert!(!doc.update_nested_title(id, "New"));
        assert_eq!(doc, snapshot);
        assert_eq!(doc.nested_refs()[0].1.title, "New");
    }

    #[test]
    fn test_update_nested_title_ignores_other_targets() {
        let id = DocumentId::new();
        let other = DocumentId::new();
        let mut doc = BlockDocument::from_blocks(vec![Block::nested_document(
            &NestedDocumentRef::linked(other, "Elsewhere"),
        )]);
        assert!(!doc.update_nested_title(id, "New"));
        assert_eq!(doc.nested_refs()[0].1.title, "Elsewhere");
    }

    #[test]
    fn test_strip_references() {
        let id = DocumentId::new();
        let keep = DocumentId::new();
        let mut doc = BlockDocument::from_blocks(vec![
            Block::nested_document(&NestedDocumentRef::linked(id, "gone")),
            Block::paragraph("stays"),
            Block::nested_document(&NestedDocumentRef::linked(keep, "stays too")),
            Block::nested_document(&NestedDocumentRef::linked(id, "also gone")),
        ]);
        assert_eq!(doc.strip_references(id), 2);
        assert_eq!(doc.blocks.len(), 2);
        assert_eq!(doc.blocks_referencing(keep).len(), 1);
        assert!(doc.blocks_referencing(id).is_empty());
    }

    #[test]
    fn test_strip_keeps_pending_references() {
        // A pending block (no id) never matches a target id.
        let id = DocumentId::new();
        let mut doc = BlockDocument::from_blocks(vec![Block::nested_document(
            &NestedDocumentRef::pending("draft"),
        )]);
        assert_eq!(doc.strip_references(id), 0);
        assert_eq!(doc.blocks.len(), 1);
    }

    // ── Serde shape ─────────────────────────────────────────────────────

    #[test]
    fn test_document_serde_roundtrip() {
        let id = DocumentId::new();
        let doc = BlockDocument::from_blocks(vec![
            Block::paragraph("a").with_id("b1"),
            Block::nested_document(&NestedDocumentRef::linked(id, "Child")),
        ]);
        let value = doc.to_value();
        let back = BlockDocument::normalize(&value);
        assert_eq!(back, doc);
    }

    #[test]
    fn test_unknown_payloads_roundtrip_untouched() {
        let raw = json!({
            "time": 1, "version": "x",
            "blocks": [{ "type": "embed", "data": { "service": "youtube", "height": 320 } }]
        });
        let doc = BlockDocument::normalize(&raw);
        let back = doc.to_value();
        assert_eq!(back["blocks"][0]["data"], raw["blocks"][0]["data"]);
        assert_eq!(back["blocks"][0]["type"], "embed");
    }
}
