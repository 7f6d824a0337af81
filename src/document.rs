use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

use crate::error::ValidationError;
use crate::validation;

/// A versioned snapshot of a document: body plus optional attachments.
///
/// On the wire the system fields are `_id`, `_rev`, `_deleted` and
/// `_attachments`; every other key is part of the body.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentRevision {
    /// Document id; absent on create lets the engine assign one
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Revision id of this leaf
    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    /// Set on tombstones
    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    /// Named attachments, kept in key order
    #[serde(
        rename = "_attachments",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attachments: Option<BTreeMap<String, AttachmentRef>>,

    /// The actual document data
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl DocumentRevision {
    /// A new, id-less revision with the given body.
    pub fn new(body: Map<String, Value>) -> Self {
        Self {
            body,
            ..Default::default()
        }
    }

    /// A revision for an existing document, as needed by update and delete.
    pub fn with_id_and_rev(id: impl Into<String>, rev: impl Into<String>, body: Map<String, Value>) -> Self {
        Self {
            id: Some(id.into()),
            rev: Some(rev.into()),
            body,
            ..Default::default()
        }
    }

    /// Builds a revision from an untyped JSON value, running the dynamic
    /// shape checks first so the error names the violated constraint.
    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        validation::validate_revision_value(&value)?;
        Self::decode(value)
    }

    /// Decodes a revision produced by the engine. Only the field types are
    /// checked: stored revisions may hold attachment stubs without inline
    /// data, or an empty `_attachments`.
    pub fn from_engine(value: Value) -> Result<Self, ValidationError> {
        validation::validate_revision_shape(&value)?;
        Self::decode(value)
    }

    fn decode(value: Value) -> Result<Self, ValidationError> {
        let mut revision: DocumentRevision = serde_json::from_value(value)
            .map_err(|e| ValidationError::MalformedRevision(e.to_string()))?;
        // Empty system fields mean "absent"
        if revision.id.as_deref() == Some("") {
            revision.id = None;
        }
        if revision.rev.as_deref() == Some("") {
            revision.rev = None;
        }
        Ok(revision)
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref().filter(|id| !id.is_empty())
    }

    pub fn rev(&self) -> Option<&str> {
        self.rev.as_deref().filter(|rev| !rev.is_empty())
    }

    pub fn is_tombstone(&self) -> bool {
        self.deleted
    }

    pub fn with_attachment(mut self, name: impl Into<String>, attachment: AttachmentRef) -> Self {
        self.attachments
            .get_or_insert_with(BTreeMap::new)
            .insert(name.into(), attachment);
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }
}

/// Attachment content plus its MIME type.
///
/// `data` is whatever the engine accepts for attachment content: a base64
/// payload or an engine-side reference. Attachments read back from the
/// engine may be stubs with no `data`; their other keys (`length`,
/// `digest`, ...) are kept in `metadata`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttachmentRef {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub data: String,
    #[serde(rename = "content_type", default)]
    pub content_type: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl AttachmentRef {
    pub fn new(data: impl Into<String>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
            metadata: Map::new(),
        }
    }

    /// True for an attachment without inline content.
    pub fn is_stub(&self) -> bool {
        self.data.is_empty()
    }

    /// Inline attachment from raw bytes (base64 encoded on the wire).
    pub fn from_bytes(bytes: &[u8], content_type: impl Into<String>) -> Self {
        Self::new(general_purpose::STANDARD.encode(bytes), content_type)
    }

    pub fn decode_bytes(&self) -> Result<Vec<u8>, base64::DecodeError> {
        general_purpose::STANDARD.decode(&self.data)
    }
}

/// A named, possibly compound, index over document fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub name: String,
    pub fields: Vec<String>,
}

impl Index {
    pub fn new<S: Into<String>>(name: impl Into<String>, fields: impl IntoIterator<Item = S>) -> Self {
        Self {
            name: name.into(),
            fields: fields.into_iter().map(Into::into).collect(),
        }
    }
}

/// Builder for the JSON object passed to `find`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Query {
    pub selector: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<Vec<Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
}

impl Query {
    pub fn new(selector: Value) -> Self {
        Self {
            selector,
            ..Default::default()
        }
    }

    pub fn fields<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.fields = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    /// Adds a sort clause such as `{"name": "asc"}`.
    pub fn sort(mut self, clause: Value) -> Self {
        self.sort.get_or_insert_with(Vec::new).push(clause);
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

impl From<Query> for Value {
    fn from(query: Query) -> Self {
        serde_json::to_value(query).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_revision_wire_shape() {
        let rev = DocumentRevision::with_id_and_rev("doc1", "1-abc", body(json!({"x": 1})))
            .with_attachment("a.txt", AttachmentRef::new("aGk=", "text/plain"));

        let value = rev.to_value();
        assert_eq!(value["_id"], "doc1");
        assert_eq!(value["_rev"], "1-abc");
        assert_eq!(value["x"], 1);
        assert_eq!(value["_attachments"]["a.txt"]["content_type"], "text/plain");
        assert!(value.get("_deleted").is_none());
    }

    #[test]
    fn test_new_revision_omits_system_fields() {
        let value = DocumentRevision::new(body(json!({"x": 1}))).to_value();
        assert_eq!(value, json!({"x": 1}));
    }

    #[test]
    fn test_from_value_tombstone() {
        let rev = DocumentRevision::from_value(json!({
            "_id": "doc1",
            "_rev": "2-def",
            "_deleted": true
        }))
        .unwrap();
        assert!(rev.is_tombstone());
        assert!(rev.body.is_empty());
    }

    #[test]
    fn test_from_value_empty_id_is_absent() {
        let rev = DocumentRevision::from_value(json!({"_id": "", "name": "a"})).unwrap();
        assert_eq!(rev.id, None);
        assert_eq!(rev.get("name"), Some(&json!("a")));
    }

    #[test]
    fn test_from_value_rejects_rev_without_id() {
        let err = DocumentRevision::from_value(json!({"_rev": "1-x"})).unwrap_err();
        assert_eq!(err, ValidationError::RevisionWithoutId);
    }

    #[test]
    fn test_from_value_rejects_non_string_id() {
        let err = DocumentRevision::from_value(json!({"_id": 42})).unwrap_err();
        assert_eq!(err, ValidationError::NotAString("_id"));
    }

    #[test]
    fn test_from_engine_keeps_attachment_stubs() {
        let rev = DocumentRevision::from_engine(json!({
            "_id": "doc1",
            "_rev": "2-b",
            "_attachments": {"a.txt": {"content_type": "text/plain", "length": 3, "stub": true}}
        }))
        .unwrap();
        let attachment = &rev.attachments.as_ref().unwrap()["a.txt"];
        assert!(attachment.is_stub());
        assert_eq!(attachment.metadata.get("length"), Some(&json!(3)));

        let value = rev.to_value();
        assert_eq!(
            value["_attachments"]["a.txt"],
            json!({"content_type": "text/plain", "length": 3, "stub": true})
        );

        // The same payload is not acceptable as caller input
        assert_eq!(
            DocumentRevision::from_value(value).unwrap_err(),
            ValidationError::AttachmentWithoutData("a.txt".to_string())
        );
    }

    #[test]
    fn test_from_engine_checks_types() {
        let rev = DocumentRevision::from_engine(json!({"_id": "doc1", "_rev": "1-a", "_attachments": {}})).unwrap();
        assert_eq!(rev.attachments, Some(BTreeMap::new()));

        assert_eq!(
            DocumentRevision::from_engine(json!({"_id": 42})).unwrap_err(),
            ValidationError::NotAString("_id")
        );
        assert!(matches!(
            DocumentRevision::from_engine(json!({"_id": "a", "_deleted": "yes"})).unwrap_err(),
            ValidationError::MalformedRevision(_)
        ));
    }

    #[test]
    fn test_attachment_bytes() {
        let attachment = AttachmentRef::from_bytes(b"hello", "text/plain");
        assert_eq!(attachment.data, "aGVsbG8=");
        assert_eq!(attachment.decode_bytes().unwrap(), b"hello");
    }

    #[test]
    fn test_query_builder() {
        let query: Value = Query::new(json!({"name": "mike"}))
            .fields(["name", "age"])
            .sort(json!({"age": "desc"}))
            .skip(10)
            .limit(5)
            .into();

        assert_eq!(
            query,
            json!({
                "selector": {"name": "mike"},
                "fields": ["name", "age"],
                "sort": [{"age": "desc"}],
                "skip": 10,
                "limit": 5
            })
        );
    }

    #[test]
    fn test_index_new() {
        let index = Index::new("by_name", ["name", "surname"]);
        assert_eq!(index.fields, vec!["name".to_string(), "surname".to_string()]);
    }
}
