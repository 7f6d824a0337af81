//! Input validation
//!
//! Pure checks run before anything crosses the engine boundary. Each check
//! reports exactly one violated constraint, in a fixed order, so the same
//! bad input always produces the same error. Attachments are visited in
//! key order.

use serde_json::Value;

use crate::document::DocumentRevision;
use crate::error::ValidationError;

/// Emptiness the way the engine's JS clients judge it: null, empty
/// strings/arrays/objects, and scalars that carry no content.
pub(crate) fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

fn require_non_empty(value: &str, what: &'static str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Err(ValidationError::Missing(what));
    }
    Ok(())
}

/// Datastore names.
pub fn validate_name(name: &str) -> Result<(), ValidationError> {
    require_non_empty(name, "name")
}

pub fn validate_document_id(document_id: &str) -> Result<(), ValidationError> {
    require_non_empty(document_id, "documentId")
}

pub fn validate_index_name(index_name: &str) -> Result<(), ValidationError> {
    require_non_empty(index_name, "indexName")
}

pub fn validate_field_list<S: AsRef<str>>(fields: &[S]) -> Result<(), ValidationError> {
    if fields.is_empty() {
        return Err(ValidationError::Missing("fieldNames"));
    }
    Ok(())
}

pub fn validate_document_revision(revision: &DocumentRevision) -> Result<(), ValidationError> {
    if revision.rev().is_some() && revision.id().is_none() {
        return Err(ValidationError::RevisionWithoutId);
    }

    if let Some(attachments) = &revision.attachments {
        if attachments.is_empty() {
            return Err(ValidationError::EmptyAttachments);
        }
        // A typed attachment always has both keys, so it is never bodiless
        for (name, attachment) in attachments {
            if attachment.data.is_empty() {
                return Err(ValidationError::AttachmentWithoutData(name.clone()));
            }
            if attachment.content_type.is_empty() {
                return Err(ValidationError::AttachmentWithoutContentType(name.clone()));
            }
        }
    }

    Ok(())
}

/// Same rules as [`validate_document_revision`], applied to untyped JSON
/// (a missing value is `Value::Null`).
pub fn validate_revision_value(value: &Value) -> Result<(), ValidationError> {
    let (id, rev) = validate_revision_shape(value)?;
    let Value::Object(obj) = value else {
        return Err(ValidationError::NotAnObject("documentRevision"));
    };
    if rev.is_some() && id.is_none() {
        return Err(ValidationError::RevisionWithoutId);
    }

    if let Some(attachments) = obj.get("_attachments").filter(|a| is_truthy(a)) {
        let entries = match attachments {
            Value::Object(entries) if !entries.is_empty() => entries,
            _ => return Err(ValidationError::EmptyAttachments),
        };
        // serde_json maps iterate in key order
        for (name, attachment) in entries {
            if is_empty(attachment) {
                return Err(ValidationError::AttachmentWithoutBody(name.clone()));
            }
            if attachment.get("data").map_or(true, is_empty) {
                return Err(ValidationError::AttachmentWithoutData(name.clone()));
            }
            if attachment.get("content_type").map_or(true, is_empty) {
                return Err(ValidationError::AttachmentWithoutContentType(name.clone()));
            }
        }
    }

    Ok(())
}

/// Type checks only: an object whose `_id` and `_rev`, when present, are
/// strings. This is all that is asked of revisions coming back from the
/// engine, which may carry attachment stubs or an empty `_attachments`.
pub fn validate_revision_shape(value: &Value) -> Result<(Option<&str>, Option<&str>), ValidationError> {
    let obj = match value {
        Value::Null => return Err(ValidationError::Missing("documentRevision")),
        Value::Object(obj) => obj,
        _ => return Err(ValidationError::NotAnObject("documentRevision")),
    };
    let id = system_string(obj.get("_id"), "_id")?;
    let rev = system_string(obj.get("_rev"), "_rev")?;
    Ok((id, rev))
}

fn system_string<'a>(
    value: Option<&'a Value>,
    what: &'static str,
) -> Result<Option<&'a str>, ValidationError> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ValidationError::NotAString(what)),
    }
}

/// Extra precondition for updates: both `_id` and `_rev` must be set.
pub fn validate_update(revision: &DocumentRevision) -> Result<(), ValidationError> {
    validate_document_revision(revision)?;
    if revision.id().is_none() || revision.rev().is_none() {
        return Err(ValidationError::UpdateWithoutIdAndRev);
    }
    Ok(())
}

/// Deletes address a specific leaf, so both `_id` and `_rev` are required.
pub fn validate_delete(revision: &DocumentRevision) -> Result<(), ValidationError> {
    if revision.id().is_none() || revision.rev().is_none() {
        return Err(ValidationError::DeleteWithoutIdAndRev);
    }
    Ok(())
}

pub fn validate_query(query: &Value) -> Result<(), ValidationError> {
    if is_empty(query) {
        return Err(ValidationError::Missing("query"));
    }
    let obj = query
        .as_object()
        .ok_or(ValidationError::NotAnObject("query"))?;
    if !obj.get("selector").is_some_and(is_truthy) {
        return Err(ValidationError::MissingSelector);
    }
    Ok(())
}
