// Typed accessors and path helpers over `bson::Document`.
//
// Handlers work against dynamic documents throughout; these helpers keep the
// option-returning lookups in one place instead of matching on `Bson`
// variants at every call site.

use bson::oid::ObjectId;
use bson::{Bson, Document};

pub fn string_of<'a>(doc: &'a Document, key: &str) -> Option<&'a str> {
    match doc.get(key) {
        Some(Bson::String(value)) => Some(value.as_str()),
        _ => None,
    }
}

pub fn oid_of(doc: &Document, key: &str) -> Option<ObjectId> {
    match doc.get(key) {
        Some(Bson::ObjectId(value)) => Some(*value),
        _ => None,
    }
}

pub fn doc_of<'a>(doc: &'a Document, key: &str) -> Option<&'a Document> {
    match doc.get(key) {
        Some(Bson::Document(value)) => Some(value),
        _ => None,
    }
}

pub fn array_of<'a>(doc: &'a Document, key: &str) -> Option<&'a Vec<Bson>> {
    match doc.get(key) {
        Some(Bson::Array(value)) => Some(value),
        _ => None,
    }
}

pub fn bool_of(doc: &Document, key: &str) -> Option<bool> {
    match doc.get(key) {
        Some(Bson::Boolean(value)) => Some(*value),
        _ => None,
    }
}

/// Integer lookup coercing across the BSON integer widths.
pub fn int_of(doc: &Document, key: &str) -> Option<i64> {
    match doc.get(key) {
        Some(Bson::Int32(value)) => Some(i64::from(*value)),
        Some(Bson::Int64(value)) => Some(*value),
        _ => None,
    }
}

pub fn f64_of(doc: &Document, key: &str) -> Option<f64> {
    match doc.get(key) {
        Some(Bson::Double(value)) => Some(*value),
        Some(Bson::Int32(value)) => Some(f64::from(*value)),
        Some(Bson::Int64(value)) => Some(*value as f64),
        _ => None,
    }
}

/// Resolve a dotted path (`metadata.user._id`) to the value it points at.
pub fn path_get<'a>(doc: &'a Document, path: &str) -> Option<&'a Bson> {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let value = current.get(part)?;
        if parts.peek().is_none() {
            return Some(value);
        }
        match value {
            Bson::Document(inner) => current = inner,
            _ => return None,
        }
    }
    None
}

/// Set a dotted path, creating intermediate documents as needed.
pub fn path_set(doc: &mut Document, path: &str, value: Bson) {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            current.insert(part, value);
            return;
        }
        let needs_doc = !matches!(current.get(part), Some(Bson::Document(_)));
        if needs_doc {
            current.insert(part, Document::new());
        }
        match current.get_mut(part) {
            Some(Bson::Document(inner)) => current = inner,
            _ => return,
        }
    }
}

/// Remove the value at a dotted path.  Empty intermediate documents are left
/// in place, matching how the unset operator behaves upstream.
pub fn path_remove(doc: &mut Document, path: &str) -> Option<Bson> {
    let mut current = doc;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        if parts.peek().is_none() {
            return current.remove(part);
        }
        match current.get_mut(part) {
            Some(Bson::Document(inner)) => current = inner,
            _ => return None,
        }
    }
    None
}

/// Model documents carry their identifier as `id`; the wire form uses `_id`.
/// Renames apply only when the field holds an object id and the target key
/// is not already present.
pub fn rename_id_for_wire(doc: &mut Document) {
    if doc.contains_key("_id") {
        return;
    }
    if matches!(doc.get("id"), Some(Bson::ObjectId(_))) {
        if let Some(value) = doc.remove("id") {
            doc.insert("_id", value);
        }
    }
}

pub fn rename_id_from_wire(doc: &mut Document) {
    if doc.contains_key("id") {
        return;
    }
    if matches!(doc.get("_id"), Some(Bson::ObjectId(_))) {
        if let Some(value) = doc.remove("_id") {
            doc.insert("id", value);
        }
    }
}
