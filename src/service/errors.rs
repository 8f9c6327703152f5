// Canned error response documents.

use bson::{doc, Document};

pub fn not_modifiable() -> Document {
    doc! { "error": "Collection is not modifiable" }
}

pub fn missing_id() -> Document {
    doc! { "error": "Missing id" }
}

pub fn missing_field() -> Document {
    doc! { "error": "Missing field" }
}

pub fn missing_name() -> Document {
    doc! { "error": "Missing name" }
}

pub fn pool_exhausted() -> Document {
    doc! { "error": "Connection pool exhausted" }
}

pub fn not_found() -> Document {
    doc! { "error": "not found" }
}

pub fn insert_error() -> Document {
    doc! { "error": "Error creating document" }
}

pub fn update_error() -> Document {
    doc! { "error": "Error updating document" }
}

pub fn invalid_update() -> Document {
    doc! { "error": "Invalid update document" }
}

pub fn create_version_failed() -> Document {
    doc! { "error": "Error creating version" }
}

pub fn invalid_action() -> Document {
    doc! { "error": "Invalid action" }
}

pub fn unexpected_error() -> Document {
    doc! { "error": "Unexpected error" }
}

pub fn with_message(message: impl Into<String>) -> Document {
    doc! { "error": message.into() }
}

/// Is this response document an error?
pub fn is_error(document: &Document) -> bool {
    matches!(document.get("error"), Some(bson::Bson::String(_)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_documents_carry_a_single_error_key() {
        for document in [
            not_modifiable(),
            missing_id(),
            missing_name(),
            pool_exhausted(),
            not_found(),
            invalid_action(),
            unexpected_error(),
        ] {
            assert!(is_error(&document));
            assert_eq!(document.len(), 1);
        }
    }

    #[test]
    fn success_documents_are_not_errors() {
        assert!(!is_error(&doc! { "count": 1_i64 }));
        assert!(!is_error(&doc! { "error": 5_i32 }));
    }
}
