// Query-by-example matching over BSON documents.
//
// Supports implicit equality on dotted paths, the comparison operators, set
// membership, existence, and the logical combinators.  Numeric comparisons
// coerce across the three BSON number types.

use std::cmp::Ordering;

use bson::{Bson, Document};
use tracing::debug;

use crate::util::bson_ext::path_get;

/// Order two values where a total order makes sense; `None` for mixed or
/// unordered types.
pub fn compare(a: &Bson, b: &Bson) -> Option<Ordering> {
    match (a, b) {
        (Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_), Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)) => {
            numeric(a).partial_cmp(&numeric(b))
        }
        (Bson::String(x), Bson::String(y)) => Some(x.cmp(y)),
        (Bson::ObjectId(x), Bson::ObjectId(y)) => Some(x.bytes().cmp(&y.bytes())),
        (Bson::DateTime(x), Bson::DateTime(y)) => {
            Some(x.timestamp_millis().cmp(&y.timestamp_millis()))
        }
        (Bson::Boolean(x), Bson::Boolean(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn numeric(value: &Bson) -> f64 {
    match value {
        Bson::Int32(v) => f64::from(*v),
        Bson::Int64(v) => *v as f64,
        Bson::Double(v) => *v,
        _ => f64::NAN,
    }
}

pub fn equals(a: &Bson, b: &Bson) -> bool {
    if a == b {
        return true;
    }
    matches!(compare(a, b), Some(Ordering::Equal))
}

/// Does `document` satisfy `filter`?
pub fn matches(document: &Document, filter: &Document) -> bool {
    for (key, condition) in filter.iter() {
        let key: &str = key.as_ref();
        let ok = match key {
            "$and" => clauses(condition).iter().all(|c| matches(document, c)),
            "$or" => clauses(condition).iter().any(|c| matches(document, c)),
            "$nor" => !clauses(condition).iter().any(|c| matches(document, c)),
            "$not" => match condition {
                Bson::Document(inner) => !matches(document, inner),
                _ => false,
            },
            _ => field_matches(path_get(document, key), condition),
        };
        if !ok {
            return false;
        }
    }
    true
}

fn clauses(condition: &Bson) -> Vec<&Document> {
    match condition {
        Bson::Array(items) => items
            .iter()
            .filter_map(|item| match item {
                Bson::Document(doc) => Some(doc),
                _ => None,
            })
            .collect(),
        Bson::Document(doc) => vec![doc],
        _ => Vec::new(),
    }
}

fn is_operator_document(condition: &Document) -> bool {
    condition.iter().any(|(key, _)| {
        let key: &str = key.as_ref();
        key.starts_with('$')
    })
}

fn field_matches(value: Option<&Bson>, condition: &Bson) -> bool {
    if let Bson::Document(operators) = condition {
        if is_operator_document(operators) {
            return operators.iter().all(|(op, operand)| {
                let op: &str = op.as_ref();
                apply_operator(value, op, operand)
            });
        }
    }

    match value {
        Some(found) => value_equals(found, condition),
        None => matches!(condition, Bson::Null),
    }
}

/// Equality with array-membership semantics: a stored array matches a
/// scalar condition when any element equals it.
fn value_equals(found: &Bson, condition: &Bson) -> bool {
    if equals(found, condition) {
        return true;
    }
    if let Bson::Array(items) = found {
        if !matches!(condition, Bson::Array(_)) {
            return items.iter().any(|item| equals(item, condition));
        }
    }
    false
}

fn apply_operator(value: Option<&Bson>, op: &str, operand: &Bson) -> bool {
    match op {
        "$eq" => value.map(|v| value_equals(v, operand)).unwrap_or(false),
        "$ne" => !value.map(|v| value_equals(v, operand)).unwrap_or(false),
        "$gt" => ordered(value, operand, |o| o == Ordering::Greater),
        "$gte" => ordered(value, operand, |o| o != Ordering::Less),
        "$lt" => ordered(value, operand, |o| o == Ordering::Less),
        "$lte" => ordered(value, operand, |o| o != Ordering::Greater),
        "$in" => match (value, operand) {
            (Some(v), Bson::Array(items)) => items.iter().any(|item| value_equals(v, item)),
            _ => false,
        },
        "$nin" => match (value, operand) {
            (Some(v), Bson::Array(items)) => !items.iter().any(|item| value_equals(v, item)),
            (None, Bson::Array(_)) => true,
            _ => false,
        },
        "$exists" => match operand {
            Bson::Boolean(expected) => value.is_some() == *expected,
            _ => false,
        },
        other => {
            debug!("Unsupported filter operator {}", other);
            false
        }
    }
}

fn ordered(value: Option<&Bson>, operand: &Bson, accept: fn(Ordering) -> bool) -> bool {
    match value.and_then(|v| compare(v, operand)) {
        Some(ordering) => accept(ordering),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;
    use bson::doc;

    fn subject() -> Document {
        doc! {
            "_id": ObjectId::new(),
            "key": "value",
            "count": 7_i32,
            "ratio": 2.5,
            "deleted": false,
            "tags": ["a", "b"],
            "user": { "name": "mqtt", "level": 3_i64 },
        }
    }

    #[test]
    fn implicit_equality() {
        let doc = subject();
        assert!(matches(&doc, &doc! { "key": "value" }));
        assert!(!matches(&doc, &doc! { "key": "other" }));
        assert!(matches(&doc, &doc! { "user.name": "mqtt" }));
        assert!(!matches(&doc, &doc! { "user.missing": "x" }));
    }

    #[test]
    fn numeric_coercion() {
        let doc = subject();
        // int32 field matched with int64 and double conditions
        assert!(matches(&doc, &doc! { "count": 7_i64 }));
        assert!(matches(&doc, &doc! { "count": 7.0 }));
        assert!(matches(&doc, &doc! { "user.level": 3_i32 }));
    }

    #[test]
    fn comparison_operators() {
        let doc = subject();
        assert!(matches(&doc, &doc! { "count": { "$gt": 5_i32 } }));
        assert!(matches(&doc, &doc! { "count": { "$gte": 7_i64 } }));
        assert!(matches(&doc, &doc! { "count": { "$lt": 10.0 } }));
        assert!(!matches(&doc, &doc! { "count": { "$lte": 6_i32 } }));
        assert!(matches(&doc, &doc! { "key": { "$ne": "other" } }));
    }

    #[test]
    fn membership_and_existence() {
        let doc = subject();
        assert!(matches(&doc, &doc! { "key": { "$in": ["value", "alt"] } }));
        assert!(matches(&doc, &doc! { "key": { "$nin": ["alt"] } }));
        assert!(matches(&doc, &doc! { "count": { "$exists": true } }));
        assert!(matches(&doc, &doc! { "missing": { "$exists": false } }));
        // stored arrays match scalar equality on any element
        assert!(matches(&doc, &doc! { "tags": "a" }));
        assert!(!matches(&doc, &doc! { "tags": "z" }));
    }

    #[test]
    fn logical_combinators() {
        let doc = subject();
        assert!(matches(
            &doc,
            &doc! { "$and": [ { "key": "value" }, { "count": { "$gt": 1_i32 } } ] }
        ));
        assert!(matches(
            &doc,
            &doc! { "$or": [ { "key": "other" }, { "deleted": false } ] }
        ));
        assert!(matches(&doc, &doc! { "$nor": [ { "key": "other" } ] }));
        assert!(matches(&doc, &doc! { "$not": { "key": "other" } }));
    }

    #[test]
    fn missing_fields_match_null() {
        let doc = subject();
        assert!(matches(&doc, &doc! { "missing": Bson::Null }));
        assert!(!matches(&doc, &doc! { "key": Bson::Null }));
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(matches(&subject(), &doc! {}));
    }
}
