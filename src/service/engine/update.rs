// Update operator application.
//
// The orchestrator normalises bare update payloads into `$set` clauses, so
// documents arriving here contain operators only.  `_id` is immutable.

use bson::{Bson, Document};

use crate::error::{Result, ServiceError};
use crate::util::bson_ext::{path_get, path_remove, path_set};

pub fn apply(document: &mut Document, update: &Document) -> Result<()> {
    for (operator, clause) in update.iter() {
        let operator: &str = operator.as_ref();
        match operator {
            "$set" => set(document, expect_clause(operator, clause)?),
            "$unset" => unset(document, expect_clause(operator, clause)?),
            "$inc" => increment(document, expect_clause(operator, clause)?)?,
            other => {
                return Err(ServiceError::Storage(format!(
                    "unsupported update operator {}",
                    other
                )))
            }
        }
    }
    Ok(())
}

fn expect_clause<'a>(operator: &str, clause: &'a Bson) -> Result<&'a Document> {
    match clause {
        Bson::Document(doc) => Ok(doc),
        _ => Err(ServiceError::Storage(format!(
            "{} clause is not a document",
            operator
        ))),
    }
}

fn set(document: &mut Document, clause: &Document) {
    for (path, value) in clause.iter() {
        let path: &str = path.as_ref();
        if path == "_id" {
            continue;
        }
        path_set(document, path, value.clone());
    }
}

fn unset(document: &mut Document, clause: &Document) {
    for (path, _) in clause.iter() {
        let path: &str = path.as_ref();
        if path == "_id" {
            continue;
        }
        path_remove(document, path);
    }
}

fn increment(document: &mut Document, clause: &Document) -> Result<()> {
    for (path, delta) in clause.iter() {
        let path: &str = path.as_ref();
        if path == "_id" {
            continue;
        }
        let current = path_get(document, path).cloned().unwrap_or(Bson::Int64(0));
        let next = match (&current, delta) {
            (Bson::Int32(a), Bson::Int32(b)) => Bson::Int32(a + b),
            (Bson::Int32(a), Bson::Int64(b)) => Bson::Int64(i64::from(*a) + b),
            (Bson::Int64(a), Bson::Int32(b)) => Bson::Int64(a + i64::from(*b)),
            (Bson::Int64(a), Bson::Int64(b)) => Bson::Int64(a + b),
            (Bson::Double(a), Bson::Double(b)) => Bson::Double(a + b),
            (Bson::Double(a), Bson::Int32(b)) => Bson::Double(a + f64::from(*b)),
            (Bson::Double(a), Bson::Int64(b)) => Bson::Double(a + *b as f64),
            (Bson::Int32(a), Bson::Double(b)) => Bson::Double(f64::from(*a) + b),
            (Bson::Int64(a), Bson::Double(b)) => Bson::Double(*a as f64 + b),
            _ => {
                return Err(ServiceError::Storage(format!(
                    "cannot increment non-numeric field {}",
                    path
                )))
            }
        };
        path_set(document, path, next);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use bson::oid::ObjectId;

    #[test]
    fn set_and_unset() {
        let mut doc = doc! { "key": "old", "obsolete": 1_i32 };
        apply(
            &mut doc,
            &doc! { "$set": { "key": "new" }, "$unset": { "obsolete": 1 } },
        )
        .unwrap();
        assert_eq!(doc.get("key"), Some(&Bson::String("new".to_string())));
        assert!(!doc.contains_key("obsolete"));
    }

    #[test]
    fn set_creates_nested_paths() {
        let mut doc = doc! {};
        apply(
            &mut doc,
            &doc! { "$set": { "metadata.user.name": "mqtt" } },
        )
        .unwrap();
        assert_eq!(
            path_get(&doc, "metadata.user.name"),
            Some(&Bson::String("mqtt".to_string()))
        );
    }

    #[test]
    fn id_is_immutable() {
        let id = ObjectId::new();
        let mut doc = doc! { "_id": id };
        apply(
            &mut doc,
            &doc! { "$set": { "_id": ObjectId::new() }, "$unset": { "_id": 1 } },
        )
        .unwrap();
        assert_eq!(doc.get("_id"), Some(&Bson::ObjectId(id)));
    }

    #[test]
    fn increment_coerces_numeric_types() {
        let mut doc = doc! { "count": 1_i32, "ratio": 1.5 };
        apply(
            &mut doc,
            &doc! { "$inc": { "count": 2_i64, "ratio": 1_i32, "fresh": 5_i32 } },
        )
        .unwrap();
        assert_eq!(doc.get("count"), Some(&Bson::Int64(3)));
        assert_eq!(doc.get("ratio"), Some(&Bson::Double(2.5)));
        assert_eq!(doc.get("fresh"), Some(&Bson::Int64(5)));
    }

    #[test]
    fn unknown_operators_are_rejected() {
        let mut doc = doc! {};
        assert!(apply(&mut doc, &doc! { "$push": { "tags": "a" } }).is_err());
        assert!(apply(&mut doc, &doc! { "$set": "not a document" }).is_err());
    }
}
