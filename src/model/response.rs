// Typed response shapes, parsed from the service's reply documents.
//
// A reply whose top level carries a string `error` is an error regardless
// of the transport outcome; the repository layer checks that before these
// parsers run.

use bson::oid::ObjectId;
use bson::{Bson, Document};

use crate::error::{Result, ServiceError};
use crate::util::bson_ext::{array_of, bool_of, doc_of, int_of, oid_of, string_of};

fn missing(key: &str) -> ServiceError {
    ServiceError::Serialization(format!("response missing {}", key))
}

/// Location of a version history entry.
#[derive(Debug, Clone, PartialEq)]
pub struct History {
    pub id: ObjectId,
    pub database: String,
    pub collection: String,
    pub entity: ObjectId,
}

impl History {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            id: oid_of(document, "_id").ok_or_else(|| missing("_id"))?,
            database: string_of(document, "database")
                .ok_or_else(|| missing("database"))?
                .to_string(),
            collection: string_of(document, "collection")
                .ok_or_else(|| missing("collection"))?
                .to_string(),
            entity: oid_of(document, "entity").ok_or_else(|| missing("entity"))?,
        })
    }
}

/// Result of a `create`: either a history location or a bare identifier
/// when versioning was suppressed.
#[derive(Debug, Clone, PartialEq)]
pub enum Create {
    Versioned(History),
    SkipVersion { id: ObjectId },
}

impl Create {
    pub fn from_document(document: &Document) -> Result<Self> {
        if bool_of(document, "skipVersion").unwrap_or(false) {
            return Ok(Create::SkipVersion {
                id: oid_of(document, "_id").ok_or_else(|| missing("_id"))?,
            });
        }
        Ok(Create::Versioned(History::from_document(document)?))
    }
}

/// Result of `createTimeseries`; the identifier may have been assigned by
/// the database and is echoed back whatever its type.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateTimeseries {
    pub database: String,
    pub collection: String,
    pub id: Bson,
}

impl CreateTimeseries {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            database: string_of(document, "database")
                .ok_or_else(|| missing("database"))?
                .to_string(),
            collection: string_of(document, "collection")
                .ok_or_else(|| missing("collection"))?
                .to_string(),
            id: document.get("_id").cloned().ok_or_else(|| missing("_id"))?,
        })
    }
}

/// Result of a single-document update: the post-image and the history
/// location, unless versioning was suppressed.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Versioned {
        document: Document,
        history: History,
    },
    SkipVersion,
}

impl Update {
    pub fn from_document(document: &Document) -> Result<Self> {
        if bool_of(document, "skipVersion").unwrap_or(false) {
            return Ok(Update::SkipVersion);
        }
        Ok(Update::Versioned {
            document: doc_of(document, "document")
                .ok_or_else(|| missing("document"))?
                .clone(),
            history: History::from_document(
                doc_of(document, "history").ok_or_else(|| missing("history"))?,
            )?,
        })
    }
}

/// Result of a multi-document update or a delete.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Affected {
    pub success: Vec<ObjectId>,
    pub failure: Vec<ObjectId>,
    pub history: Vec<Document>,
}

impl Affected {
    pub fn from_document(document: &Document) -> Result<Self> {
        let mut parsed = Self::default();
        for item in array_of(document, "success").ok_or_else(|| missing("success"))? {
            if let Bson::ObjectId(id) = item {
                parsed.success.push(*id);
            }
        }
        for item in array_of(document, "failure").ok_or_else(|| missing("failure"))? {
            if let Bson::ObjectId(id) = item {
                parsed.failure.push(*id);
            }
        }
        for item in array_of(document, "history").ok_or_else(|| missing("history"))? {
            if let Bson::Document(entry) = item {
                parsed.history.push(entry.clone());
            }
        }
        Ok(parsed)
    }
}

/// Result of a `retrieve`: one document when queried by id, otherwise the
/// matching set.
#[derive(Debug, Clone, PartialEq)]
pub enum Retrieve {
    One(Document),
    Many(Vec<Document>),
}

impl Retrieve {
    pub fn from_document(document: &Document) -> Result<Self> {
        if let Some(result) = doc_of(document, "result") {
            return Ok(Retrieve::One(result.clone()));
        }
        let results = array_of(document, "results").ok_or_else(|| missing("results"))?;
        Ok(Retrieve::Many(
            results
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(doc) => Some(doc.clone()),
                    _ => None,
                })
                .collect(),
        ))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Count {
    pub count: i64,
}

impl Count {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            count: int_of(document, "count").ok_or_else(|| missing("count"))?,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Distinct {
    pub values: Vec<Bson>,
}

impl Distinct {
    pub fn from_document(document: &Document) -> Result<Self> {
        let results = array_of(document, "results").ok_or_else(|| missing("results"))?;
        let mut values = Vec::new();
        for entry in results {
            if let Bson::Document(entry) = entry {
                if let Some(items) = array_of(entry, "values") {
                    values.extend(items.iter().cloned());
                }
            }
        }
        Ok(Self { values })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    pub results: Vec<Document>,
}

impl Pipeline {
    pub fn from_document(document: &Document) -> Result<Self> {
        let results = array_of(document, "results").ok_or_else(|| missing("results"))?;
        Ok(Self {
            results: results
                .iter()
                .filter_map(|item| match item {
                    Bson::Document(doc) => Some(doc.clone()),
                    _ => None,
                })
                .collect(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bulk {
    pub create: i64,
    pub history: i64,
    pub remove: i64,
}

impl Bulk {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            create: int_of(document, "create").ok_or_else(|| missing("create"))?,
            history: int_of(document, "history").ok_or_else(|| missing("history"))?,
            remove: int_of(document, "remove").ok_or_else(|| missing("remove"))?,
        })
    }
}

/// Index creation metadata; the full document is preserved alongside the
/// derived name.
#[derive(Debug, Clone, PartialEq)]
pub struct Index {
    pub name: String,
    pub raw: Document,
}

impl Index {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            name: string_of(document, "name")
                .ok_or_else(|| missing("name"))?
                .to_string(),
            raw: document.clone(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropIndex {
    pub dropped: bool,
}

impl DropIndex {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            dropped: bool_of(document, "dropIndex").ok_or_else(|| missing("dropIndex"))?,
        })
    }
}

/// `createCollection` and `renameCollection` both echo the namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Collection {
    pub database: String,
    pub collection: String,
}

impl Collection {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            database: string_of(document, "database")
                .ok_or_else(|| missing("database"))?
                .to_string(),
            collection: string_of(document, "collection")
                .ok_or_else(|| missing("collection"))?
                .to_string(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DropCollection {
    pub dropped: bool,
}

impl DropCollection {
    pub fn from_document(document: &Document) -> Result<Self> {
        Ok(Self {
            dropped: bool_of(document, "dropCollection")
                .ok_or_else(|| missing("dropCollection"))?,
        })
    }
}

/// Per-item outcomes plus the transaction-level summary.
#[derive(Debug, Clone, PartialEq)]
pub struct Transaction {
    pub results: Vec<Document>,
    pub total: i64,
    pub success: i64,
    pub failure: i64,
    pub committed: bool,
}

impl Transaction {
    pub fn from_document(document: &Document) -> Result<Self> {
        let results = array_of(document, "results")
            .ok_or_else(|| missing("results"))?
            .iter()
            .filter_map(|item| match item {
                Bson::Document(doc) => Some(doc.clone()),
                _ => None,
            })
            .collect();
        let summary = doc_of(document, "summary").ok_or_else(|| missing("summary"))?;
        Ok(Self {
            results,
            total: int_of(summary, "total").ok_or_else(|| missing("total"))?,
            success: int_of(summary, "success").ok_or_else(|| missing("success"))?,
            failure: int_of(summary, "failure").ok_or_else(|| missing("failure"))?,
            committed: bool_of(summary, "committed").ok_or_else(|| missing("committed"))?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn create_parses_both_shapes() {
        let id = ObjectId::new();
        let entity = ObjectId::new();
        let versioned = Create::from_document(&doc! {
            "_id": id,
            "database": "versionHistory",
            "collection": "entities",
            "entity": entity,
        })
        .unwrap();
        match versioned {
            Create::Versioned(history) => {
                assert_eq!(history.id, id);
                assert_eq!(history.entity, entity);
            }
            other => panic!("expected versioned, got {:?}", other),
        }

        let skipped =
            Create::from_document(&doc! { "_id": entity, "skipVersion": true }).unwrap();
        assert_eq!(skipped, Create::SkipVersion { id: entity });
    }

    #[test]
    fn update_requires_history_unless_skipped() {
        let err = Update::from_document(&doc! { "document": { "key": "v" } });
        assert!(err.is_err());

        let skipped = Update::from_document(&doc! { "skipVersion": true }).unwrap();
        assert_eq!(skipped, Update::SkipVersion);
    }

    #[test]
    fn retrieve_distinguishes_one_and_many() {
        let one = Retrieve::from_document(&doc! { "result": { "key": "v" } }).unwrap();
        assert!(matches!(one, Retrieve::One(_)));

        let many =
            Retrieve::from_document(&doc! { "results": [ { "a": 1 }, { "b": 2 } ] }).unwrap();
        match many {
            Retrieve::Many(docs) => assert_eq!(docs.len(), 2),
            other => panic!("expected many, got {:?}", other),
        }
    }

    #[test]
    fn distinct_flattens_value_groups() {
        let parsed = Distinct::from_document(&doc! {
            "results": [ { "values": ["a", "b"] } ],
        })
        .unwrap();
        assert_eq!(parsed.values.len(), 2);
    }

    #[test]
    fn affected_collects_ids_and_history() {
        let id = ObjectId::new();
        let parsed = Affected::from_document(&doc! {
            "success": [id],
            "failure": [],
            "history": [ { "_id": ObjectId::new() } ],
        })
        .unwrap();
        assert_eq!(parsed.success, vec![id]);
        assert!(parsed.failure.is_empty());
        assert_eq!(parsed.history.len(), 1);
    }

    #[test]
    fn bulk_counts() {
        let parsed = Bulk::from_document(&doc! {
            "create": 2_i32,
            "history": 3_i64,
            "remove": 1_i32,
        })
        .unwrap();
        assert_eq!(parsed.create, 2);
        assert_eq!(parsed.history, 3);
        assert_eq!(parsed.remove, 1);
    }

    #[test]
    fn transaction_summary() {
        let parsed = Transaction::from_document(&doc! {
            "results": [ { "_id": ObjectId::new() } ],
            "summary": { "total": 1_i32, "success": 1_i32, "failure": 0_i32, "committed": true },
        })
        .unwrap();
        assert_eq!(parsed.total, 1);
        assert!(parsed.committed);
    }
}
