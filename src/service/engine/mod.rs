// Embedded document engine.
//
// Namespaced collections of BSON documents keyed by `_id`, with
// query-by-example filters, update operators, aggregation, an index
// registry, and multi-document transactions.  The storage orchestrator is
// the only caller; it maps request options onto the types here.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use dashmap::DashMap;
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::debug;

use crate::error::{Result, ServiceError};
use crate::util::bson_ext::{doc_of, int_of, path_get};

pub mod aggregate;
pub mod filter;
pub mod index;
pub mod update;

pub use index::IndexModel;

/// A database + collection pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    pub database: String,
    pub collection: String,
}

impl Namespace {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
        }
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.database, self.collection)
    }
}

/// Ordering key derived from a document's `_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum IdKey {
    ObjectId([u8; 12]),
    String(String),
    Int(i64),
    Bool(bool),
    Date(i64),
    Other(String),
}

impl IdKey {
    fn from_bson(value: &Bson) -> Self {
        match value {
            Bson::ObjectId(oid) => IdKey::ObjectId(oid.bytes()),
            Bson::String(s) => IdKey::String(s.clone()),
            Bson::Int32(v) => IdKey::Int(i64::from(*v)),
            Bson::Int64(v) => IdKey::Int(*v),
            Bson::Boolean(v) => IdKey::Bool(*v),
            Bson::DateTime(v) => IdKey::Date(v.timestamp_millis()),
            other => IdKey::Other(format!("{:?}", other)),
        }
    }
}

/// Acknowledgement mode for writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteConcern {
    Acknowledged,
    Unacknowledged,
}

impl WriteConcern {
    pub fn is_acknowledged(self) -> bool {
        matches!(self, WriteConcern::Acknowledged)
    }

    /// Resolve from a request's options, inheriting `default` when the
    /// request does not specify one.  `{ writeConcern: { w: 0 } }` selects
    /// the unacknowledged mode.
    pub fn from_options(options: Option<&Document>, default: WriteConcern) -> Self {
        let Some(options) = options else {
            return default;
        };
        let Some(concern) = doc_of(options, "writeConcern") else {
            return default;
        };
        match int_of(concern, "w") {
            Some(0) => WriteConcern::Unacknowledged,
            Some(_) => WriteConcern::Acknowledged,
            None => default,
        }
    }
}

/// Cursor modifiers mapped from request options.
#[derive(Debug, Clone, Default)]
pub struct FindOptions {
    pub sort: Option<Document>,
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    pub projection: Option<Document>,
}

impl FindOptions {
    pub fn from_options(options: Option<&Document>) -> Self {
        let Some(options) = options else {
            return Self::default();
        };
        Self {
            sort: doc_of(options, "sort").cloned(),
            skip: int_of(options, "skip"),
            limit: int_of(options, "limit"),
            projection: doc_of(options, "projection").cloned(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateSummary {
    pub matched: u64,
    pub modified: u64,
    pub upserted_id: Option<Bson>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BulkSummary {
    pub inserted: u64,
    pub deleted: u64,
}

#[derive(Default)]
struct CollectionData {
    docs: BTreeMap<IdKey, Document>,
    indexes: Vec<IndexModel>,
}

/// The engine itself.  Normal operations hold the transaction gate shared;
/// a transaction holds it exclusively for its whole scope.
#[derive(Default)]
pub struct Engine {
    collections: DashMap<Namespace, Arc<RwLock<CollectionData>>>,
    registered: DashMap<Namespace, Document>,
    txn_gate: RwLock<()>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    fn data(&self, ns: &Namespace) -> Arc<RwLock<CollectionData>> {
        Arc::clone(
            self.collections
                .entry(ns.clone())
                .or_default()
                .value(),
        )
    }

    fn existing(&self, ns: &Namespace) -> Option<Arc<RwLock<CollectionData>>> {
        self.collections.get(ns).map(|entry| Arc::clone(entry.value()))
    }

    pub fn insert_one(&self, ns: &Namespace, document: &Document) -> Result<Bson> {
        let _gate = self.txn_gate.read();
        self.insert_one_raw(ns, document)
    }

    fn insert_one_raw(&self, ns: &Namespace, document: &Document) -> Result<Bson> {
        let mut document = document.clone();
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };

        let data = self.data(ns);
        let mut data = data.write();
        let key = IdKey::from_bson(&id);
        if data.docs.contains_key(&key) {
            return Err(ServiceError::DuplicateKey(format!(
                "duplicate _id in {}",
                ns
            )));
        }
        data.docs.insert(key, document);
        Ok(id)
    }

    pub fn find(&self, ns: &Namespace, query: &Document, options: &FindOptions) -> Vec<Document> {
        let _gate = self.txn_gate.read();
        self.find_raw(ns, query, options)
    }

    fn find_raw(&self, ns: &Namespace, query: &Document, options: &FindOptions) -> Vec<Document> {
        let Some(data) = self.existing(ns) else {
            return Vec::new();
        };
        let data = data.read();
        let mut results: Vec<Document> = data
            .docs
            .values()
            .filter(|doc| filter::matches(doc, query))
            .cloned()
            .collect();

        if let Some(sort) = &options.sort {
            results.sort_by(|a, b| aggregate::sort_ordering(a, b, sort));
        }
        if let Some(skip) = options.skip {
            results.drain(..results.len().min(skip.max(0) as usize));
        }
        if let Some(limit) = options.limit {
            results.truncate(limit.max(0) as usize);
        }
        if let Some(projection) = &options.projection {
            results = results
                .iter()
                .map(|doc| aggregate::apply_projection(doc, projection))
                .collect();
        }
        results
    }

    pub fn find_one(&self, ns: &Namespace, query: &Document) -> Option<Document> {
        let _gate = self.txn_gate.read();
        self.find_one_raw(ns, query)
    }

    fn find_one_raw(&self, ns: &Namespace, query: &Document) -> Option<Document> {
        let data = self.existing(ns)?;
        let data = data.read();
        data.docs
            .values()
            .find(|doc| filter::matches(doc, query))
            .cloned()
    }

    pub fn count(&self, ns: &Namespace, query: &Document, options: &FindOptions) -> i64 {
        let _gate = self.txn_gate.read();
        let Some(data) = self.existing(ns) else {
            return 0;
        };
        let data = data.read();
        let mut count = data
            .docs
            .values()
            .filter(|doc| filter::matches(doc, query))
            .count() as i64;
        if let Some(skip) = options.skip {
            count = (count - skip.max(0)).max(0);
        }
        if let Some(limit) = options.limit {
            count = count.min(limit.max(0));
        }
        count
    }

    pub fn distinct(&self, ns: &Namespace, field: &str, query: &Document) -> Vec<Bson> {
        let _gate = self.txn_gate.read();
        let Some(data) = self.existing(ns) else {
            return Vec::new();
        };
        let data = data.read();
        let mut values: Vec<Bson> = Vec::new();
        for doc in data.docs.values() {
            if !filter::matches(doc, query) {
                continue;
            }
            let Some(value) = path_get(doc, field) else {
                continue;
            };
            let candidates: Vec<Bson> = match value {
                Bson::Array(items) => items.clone(),
                other => vec![other.clone()],
            };
            for candidate in candidates {
                if !values.iter().any(|seen| filter::equals(seen, &candidate)) {
                    values.push(candidate);
                }
            }
        }
        values
    }

    pub fn aggregate(&self, ns: &Namespace, stages: &[Document]) -> Result<Vec<Document>> {
        let _gate = self.txn_gate.read();
        let input = match self.existing(ns) {
            Some(data) => data.read().docs.values().cloned().collect(),
            None => Vec::new(),
        };
        aggregate::run(input, stages)
    }

    pub fn update_one(
        &self,
        ns: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateSummary> {
        let _gate = self.txn_gate.read();
        self.update_one_raw(ns, query, update, upsert)
    }

    fn update_one_raw(
        &self,
        ns: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateSummary> {
        let data = self.data(ns);
        let mut data = data.write();
        let matched = data
            .docs
            .iter()
            .find(|(_, doc)| filter::matches(doc, query))
            .map(|(key, doc)| (key.clone(), doc.clone()));

        if let Some((key, mut document)) = matched {
            let before = document.clone();
            update::apply(&mut document, update)?;
            let modified = u64::from(document != before);
            data.docs.insert(key, document);
            return Ok(UpdateSummary {
                matched: 1,
                modified,
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(UpdateSummary::default());
        }

        // seed the upserted document from the filter's equality terms
        let mut document = Document::new();
        for (key, value) in query.iter() {
            let key: &str = key.as_ref();
            if key.starts_with('$') || matches!(value, Bson::Document(_)) {
                continue;
            }
            document.insert(key, value.clone());
        }
        update::apply(&mut document, update)?;
        let id = match document.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                document.insert("_id", id.clone());
                id
            }
        };
        let key = IdKey::from_bson(&id);
        if data.docs.contains_key(&key) {
            return Err(ServiceError::DuplicateKey(format!(
                "duplicate _id in {}",
                ns
            )));
        }
        data.docs.insert(key, document);
        Ok(UpdateSummary {
            matched: 0,
            modified: 0,
            upserted_id: Some(id),
        })
    }

    pub fn update_many(
        &self,
        ns: &Namespace,
        query: &Document,
        update: &Document,
    ) -> Result<UpdateSummary> {
        let _gate = self.txn_gate.read();
        let data = self.data(ns);
        let mut data = data.write();
        let keys: Vec<IdKey> = data
            .docs
            .iter()
            .filter(|(_, doc)| filter::matches(doc, query))
            .map(|(key, _)| key.clone())
            .collect();

        let mut summary = UpdateSummary::default();
        for key in keys {
            if let Some(mut document) = data.docs.get(&key).cloned() {
                let before = document.clone();
                update::apply(&mut document, update)?;
                summary.matched += 1;
                if document != before {
                    summary.modified += 1;
                }
                data.docs.insert(key, document);
            }
        }
        Ok(summary)
    }

    pub fn replace_one(
        &self,
        ns: &Namespace,
        query: &Document,
        replacement: &Document,
        upsert: bool,
    ) -> Result<UpdateSummary> {
        let _gate = self.txn_gate.read();
        let data = self.data(ns);
        let mut data = data.write();
        let matched = data
            .docs
            .iter()
            .find(|(_, doc)| filter::matches(doc, query))
            .map(|(key, doc)| (key.clone(), doc.clone()));

        if let Some((key, existing)) = matched {
            let mut replacement = replacement.clone();
            if !replacement.contains_key("_id") {
                if let Some(id) = existing.get("_id") {
                    replacement.insert("_id", id.clone());
                }
            }
            let modified = u64::from(replacement != existing);
            data.docs.insert(key, replacement);
            return Ok(UpdateSummary {
                matched: 1,
                modified,
                upserted_id: None,
            });
        }

        if !upsert {
            return Ok(UpdateSummary::default());
        }

        let mut replacement = replacement.clone();
        let id = match replacement.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Bson::ObjectId(ObjectId::new());
                replacement.insert("_id", id.clone());
                id
            }
        };
        data.docs.insert(IdKey::from_bson(&id), replacement);
        Ok(UpdateSummary {
            matched: 0,
            modified: 0,
            upserted_id: Some(id),
        })
    }

    pub fn delete_one(&self, ns: &Namespace, query: &Document) -> u64 {
        let _gate = self.txn_gate.read();
        self.delete_one_raw(ns, query)
    }

    fn delete_one_raw(&self, ns: &Namespace, query: &Document) -> u64 {
        let Some(data) = self.existing(ns) else {
            return 0;
        };
        let mut data = data.write();
        let key = data
            .docs
            .iter()
            .find(|(_, doc)| filter::matches(doc, query))
            .map(|(key, _)| key.clone());
        match key {
            Some(key) => {
                data.docs.remove(&key);
                1
            }
            None => 0,
        }
    }

    /// Ordered bulk write: inserts first, then one delete per remove
    /// filter.  Stops at the first failed insert.
    pub fn bulk_write(
        &self,
        ns: &Namespace,
        inserts: &[Document],
        removes: &[Document],
    ) -> Result<BulkSummary> {
        let _gate = self.txn_gate.read();
        let mut summary = BulkSummary::default();
        for document in inserts {
            self.insert_one_raw(ns, document)?;
            summary.inserted += 1;
        }
        for query in removes {
            summary.deleted += self.delete_one_raw(ns, query);
        }
        Ok(summary)
    }

    pub fn create_index(
        &self,
        ns: &Namespace,
        keys: Document,
        options: Option<&Document>,
    ) -> Result<Document> {
        let _gate = self.txn_gate.read();
        let model = IndexModel::new(keys, options);
        let data = self.data(ns);
        let mut data = data.write();
        if let Some(existing) = data.indexes.iter().find(|index| index.name == model.name) {
            if existing.keys == model.keys {
                return Ok(existing.metadata());
            }
            return Err(ServiceError::AlreadyExists(format!(
                "index {} exists with a different specification",
                model.name
            )));
        }
        let metadata = model.metadata();
        debug!("Created index {} on {}", model.name, ns);
        data.indexes.push(model);
        Ok(metadata)
    }

    pub fn drop_index_by_name(&self, ns: &Namespace, name: &str) -> Result<()> {
        let _gate = self.txn_gate.read();
        let Some(data) = self.existing(ns) else {
            return Err(ServiceError::NotFound(format!("index {} not found", name)));
        };
        let mut data = data.write();
        let before = data.indexes.len();
        data.indexes.retain(|index| index.name != name);
        if data.indexes.len() == before {
            return Err(ServiceError::NotFound(format!("index {} not found", name)));
        }
        Ok(())
    }

    pub fn drop_index_by_spec(&self, ns: &Namespace, spec: &Document) -> Result<()> {
        let _gate = self.txn_gate.read();
        let Some(data) = self.existing(ns) else {
            return Err(ServiceError::NotFound("index not found".to_string()));
        };
        let mut data = data.write();
        let before = data.indexes.len();
        data.indexes.retain(|index| !index.matches_spec(spec));
        if data.indexes.len() == before {
            return Err(ServiceError::NotFound("index not found".to_string()));
        }
        Ok(())
    }

    pub fn list_indexes(&self, ns: &Namespace) -> Vec<Document> {
        let _gate = self.txn_gate.read();
        match self.existing(ns) {
            Some(data) => data.read().indexes.iter().map(IndexModel::metadata).collect(),
            None => Vec::new(),
        }
    }

    pub fn has_collection(&self, ns: &Namespace) -> bool {
        self.registered.contains_key(ns) || self.collections.contains_key(ns)
    }

    pub fn create_collection(&self, ns: &Namespace, options: &Document) -> Result<()> {
        let _gate = self.txn_gate.read();
        if self.has_collection(ns) {
            return Err(ServiceError::AlreadyExists(format!(
                "collection {} exists",
                ns
            )));
        }
        self.collections.entry(ns.clone()).or_default();
        self.registered.insert(ns.clone(), options.clone());
        Ok(())
    }

    pub fn rename_collection(&self, ns: &Namespace, target: &Namespace) -> Result<()> {
        let _gate = self.txn_gate.read();
        if self.has_collection(target) {
            return Err(ServiceError::AlreadyExists(format!(
                "collection {} exists",
                target
            )));
        }
        if let Some((_, data)) = self.collections.remove(ns) {
            self.collections.insert(target.clone(), data);
        }
        if let Some((_, options)) = self.registered.remove(ns) {
            self.registered.insert(target.clone(), options);
        }
        Ok(())
    }

    pub fn drop_collection(&self, ns: &Namespace) {
        let _gate = self.txn_gate.read();
        self.collections.remove(ns);
        self.registered.remove(ns);
    }

    /// Begin a multi-document transaction.  Holding the returned value
    /// excludes every other writer; dropping it without `commit` rolls all
    /// of its operations back.
    pub fn begin_transaction(&self) -> Transaction<'_> {
        Transaction {
            gate: Some(self.txn_gate.write()),
            engine: self,
            undo: Vec::new(),
            committed: false,
        }
    }
}

enum Undo {
    Insert { ns: Namespace, id: Bson },
    Update { ns: Namespace, before: Document },
    Delete { ns: Namespace, before: Document },
}

pub struct Transaction<'a> {
    gate: Option<RwLockWriteGuard<'a, ()>>,
    engine: &'a Engine,
    undo: Vec<Undo>,
    committed: bool,
}

impl<'a> Transaction<'a> {
    pub fn insert_one(&mut self, ns: &Namespace, document: &Document) -> Result<Bson> {
        let id = self.engine.insert_one_raw(ns, document)?;
        self.undo.push(Undo::Insert {
            ns: ns.clone(),
            id: id.clone(),
        });
        Ok(id)
    }

    pub fn find(&self, ns: &Namespace, query: &Document) -> Vec<Document> {
        self.engine.find_raw(ns, query, &FindOptions::default())
    }

    pub fn find_one(&self, ns: &Namespace, query: &Document) -> Option<Document> {
        self.engine.find_one_raw(ns, query)
    }

    pub fn update_one(
        &mut self,
        ns: &Namespace,
        query: &Document,
        update: &Document,
        upsert: bool,
    ) -> Result<UpdateSummary> {
        let before = self.engine.find_one_raw(ns, query);
        let summary = self.engine.update_one_raw(ns, query, update, upsert)?;
        if let Some(before) = before {
            self.undo.push(Undo::Update {
                ns: ns.clone(),
                before,
            });
        } else if let Some(id) = &summary.upserted_id {
            self.undo.push(Undo::Insert {
                ns: ns.clone(),
                id: id.clone(),
            });
        }
        Ok(summary)
    }

    pub fn delete_one(&mut self, ns: &Namespace, query: &Document) -> u64 {
        let Some(before) = self.engine.find_one_raw(ns, query) else {
            return 0;
        };
        let mut exact = Document::new();
        if let Some(id) = before.get("_id") {
            exact.insert("_id", id.clone());
        }
        let deleted = self.engine.delete_one_raw(ns, &exact);
        if deleted > 0 {
            self.undo.push(Undo::Delete {
                ns: ns.clone(),
                before,
            });
        }
        deleted
    }

    pub fn commit(mut self) {
        self.committed = true;
        self.undo.clear();
        self.gate.take();
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        // roll back in reverse order while still holding the gate
        while let Some(entry) = self.undo.pop() {
            match entry {
                Undo::Insert { ns, id } => {
                    if let Some(data) = self.engine.existing(&ns) {
                        data.write().docs.remove(&IdKey::from_bson(&id));
                    }
                }
                Undo::Update { ns, before } | Undo::Delete { ns, before } => {
                    if let Some(id) = before.get("_id").cloned() {
                        let data = self.engine.data(&ns);
                        data.write().docs.insert(IdKey::from_bson(&id), before);
                    }
                }
            }
        }
        self.gate.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    fn ns() -> Namespace {
        Namespace::new("itest", "test")
    }

    #[test]
    fn insert_find_delete() {
        let engine = Engine::new();
        let id = ObjectId::new();
        engine
            .insert_one(&ns(), &doc! { "_id": id, "key": "value" })
            .unwrap();

        let found = engine.find_one(&ns(), &doc! { "_id": id }).unwrap();
        assert_eq!(found.get("key"), Some(&Bson::String("value".to_string())));

        assert_eq!(engine.delete_one(&ns(), &doc! { "_id": id }), 1);
        assert!(engine.find_one(&ns(), &doc! { "_id": id }).is_none());
    }

    #[test]
    fn insert_assigns_missing_ids() {
        let engine = Engine::new();
        let id = engine.insert_one(&ns(), &doc! { "key": "value" }).unwrap();
        assert!(matches!(id, Bson::ObjectId(_)));
        assert_eq!(engine.count(&ns(), &doc! {}, &FindOptions::default()), 1);
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let engine = Engine::new();
        let id = ObjectId::new();
        engine.insert_one(&ns(), &doc! { "_id": id }).unwrap();
        assert!(engine.insert_one(&ns(), &doc! { "_id": id }).is_err());
    }

    #[test]
    fn find_applies_sort_skip_limit() {
        let engine = Engine::new();
        for i in 0..5 {
            engine
                .insert_one(&ns(), &doc! { "rank": i as i32 })
                .unwrap();
        }
        let options = FindOptions {
            sort: Some(doc! { "rank": -1 }),
            skip: Some(1),
            limit: Some(2),
            projection: None,
        };
        let results = engine.find(&ns(), &doc! {}, &options);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].get("rank"), Some(&Bson::Int32(3)));
        assert_eq!(results[1].get("rank"), Some(&Bson::Int32(2)));
    }

    #[test]
    fn update_one_and_upsert() {
        let engine = Engine::new();
        let id = ObjectId::new();
        engine
            .insert_one(&ns(), &doc! { "_id": id, "key": "old" })
            .unwrap();

        let summary = engine
            .update_one(&ns(), &doc! { "_id": id }, &doc! { "$set": { "key": "new" } }, false)
            .unwrap();
        assert_eq!(summary.matched, 1);
        assert_eq!(summary.modified, 1);

        let missing = ObjectId::new();
        let summary = engine
            .update_one(
                &ns(),
                &doc! { "_id": missing },
                &doc! { "$set": { "key": "fresh" } },
                true,
            )
            .unwrap();
        assert!(summary.upserted_id.is_some());
        let upserted = engine.find_one(&ns(), &doc! { "_id": missing }).unwrap();
        assert_eq!(upserted.get("key"), Some(&Bson::String("fresh".to_string())));
    }

    #[test]
    fn replace_preserves_the_id() {
        let engine = Engine::new();
        let id = ObjectId::new();
        engine
            .insert_one(&ns(), &doc! { "_id": id, "key": "a", "extra": 1_i32 })
            .unwrap();

        engine
            .replace_one(&ns(), &doc! { "_id": id }, &doc! { "key": "b" }, false)
            .unwrap();
        let replaced = engine.find_one(&ns(), &doc! { "_id": id }).unwrap();
        assert_eq!(replaced.get("_id"), Some(&Bson::ObjectId(id)));
        assert_eq!(replaced.get("key"), Some(&Bson::String("b".to_string())));
        assert!(!replaced.contains_key("extra"));
    }

    #[test]
    fn distinct_flattens_arrays_and_dedups() {
        let engine = Engine::new();
        engine
            .insert_one(&ns(), &doc! { "tags": ["a", "b"] })
            .unwrap();
        engine.insert_one(&ns(), &doc! { "tags": "b" }).unwrap();
        engine.insert_one(&ns(), &doc! { "tags": "c" }).unwrap();

        let values = engine.distinct(&ns(), "tags", &doc! {});
        assert_eq!(values.len(), 3);
    }

    #[test]
    fn bulk_write_counts() {
        let engine = Engine::new();
        let keep = ObjectId::new();
        let gone = ObjectId::new();
        engine
            .insert_one(&ns(), &doc! { "_id": gone, "key": "gone" })
            .unwrap();

        let summary = engine
            .bulk_write(
                &ns(),
                &[doc! { "_id": keep, "key": "keep" }, doc! { "key": "extra" }],
                &[doc! { "_id": gone }],
            )
            .unwrap();
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.deleted, 1);
    }

    #[test]
    fn collection_lifecycle() {
        let engine = Engine::new();
        let source = Namespace::new("itest", "source");
        let target = Namespace::new("itest", "target");

        engine.create_collection(&source, &doc! {}).unwrap();
        assert!(engine.has_collection(&source));
        assert!(engine.create_collection(&source, &doc! {}).is_err());

        engine.insert_one(&source, &doc! { "key": "v" }).unwrap();
        engine.rename_collection(&source, &target).unwrap();
        assert!(!engine.has_collection(&source));
        assert_eq!(engine.count(&target, &doc! {}, &FindOptions::default()), 1);

        engine.drop_collection(&target);
        assert!(!engine.has_collection(&target));
    }

    #[test]
    fn rename_refuses_existing_target() {
        let engine = Engine::new();
        let source = Namespace::new("itest", "source");
        let target = Namespace::new("itest", "target");
        engine.create_collection(&source, &doc! {}).unwrap();
        engine.create_collection(&target, &doc! {}).unwrap();
        assert!(engine.rename_collection(&source, &target).is_err());
    }

    #[test]
    fn transaction_commit_applies_everything() {
        let engine = Engine::new();
        let id = ObjectId::new();

        let mut txn = engine.begin_transaction();
        txn.insert_one(&ns(), &doc! { "_id": id, "key": "a" }).unwrap();
        txn.update_one(&ns(), &doc! { "_id": id }, &doc! { "$set": { "key": "b" } }, false)
            .unwrap();
        txn.commit();

        let found = engine.find_one(&ns(), &doc! { "_id": id }).unwrap();
        assert_eq!(found.get("key"), Some(&Bson::String("b".to_string())));
    }

    #[test]
    fn transaction_rollback_undoes_everything() {
        let engine = Engine::new();
        let existing = ObjectId::new();
        let fresh = ObjectId::new();
        engine
            .insert_one(&ns(), &doc! { "_id": existing, "key": "orig" })
            .unwrap();

        {
            let mut txn = engine.begin_transaction();
            txn.insert_one(&ns(), &doc! { "_id": fresh }).unwrap();
            txn.update_one(
                &ns(),
                &doc! { "_id": existing },
                &doc! { "$set": { "key": "changed" } },
                false,
            )
            .unwrap();
            txn.delete_one(&ns(), &doc! { "_id": existing });
            // dropped without commit
        }

        assert!(engine.find_one(&ns(), &doc! { "_id": fresh }).is_none());
        let restored = engine.find_one(&ns(), &doc! { "_id": existing }).unwrap();
        assert_eq!(restored.get("key"), Some(&Bson::String("orig".to_string())));
    }
}
