// Typed request schemas, one per action.
//
// Every schema shares the common envelope (database, collection, options,
// metadata, correlationId, skip flags) and differs in its payload.  Payload
// types implement `Payload`; the blanket `Document` implementation applies
// the structural convention that a model field named `id` holding an object
// id travels as `_id` on the wire.

use bson::{doc, Bson, Document};

use crate::error::{Result, ServiceError};
use crate::model::action::Action;
use crate::model::request::Request;
use crate::util::bson_ext::{array_of, doc_of, rename_id_for_wire, rename_id_from_wire, string_of};

/// Marshal/unmarshal boundary for schema payloads.
pub trait Payload: Sized {
    fn to_document(&self) -> Result<Document>;
    fn from_document(document: &Document) -> Result<Self>;
}

impl Payload for Document {
    fn to_document(&self) -> Result<Document> {
        let mut document = self.clone();
        rename_id_for_wire(&mut document);
        Ok(document)
    }

    fn from_document(document: &Document) -> Result<Self> {
        let mut document = document.clone();
        rename_id_from_wire(&mut document);
        Ok(document)
    }
}

/// Envelope fields common to the whole family.
#[derive(Debug, Clone, Default)]
pub struct Envelope {
    pub database: String,
    pub collection: String,
    pub options: Option<Document>,
    pub metadata: Option<Document>,
    pub correlation_id: Option<String>,
    pub skip_version: bool,
    pub skip_metric: bool,
}

impl Envelope {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            ..Self::default()
        }
    }

    fn apply(&self, mut request: Request) -> Request {
        request.options = self.options.clone();
        request.metadata = self.metadata.clone();
        request.correlation_id = self.correlation_id.clone();
        request.skip_version = self.skip_version;
        request.skip_metric = self.skip_metric;
        request
    }

    fn from_request(request: &Request) -> Self {
        Self {
            database: request.database.clone(),
            collection: request.collection.clone(),
            options: request.options.clone(),
            metadata: request.metadata.clone(),
            correlation_id: request.correlation_id.clone(),
            skip_version: request.skip_version,
            skip_metric: request.skip_metric,
        }
    }
}

fn expect_action(request: &Request, action: Action) -> Result<()> {
    if request.action == action {
        Ok(())
    } else {
        Err(ServiceError::InvalidRequest(format!(
            "expected action {}, found {}",
            action, request.action
        )))
    }
}

/// Create a new document; the payload is owned.
#[derive(Debug, Clone)]
pub struct Create<D: Payload> {
    pub envelope: Envelope,
    pub document: D,
}

impl<D: Payload> Create<D> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, document: D) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            document,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = self.document.to_document()?;
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Create,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Create)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            document: D::from_document(&request.document)?,
        })
    }
}

/// Create without taking ownership of the payload.
#[derive(Debug, Clone)]
pub struct CreateWithReference<'a, D: Payload> {
    pub envelope: Envelope,
    pub document: &'a D,
}

impl<'a, D: Payload> CreateWithReference<'a, D> {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        document: &'a D,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            document,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = self.document.to_document()?;
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Create,
        )))
    }
}

/// Create a timeseries point; no version history, identifier optional.
#[derive(Debug, Clone)]
pub struct CreateTimeseries<D: Payload> {
    pub envelope: Envelope,
    pub document: D,
}

impl<D: Payload> CreateTimeseries<D> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, document: D) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            document,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = self.document.to_document()?;
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::CreateTimeseries,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::CreateTimeseries)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            document: D::from_document(&request.document)?,
        })
    }
}

/// Merge an id-bearing partial document into the stored one.
#[derive(Debug, Clone)]
pub struct MergeForId<D: Payload> {
    pub envelope: Envelope,
    pub document: D,
}

impl<D: Payload> MergeForId<D> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, document: D) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            document,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = self.document.to_document()?;
        if !matches!(document.get("_id"), Some(Bson::ObjectId(_))) {
            return Err(ServiceError::InvalidRequest(
                "merge payload has no id".to_string(),
            ));
        }
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Update,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Update)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            document: D::from_document(&request.document)?,
        })
    }
}

/// As `MergeForId`, payload referenced rather than owned.
#[derive(Debug, Clone)]
pub struct MergeForIdWithReference<'a, D: Payload> {
    pub envelope: Envelope,
    pub document: &'a D,
}

impl<'a, D: Payload> MergeForIdWithReference<'a, D> {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        document: &'a D,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            document,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = self.document.to_document()?;
        if !matches!(document.get("_id"), Some(Bson::ObjectId(_))) {
            return Err(ServiceError::InvalidRequest(
                "merge payload has no id".to_string(),
            ));
        }
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Update,
        )))
    }
}

/// Replace the document matching a filter wholesale.
#[derive(Debug, Clone)]
pub struct Replace<D: Payload, F: Payload> {
    pub envelope: Envelope,
    pub filter: F,
    pub replace: D,
}

impl<D: Payload, F: Payload> Replace<D, F> {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        filter: F,
        replace: D,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            filter,
            replace,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = doc! {
            "filter": self.filter.to_document()?,
            "replace": self.replace.to_document()?,
        };
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Update,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Update)?;
        let filter = doc_of(&request.document, "filter")
            .ok_or_else(|| ServiceError::InvalidRequest("no filter in payload".to_string()))?;
        let replace = doc_of(&request.document, "replace")
            .ok_or_else(|| ServiceError::InvalidRequest("no replace in payload".to_string()))?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            filter: F::from_document(filter)?,
            replace: D::from_document(replace)?,
        })
    }
}

/// Apply an update clause to the documents matching a filter.
#[derive(Debug, Clone)]
pub struct Update<D: Payload, F: Payload> {
    pub envelope: Envelope,
    pub filter: F,
    pub update: D,
}

impl<D: Payload, F: Payload> Update<D, F> {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        filter: F,
        update: D,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            filter,
            update,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let document = doc! {
            "filter": self.filter.to_document()?,
            "update": self.update.to_document()?,
        };
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Update,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Update)?;
        let filter = doc_of(&request.document, "filter")
            .ok_or_else(|| ServiceError::InvalidRequest("no filter in payload".to_string()))?;
        let update = doc_of(&request.document, "update")
            .ok_or_else(|| ServiceError::InvalidRequest("no update in payload".to_string()))?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            filter: F::from_document(filter)?,
            update: D::from_document(update)?,
        })
    }
}

/// Fetch by id or by filter.
#[derive(Debug, Clone)]
pub struct Retrieve<F: Payload> {
    pub envelope: Envelope,
    pub filter: F,
}

impl<F: Payload> Retrieve<F> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, filter: F) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            filter,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            self.filter.to_document()?,
            Action::Retrieve,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Retrieve)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            filter: F::from_document(&request.document)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct Count<F: Payload> {
    pub envelope: Envelope,
    pub filter: F,
}

impl<F: Payload> Count<F> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, filter: F) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            filter,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            self.filter.to_document()?,
            Action::Count,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Count)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            filter: F::from_document(&request.document)?,
        })
    }
}

/// Distinct values of `field` across documents matching the filter.
#[derive(Debug, Clone)]
pub struct Distinct<F: Payload> {
    pub envelope: Envelope,
    pub field: String,
    pub filter: Option<F>,
}

impl<F: Payload> Distinct<F> {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        field: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            field: field.into(),
            filter: None,
        }
    }

    pub fn with_filter(mut self, filter: F) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn to_request(&self) -> Result<Request> {
        let mut document = doc! { "field": self.field.as_str() };
        if let Some(filter) = &self.filter {
            document.insert("filter", filter.to_document()?);
        }
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::Distinct,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Distinct)?;
        let field = string_of(&request.document, "field")
            .ok_or_else(|| ServiceError::InvalidRequest("no field in payload".to_string()))?;
        let filter = match doc_of(&request.document, "filter") {
            Some(filter) => Some(F::from_document(filter)?),
            None => None,
        };
        Ok(Self {
            envelope: Envelope::from_request(request),
            field: field.to_string(),
            filter,
        })
    }
}

/// Ordered aggregation stages.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub envelope: Envelope,
    pub stages: Vec<Document>,
}

impl Pipeline {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            stages: Vec::new(),
        }
    }

    pub fn stage(mut self, stage: Document) -> Self {
        self.stages.push(stage);
        self
    }

    pub fn to_request(&self) -> Result<Request> {
        let stages: Vec<Bson> = self
            .stages
            .iter()
            .map(|stage| Bson::Document(stage.clone()))
            .collect();
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            doc! { "specification": stages },
            Action::Pipeline,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Pipeline)?;
        let stages = array_of(&request.document, "specification")
            .ok_or_else(|| ServiceError::InvalidRequest("no specification".to_string()))?
            .iter()
            .map(|stage| match stage {
                Bson::Document(doc) => Ok(doc.clone()),
                _ => Err(ServiceError::InvalidRequest(
                    "pipeline stage is not a document".to_string(),
                )),
            })
            .collect::<Result<Vec<Document>>>()?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            stages,
        })
    }
}

/// Create an index from a key specification plus rich options.
#[derive(Debug, Clone)]
pub struct Index<S: Payload> {
    pub envelope: Envelope,
    pub specification: S,
}

impl<S: Payload> Index<S> {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        specification: S,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            specification,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            self.specification.to_document()?,
            Action::Index,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Index)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            specification: S::from_document(&request.document)?,
        })
    }
}

/// Drop an index by name or by specification.
#[derive(Debug, Clone)]
pub struct DropIndex<S: Payload> {
    pub envelope: Envelope,
    pub specification: Option<S>,
    pub name: Option<String>,
}

impl<S: Payload> DropIndex<S> {
    pub fn by_name(
        database: impl Into<String>,
        collection: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            specification: None,
            name: Some(name.into()),
        }
    }

    pub fn by_specification(
        database: impl Into<String>,
        collection: impl Into<String>,
        specification: S,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            specification: Some(specification),
            name: None,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        let mut document = Document::new();
        if let Some(name) = &self.name {
            document.insert("name", name.as_str());
        }
        if let Some(specification) = &self.specification {
            document.insert("specification", specification.to_document()?);
        }
        if document.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "drop index needs a name or a specification".to_string(),
            ));
        }
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            document,
            Action::DropIndex,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::DropIndex)?;
        let specification = match doc_of(&request.document, "specification") {
            Some(spec) => Some(S::from_document(spec)?),
            None => None,
        };
        Ok(Self {
            envelope: Envelope::from_request(request),
            specification,
            name: string_of(&request.document, "name").map(str::to_string),
        })
    }
}

/// Collection lifecycle requests share one shape: a namespace plus an
/// action-specific payload document.
#[derive(Debug, Clone)]
pub struct CreateCollection {
    pub envelope: Envelope,
    pub document: Document,
}

impl CreateCollection {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            document: Document::new(),
        }
    }

    pub fn with_document(mut self, document: Document) -> Self {
        self.document = document;
        self
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            self.document.clone(),
            Action::CreateCollection,
        )))
    }
}

#[derive(Debug, Clone)]
pub struct RenameCollection {
    pub envelope: Envelope,
    pub target: String,
}

impl RenameCollection {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            target: target.into(),
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            doc! { "target": self.target.as_str() },
            Action::RenameCollection,
        )))
    }
}

#[derive(Debug, Clone)]
pub struct DropCollection {
    pub envelope: Envelope,
    pub clear_version_history: bool,
}

impl DropCollection {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            clear_version_history: false,
        }
    }

    pub fn clear_version_history(mut self) -> Self {
        self.clear_version_history = true;
        self
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            doc! { "clearVersionHistory": self.clear_version_history },
            Action::DropCollection,
        )))
    }
}

/// Delete the documents matching a filter.
#[derive(Debug, Clone)]
pub struct Delete<F: Payload> {
    pub envelope: Envelope,
    pub filter: F,
}

impl<F: Payload> Delete<F> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>, filter: F) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            filter,
        }
    }

    pub fn to_request(&self) -> Result<Request> {
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            self.filter.to_document()?,
            Action::Delete,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Delete)?;
        Ok(Self {
            envelope: Envelope::from_request(request),
            filter: F::from_document(&request.document)?,
        })
    }
}

/// Batched inserts and deletes in one command.
#[derive(Debug, Clone)]
pub struct Bulk<D: Payload, F: Payload> {
    pub envelope: Envelope,
    pub insert: Vec<D>,
    pub remove: Vec<F>,
}

impl<D: Payload, F: Payload> Bulk<D, F> {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            envelope: Envelope::new(database, collection),
            insert: Vec::new(),
            remove: Vec::new(),
        }
    }

    pub fn insert(mut self, document: D) -> Self {
        self.insert.push(document);
        self
    }

    pub fn remove(mut self, filter: F) -> Self {
        self.remove.push(filter);
        self
    }

    pub fn to_request(&self) -> Result<Request> {
        let insert = self
            .insert
            .iter()
            .map(|item| item.to_document().map(Bson::Document))
            .collect::<Result<Vec<Bson>>>()?;
        let remove = self
            .remove
            .iter()
            .map(|item| item.to_document().map(Bson::Document))
            .collect::<Result<Vec<Bson>>>()?;
        Ok(self.envelope.apply(Request::new(
            self.envelope.database.clone(),
            self.envelope.collection.clone(),
            doc! { "insert": insert, "remove": remove },
            Action::Bulk,
        )))
    }

    pub fn from_request(request: &Request) -> Result<Self> {
        expect_action(request, Action::Bulk)?;
        let mut bulk = Self {
            envelope: Envelope::from_request(request),
            insert: Vec::new(),
            remove: Vec::new(),
        };
        if let Some(items) = array_of(&request.document, "insert") {
            for item in items {
                match item {
                    Bson::Document(doc) => bulk.insert.push(D::from_document(doc)?),
                    _ => {
                        return Err(ServiceError::InvalidRequest(
                            "bulk insert item is not a document".to_string(),
                        ))
                    }
                }
            }
        }
        if let Some(items) = array_of(&request.document, "remove") {
            for item in items {
                match item {
                    Bson::Document(doc) => bulk.remove.push(F::from_document(doc)?),
                    _ => {
                        return Err(ServiceError::InvalidRequest(
                            "bulk remove item is not a document".to_string(),
                        ))
                    }
                }
            }
        }
        Ok(bulk)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::oid::ObjectId;

    #[test]
    fn create_round_trip_applies_the_id_rule() {
        let id = ObjectId::new();
        let mut create: Create<Document> =
            Create::new("itest", "test", doc! { "id": id, "key": "value" });
        create.envelope.metadata = Some(doc! { "source": "unit" });

        let request = create.to_request().unwrap();
        assert_eq!(request.action, Action::Create);
        // the model `id` travels as `_id`
        assert!(matches!(
            request.document.get("_id"),
            Some(Bson::ObjectId(_))
        ));
        assert!(!request.document.contains_key("id"));

        let parsed: Create<Document> = Create::from_request(&request).unwrap();
        assert_eq!(parsed.document.get("id"), create.document.get("id"));
        assert_eq!(parsed.envelope.metadata, create.envelope.metadata);
    }

    #[test]
    fn merge_requires_an_id() {
        let merge: MergeForId<Document> = MergeForId::new("itest", "test", doc! { "key": "v" });
        assert!(merge.to_request().is_err());

        let merge: MergeForId<Document> =
            MergeForId::new("itest", "test", doc! { "_id": ObjectId::new(), "key": "v" });
        assert!(merge.to_request().is_ok());
    }

    #[test]
    fn replace_and_update_payload_shapes() {
        let id = ObjectId::new();
        let replace: Replace<Document, Document> = Replace::new(
            "itest",
            "test",
            doc! { "_id": id },
            doc! { "_id": id, "key": "value" },
        );
        let request = replace.to_request().unwrap();
        assert!(request.document.contains_key("filter"));
        assert!(request.document.contains_key("replace"));

        let update: Update<Document, Document> = Update::new(
            "itest",
            "test",
            doc! { "_id": id },
            doc! { "$unset": { "obsolete": 1 } },
        );
        let request = update.to_request().unwrap();
        assert!(request.document.contains_key("filter"));
        assert!(request.document.contains_key("update"));

        let parsed: Update<Document, Document> = Update::from_request(&request).unwrap();
        assert_eq!(parsed.filter.get("_id"), Some(&Bson::ObjectId(id)));
    }

    #[test]
    fn distinct_carries_field_and_optional_filter() {
        let distinct: Distinct<Document> = Distinct::new("itest", "test", "myProp")
            .with_filter(doc! { "deleted": { "$ne": true } });
        let request = distinct.to_request().unwrap();
        assert_eq!(string_of(&request.document, "field"), Some("myProp"));
        assert!(request.document.contains_key("filter"));

        let parsed: Distinct<Document> = Distinct::from_request(&request).unwrap();
        assert_eq!(parsed.field, "myProp");
        assert!(parsed.filter.is_some());
    }

    #[test]
    fn pipeline_stages_keep_their_order() {
        let pipeline = Pipeline::new("itest", "test")
            .stage(doc! { "$match": { "key": "value" } })
            .stage(doc! { "$sort": { "_id": -1 } })
            .stage(doc! { "$limit": 20_i32 });
        let request = pipeline.to_request().unwrap();

        let parsed = Pipeline::from_request(&request).unwrap();
        assert_eq!(parsed.stages.len(), 3);
        assert!(parsed.stages[0].contains_key("$match"));
        assert!(parsed.stages[2].contains_key("$limit"));
    }

    #[test]
    fn drop_index_needs_name_or_specification() {
        let neither: DropIndex<Document> = DropIndex {
            envelope: Envelope::new("itest", "test"),
            specification: None,
            name: None,
        };
        assert!(neither.to_request().is_err());

        let by_name: DropIndex<Document> = DropIndex::by_name("itest", "test", "key_1");
        let request = by_name.to_request().unwrap();
        assert_eq!(string_of(&request.document, "name"), Some("key_1"));
    }

    #[test]
    fn bulk_round_trip() {
        let bulk: Bulk<Document, Document> = Bulk::new("itest", "test")
            .insert(doc! { "_id": ObjectId::new(), "key": "value1" })
            .insert(doc! { "_id": ObjectId::new(), "key": "value2" })
            .remove(doc! { "key": "value0" });
        let request = bulk.to_request().unwrap();

        let parsed: Bulk<Document, Document> = Bulk::from_request(&request).unwrap();
        assert_eq!(parsed.insert.len(), 2);
        assert_eq!(parsed.remove.len(), 1);
    }
}
