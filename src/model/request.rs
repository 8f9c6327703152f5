// The request envelope shared by every action.

use bson::{doc, Document};

use crate::error::{Result, ServiceError};
use crate::model::action::Action;
use crate::util::bson_ext::{bool_of, doc_of, string_of};
use crate::util::{json, validate};

/// A fully assembled command.  Typed schemas reduce to this before hitting
/// the dispatcher; the dispatcher stamps the application name at marshal
/// time.
#[derive(Debug, Clone)]
pub struct Request {
    pub database: String,
    pub collection: String,
    pub document: Document,
    pub options: Option<Document>,
    pub metadata: Option<Document>,
    pub correlation_id: Option<String>,
    pub action: Action,
    pub skip_version: bool,
    pub skip_metric: bool,
}

impl Request {
    pub fn new(
        database: impl Into<String>,
        collection: impl Into<String>,
        document: Document,
        action: Action,
    ) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            document,
            options: None,
            metadata: None,
            correlation_id: None,
            action,
            skip_version: false,
            skip_metric: false,
        }
    }

    pub fn create(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Create)
    }

    pub fn retrieve(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Retrieve)
    }

    pub fn update(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Update)
    }

    pub fn delete(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Delete)
    }

    pub fn count(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Count)
    }

    pub fn distinct(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Distinct)
    }

    pub fn index(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Index)
    }

    pub fn drop_index(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::DropIndex)
    }

    pub fn bulk(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Bulk)
    }

    pub fn pipeline(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Pipeline)
    }

    pub fn transaction(db: impl Into<String>, coll: impl Into<String>, doc: Document) -> Self {
        Self::new(db, coll, doc, Action::Transaction)
    }

    pub fn create_collection(
        db: impl Into<String>,
        coll: impl Into<String>,
        doc: Document,
    ) -> Self {
        Self::new(db, coll, doc, Action::CreateCollection)
    }

    pub fn rename_collection(
        db: impl Into<String>,
        coll: impl Into<String>,
        doc: Document,
    ) -> Self {
        Self::new(db, coll, doc, Action::RenameCollection)
    }

    pub fn drop_collection(
        db: impl Into<String>,
        coll: impl Into<String>,
        doc: Document,
    ) -> Self {
        Self::new(db, coll, doc, Action::DropCollection)
    }

    pub fn create_timeseries(
        db: impl Into<String>,
        coll: impl Into<String>,
        doc: Document,
    ) -> Self {
        Self::new(db, coll, doc, Action::CreateTimeseries)
    }

    pub fn with_options(mut self, options: Document) -> Self {
        self.options = Some(options);
        self
    }

    pub fn with_metadata(mut self, metadata: Document) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = Some(correlation_id.into());
        self
    }

    pub fn skip_version(mut self) -> Self {
        self.skip_version = true;
        self
    }

    pub fn skip_metric(mut self) -> Self {
        self.skip_metric = true;
        self
    }

    /// Marshal into the wire envelope.  Absent optional keys are omitted
    /// entirely; the flags are written only when set.
    pub fn to_document(&self, application: &str) -> Document {
        let mut command = doc! {
            "action": self.action.as_str(),
            "database": self.database.as_str(),
            "collection": self.collection.as_str(),
            "document": self.document.clone(),
        };
        if !application.is_empty() {
            command.insert("application", application);
        }
        if let Some(options) = &self.options {
            command.insert("options", options.clone());
        }
        if let Some(metadata) = &self.metadata {
            command.insert("metadata", metadata.clone());
        }
        if let Some(correlation_id) = &self.correlation_id {
            command.insert("correlationId", correlation_id.as_str());
        }
        if self.skip_version {
            command.insert("skipVersion", true);
        }
        if self.skip_metric {
            command.insert("skipMetric", true);
        }
        command
    }

    /// Unmarshal from a wire envelope.
    pub fn from_document(command: &Document) -> Result<Self> {
        let action = string_of(command, "action")
            .ok_or_else(|| ServiceError::InvalidRequest("action not specified".to_string()))?
            .parse::<Action>()?;
        let database = string_of(command, "database")
            .ok_or_else(|| ServiceError::InvalidRequest("database not specified".to_string()))?;
        let collection = string_of(command, "collection")
            .ok_or_else(|| ServiceError::InvalidRequest("collection not specified".to_string()))?;
        let document = doc_of(command, "document")
            .ok_or_else(|| ServiceError::InvalidRequest("document not specified".to_string()))?;

        let mut request = Request::new(database, collection, document.clone(), action);
        request.options = doc_of(command, "options").cloned();
        request.metadata = doc_of(command, "metadata").cloned();
        request.correlation_id = string_of(command, "correlationId").map(str::to_string);
        request.skip_version = bool_of(command, "skipVersion").unwrap_or(false);
        request.skip_metric = bool_of(command, "skipMetric").unwrap_or(false);
        Ok(request)
    }

    /// Parse a minified JSON payload into a request.  String values are run
    /// through the environment-tunable content checks before acceptance.
    pub fn from_json(payload: &str) -> Result<Self> {
        let command = json::parse_document(payload)?;
        if !validate::document("request", &command) {
            return Err(ServiceError::InvalidRequest(
                "payload failed content validation".to_string(),
            ));
        }
        Self::from_document(&command)
    }
}
