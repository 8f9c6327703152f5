// Transaction builder.
//
// Accumulates pre-marshaled item documents and emits one composite
// `transaction` command.  Items are not validated here; the service checks
// each one as it executes the unit.

use bson::{doc, Bson, Document};

use crate::model::action::Action;
use crate::model::request::Request;

#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    database: String,
    collection: String,
    items: Vec<Document>,
}

impl TransactionBuilder {
    pub fn new(database: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            collection: collection.into(),
            items: Vec::new(),
        }
    }

    /// Append a pre-marshaled item.  Each item is a full request document
    /// whose action must be one of create, update or delete.
    pub fn add(&mut self, item: Document) -> &mut Self {
        self.items.push(item);
        self
    }

    /// Convenience: marshal a typed request into an item.
    pub fn add_request(&mut self, request: &Request, application: &str) -> &mut Self {
        self.add(request.to_document(application))
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn build(&self, application: &str) -> Document {
        let items: Vec<Bson> = self
            .items
            .iter()
            .map(|item| Bson::Document(item.clone()))
            .collect();
        let mut command = doc! {
            "database": self.database.as_str(),
            "collection": self.collection.as_str(),
        };
        if !application.is_empty() {
            command.insert("application", application);
        }
        command.insert("action", Action::Transaction.as_str());
        command.insert("document", doc! { "items": items });
        command
    }
}
