// Service-side view of an incoming command document.

use bson::Document;
use tracing::debug;

use crate::model::action::Action;
use crate::util::bson_ext::{bool_of, doc_of, string_of};
use crate::util::json::json_str;

pub struct Envelope {
    command: Document,
}

impl Envelope {
    pub fn new(command: Document) -> Self {
        Self { command }
    }

    /// Structural validation: a recognised action plus the keys that action
    /// requires.  `transaction` needs only its payload document; everything
    /// else needs the full namespace.
    pub fn valid(&self) -> bool {
        let Some(action) = string_of(&self.command, "action") else {
            debug!("Document does not have action property");
            return false;
        };
        let Ok(parsed) = action.parse::<Action>() else {
            debug!("Invalid action {}", action);
            return false;
        };

        let has = |key: &str| {
            let present = self.command.contains_key(key);
            if !present {
                debug!("Document does not have required property: {}", key);
            }
            present
        };

        if parsed == Action::Transaction {
            has("document")
        } else {
            has("database") && has("collection") && has("document")
        }
    }

    pub fn action(&self) -> &str {
        string_of(&self.command, "action").unwrap_or_default()
    }

    pub fn database(&self) -> &str {
        string_of(&self.command, "database").unwrap_or_default()
    }

    pub fn collection(&self) -> &str {
        string_of(&self.command, "collection").unwrap_or_default()
    }

    pub fn document(&self) -> Document {
        doc_of(&self.command, "document").cloned().unwrap_or_default()
    }

    pub fn options(&self) -> Option<&Document> {
        doc_of(&self.command, "options")
    }

    pub fn metadata(&self) -> Option<&Document> {
        doc_of(&self.command, "metadata")
    }

    pub fn correlation_id(&self) -> Option<&str> {
        string_of(&self.command, "correlationId").filter(|value| !value.is_empty())
    }

    pub fn application(&self) -> Option<&str> {
        string_of(&self.command, "application")
    }

    pub fn skip_version(&self) -> bool {
        bool_of(&self.command, "skipVersion").unwrap_or(false)
    }

    pub fn skip_metric(&self) -> bool {
        bool_of(&self.command, "skipMetric").unwrap_or(false)
    }

    pub fn command(&self) -> &Document {
        &self.command
    }

    pub fn json(&self) -> String {
        json_str(&self.command)
    }
}
