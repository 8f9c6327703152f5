// Version history records.
//
// Every mutating handler appends one record per affected document.  A
// record snapshots the entity with the action that produced it; the
// response carries the record's location in the protected namespace.

use bson::oid::ObjectId;
use bson::{doc, Document};
use tracing::{info, warn};

use crate::config::Configuration;
use crate::service::engine::{Engine, Namespace, Transaction, WriteConcern};
use crate::service::errors;

pub fn namespace(config: &Configuration) -> Namespace {
    Namespace::new(
        config.version_history.database.clone(),
        config.version_history.collection.clone(),
    )
}

/// Build one history record without writing it.
pub fn record(
    database: &str,
    collection: &str,
    action: &str,
    entity: &Document,
    metadata: Option<&Document>,
) -> Document {
    let mut record = doc! {
        "_id": ObjectId::new(),
        "database": database,
        "collection": collection,
        "action": action,
        "entity": entity.clone(),
        "created": bson::DateTime::now(),
    };
    if let Some(metadata) = metadata {
        record.insert("metadata", metadata.clone());
    }
    record
}

fn location(config: &Configuration, record: &Document, entity: &Document) -> Document {
    let ns = namespace(config);
    doc! {
        "_id": record.get("_id").cloned().unwrap_or(bson::Bson::Null),
        "database": ns.database,
        "collection": ns.collection,
        "entity": entity.get("_id").cloned().unwrap_or(bson::Bson::Null),
    }
}

/// Append one record.  Under an acknowledged concern a failed write is an
/// error response; unacknowledged writes answer optimistically.
pub fn entry(
    config: &Configuration,
    engine: &Engine,
    database: &str,
    collection: &str,
    action: &str,
    entity: &Document,
    metadata: Option<&Document>,
    concern: WriteConcern,
) -> Document {
    if entity.get("_id").is_none() {
        return errors::missing_id();
    }
    let record = record(database, collection, action, entity, metadata);
    match engine.insert_one(&namespace(config), &record) {
        Ok(_) => {
            info!(
                "Created version for {}:{} with id: {:?}",
                database,
                collection,
                record.get("_id")
            );
            location(config, &record, entity)
        }
        Err(e) => {
            if concern.is_acknowledged() {
                warn!(
                    "Unable to create version for {}:{}. {}",
                    database, collection, e
                );
                errors::create_version_failed()
            } else {
                location(config, &record, entity)
            }
        }
    }
}

/// As `entry`, writing through an open transaction.
pub fn entry_in_transaction(
    config: &Configuration,
    txn: &mut Transaction<'_>,
    database: &str,
    collection: &str,
    action: &str,
    entity: &Document,
    metadata: Option<&Document>,
) -> Document {
    if entity.get("_id").is_none() {
        return errors::missing_id();
    }
    let record = record(database, collection, action, entity, metadata);
    match txn.insert_one(&namespace(config), &record) {
        Ok(_) => location(config, &record, entity),
        Err(e) => {
            warn!(
                "Unable to create version for {}:{}. {}",
                database, collection, e
            );
            errors::create_version_failed()
        }
    }
}
