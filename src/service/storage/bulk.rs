// bulk handler: one write for the primary inserts and removes, one for the
// matching history records.

use bson::{doc, Bson, Document};
use tracing::warn;

use crate::error::Result;
use crate::service::engine::{BulkSummary, FindOptions, WriteConcern};
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, history, namespace, protected};
use crate::service::ServiceContext;
use crate::util::bson_ext::{array_of, oid_of};

pub(super) async fn bulk(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();
    let collection = envelope.collection();

    if protected(ctx, database, collection) {
        warn!(
            "Attempting bulk write to version history {}",
            envelope.json()
        );
        return Ok(errors::not_modifiable());
    }

    let insert = array_of(&document, "insert");
    let remove = array_of(&document, "remove");
    if insert.is_none() && remove.is_none() {
        return Ok(errors::with_message("Bulk insert missing arrays."));
    }

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());
    let ns = namespace(envelope);
    let skip_version = envelope.skip_version();

    // only documents that already carry an object id participate
    let mut inserts: Vec<Document> = Vec::new();
    if let Some(items) = insert {
        for item in items {
            if let Bson::Document(entity) = item {
                if oid_of(entity, "_id").is_some() {
                    inserts.push(entity.clone());
                }
            }
        }
    }

    let mut removes: Vec<Document> = Vec::new();
    if let Some(items) = remove {
        for item in items {
            if let Bson::Document(query) = item {
                removes.push(query.clone());
            }
        }
    }

    let mut records: Vec<Document> = Vec::new();
    if !skip_version {
        for entity in &inserts {
            records.push(history::record(
                database,
                collection,
                "create",
                entity,
                envelope.metadata(),
            ));
        }
        // pre-images of every document the remove filters match
        for query in &removes {
            for entity in client.find(&ns, query, &FindOptions::default()) {
                records.push(history::record(
                    database,
                    collection,
                    "delete",
                    &entity,
                    envelope.metadata(),
                ));
            }
        }
    }

    let expected = (inserts.len(), records.len(), removes.len());

    let summary = client.bulk_write(&ns, &inserts, &removes)?;
    let mut history_summary = BulkSummary::default();
    if !records.is_empty() {
        history_summary = client.bulk_write(&history::namespace(&ctx.config), &records, &[])?;
    }

    if concern.is_acknowledged() {
        Ok(doc! {
            "create": summary.inserted as i64,
            "history": history_summary.inserted as i64,
            "remove": summary.deleted as i64,
        })
    } else {
        Ok(doc! {
            "create": expected.0 as i64,
            "history": expected.1 as i64,
            "remove": expected.2 as i64,
        })
    }
}
