// transaction handler: execute create/update/delete items as a unit.
//
// Items run in order inside one engine transaction, version history writes
// included.  The first failing item aborts the unit; everything done so
// far rolls back and the response reports the per-item outcomes plus a
// summary.

use bson::{doc, Bson, Document};
use tracing::{info, warn};

use crate::error::Result;
use crate::service::engine::Transaction;
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::update::update_clause;
use crate::service::storage::{acquire, history, protected};
use crate::service::ServiceContext;
use crate::util::bson_ext::{array_of, oid_of};

pub(super) async fn transaction(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let Some(items) = array_of(&document, "items") else {
        warn!("No items array in payload");
        return Ok(errors::with_message("No items array in payload"));
    };

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let mut results: Vec<Bson> = Vec::new();
    let mut success = 0_i64;
    let mut failure = 0_i64;
    let mut aborted = false;

    let mut txn = client.begin_transaction();
    for item in items {
        let outcome = match item {
            Bson::Document(item) => {
                let item = Envelope::new(item.clone());
                match item.action() {
                    "create" => create_item(ctx, &mut txn, &item),
                    "update" => update_item(ctx, &mut txn, &item),
                    "delete" => delete_item(ctx, &mut txn, &item),
                    other => {
                        info!("Invalid action {} in transaction item", other);
                        errors::invalid_action()
                    }
                }
            }
            _ => errors::with_message("Transaction item is not a document"),
        };

        let failed = errors::is_error(&outcome);
        results.push(Bson::Document(outcome));
        if failed {
            failure += 1;
            aborted = true;
            break;
        }
        success += 1;
    }

    let committed = !aborted;
    if committed {
        txn.commit();
        info!("Committed transaction with {} items", success);
    } else {
        drop(txn);
        warn!("Aborted transaction after {} successful items", success);
    }

    Ok(doc! {
        "results": results,
        "summary": {
            "total": items.len() as i64,
            "success": success,
            "failure": failure,
            "committed": committed,
        },
    })
}

fn create_item(ctx: &ServiceContext, txn: &mut Transaction<'_>, item: &Envelope) -> Document {
    let document = item.document();
    let database = item.database();
    let collection = item.collection();

    if protected(ctx, database, collection) {
        return errors::not_modifiable();
    }
    let Some(id) = oid_of(&document, "_id") else {
        return errors::missing_id();
    };

    let ns = crate::service::engine::Namespace::new(database, collection);
    if let Err(e) = txn.insert_one(&ns, &document) {
        return errors::with_message(e.to_string());
    }

    if item.skip_version() {
        return doc! { "_id": id, "skipVersion": true };
    }
    history::entry_in_transaction(
        &ctx.config,
        txn,
        database,
        collection,
        "create",
        &document,
        item.metadata(),
    )
}

fn update_item(ctx: &ServiceContext, txn: &mut Transaction<'_>, item: &Envelope) -> Document {
    let document = item.document();
    let database = item.database();
    let collection = item.collection();

    if protected(ctx, database, collection) {
        return errors::not_modifiable();
    }
    let Some(id) = oid_of(&document, "_id") else {
        return errors::invalid_update();
    };

    let ns = crate::service::engine::Namespace::new(database, collection);
    let clause = update_clause(&document);
    if let Err(e) = txn.update_one(&ns, &doc! { "_id": id }, &clause, false) {
        return errors::with_message(e.to_string());
    }

    if item.skip_version() {
        return doc! { "skipVersion": true };
    }
    let Some(updated) = txn.find_one(&ns, &doc! { "_id": id }) else {
        return errors::not_found();
    };
    let entry = history::entry_in_transaction(
        &ctx.config,
        txn,
        database,
        collection,
        "update",
        &updated,
        item.metadata(),
    );
    if errors::is_error(&entry) {
        return entry;
    }
    doc! { "document": updated, "history": entry }
}

fn delete_item(ctx: &ServiceContext, txn: &mut Transaction<'_>, item: &Envelope) -> Document {
    let document = item.document();
    let database = item.database();
    let collection = item.collection();

    if protected(ctx, database, collection) {
        return errors::not_modifiable();
    }

    let ns = crate::service::engine::Namespace::new(database, collection);
    let matches = txn.find(&ns, &document);
    if matches.is_empty() {
        return errors::not_found();
    }

    let mut success: Vec<Bson> = Vec::new();
    let mut entries: Vec<Bson> = Vec::new();
    for entity in matches {
        let Some(id) = entity.get("_id").cloned() else {
            continue;
        };
        if txn.delete_one(&ns, &doc! { "_id": id.clone() }) == 0 {
            return errors::with_message("Unable to delete document in transaction");
        }
        success.push(id);
        if !item.skip_version() {
            let entry = history::entry_in_transaction(
                &ctx.config,
                txn,
                database,
                collection,
                "delete",
                &entity,
                item.metadata(),
            );
            if errors::is_error(&entry) {
                return entry;
            }
            entries.push(Bson::Document(entry));
        }
    }

    doc! { "success": success, "failure": [], "history": entries }
}
