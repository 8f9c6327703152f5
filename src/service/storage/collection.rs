// Collection lifecycle handlers.

use bson::{doc, Document};
use tracing::{info, warn};

use crate::error::Result;
use crate::service::engine::{FindOptions, Namespace};
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, history, namespace, protected};
use crate::service::ServiceContext;
use crate::util::bson_ext::{bool_of, string_of};

pub(super) async fn create_collection(
    ctx: &ServiceContext,
    envelope: &Envelope,
) -> Result<Document> {
    let database = envelope.database();
    let collection = envelope.collection();
    if database.is_empty() || collection.is_empty() {
        return Ok(errors::missing_field());
    }

    info!("Creating collection {}:{}", database, collection);
    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let ns = namespace(envelope);
    if client.has_collection(&ns) {
        warn!(
            "A collection {} exists in database {}",
            collection, database
        );
        return Ok(errors::with_message("Collection exists in database"));
    }

    client.create_collection(&ns, &envelope.document())?;
    Ok(doc! { "database": database, "collection": collection })
}

pub(super) async fn rename_collection(
    ctx: &ServiceContext,
    envelope: &Envelope,
) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();

    let Some(target) = string_of(&document, "target") else {
        return Ok(errors::missing_field());
    };

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let source = namespace(envelope);
    let target_ns = Namespace::new(database, target);
    if client.has_collection(&target_ns) {
        warn!("A collection {} exists in database {}", target, database);
        return Ok(errors::with_message("Collection exists in database"));
    }

    client.rename_collection(&source, &target_ns)?;
    info!("Renamed collection {} to {}", source, target_ns);

    // history entries for the old namespace are rewritten out of band, not
    // as part of this request
    Ok(doc! { "database": database, "collection": target })
}

pub(super) async fn drop_collection(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();
    let collection = envelope.collection();

    if protected(ctx, database, collection) {
        warn!(
            "Attempting to drop the version history collection {}",
            envelope.json()
        );
        return Ok(errors::not_modifiable());
    }

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let ns = namespace(envelope);
    client.drop_collection(&ns);
    info!("Dropped collection {}", ns);

    if bool_of(&document, "clearVersionHistory").unwrap_or(false) {
        let engine = ctx.db.engine();
        let history_ns = history::namespace(&ctx.config);
        let filter = doc! { "database": database, "collection": collection };
        tokio::spawn(async move {
            let matches = engine.find(&history_ns, &filter, &FindOptions::default());
            let mut removed = 0_u64;
            for entry in matches {
                if let Some(id) = entry.get("_id").cloned() {
                    removed += engine.delete_one(&history_ns, &doc! { "_id": id });
                }
            }
            info!(
                "Cleared {} version history entries for {}:{}",
                removed,
                string_of(&filter, "database").unwrap_or_default(),
                string_of(&filter, "collection").unwrap_or_default()
            );
        });
    }

    Ok(doc! { "dropCollection": true })
}
