// create / createTimeseries / retrieve handlers.

use bson::{doc, Document};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::service::engine::{FindOptions, WriteConcern};
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, history, namespace, protected};
use crate::service::ServiceContext;
use crate::util::bson_ext::oid_of;

pub(super) async fn create(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();
    let collection = envelope.collection();

    if protected(ctx, database, collection) {
        warn!("Attempting to create in version history {}", envelope.json());
        return Ok(errors::not_modifiable());
    }

    let Some(id) = oid_of(&document, "_id") else {
        return Ok(errors::missing_id());
    };

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());
    let ns = namespace(envelope);
    match client.insert_one(&ns, &document) {
        Ok(_) => info!("Created document {}:{}:{}", database, collection, id.to_hex()),
        Err(e) => {
            if concern.is_acknowledged() {
                warn!(
                    "Unable to create document {}:{}:{}. {}",
                    database,
                    collection,
                    id.to_hex(),
                    e
                );
                return Ok(errors::insert_error());
            }
            debug!("Ignoring insert failure under unacknowledged concern: {}", e);
        }
    }

    if envelope.skip_version() {
        return Ok(doc! { "_id": id, "skipVersion": true });
    }

    Ok(history::entry(
        &ctx.config,
        &client,
        database,
        collection,
        "create",
        &document,
        envelope.metadata(),
        concern,
    ))
}

pub(super) async fn create_timeseries(
    ctx: &ServiceContext,
    envelope: &Envelope,
) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();
    let collection = envelope.collection();

    if protected(ctx, database, collection) {
        warn!("Attempting to create in version history {}", envelope.json());
        return Ok(errors::not_modifiable());
    }

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());
    let ns = namespace(envelope);
    match client.insert_one(&ns, &document) {
        Ok(id) => {
            info!("Created timeseries point in {}:{}", database, collection);
            Ok(doc! {
                "database": database,
                "collection": collection,
                "_id": id,
            })
        }
        Err(e) => {
            if concern.is_acknowledged() {
                warn!(
                    "Unable to create timeseries point in {}:{}. {}",
                    database, collection, e
                );
                return Ok(errors::insert_error());
            }
            debug!("Ignoring insert failure under unacknowledged concern: {}", e);
            Ok(doc! {
                "database": database,
                "collection": collection,
                "_id": document.get("_id").cloned().unwrap_or(bson::Bson::Null),
            })
        }
    }
}

pub(super) async fn retrieve(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();

    if let Some(id) = oid_of(&document, "_id") {
        debug!("_id property is of type oid");
        return retrieve_one(ctx, envelope, id).await;
    }

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let options = FindOptions::from_options(envelope.options());
    let results = client.find(&namespace(envelope), &document, &options);
    let results: Vec<bson::Bson> = results.into_iter().map(bson::Bson::Document).collect();
    Ok(doc! { "results": results })
}

async fn retrieve_one(
    ctx: &ServiceContext,
    envelope: &Envelope,
    id: bson::oid::ObjectId,
) -> Result<Document> {
    let document = envelope.document();
    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let mut options = FindOptions::from_options(envelope.options());
    options.limit = Some(1);
    let results = client.find(&namespace(envelope), &document, &options);
    match results.into_iter().next() {
        Some(result) => Ok(doc! { "result": result }),
        None => {
            warn!(
                "Document not found: {}:{}:{}. {}",
                envelope.database(),
                envelope.collection(),
                id.to_hex(),
                envelope.json()
            );
            Ok(errors::not_found())
        }
    }
}
