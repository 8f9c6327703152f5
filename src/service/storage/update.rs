// update handler: merge by id, update or replace by filter, multi-document
// update with per-id history.

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use tracing::{info, warn};

use crate::error::Result;
use crate::service::db::DbClient;
use crate::service::engine::{FindOptions, Namespace, WriteConcern};
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, history, namespace, protected};
use crate::service::ServiceContext;
use crate::util::bson_ext::{bool_of, doc_of, oid_of};

/// Normalise an update payload into operator form.  A payload already
/// carrying `$set` passes through verbatim; otherwise every top-level key
/// other than `_id` and `$unset` is folded into a synthesised `$set`, with
/// `$unset` preserved.
pub(super) fn update_clause(document: &Document) -> Document {
    if doc_of(document, "$set").is_some() {
        return document.clone();
    }

    let mut set = Document::new();
    for (key, value) in document.iter() {
        let key: &str = key.as_ref();
        if key == "_id" || key == "$unset" {
            continue;
        }
        set.insert(key, value.clone());
    }

    let mut clause = doc! { "$set": set };
    if let Some(unset) = doc_of(document, "$unset") {
        clause.insert("$unset", unset.clone());
    }
    clause
}

fn upsert_requested(envelope: &Envelope) -> bool {
    envelope
        .options()
        .and_then(|options| bool_of(options, "upsert"))
        .unwrap_or(false)
}

pub(super) async fn update(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();
    let collection = envelope.collection();

    if protected(ctx, database, collection) {
        warn!("Attempting to update in version history {}", envelope.json());
        return Ok(errors::not_modifiable());
    }

    if let Some(id) = oid_of(&document, "_id") {
        return update_one(ctx, envelope, id).await;
    }

    let Some(filter) = doc_of(&document, "filter") else {
        return Ok(errors::invalid_update());
    };

    if doc_of(&document, "replace").is_some() {
        return replace_one(ctx, envelope).await;
    }

    let Some(update) = doc_of(&document, "update") else {
        return Ok(errors::invalid_update());
    };

    if let Some(id) = oid_of(filter, "_id") {
        return update_one_by_filter(ctx, envelope, id).await;
    }

    update_many(ctx, envelope, filter, update).await
}

/// Post-update phase shared by the single-document paths: re-read the
/// document, append the history record, assemble the response.
fn finish_single(
    ctx: &ServiceContext,
    client: &DbClient,
    envelope: &Envelope,
    ns: &Namespace,
    query: &Document,
    action: &str,
    concern: WriteConcern,
) -> Document {
    if envelope.skip_version() {
        return doc! { "skipVersion": true };
    }

    let Some(updated) = client.find_one(ns, query) else {
        return errors::not_found();
    };

    let entry = history::entry(
        &ctx.config,
        client,
        &ns.database,
        &ns.collection,
        action,
        &updated,
        envelope.metadata(),
        concern,
    );
    if errors::is_error(&entry) {
        return entry;
    }

    doc! { "document": updated, "history": entry }
}

async fn update_one(ctx: &ServiceContext, envelope: &Envelope, id: ObjectId) -> Result<Document> {
    let document = envelope.document();
    let ns = namespace(envelope);

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());

    let clause = update_clause(&document);
    let summary = client.update_one(&ns, &doc! { "_id": id }, &clause, upsert_requested(envelope))?;

    let action = if summary.upserted_id.is_some() {
        info!("Upserted document {}:{}", ns, id.to_hex());
        "create"
    } else {
        info!("Updated document {}:{}", ns, id.to_hex());
        "update"
    };

    Ok(finish_single(
        ctx,
        &client,
        envelope,
        &ns,
        &doc! { "_id": id },
        action,
        concern,
    ))
}

async fn update_one_by_filter(
    ctx: &ServiceContext,
    envelope: &Envelope,
    id: ObjectId,
) -> Result<Document> {
    let document = envelope.document();
    let ns = namespace(envelope);
    let filter = doc_of(&document, "filter").cloned().unwrap_or_default();
    let update = doc_of(&document, "update").cloned().unwrap_or_default();

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());

    let clause = update_clause(&update);
    let summary = client.update_one(&ns, &filter, &clause, upsert_requested(envelope))?;

    let action = if summary.upserted_id.is_some() {
        info!("Upserted document {}:{}", ns, id.to_hex());
        "create"
    } else {
        info!("Updated document {}:{}", ns, id.to_hex());
        "update"
    };

    Ok(finish_single(
        ctx, &client, envelope, &ns, &filter, action, concern,
    ))
}

async fn replace_one(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let ns = namespace(envelope);
    let filter = doc_of(&document, "filter").cloned().unwrap_or_default();
    let replace = doc_of(&document, "replace").cloned().unwrap_or_default();

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());

    client.replace_one(&ns, &filter, &replace, upsert_requested(envelope))?;
    info!("Updated document in {} with filter", ns);

    if envelope.skip_version() {
        return Ok(doc! { "skipVersion": true });
    }

    // a replacement carrying its own id is its own post-image
    if oid_of(&replace, "_id").is_some() {
        let entry = history::entry(
            &ctx.config,
            &client,
            &ns.database,
            &ns.collection,
            "replace",
            &replace,
            envelope.metadata(),
            concern,
        );
        if errors::is_error(&entry) {
            return Ok(entry);
        }
        return Ok(doc! { "document": replace, "history": entry });
    }

    let Some(updated) = client.find_one(&ns, &filter) else {
        warn!("Updated document not found in {} by filter", ns);
        return Ok(errors::not_found());
    };
    let entry = history::entry(
        &ctx.config,
        &client,
        &ns.database,
        &ns.collection,
        "replace",
        &updated,
        envelope.metadata(),
        concern,
    );
    if errors::is_error(&entry) {
        return Ok(entry);
    }
    Ok(doc! { "document": updated, "history": entry })
}

async fn update_many(
    ctx: &ServiceContext,
    envelope: &Envelope,
    filter: &Document,
    update: &Document,
) -> Result<Document> {
    let ns = namespace(envelope);

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());

    // collect the matching ids before the update so history can be written
    // per id afterwards; concurrent writers may race this read
    let ids: Vec<Bson> = if envelope.skip_version() {
        Vec::new()
    } else {
        client
            .find(&ns, filter, &FindOptions::default())
            .iter()
            .filter_map(|doc| doc.get("_id").cloned())
            .collect()
    };

    let clause = update_clause(update);
    let summary = client.update_many(&ns, filter, &clause)?;
    info!("Updated {} documents in {}", summary.modified, ns);

    if envelope.skip_version() {
        return Ok(doc! { "skipVersion": true });
    }

    let mut success: Vec<Bson> = Vec::new();
    let mut failure: Vec<Bson> = Vec::new();
    let mut entries: Vec<Bson> = Vec::new();
    for id in ids {
        let Some(updated) = client.find_one(&ns, &doc! { "_id": id.clone() }) else {
            continue;
        };
        let entry = history::entry(
            &ctx.config,
            &client,
            &ns.database,
            &ns.collection,
            "update",
            &updated,
            envelope.metadata(),
            concern,
        );
        if errors::is_error(&entry) {
            failure.push(id);
        } else {
            success.push(id);
            entries.push(Bson::Document(entry));
        }
    }

    Ok(doc! { "success": success, "failure": failure, "history": entries })
}
