// Orchestrator behavior, driven through storage::process the same way the
// listener drives it.

use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;
use bson::{doc, Bson, Document};
use shadowdb::config::Configuration;
use shadowdb::service::engine::FindOptions;
use shadowdb::service::envelope::Envelope;
use shadowdb::service::storage;
use shadowdb::service::ServiceContext;
use shadowdb::util::bson_ext::{array_of, bool_of, doc_of, oid_of, string_of};

fn context() -> Arc<ServiceContext> {
    ServiceContext::new(Configuration::default())
}

async fn process(ctx: &ServiceContext, command: Document) -> Document {
    storage::process(ctx, &Envelope::new(command)).await
}

fn history_entries(ctx: &ServiceContext, database: &str, collection: &str) -> Vec<Document> {
    let ns = shadowdb::service::engine::Namespace::new("versionHistory", "entities");
    ctx.db.engine().find(
        &ns,
        &doc! { "database": database, "collection": collection },
        &FindOptions::default(),
    )
}

#[tokio::test]
async fn round_trip_create() {
    let ctx = context();
    let id = ObjectId::new();

    let response = process(
        &ctx,
        doc! {
            "action": "create",
            "database": "t",
            "collection": "c",
            "document": { "_id": id, "k": "v" },
        },
    )
    .await;

    assert!(string_of(&response, "error").is_none());
    assert!(oid_of(&response, "_id").is_some());
    assert_eq!(string_of(&response, "database"), Some("versionHistory"));
    assert_eq!(string_of(&response, "collection"), Some("entities"));
    assert_eq!(oid_of(&response, "entity"), Some(id));

    let entries = history_entries(&ctx, "t", "c");
    assert_eq!(entries.len(), 1);
    assert_eq!(string_of(&entries[0], "action"), Some("create"));
    let entity = doc_of(&entries[0], "entity").unwrap();
    assert_eq!(oid_of(entity, "_id"), Some(id));
}

#[tokio::test]
async fn protected_collection_is_not_modifiable() {
    let ctx = context();

    for action in ["create", "update", "delete"] {
        let response = process(
            &ctx,
            doc! {
                "action": action,
                "database": "versionHistory",
                "collection": "entities",
                "document": { "_id": ObjectId::new() },
            },
        )
        .await;
        assert_eq!(
            string_of(&response, "error"),
            Some("Collection is not modifiable"),
            "action {} must be rejected",
            action
        );
    }

    // no contact with the engine happened
    let ns = shadowdb::service::engine::Namespace::new("versionHistory", "entities");
    assert_eq!(
        ctx.db.engine().count(&ns, &doc! {}, &FindOptions::default()),
        0
    );
}

#[tokio::test]
async fn create_without_id_is_rejected() {
    let ctx = context();
    let response = process(
        &ctx,
        doc! {
            "action": "create",
            "database": "t",
            "collection": "c",
            "document": { "k": "v" },
        },
    )
    .await;
    assert_eq!(string_of(&response, "error"), Some("Missing id"));
    assert!(history_entries(&ctx, "t", "c").is_empty());
}

#[tokio::test]
async fn create_with_skip_version() {
    let ctx = context();
    let id = ObjectId::new();
    let response = process(
        &ctx,
        doc! {
            "action": "create",
            "database": "t",
            "collection": "c",
            "document": { "_id": id },
            "skipVersion": true,
        },
    )
    .await;

    assert_eq!(oid_of(&response, "_id"), Some(id));
    assert_eq!(bool_of(&response, "skipVersion"), Some(true));
    assert!(history_entries(&ctx, "t", "c").is_empty());
}

#[tokio::test]
async fn retrieve_by_id_and_by_filter() {
    let ctx = context();
    let id = ObjectId::new();
    let engine = ctx.db.engine();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    engine
        .insert_one(&ns, &doc! { "_id": id, "key": "value" })
        .unwrap();
    engine.insert_one(&ns, &doc! { "key": "value" }).unwrap();

    let by_id = process(
        &ctx,
        doc! {
            "action": "retrieve",
            "database": "itest",
            "collection": "test",
            "document": { "_id": id },
        },
    )
    .await;
    let result = doc_of(&by_id, "result").expect("result document");
    assert_eq!(oid_of(result, "_id"), Some(id));
    assert!(!by_id.contains_key("results"));

    let by_filter = process(
        &ctx,
        doc! {
            "action": "retrieve",
            "database": "itest",
            "collection": "test",
            "document": { "key": "value" },
        },
    )
    .await;
    let results = array_of(&by_filter, "results").expect("results array");
    assert_eq!(results.len(), 2);

    let missing = process(
        &ctx,
        doc! {
            "action": "retrieve",
            "database": "itest",
            "collection": "test",
            "document": { "_id": ObjectId::new() },
        },
    )
    .await;
    assert_eq!(string_of(&missing, "error"), Some("not found"));
}

#[tokio::test]
async fn update_synthesises_set_and_preserves_unset() {
    let ctx = context();
    let id = ObjectId::new();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": id, "key": "old", "obsolete": 1_i32 })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "update",
            "database": "itest",
            "collection": "test",
            "document": { "_id": id, "key": "new", "$unset": { "obsolete": 1_i32 } },
        },
    )
    .await;

    assert!(string_of(&response, "error").is_none());
    let post = doc_of(&response, "document").expect("post image");
    assert_eq!(string_of(post, "key"), Some("new"));
    assert!(!post.contains_key("obsolete"));

    let history = doc_of(&response, "history").expect("history location");
    assert_eq!(oid_of(history, "entity"), Some(id));

    let entries = history_entries(&ctx, "itest", "test");
    assert_eq!(entries.len(), 1);
    assert_eq!(string_of(&entries[0], "action"), Some("update"));
}

#[tokio::test]
async fn update_with_skip_version_writes_no_history() {
    let ctx = context();
    let id = ObjectId::new();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": id, "key": "old" })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "update",
            "database": "itest",
            "collection": "test",
            "document": { "_id": id, "key": "new" },
            "skipVersion": true,
        },
    )
    .await;

    assert_eq!(response, doc! { "skipVersion": true });
    assert!(history_entries(&ctx, "itest", "test").is_empty());
}

#[tokio::test]
async fn update_by_filter_with_replace() {
    let ctx = context();
    let id = ObjectId::new();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": id, "key": "value" })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "update",
            "database": "itest",
            "collection": "test",
            "document": {
                "filter": { "_id": id },
                "replace": { "_id": id, "key": "value", "key1": "value1" },
            },
        },
    )
    .await;

    assert!(string_of(&response, "error").is_none());
    let post = doc_of(&response, "document").expect("post image");
    assert_eq!(string_of(post, "key1"), Some("value1"));

    let entries = history_entries(&ctx, "itest", "test");
    assert_eq!(entries.len(), 1);
    assert_eq!(string_of(&entries[0], "action"), Some("replace"));
}

#[tokio::test]
async fn update_many_writes_history_per_document() {
    let ctx = context();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    for i in 0..3 {
        ctx.db
            .engine()
            .insert_one(&ns, &doc! { "group": "g", "rank": i as i32 })
            .unwrap();
    }
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "group": "other" })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "update",
            "database": "itest",
            "collection": "test",
            "document": {
                "filter": { "group": "g" },
                "update": { "visited": true },
            },
        },
    )
    .await;

    assert!(string_of(&response, "error").is_none());
    assert_eq!(array_of(&response, "success").map(Vec::len), Some(3));
    assert_eq!(array_of(&response, "failure").map(Vec::len), Some(0));
    assert_eq!(array_of(&response, "history").map(Vec::len), Some(3));
    assert_eq!(history_entries(&ctx, "itest", "test").len(), 3);
}

#[tokio::test]
async fn update_upsert_records_create_history() {
    let ctx = context();
    let id = ObjectId::new();

    let response = process(
        &ctx,
        doc! {
            "action": "update",
            "database": "itest",
            "collection": "test",
            "document": { "_id": id, "key": "fresh" },
            "options": { "upsert": true },
        },
    )
    .await;

    assert!(string_of(&response, "error").is_none());
    let entries = history_entries(&ctx, "itest", "test");
    assert_eq!(entries.len(), 1);
    assert_eq!(string_of(&entries[0], "action"), Some("create"));
}

#[tokio::test]
async fn delete_reports_ids_and_history() {
    let ctx = context();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    let first = ObjectId::new();
    let second = ObjectId::new();
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": first, "key": "gone" })
        .unwrap();
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": second, "key": "gone" })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "delete",
            "database": "itest",
            "collection": "test",
            "document": { "key": "gone" },
        },
    )
    .await;

    let success = array_of(&response, "success").expect("success ids");
    assert_eq!(success.len(), 2);
    assert!(success.contains(&Bson::ObjectId(first)));
    assert!(success.contains(&Bson::ObjectId(second)));
    assert_eq!(array_of(&response, "history").map(Vec::len), Some(2));

    let entries = history_entries(&ctx, "itest", "test");
    assert_eq!(entries.len(), 2);
    assert!(entries
        .iter()
        .all(|entry| string_of(entry, "action") == Some("delete")));
    assert_eq!(
        ctx.db.engine().count(&ns, &doc! {}, &FindOptions::default()),
        0
    );
}

#[tokio::test]
async fn bulk_counts_creates_history_and_removes() {
    let ctx = context();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    let victim = ObjectId::new();
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": victim, "key": "victim" })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "bulk",
            "database": "itest",
            "collection": "test",
            "document": {
                "insert": [
                    { "_id": ObjectId::new(), "key": "value1" },
                    { "_id": ObjectId::new(), "key": "value2" },
                    { "key": "no id, skipped" },
                ],
                "remove": [ { "_id": victim } ],
            },
        },
    )
    .await;

    assert_eq!(response.get("create"), Some(&Bson::Int64(2)));
    assert_eq!(response.get("history"), Some(&Bson::Int64(3)));
    assert_eq!(response.get("remove"), Some(&Bson::Int64(1)));
    assert_eq!(history_entries(&ctx, "itest", "test").len(), 3);
}

#[tokio::test]
async fn bulk_without_arrays_is_rejected() {
    let ctx = context();
    let response = process(
        &ctx,
        doc! {
            "action": "bulk",
            "database": "itest",
            "collection": "test",
            "document": {},
        },
    )
    .await;
    assert_eq!(
        string_of(&response, "error"),
        Some("Bulk insert missing arrays.")
    );
}

#[tokio::test]
async fn count_distinct_pipeline() {
    let ctx = context();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    for (key, group) in [("a", "g1"), ("b", "g1"), ("c", "g2")] {
        ctx.db
            .engine()
            .insert_one(&ns, &doc! { "key": key, "group": group })
            .unwrap();
    }

    let count = process(
        &ctx,
        doc! {
            "action": "count",
            "database": "itest",
            "collection": "test",
            "document": { "group": "g1" },
        },
    )
    .await;
    assert_eq!(count.get("count"), Some(&Bson::Int64(2)));

    let distinct = process(
        &ctx,
        doc! {
            "action": "distinct",
            "database": "itest",
            "collection": "test",
            "document": { "field": "group" },
        },
    )
    .await;
    let results = array_of(&distinct, "results").expect("results");
    let Bson::Document(first) = &results[0] else {
        panic!("expected a values document");
    };
    assert_eq!(array_of(first, "values").map(Vec::len), Some(2));

    let missing_field = process(
        &ctx,
        doc! {
            "action": "distinct",
            "database": "itest",
            "collection": "test",
            "document": {},
        },
    )
    .await;
    assert_eq!(string_of(&missing_field, "error"), Some("Missing name"));

    let pipeline = process(
        &ctx,
        doc! {
            "action": "pipeline",
            "database": "itest",
            "collection": "test",
            "document": { "specification": [
                { "$match": { "group": "g1" } },
                { "$sort": { "key": -1 } },
                { "$limit": 1_i32 },
            ] },
        },
    )
    .await;
    let results = array_of(&pipeline, "results").expect("results");
    assert_eq!(results.len(), 1);

    let no_spec = process(
        &ctx,
        doc! {
            "action": "pipeline",
            "database": "itest",
            "collection": "test",
            "document": {},
        },
    )
    .await;
    assert_eq!(
        string_of(&no_spec, "error"),
        Some("No aggregation specification.")
    );
}

#[tokio::test]
async fn index_lifecycle() {
    let ctx = context();

    let created = process(
        &ctx,
        doc! {
            "action": "index",
            "database": "itest",
            "collection": "test",
            "document": { "key": 1_i32 },
            "options": { "unique": true },
        },
    )
    .await;
    assert_eq!(string_of(&created, "name"), Some("key_1"));
    assert_eq!(created.get("unique"), Some(&Bson::Boolean(true)));

    let dropped = process(
        &ctx,
        doc! {
            "action": "dropIndex",
            "database": "itest",
            "collection": "test",
            "document": { "name": "key_1" },
        },
    )
    .await;
    assert_eq!(dropped.get("dropIndex"), Some(&Bson::Boolean(true)));

    let missing = process(
        &ctx,
        doc! {
            "action": "dropIndex",
            "database": "itest",
            "collection": "test",
            "document": { "name": "key_1" },
        },
    )
    .await;
    assert!(string_of(&missing, "error").is_some());
}

#[tokio::test]
async fn collection_lifecycle() {
    let ctx = context();

    let created = process(
        &ctx,
        doc! {
            "action": "createCollection",
            "database": "itest",
            "collection": "fresh",
            "document": {},
        },
    )
    .await;
    assert_eq!(string_of(&created, "database"), Some("itest"));
    assert_eq!(string_of(&created, "collection"), Some("fresh"));

    let duplicate = process(
        &ctx,
        doc! {
            "action": "createCollection",
            "database": "itest",
            "collection": "fresh",
            "document": {},
        },
    )
    .await;
    assert_eq!(
        string_of(&duplicate, "error"),
        Some("Collection exists in database")
    );

    let renamed = process(
        &ctx,
        doc! {
            "action": "renameCollection",
            "database": "itest",
            "collection": "fresh",
            "document": { "target": "renamed" },
        },
    )
    .await;
    assert_eq!(string_of(&renamed, "collection"), Some("renamed"));

    let dropped = process(
        &ctx,
        doc! {
            "action": "dropCollection",
            "database": "itest",
            "collection": "renamed",
            "document": {},
        },
    )
    .await;
    assert_eq!(dropped.get("dropCollection"), Some(&Bson::Boolean(true)));
}

#[tokio::test]
async fn drop_collection_clears_version_history() {
    let ctx = context();
    let id = ObjectId::new();
    process(
        &ctx,
        doc! {
            "action": "create",
            "database": "itest",
            "collection": "doomed",
            "document": { "_id": id },
        },
    )
    .await;
    assert_eq!(history_entries(&ctx, "itest", "doomed").len(), 1);

    let response = process(
        &ctx,
        doc! {
            "action": "dropCollection",
            "database": "itest",
            "collection": "doomed",
            "document": { "clearVersionHistory": true },
        },
    )
    .await;
    assert_eq!(response.get("dropCollection"), Some(&Bson::Boolean(true)));

    // deletion runs out of band
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(history_entries(&ctx, "itest", "doomed").is_empty());
}

#[tokio::test]
async fn transaction_commits_items_with_history() {
    let ctx = context();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    let created = ObjectId::new();
    let updated = ObjectId::new();
    ctx.db
        .engine()
        .insert_one(&ns, &doc! { "_id": updated, "key": "old" })
        .unwrap();

    let response = process(
        &ctx,
        doc! {
            "action": "transaction",
            "database": "itest",
            "collection": "test",
            "document": { "items": [
                {
                    "action": "create",
                    "database": "itest",
                    "collection": "test",
                    "document": { "_id": created, "key": "fresh" },
                },
                {
                    "action": "update",
                    "database": "itest",
                    "collection": "test",
                    "document": { "_id": updated, "key": "new" },
                },
            ] },
        },
    )
    .await;

    let summary = doc_of(&response, "summary").expect("summary");
    assert_eq!(summary.get("total"), Some(&Bson::Int64(2)));
    assert_eq!(summary.get("success"), Some(&Bson::Int64(2)));
    assert_eq!(bool_of(summary, "committed"), Some(true));

    assert!(ctx.db.engine().find_one(&ns, &doc! { "_id": created }).is_some());
    let post = ctx.db.engine().find_one(&ns, &doc! { "_id": updated }).unwrap();
    assert_eq!(string_of(&post, "key"), Some("new"));
    assert_eq!(history_entries(&ctx, "itest", "test").len(), 2);
}

#[tokio::test]
async fn transaction_aborts_as_a_unit() {
    let ctx = context();
    let ns = shadowdb::service::engine::Namespace::new("itest", "test");
    let created = ObjectId::new();

    let response = process(
        &ctx,
        doc! {
            "action": "transaction",
            "database": "itest",
            "collection": "test",
            "document": { "items": [
                {
                    "action": "create",
                    "database": "itest",
                    "collection": "test",
                    "document": { "_id": created, "key": "fresh" },
                },
                {
                    // protected target forces the abort
                    "action": "create",
                    "database": "versionHistory",
                    "collection": "entities",
                    "document": { "_id": ObjectId::new() },
                },
            ] },
        },
    )
    .await;

    let summary = doc_of(&response, "summary").expect("summary");
    assert_eq!(summary.get("success"), Some(&Bson::Int64(1)));
    assert_eq!(summary.get("failure"), Some(&Bson::Int64(1)));
    assert_eq!(bool_of(summary, "committed"), Some(false));

    // the first item rolled back with the unit, history included
    assert!(ctx.db.engine().find_one(&ns, &doc! { "_id": created }).is_none());
    assert!(history_entries(&ctx, "itest", "test").is_empty());
}

#[tokio::test]
async fn unknown_actions_are_rejected() {
    let ctx = context();
    let response = process(
        &ctx,
        doc! {
            "action": "obliterate",
            "database": "itest",
            "collection": "test",
            "document": {},
        },
    )
    .await;
    assert_eq!(string_of(&response, "error"), Some("Invalid action"));
}

#[tokio::test]
async fn metrics_are_recorded_unless_skipped() {
    let ctx = context();
    let metrics_ns = shadowdb::service::engine::Namespace::new("versionHistory", "metrics");

    process(
        &ctx,
        doc! {
            "action": "count",
            "database": "itest",
            "collection": "test",
            "document": {},
        },
    )
    .await;
    process(
        &ctx,
        doc! {
            "action": "count",
            "database": "itest",
            "collection": "test",
            "document": {},
            "skipMetric": true,
        },
    )
    .await;

    // the collector flushes on its interval
    tokio::time::sleep(Duration::from_millis(1200)).await;
    let stored = ctx
        .db
        .engine()
        .find(&metrics_ns, &doc! {}, &FindOptions::default());
    assert_eq!(stored.len(), 1);
    assert_eq!(string_of(&stored[0], "action"), Some("count"));
}
