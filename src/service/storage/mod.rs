// Storage orchestrator.
//
// Translates each incoming command into engine calls, pairs every mutation
// with its version history append, and folds engine failures into error
// responses.  The dispatch wrapper times every request and feeds the
// metrics collector unless the command opts out.

mod bulk;
mod collection;
mod crud;
pub mod history;
mod index;
mod query;
mod remove;
mod transaction;
mod update;

use std::time::Instant;

use bson::Document;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::model::action::Action;
use crate::service::db::DbClient;
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::metrics::Metric;
use crate::service::ServiceContext;
use crate::util::bson_ext::{oid_of, string_of};

/// Handle one command and record its metric.
pub async fn process(ctx: &ServiceContext, envelope: &Envelope) -> Document {
    let started = Instant::now();
    let response = dispatch(ctx, envelope).await;
    let duration = started.elapsed();

    if envelope.skip_metric() {
        info!("Skipping metric {}", envelope.json());
    } else {
        let document = envelope.document();
        ctx.metrics.add(Metric {
            action: envelope.action().to_string(),
            database: envelope.database().to_string(),
            collection: envelope.collection().to_string(),
            duration,
            id: oid_of(&document, "_id"),
            application: envelope.application().map(str::to_string),
            correlation_id: envelope.correlation_id().map(str::to_string),
            message: string_of(&response, "error").map(str::to_string),
            size: crate::wire::encode(&response).map(|b| b.len()).unwrap_or(0),
            created: Utc::now(),
        });
    }

    response
}

async fn dispatch(ctx: &ServiceContext, envelope: &Envelope) -> Document {
    let action = match envelope.action().parse::<Action>() {
        Ok(action) => action,
        Err(_) => {
            info!(
                "Invalid action {} in document {}",
                envelope.action(),
                envelope.json()
            );
            return errors::invalid_action();
        }
    };

    let result = match action {
        Action::Create => crud::create(ctx, envelope).await,
        Action::Retrieve => crud::retrieve(ctx, envelope).await,
        Action::Update => update::update(ctx, envelope).await,
        Action::Delete => remove::remove(ctx, envelope).await,
        Action::Count => query::count(ctx, envelope).await,
        Action::Distinct => query::distinct(ctx, envelope).await,
        Action::Pipeline => query::pipeline(ctx, envelope).await,
        Action::Index => index::index(ctx, envelope).await,
        Action::DropIndex => index::drop_index(ctx, envelope).await,
        Action::Bulk => bulk::bulk(ctx, envelope).await,
        Action::Transaction => transaction::transaction(ctx, envelope).await,
        Action::CreateCollection => collection::create_collection(ctx, envelope).await,
        Action::RenameCollection => collection::rename_collection(ctx, envelope).await,
        Action::DropCollection => collection::drop_collection(ctx, envelope).await,
        Action::CreateTimeseries => crud::create_timeseries(ctx, envelope).await,
    };

    match result {
        Ok(response) => response,
        Err(e) => {
            error!(
                "Error processing database action {} message: {}",
                action, e
            );
            info!("{}", envelope.json());
            errors::with_message(format!("Error processing database action {}", action))
        }
    }
}

/// The protected-collection invariant: mutations aimed at the version
/// history namespace are rejected before any database contact.
pub(crate) fn protected(ctx: &ServiceContext, database: &str, collection: &str) -> bool {
    database == ctx.config.version_history.database
        && collection == ctx.config.version_history.collection
}

pub(crate) async fn acquire(ctx: &ServiceContext) -> Option<DbClient> {
    let client = ctx.db.acquire().await;
    if client.is_none() {
        warn!("Connection pool exhausted");
    }
    client
}

pub(crate) fn namespace(envelope: &Envelope) -> crate::service::engine::Namespace {
    crate::service::engine::Namespace::new(envelope.database(), envelope.collection())
}
