// Read-only handlers: count, distinct, pipeline.

use bson::{doc, Bson, Document};
use tracing::{debug, warn};

use crate::error::Result;
use crate::service::engine::FindOptions;
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, namespace};
use crate::service::ServiceContext;
use crate::util::bson_ext::{array_of, doc_of, string_of};

pub(super) async fn count(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let options = FindOptions::from_options(envelope.options());
    let count = client.count(&namespace(envelope), &envelope.document(), &options);
    Ok(doc! { "count": count })
}

pub(super) async fn distinct(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let Some(field) = string_of(&document, "field") else {
        return Ok(errors::missing_name());
    };

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let filter = doc_of(&document, "filter").cloned().unwrap_or_default();
    let values = client.distinct(&namespace(envelope), field, &filter);
    Ok(doc! { "results": [ { "values": values } ] })
}

pub(super) async fn pipeline(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    debug!("Executing aggregation pipeline query");
    let document = envelope.document();

    let Some(specification) = array_of(&document, "specification") else {
        warn!("No aggregation specification");
        return Ok(errors::with_message("No aggregation specification."));
    };

    let stages: Vec<Document> = specification
        .iter()
        .filter_map(|stage| match stage {
            Bson::Document(doc) => Some(doc.clone()),
            _ => None,
        })
        .collect();

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    let results = client.aggregate(&namespace(envelope), &stages)?;
    let results: Vec<Bson> = results.into_iter().map(Bson::Document).collect();
    Ok(doc! { "results": results })
}
