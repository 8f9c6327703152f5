// index / dropIndex handlers.

use bson::{doc, Document};
use tracing::{info, warn};

use crate::error::Result;
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, namespace};
use crate::service::ServiceContext;
use crate::util::bson_ext::{doc_of, string_of};

pub(super) async fn index(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    info!("Creating index {}", envelope.json());
    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };

    match client.create_index(&namespace(envelope), envelope.document(), envelope.options()) {
        Ok(metadata) => Ok(metadata),
        Err(e) => {
            warn!("Error creating index. {}", e);
            Ok(errors::with_message(e.to_string()))
        }
    }
}

pub(super) async fn drop_index(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let ns = namespace(envelope);

    let name = envelope
        .options()
        .and_then(|options| string_of(options, "name"))
        .or_else(|| string_of(&document, "name"));
    if let Some(name) = name {
        if let Err(e) = client.drop_index_by_name(&ns, name) {
            warn!("Error dropping index {}. {}", name, e);
            return Ok(errors::with_message(e.to_string()));
        }
    }

    if let Some(specification) = doc_of(&document, "specification") {
        if let Err(e) = client.drop_index_by_spec(&ns, specification) {
            warn!("Error dropping index. {}", e);
            return Ok(errors::with_message(e.to_string()));
        }
    }

    Ok(doc! { "dropIndex": true })
}
