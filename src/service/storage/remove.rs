// delete handler: find the matching pre-images, delete each by id, append
// history per successful delete.

use bson::{doc, Bson, Document};
use tracing::{info, warn};

use crate::error::Result;
use crate::service::engine::{FindOptions, WriteConcern};
use crate::service::envelope::Envelope;
use crate::service::errors;
use crate::service::storage::{acquire, history, namespace, protected};
use crate::service::ServiceContext;

pub(super) async fn remove(ctx: &ServiceContext, envelope: &Envelope) -> Result<Document> {
    let document = envelope.document();
    let database = envelope.database();
    let collection = envelope.collection();

    if protected(ctx, database, collection) {
        warn!(
            "Attempting to delete from version history {}",
            envelope.json()
        );
        return Ok(errors::not_modifiable());
    }

    let Some(client) = acquire(ctx).await else {
        return Ok(errors::pool_exhausted());
    };
    let concern = WriteConcern::from_options(envelope.options(), client.write_concern());
    let ns = namespace(envelope);

    let matches = client.find(&ns, &document, &FindOptions::default());

    let mut success: Vec<Bson> = Vec::new();
    let mut failure: Vec<Bson> = Vec::new();
    let mut entries: Vec<Bson> = Vec::new();

    for item in matches {
        let Some(id) = item.get("_id").cloned() else {
            continue;
        };

        let deleted = client.delete_one(&ns, &doc! { "_id": id.clone() });
        if deleted > 0 || !concern.is_acknowledged() {
            info!("Deleted document {}:{:?}", ns, id);
            success.push(id);
            if !envelope.skip_version() {
                entries.push(Bson::Document(history::entry(
                    &ctx.config,
                    &client,
                    database,
                    collection,
                    "delete",
                    &item,
                    envelope.metadata(),
                    concern,
                )));
            }
        } else {
            warn!("Unable to delete document {}:{:?}", ns, id);
            failure.push(id);
        }
    }

    Ok(doc! { "success": success, "failure": failure, "history": entries })
}
