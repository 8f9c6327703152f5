// Typed repository layer.
//
// Marshal a typed request, execute it, classify the three-way transport
// outcome, check the response body for a data error, parse the typed
// result.  Nothing is retried here; every failure kind crosses the
// boundary as `Error { message, cause }`.

use std::fmt;

use bson::Document;
use tracing::warn;

use crate::client::api::{Api, ResultType, DEFAULT_BUF_SIZE};
use crate::model::request::Request;
use crate::model::requests::{
    Bulk, Count, Create, CreateCollection, CreateTimeseries, CreateWithReference, Delete,
    Distinct, DropCollection, DropIndex, Index, MergeForId, MergeForIdWithReference, Payload,
    Pipeline, RenameCollection, Replace, Retrieve, Update,
};
use crate::model::transaction::TransactionBuilder;
use crate::model::response;
use crate::util::bson_ext::{array_of, doc_of, string_of};
use crate::util::json::json_str;

/// Failure taxonomy for service interactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cause {
    /// Pool saturation or lifetime-lease exhaustion.
    Pool,
    /// The connection returned no document.
    Command,
    /// A response arrived but was unusable.
    Empty,
    /// The response body carried an `error` field.
    Data,
    /// Unexpected in-process failure.
    Exception,
    /// Sentinel default; should never surface.
    Invalid,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub message: String,
    pub cause: Cause,
}

impl Error {
    pub fn new(message: impl Into<String>, cause: Cause) -> Self {
        Self {
            message: message.into(),
            cause,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?})", self.message, self.cause)
    }
}

impl std::error::Error for Error {}

type RepoResult<T> = std::result::Result<T, Error>;

fn exception(e: impl fmt::Display) -> Error {
    Error::new(e.to_string(), Cause::Exception)
}

/// Execute and classify one command document.
fn dispatch(api: &Api, request: &Request, context: &str) -> RepoResult<Document> {
    let (kind, response) = api.execute(request, DEFAULT_BUF_SIZE);
    match kind {
        ResultType::PoolFailure => {
            warn!("Connection pool exhausted while {}", context);
            Err(Error::new("Connection pool exhausted", Cause::Pool))
        }
        ResultType::CommandFailure => {
            warn!("Command returned no data while {}", context);
            Err(Error::new("Command returned no response", Cause::Command))
        }
        ResultType::Success => {
            let Some(body) = response else {
                warn!("API returned no data while {}", context);
                return Err(Error::new("API returned no response", Cause::Empty));
            };
            if let Some(message) = string_of(&body, "error") {
                warn!(
                    "API returned error while {}. {}. {}",
                    context,
                    message,
                    json_str(&body)
                );
                return Err(Error::new(message, Cause::Data));
            }
            Ok(body)
        }
    }
}

pub fn create<D: Payload>(api: &Api, request: &Create<D>) -> RepoResult<response::Create> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "creating document")?;
    response::Create::from_document(&body).map_err(exception)
}

pub fn create_with_reference<D: Payload>(
    api: &Api,
    request: &CreateWithReference<'_, D>,
) -> RepoResult<response::Create> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "creating document")?;
    response::Create::from_document(&body).map_err(exception)
}

pub fn create_timeseries<D: Payload>(
    api: &Api,
    request: &CreateTimeseries<D>,
) -> RepoResult<response::CreateTimeseries> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "creating timeseries point")?;
    response::CreateTimeseries::from_document(&body).map_err(exception)
}

pub fn update<D: Payload>(api: &Api, request: &MergeForId<D>) -> RepoResult<response::Update> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "updating document")?;
    response::Update::from_document(&body).map_err(exception)
}

pub fn update_with_reference<D: Payload>(
    api: &Api,
    request: &MergeForIdWithReference<'_, D>,
) -> RepoResult<response::Update> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "updating document")?;
    response::Update::from_document(&body).map_err(exception)
}

pub fn replace<D: Payload, F: Payload>(
    api: &Api,
    request: &Replace<D, F>,
) -> RepoResult<response::Update> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "replacing document")?;
    response::Update::from_document(&body).map_err(exception)
}

/// Update by filter where the filter pins a single document by object id.
pub fn update_by_filter<D: Payload, F: Payload>(
    api: &Api,
    request: &Update<D, F>,
) -> RepoResult<response::Update> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "updating document")?;
    response::Update::from_document(&body).map_err(exception)
}

/// Update by filter across multiple documents; history is reported per id.
pub fn update_many<D: Payload, F: Payload>(
    api: &Api,
    request: &Update<D, F>,
) -> RepoResult<response::Affected> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "updating documents")?;
    response::Affected::from_document(&body).map_err(exception)
}

pub fn retrieve<F: Payload>(api: &Api, request: &Retrieve<F>) -> RepoResult<response::Retrieve> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "retrieving documents")?;
    response::Retrieve::from_document(&body).map_err(exception)
}

pub fn count<F: Payload>(api: &Api, request: &Count<F>) -> RepoResult<response::Count> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "counting documents")?;
    response::Count::from_document(&body).map_err(exception)
}

pub fn distinct<F: Payload>(api: &Api, request: &Distinct<F>) -> RepoResult<response::Distinct> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "retrieving distinct values")?;
    response::Distinct::from_document(&body).map_err(exception)
}

pub fn pipeline(api: &Api, request: &Pipeline) -> RepoResult<response::Pipeline> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "executing pipeline")?;
    response::Pipeline::from_document(&body).map_err(exception)
}

pub fn index<S: Payload>(api: &Api, request: &Index<S>) -> RepoResult<response::Index> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "creating index")?;
    response::Index::from_document(&body).map_err(exception)
}

pub fn drop_index<S: Payload>(api: &Api, request: &DropIndex<S>) -> RepoResult<response::DropIndex> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "dropping index")?;
    response::DropIndex::from_document(&body).map_err(exception)
}

pub fn create_collection(
    api: &Api,
    request: &CreateCollection,
) -> RepoResult<response::Collection> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "creating collection")?;
    response::Collection::from_document(&body).map_err(exception)
}

pub fn rename_collection(
    api: &Api,
    request: &RenameCollection,
) -> RepoResult<response::Collection> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "renaming collection")?;
    response::Collection::from_document(&body).map_err(exception)
}

pub fn drop_collection(
    api: &Api,
    request: &DropCollection,
) -> RepoResult<response::DropCollection> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "dropping collection")?;
    response::DropCollection::from_document(&body).map_err(exception)
}

pub fn delete<F: Payload>(api: &Api, request: &Delete<F>) -> RepoResult<response::Affected> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "deleting documents")?;
    response::Affected::from_document(&body).map_err(exception)
}

pub fn bulk<D: Payload, F: Payload>(api: &Api, request: &Bulk<D, F>) -> RepoResult<response::Bulk> {
    let request = request.to_request().map_err(exception)?;
    let body = dispatch(api, &request, "executing bulk statements")?;
    response::Bulk::from_document(&body).map_err(exception)
}

/// Execute a raw transaction command.  The payload must carry a `document`
/// with an `items` array; item validation itself happens server side.
pub fn transaction_document(api: &Api, command: &Document) -> RepoResult<response::Transaction> {
    let Some(payload) = doc_of(command, "document") else {
        warn!("No document in payload. {}", json_str(command));
        return Err(Error::new("No document in payload", Cause::Data));
    };
    if array_of(payload, "items").is_none() {
        warn!("No items array in payload. {}", json_str(command));
        return Err(Error::new("No items array in payload", Cause::Data));
    }

    let (kind, response) = api.execute_document(command, DEFAULT_BUF_SIZE);
    match kind {
        ResultType::PoolFailure => Err(Error::new("Connection pool exhausted", Cause::Pool)),
        ResultType::CommandFailure => {
            Err(Error::new("Command returned no response", Cause::Command))
        }
        ResultType::Success => {
            let Some(body) = response else {
                return Err(Error::new("API returned no response", Cause::Empty));
            };
            if let Some(message) = string_of(&body, "error") {
                warn!(
                    "API returned error while executing transaction. {}. {}",
                    message,
                    json_str(&body)
                );
                return Err(Error::new(message, Cause::Data));
            }
            response::Transaction::from_document(&body).map_err(exception)
        }
    }
}

pub fn transaction(api: &Api, builder: &TransactionBuilder) -> RepoResult<response::Transaction> {
    let command = builder.build(api.application());
    transaction_document(api, &command)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_includes_cause() {
        let error = Error::new("Connection pool exhausted", Cause::Pool);
        let rendered = error.to_string();
        assert!(rendered.contains("Connection pool exhausted"));
        assert!(rendered.contains("Pool"));
    }

    #[test]
    fn cause_taxonomy_is_complete() {
        let causes = [
            Cause::Pool,
            Cause::Command,
            Cause::Empty,
            Cause::Data,
            Cause::Exception,
            Cause::Invalid,
        ];
        assert_eq!(causes.len(), 6);
    }
}
