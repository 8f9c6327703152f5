// Request dispatch and response classification.
//
// `Api` owns the client configuration plus two instances of the generic
// pool: one of blocking connections, one of cooperative-async connections.
// A connection is never migrated between the two.

use std::sync::Arc;

use bson::Document;
use once_cell::sync::OnceCell;
use tracing::{error, warn};

use crate::client::aio::AsyncConnection;
use crate::client::apm::Apm;
use crate::client::connection::Connection;
use crate::client::pool::{Configuration, Pool};
use crate::model::request::Request;
use crate::util::json::json_str;

/// Initial receive buffer hint.
pub const DEFAULT_BUF_SIZE: usize = 4 * 1024;

/// Classification of a dispatched command.
///
/// `Success` means the service executed the command and a response arrived;
/// the response body must still be checked for an `error` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultType {
    Success,
    PoolFailure,
    CommandFailure,
}

pub type Response = (ResultType, Option<Document>);

/// Client context: connection parameters and the two pools.
pub struct Api {
    application: String,
    pool: Arc<Pool<Connection>>,
    async_pool: Arc<Pool<AsyncConnection>>,
}

impl Api {
    pub fn new(
        server: &str,
        port: &str,
        application: &str,
        configuration: Configuration,
    ) -> Arc<Self> {
        let (host, service_port) = (server.to_string(), port.to_string());
        let pool = Pool::new(
            move || Connection::connect(&host, &service_port),
            configuration.clone(),
        );

        let (host, service_port) = (server.to_string(), port.to_string());
        let async_pool = Pool::new(
            move || Ok(AsyncConnection::new(&host, &service_port)),
            configuration,
        );

        Arc::new(Self {
            application: application.to_string(),
            pool,
            async_pool,
        })
    }

    pub fn application(&self) -> &str {
        &self.application
    }

    /// Execute a raw command document against the service.
    pub fn execute_document(&self, document: &Document, buf_size: usize) -> Response {
        let Some(mut lease) = self.pool.acquire() else {
            error!("Error acquiring connection from pool");
            return (ResultType::PoolFailure, None);
        };

        match lease.execute(document, buf_size) {
            Some(response) => (ResultType::Success, Some(response)),
            None => {
                warn!("Error executing command {}", json_str(document));
                lease.set_valid(false);
                (ResultType::CommandFailure, None)
            }
        }
    }

    /// Execute a typed request; the envelope is stamped with the context's
    /// application name.
    pub fn execute(&self, request: &Request, buf_size: usize) -> Response {
        let document = request.to_document(&self.application);
        self.execute_document(&document, buf_size)
    }

    /// Raw command execution with APM annotations on each internal step.
    pub fn execute_document_traced(
        &self,
        document: &Document,
        apm: &mut dyn Apm,
        buf_size: usize,
    ) -> Response {
        let span = apm.begin("execute", file!(), line!());

        let Some(mut lease) = self.pool.acquire() else {
            error!("Error acquiring connection from pool");
            apm.error(span, "Pool exhausted");
            apm.end(span);
            return (ResultType::PoolFailure, None);
        };

        match lease.execute_traced(document, apm, buf_size) {
            Some(response) => {
                apm.end(span);
                (ResultType::Success, Some(response))
            }
            None => {
                warn!("Error executing command {}", json_str(document));
                apm.error(span, "Command failed");
                apm.end(span);
                lease.set_valid(false);
                (ResultType::CommandFailure, None)
            }
        }
    }

    pub fn execute_traced(
        &self,
        request: &Request,
        apm: &mut dyn Apm,
        buf_size: usize,
    ) -> Response {
        let document = request.to_document(&self.application);
        self.execute_document_traced(&document, apm, buf_size)
    }

    /// Execute a raw command document on the async pool.  The suspension
    /// points are the connection's socket awaits; acquisition itself uses
    /// the pool's bounded wait.
    pub async fn execute_document_async(&self, document: &Document, buf_size: usize) -> Response {
        let Some(mut lease) = self.async_pool.acquire() else {
            error!("Error acquiring connection from pool");
            return (ResultType::PoolFailure, None);
        };

        match lease.execute(document, buf_size).await {
            Some(response) => (ResultType::Success, Some(response)),
            None => {
                warn!("Error executing command {}", json_str(document));
                lease.set_valid(false);
                (ResultType::CommandFailure, None)
            }
        }
    }

    pub async fn execute_async(&self, request: &Request, buf_size: usize) -> Response {
        let document = request.to_document(&self.application);
        self.execute_document_async(&document, buf_size).await
    }
}

static INSTANCE: OnceCell<Arc<Api>> = OnceCell::new();

/// One-time process-wide registration.  Subsequent calls are logged and
/// ignored; the first registration wins.
pub fn init(
    server: &str,
    port: &str,
    application: &str,
    configuration: Configuration,
) -> Arc<Api> {
    if let Some(existing) = INSTANCE.get() {
        error!("API init called multiple times.");
        return Arc::clone(existing);
    }

    Arc::clone(INSTANCE.get_or_init(|| Api::new(server, port, application, configuration)))
}

pub fn instance() -> Option<Arc<Api>> {
    INSTANCE.get().cloned()
}
