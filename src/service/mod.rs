pub mod db;
pub mod engine;
pub mod envelope;
pub mod errors;
pub mod metrics;
pub mod server;
pub mod storage;

use std::sync::Arc;

use crate::config::Configuration;
use crate::service::db::DbPool;
use crate::service::engine::Engine;
use crate::service::metrics::MetricsCollector;

/// Everything a request handler needs: configuration, the engine handle
/// pool, and the metrics collector.  Must be created inside a runtime.
pub struct ServiceContext {
    pub config: Configuration,
    pub db: DbPool,
    pub metrics: MetricsCollector,
}

impl ServiceContext {
    pub fn new(config: Configuration) -> Arc<Self> {
        let engine = Arc::new(Engine::new());
        let db = DbPool::new(Arc::clone(&engine), &config);
        let metrics = MetricsCollector::new(engine, &config);
        Arc::new(Self {
            config,
            db,
            metrics,
        })
    }
}
