// Bounded pool of engine handles.
//
// The engine is in-process, but handlers still borrow a handle under a
// concurrency bound with the same ~1 second acquire behavior the rest of
// the system uses; exhaustion surfaces as the pool-exhausted error
// document.  Startup ensures the supporting indexes on the version history
// collection.

use std::ops::Deref;
use std::sync::Arc;
use std::time::Duration;

use bson::doc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::config::Configuration;
use crate::service::engine::{Engine, Namespace, WriteConcern};

pub struct DbPool {
    engine: Arc<Engine>,
    semaphore: Arc<Semaphore>,
    write_concern: WriteConcern,
    acquire_timeout: Duration,
}

impl DbPool {
    pub fn new(engine: Arc<Engine>, config: &Configuration) -> Self {
        let pool = Self {
            engine,
            semaphore: Arc::new(Semaphore::new(config.threads.max(1) * 4)),
            write_concern: WriteConcern::Acknowledged,
            acquire_timeout: Duration::from_secs(1),
        };
        pool.index(config);
        pool
    }

    /// Supporting indexes for version history lookups.
    fn index(&self, config: &Configuration) {
        let ns = Namespace::new(
            config.version_history.database.clone(),
            config.version_history.collection.clone(),
        );
        for keys in [
            doc! { "database": 1_i32 },
            doc! { "collection": 1_i32 },
            doc! { "entity._id": 1_i32 },
        ] {
            if let Err(e) = self.engine.create_index(&ns, keys, None) {
                warn!("Error creating indices: {}", e);
            }
        }
        info!("Version history indices ensured on {}", ns);
    }

    pub async fn acquire(&self) -> Option<DbClient> {
        let semaphore = Arc::clone(&self.semaphore);
        match tokio::time::timeout(self.acquire_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => Some(DbClient {
                engine: Arc::clone(&self.engine),
                write_concern: self.write_concern,
                _permit: permit,
            }),
            Ok(Err(e)) => {
                warn!("Error waiting for connection: {}", e);
                None
            }
            Err(_) => {
                warn!("Timed out acquiring database connection");
                None
            }
        }
    }

    pub fn engine(&self) -> Arc<Engine> {
        Arc::clone(&self.engine)
    }
}

/// A borrowed engine handle; derefs to the engine itself.
pub struct DbClient {
    engine: Arc<Engine>,
    write_concern: WriteConcern,
    _permit: OwnedSemaphorePermit,
}

impl DbClient {
    pub fn write_concern(&self) -> WriteConcern {
        self.write_concern
    }
}

impl Deref for DbClient {
    type Target = Engine;

    fn deref(&self) -> &Engine {
        &self.engine
    }
}
