// Request metrics collection.
//
// Handlers hand one record per request to the collector; a background task
// batches them into the configured metrics namespace.  Metric persistence
// is best effort and never blocks request processing.

use std::sync::Arc;
use std::time::Duration;

use bson::oid::ObjectId;
use bson::{doc, Document};
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::config::Configuration;
use crate::service::engine::{Engine, Namespace};

#[derive(Debug, Clone)]
pub struct Metric {
    pub action: String,
    pub database: String,
    pub collection: String,
    pub duration: Duration,
    pub id: Option<ObjectId>,
    pub application: Option<String>,
    pub correlation_id: Option<String>,
    pub message: Option<String>,
    pub size: usize,
    pub created: DateTime<Utc>,
}

impl Metric {
    fn to_document(&self) -> Document {
        let mut document = doc! {
            "_id": ObjectId::new(),
            "action": self.action.as_str(),
            "database": self.database.as_str(),
            "collection": self.collection.as_str(),
            "duration": self.duration.as_nanos() as i64,
            "size": self.size as i64,
            "timestamp": bson::DateTime::from_millis(self.created.timestamp_millis()),
        };
        if let Some(id) = self.id {
            document.insert("entityId", id);
        }
        if let Some(application) = &self.application {
            document.insert("application", application.as_str());
        }
        if let Some(correlation_id) = &self.correlation_id {
            document.insert("correlationId", correlation_id.as_str());
        }
        if let Some(message) = &self.message {
            document.insert("message", message.as_str());
        }
        document
    }
}

#[derive(Clone)]
pub struct MetricsCollector {
    sender: mpsc::UnboundedSender<Metric>,
}

impl MetricsCollector {
    pub fn new(engine: Arc<Engine>, config: &Configuration) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        let ns = Namespace::new(
            config.metrics.database.clone(),
            config.metrics.collection.clone(),
        );
        tokio::spawn(flush_loop(engine, ns, config.metrics.batch_size.max(1), receiver));
        Self { sender }
    }

    pub fn add(&self, metric: Metric) {
        if self.sender.send(metric).is_err() {
            warn!("Metrics collector is gone; dropping metric");
        }
    }
}

async fn flush_loop(
    engine: Arc<Engine>,
    ns: Namespace,
    batch_size: usize,
    mut receiver: mpsc::UnboundedReceiver<Metric>,
) {
    let mut batch: Vec<Metric> = Vec::with_capacity(batch_size);
    let mut ticker = tokio::time::interval(Duration::from_secs(1));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            received = receiver.recv() => {
                match received {
                    Some(metric) => {
                        batch.push(metric);
                        if batch.len() >= batch_size {
                            flush(&engine, &ns, &mut batch);
                        }
                    }
                    None => {
                        flush(&engine, &ns, &mut batch);
                        return;
                    }
                }
            }
            _ = ticker.tick() => flush(&engine, &ns, &mut batch),
        }
    }
}

fn flush(engine: &Engine, ns: &Namespace, batch: &mut Vec<Metric>) {
    if batch.is_empty() {
        return;
    }
    debug!("Flushing {} metrics to {}", batch.len(), ns);
    for metric in batch.drain(..) {
        if let Err(e) = engine.insert_one(ns, &metric.to_document()) {
            warn!("Error saving metric: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service::engine::FindOptions;

    fn metric(action: &str) -> Metric {
        Metric {
            action: action.to_string(),
            database: "itest".to_string(),
            collection: "test".to_string(),
            duration: Duration::from_micros(120),
            id: Some(ObjectId::new()),
            application: Some("unit".to_string()),
            correlation_id: None,
            message: None,
            size: 64,
            created: Utc::now(),
        }
    }

    #[test]
    fn metric_document_shape() {
        let document = metric("create").to_document();
        assert!(document.contains_key("_id"));
        assert!(document.contains_key("duration"));
        assert!(document.contains_key("timestamp"));
        assert!(document.contains_key("entityId"));
        assert!(!document.contains_key("message"));
    }

    #[tokio::test]
    async fn collector_persists_batches() {
        let engine = Arc::new(Engine::new());
        let mut config = Configuration::default();
        config.metrics.batch_size = 2;
        let collector = MetricsCollector::new(Arc::clone(&engine), &config);

        collector.add(metric("create"));
        collector.add(metric("retrieve"));

        // batch size reached; give the flush task a moment
        tokio::time::sleep(Duration::from_millis(50)).await;
        let ns = Namespace::new("versionHistory", "metrics");
        let stored = engine.find(&ns, &doc! {}, &FindOptions::default());
        assert_eq!(stored.len(), 2);
    }
}
