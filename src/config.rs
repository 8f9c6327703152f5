use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Result, ServiceError};

/// Service configuration.  Every field has a default so a bare service can
/// start without a configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Configuration {
    pub version_history: VersionHistory,
    pub metrics: Metrics,
    pub log_level: String,
    pub port: u16,
    pub threads: usize,
}

/// The protected namespace that stores version history entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VersionHistory {
    pub database: String,
    pub collection: String,
}

/// Destination namespace and batching for request metrics.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Metrics {
    pub database: String,
    pub collection: String,
    pub batch_size: usize,
}

impl Default for VersionHistory {
    fn default() -> Self {
        Self {
            database: "versionHistory".to_string(),
            collection: "entities".to_string(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self {
            database: "versionHistory".to_string(),
            collection: "metrics".to_string(),
            batch_size: 100,
        }
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            version_history: VersionHistory::default(),
            metrics: Metrics::default(),
            log_level: "info".to_string(),
            port: 2000,
            threads: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4),
        }
    }
}

impl Configuration {
    /// Load configuration from a JSON file.  Missing keys fall back to the
    /// defaults above.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let data = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ServiceError::Configuration(format!(
                "cannot read {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        serde_json::from_str(&data)
            .map_err(|e| ServiceError::Configuration(format!("invalid configuration: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert_eq!(config.version_history.database, "versionHistory");
        assert_eq!(config.version_history.collection, "entities");
        assert_eq!(config.metrics.collection, "metrics");
        assert_eq!(config.metrics.batch_size, 100);
        assert_eq!(config.port, 2000);
    }

    #[test]
    fn partial_file_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"port": 2020, "versionHistory": {{"database": "audit"}}}}"#
        )
        .unwrap();

        let config = Configuration::from_file(file.path()).unwrap();
        assert_eq!(config.port, 2020);
        assert_eq!(config.version_history.database, "audit");
        // untouched keys keep their defaults
        assert_eq!(config.version_history.collection, "entities");
        assert_eq!(config.metrics.batch_size, 100);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(Configuration::from_file("/nonexistent/shadowdb.json").is_err());
    }
}
