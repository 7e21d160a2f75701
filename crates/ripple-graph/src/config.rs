//! Configuration for the graph store and analyzer.
//!
//! Loaded from a TOML file where every section is optional, then
//! overridden by `RIPPLE_*` environment variables.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

use crate::error::{GraphError, GraphResult};

/// Configuration for connecting to Neo4j.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GraphConfig {
    pub uri: String,
    pub user: String,
    pub password: String,
    pub database: String,
    pub max_connections: usize,
    pub fetch_size: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            uri: "bolt://localhost:7687".to_string(),
            user: "neo4j".to_string(),
            password: "neo4j".to_string(),
            database: "neo4j".to_string(),
            max_connections: 8,
            fetch_size: 500,
        }
    }
}

/// Write batching and retry policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub batch_size: usize,
    /// Pause before the single retry of a chunk that hit an unavailable store.
    pub retry_backoff_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            batch_size: 1000,
            retry_backoff_ms: 250,
        }
    }
}

impl BatchConfig {
    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }
}

/// Defaults for impact queries.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub max_depth: usize,
    pub risky_files_limit: usize,
    pub query_timeout_ms: Option<u64>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            max_depth: 5,
            risky_files_limit: 10,
            query_timeout_ms: None,
        }
    }
}

impl AnalysisConfig {
    pub fn query_timeout(&self) -> Option<Duration> {
        self.query_timeout_ms.map(Duration::from_millis)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RippleConfig {
    pub graph: GraphConfig,
    pub batch: BatchConfig,
    pub analysis: AnalysisConfig,
}

impl RippleConfig {
    /// Load from a TOML file, then apply environment overrides.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config = Self::from_toml_str(&raw)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Parse TOML without touching the environment.
    pub fn from_toml_str(raw: &str) -> GraphResult<Self> {
        let config: RippleConfig =
            toml::from_str(raw).map_err(|e| GraphError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `RIPPLE_*` overrides from the process environment.
    pub fn apply_env(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from any variable lookup.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(uri) = lookup("RIPPLE_NEO4J_URI") {
            self.graph.uri = uri;
        }
        if let Some(user) = lookup("RIPPLE_NEO4J_USER") {
            self.graph.user = user;
        }
        if let Some(password) = lookup("RIPPLE_NEO4J_PASSWORD") {
            self.graph.password = password;
        }
        if let Some(database) = lookup("RIPPLE_NEO4J_DATABASE") {
            self.graph.database = database;
        }
        if let Some(raw) = lookup("RIPPLE_BATCH_SIZE") {
            match raw.parse() {
                Ok(size) => self.batch.batch_size = size,
                Err(_) => warn!(
                    value = %raw,
                    default = self.batch.batch_size,
                    "Invalid RIPPLE_BATCH_SIZE, keeping current value"
                ),
            }
        }
    }

    pub fn validate(&self) -> GraphResult<()> {
        if self.batch.batch_size == 0 {
            return Err(GraphError::config("batch.batch_size must be at least 1"));
        }
        if self.graph.uri.trim().is_empty() {
            return Err(GraphError::config("graph.uri must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_toml() {
        let config = RippleConfig::from_toml_str("").unwrap();
        assert_eq!(config.graph.uri, "bolt://localhost:7687");
        assert_eq!(config.batch.batch_size, 1000);
        assert_eq!(config.analysis.max_depth, 5);
        assert_eq!(config.analysis.risky_files_limit, 10);
        assert!(config.analysis.query_timeout().is_none());
    }

    #[test]
    fn test_partial_sections() {
        let config = RippleConfig::from_toml_str(
            r#"
            [graph]
            uri = "bolt://graph:7687"

            [analysis]
            query_timeout_ms = 1500
            "#,
        )
        .unwrap();
        assert_eq!(config.graph.uri, "bolt://graph:7687");
        assert_eq!(config.graph.user, "neo4j");
        assert_eq!(config.analysis.query_timeout(), Some(Duration::from_millis(1500)));
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let err = RippleConfig::from_toml_str("[batch]\nbatch_size = 0\n").unwrap_err();
        assert!(matches!(err, GraphError::Config(_)));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("RIPPLE_NEO4J_URI", "bolt://other:7687"),
            ("RIPPLE_BATCH_SIZE", "250"),
        ]
        .into_iter()
        .collect();
        let mut config = RippleConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));
        assert_eq!(config.graph.uri, "bolt://other:7687");
        assert_eq!(config.batch.batch_size, 250);
    }

    #[test]
    fn test_invalid_numeric_override_is_ignored() {
        let mut config = RippleConfig::default();
        config.apply_overrides(|name| (name == "RIPPLE_BATCH_SIZE").then(|| "lots".to_string()));
        assert_eq!(config.batch.batch_size, 1000);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[batch]\nbatch_size = 50\nretry_backoff_ms = 10").unwrap();
        let config = RippleConfig::from_file(file.path()).unwrap();
        assert_eq!(config.batch.retry_backoff(), Duration::from_millis(10));
    }

    #[test]
    fn test_from_missing_file() {
        let err = RippleConfig::from_file(Path::new("/nonexistent/ripple.toml")).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}
