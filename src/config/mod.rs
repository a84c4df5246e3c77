// src/config/mod.rs
mod models;

pub use models::{
    AvailabilityConfig, ClientConfig, ServerStatsConfig, SubsetFilterConfig, ZoneAffinityConfig,
    ZoneAwareConfig,
};

use crate::error::ConfigError;
use anyhow::{Context, Result};
use arc_swap::ArcSwap;
use std::path::Path;
use std::sync::Arc;

/// Load configuration from a file. The format is keyed off the file
/// extension; anything other than `.yaml`, `.yml` or `.json` is
/// rejected rather than guessed at.
pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<ClientConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let config = parse_config(path, &contents)?;
    config.validate()?;
    Ok(config)
}

fn parse_config(path: &Path, contents: &str) -> Result<ClientConfig> {
    match path.extension().and_then(|ext| ext.to_str()) {
        Some("yaml" | "yml") => serde_yaml::from_str(contents)
            .with_context(|| format!("invalid YAML in {}", path.display())),
        Some("json") => serde_json::from_str(contents)
            .with_context(|| format!("invalid JSON in {}", path.display())),
        other => anyhow::bail!(
            "unsupported config extension {other:?} for {}, expected yaml, yml or json",
            path.display()
        ),
    }
}

/// Cloneable handle over a shared configuration snapshot.
///
/// Components keep a handle and re-read the current snapshot on use, so a
/// call to [`DynamicConfig::update`] takes effect on the next operation
/// without restarting anything.
#[derive(Debug, Clone)]
pub struct DynamicConfig {
    inner: Arc<ArcSwap<ClientConfig>>,
}

impl DynamicConfig {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(ArcSwap::from_pointee(config)),
        }
    }

    pub fn snapshot(&self) -> Arc<ClientConfig> {
        self.inner.load_full()
    }

    /// Publish a new snapshot. Fails if the new config does not validate;
    /// the previous snapshot stays in effect.
    pub fn update(&self, config: ClientConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.inner.store(Arc::new(config));
        Ok(())
    }
}

impl Default for DynamicConfig {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}
