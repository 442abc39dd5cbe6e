use std::{path::PathBuf, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{domain::entities::product_catalog::ProductCatalog, errors::IapError};

/// Per-session configuration, resolved once at startup and passed explicitly
/// into the adapters, validator and engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IapConfig {
    /// Android application ID the Google Play purchases belong to.
    pub google_play_package_name: String,
    /// iOS bundle identifier the App Store transactions belong to.
    pub app_store_bundle_id: String,
    /// Journal file backing the entitlement ledger.
    pub ledger_path: PathBuf,
    #[serde(default)]
    pub products: ProductCatalog,
    #[serde(default)]
    pub engine: EngineConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum number of validation attempts for one event, including the
    /// first, before a persistent `StoreUnreachable` is given up on.
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// Upper bound on validations in flight at once.
    pub worker_count: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff_ms: 500,
            max_backoff_ms: 30_000,
            worker_count: 8,
        }
    }
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), IapError> {
        if self.max_attempts == 0 {
            return Err(IapError::Config("max_attempts must be at least 1".into()));
        }
        if self.worker_count == 0 {
            return Err(IapError::Config("worker_count must be at least 1".into()));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(IapError::Config(format!(
                "initial_backoff_ms ({}) exceeds max_backoff_ms ({})",
                self.initial_backoff_ms, self.max_backoff_ms
            )));
        }
        Ok(())
    }

    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl IapConfig {
    pub fn from_json_str(json: &str) -> Result<Self, IapError> {
        let config: IapConfig = serde_json::from_str(json)
            .map_err(|e| IapError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), IapError> {
        if self.google_play_package_name.trim().is_empty() {
            return Err(IapError::Config(
                "google_play_package_name must not be empty".into(),
            ));
        }
        if self.app_store_bundle_id.trim().is_empty() {
            return Err(IapError::Config("app_store_bundle_id must not be empty".into()));
        }
        self.engine.validate()
    }
}
