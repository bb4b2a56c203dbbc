//! Process-wide configuration for class dispatch.
//!
//! Capacities only size the concurrent maps up front; they never bound them.
//! The configuration must be fixed before the first class is used, since the
//! maps it sizes are created lazily on first access.

use crate::error::{JsClassError, JsClassResult};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::hash::Hash;
use std::sync::OnceLock;
use tracing::debug;

/// Environment variable holding a JSON configuration
pub const CONFIG_ENV: &str = "OTTER_JSCLASS_CONFIG";

/// Dispatch engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsClassConfig {
    /// Initial capacity of each dispatch memo map.
    /// Default: 16
    pub memo_capacity: usize,

    /// Initial capacity of the maps keyed by every live instance or
    /// callback handle (initialized markers, ad hoc callbacks).
    /// Default: 16384
    pub instance_capacity: usize,

    /// Whether new classes forward finalization to their hooks.
    /// Default: true
    pub forward_finalize: bool,

    /// Shard count for the concurrent maps; must be a power of two above 1.
    /// Default: dashmap's own choice
    pub shard_amount: Option<usize>,
}

impl Default for JsClassConfig {
    fn default() -> Self {
        Self {
            memo_capacity: 16,
            instance_capacity: 16384,
            forward_finalize: true,
            shard_amount: None,
        }
    }
}

impl JsClassConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON document; missing fields keep their defaults.
    pub fn from_json(json: &str) -> JsClassResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read the configuration from `OTTER_JSCLASS_CONFIG`, if set.
    pub fn from_env() -> JsClassResult<Option<Self>> {
        match std::env::var(CONFIG_ENV) {
            Ok(json) => Self::from_json(&json).map(Some),
            Err(std::env::VarError::NotPresent) => Ok(None),
            Err(e) => Err(JsClassError::config(format!("{CONFIG_ENV}: {e}"))),
        }
    }

    pub fn memo_capacity(mut self, capacity: usize) -> Self {
        self.memo_capacity = capacity;
        self
    }

    pub fn instance_capacity(mut self, capacity: usize) -> Self {
        self.instance_capacity = capacity;
        self
    }

    pub fn forward_finalize(mut self, enabled: bool) -> Self {
        self.forward_finalize = enabled;
        self
    }

    pub fn shard_amount(mut self, shards: usize) -> Self {
        self.shard_amount = Some(shards);
        self
    }

    pub fn validate(&self) -> JsClassResult<()> {
        if let Some(shards) = self.shard_amount {
            if shards < 2 || !shards.is_power_of_two() {
                return Err(JsClassError::config(format!(
                    "shard_amount must be a power of two greater than 1, got {shards}"
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn new_map<K: Eq + Hash, V>(&self, capacity: usize) -> DashMap<K, V> {
        match self.shard_amount {
            Some(shards) => DashMap::with_capacity_and_shard_amount(capacity, shards),
            None => DashMap::with_capacity(capacity),
        }
    }
}

static CONFIG: OnceLock<JsClassConfig> = OnceLock::new();

/// Fix the process configuration. Fails once any configuration is in
/// effect, including the implicit one picked up on first use.
pub fn configure(config: JsClassConfig) -> JsClassResult<()> {
    config.validate()?;
    CONFIG
        .set(config)
        .map_err(|_| JsClassError::config("configuration is already in effect"))?;
    debug!("Applied explicit class dispatch configuration");
    Ok(())
}

/// The configuration in effect.
///
/// Falls back to `OTTER_JSCLASS_CONFIG` and then to the defaults. An
/// unreadable environment value is reported and ignored.
pub fn config() -> &'static JsClassConfig {
    CONFIG.get_or_init(|| match JsClassConfig::from_env() {
        Ok(Some(config)) => {
            debug!("Loaded class dispatch configuration from {}", CONFIG_ENV);
            config
        }
        Ok(None) => JsClassConfig::default(),
        Err(e) => {
            tracing::warn!("Ignoring {}: {}", CONFIG_ENV, e);
            JsClassConfig::default()
        }
    })
}
