//! Global configuration options and cluster configuration.

use std::sync::{OnceLock, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::{Deserialize, Serialize};

/// Global configuration options for the distarray crate.
///
/// Retrieve the global [`Config`] with [`global_config`] and modify it with [`global_config_mut`].
///
/// The configuration is read on every rank independently.
/// Options that affect collective behaviour ([validate collective calls](#validate-collective-calls)) must be set identically on every rank before any collective call.
///
/// ## Shard Concurrent Limit
/// > default: `1`
///
/// The number of chunks of its own shard that one rank processes concurrently in a bulk operation (`load`, `map`, `apply`, `clear`).
/// Chunks within a shard are disjoint, so this never changes results.
/// A limit of `1` processes a shard sequentially on the calling thread.
///
/// ## Validate Collective Calls
/// > default: [`false`]
///
/// If enabled, every collective call of the [`distributed`](crate::distributed) layer first exchanges a call tag (the operation name and its arguments) across the group.
/// Divergent calls fail with [`CollectiveProtocolViolation`](crate::distributed::DistributedError::CollectiveProtocolViolation) on every rank instead of deadlocking or corrupting state.
/// This costs one broadcast per rank per collective call.
#[derive(Debug)]
pub struct Config {
    shard_concurrent_limit: usize,
    validate_collective_calls: bool,
}

#[allow(clippy::derivable_impls)]
impl Default for Config {
    fn default() -> Self {
        Config {
            shard_concurrent_limit: 1,
            validate_collective_calls: false,
        }
    }
}

impl Config {
    /// Get the [shard concurrent limit](#shard-concurrent-limit) configuration.
    #[must_use]
    pub fn shard_concurrent_limit(&self) -> usize {
        self.shard_concurrent_limit
    }

    /// Set the [shard concurrent limit](#shard-concurrent-limit) configuration.
    ///
    /// A limit of zero is treated as one.
    pub fn set_shard_concurrent_limit(&mut self, concurrent_limit: usize) {
        self.shard_concurrent_limit = concurrent_limit.max(1);
    }

    /// Get the [validate collective calls](#validate-collective-calls) configuration.
    #[must_use]
    pub fn validate_collective_calls(&self) -> bool {
        self.validate_collective_calls
    }

    /// Set the [validate collective calls](#validate-collective-calls) configuration.
    pub fn set_validate_collective_calls(&mut self, validate_collective_calls: bool) {
        self.validate_collective_calls = validate_collective_calls;
    }
}

static CONFIG: OnceLock<RwLock<Config>> = OnceLock::new();

/// Returns a reference to the global distarray configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config() -> RwLockReadGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .read()
        .unwrap()
}

/// Returns a mutable reference to the global distarray configuration.
///
/// # Panics
/// This function panics if the underlying lock has been poisoned and might panic if the global config is already held by the current thread.
pub fn global_config_mut() -> RwLockWriteGuard<'static, Config> {
    CONFIG
        .get_or_init(|| RwLock::new(Config::default()))
        .write()
        .unwrap()
}

/// The configuration of a cluster: the backend kind, the cluster name, and backend connection options.
///
/// A [`DistributedCluster`](crate::distributed::DistributedCluster) keeps its configuration so that it can recreate its cluster handle when a backend requires reconnection after a structural change.
///
/// ```rust
/// # use distarray::config::ClusterConfig;
/// let config = ClusterConfig::from_json(r#"{"backend": "filesystem", "name": "cluster", "options": {"root": "/tmp/cluster"}}"#)?;
/// assert_eq!(config.backend(), "filesystem");
/// assert_eq!(config.option_str("root"), Some("/tmp/cluster"));
/// # Ok::<_, serde_json::Error>(())
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ClusterConfig {
    backend: String,
    name: String,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    options: serde_json::Map<String, serde_json::Value>,
}

impl ClusterConfig {
    /// Create a new cluster configuration with no options.
    #[must_use]
    pub fn new(backend: &str, name: &str) -> Self {
        Self {
            backend: backend.to_string(),
            name: name.to_string(),
            options: serde_json::Map::default(),
        }
    }

    /// Parse a cluster configuration from JSON.
    ///
    /// # Errors
    /// Returns a [`serde_json::Error`] if `json` is not a valid cluster configuration.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Set a backend option.
    #[must_use]
    pub fn with_option(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.options.insert(key.to_string(), value.into());
        self
    }

    /// The backend kind name.
    #[must_use]
    pub fn backend(&self) -> &str {
        &self.backend
    }

    /// The cluster name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The backend options.
    #[must_use]
    pub fn options(&self) -> &serde_json::Map<String, serde_json::Value> {
        &self.options
    }

    /// A backend option as a string, if present and a string.
    #[must_use]
    pub fn option_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(serde_json::Value::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_shard_concurrent_limit() {
        assert_eq!(global_config().shard_concurrent_limit(), 1);
        global_config_mut().set_shard_concurrent_limit(0);
        assert_eq!(global_config().shard_concurrent_limit(), 1);
    }

    #[test]
    fn cluster_config() {
        let config = ClusterConfig::new("memory", "cluster").with_option("threads", 4);
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(
            json,
            r#"{"backend":"memory","name":"cluster","options":{"threads":4}}"#
        );
        assert_eq!(ClusterConfig::from_json(&json).unwrap(), config);
        assert_eq!(config.option_str("threads"), None);

        let config = ClusterConfig::from_json(r#"{"backend":"memory","name":"c"}"#).unwrap();
        assert!(config.options().is_empty());
        assert!(ClusterConfig::from_json(r#"{"name":"c"}"#).is_err());
    }
}
