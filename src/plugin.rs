//! Plugin utilities.
//!
//! A [`Plugin`] creates objects from a configuration.
//! It is used to register [backends](crate::backend) under a kind name (e.g. `memory`, `filesystem`).
//!
//! Plugins are registered at compile time using the [inventory] crate.
//! At runtime, a name matching function is applied to identify which registered plugin is associated with a name.
//! If a match is found, the plugin is created from the configuration.

use thiserror::Error;

/// A plugin.
pub struct Plugin<TPlugin, TConfig: ?Sized> {
    /// the identifier of the plugin.
    identifier: &'static str,
    /// Tests if the name is a match for this plugin.
    match_name_fn: fn(name: &str) -> bool,
    /// Create an implementation of this plugin from a configuration.
    create_fn: fn(config: &TConfig) -> Result<TPlugin, PluginCreateError>,
}

/// A plugin creation error.
#[derive(Error, Debug)]
#[allow(missing_docs)]
pub enum PluginCreateError {
    /// An unsupported plugin.
    #[error("{plugin_type} {name} is not supported")]
    Unsupported { name: String, plugin_type: String },
    /// An invalid configuration.
    #[error("{plugin_type} {identifier} has an invalid configuration: {reason}")]
    ConfigurationInvalid {
        identifier: &'static str,
        plugin_type: &'static str,
        reason: String,
    },
    /// Other
    #[error("{_0}")]
    Other(String),
}

impl From<&str> for PluginCreateError {
    fn from(err_string: &str) -> Self {
        Self::Other(err_string.to_string())
    }
}

impl From<String> for PluginCreateError {
    fn from(err_string: String) -> Self {
        Self::Other(err_string)
    }
}

impl<TPlugin, TConfig: ?Sized> Plugin<TPlugin, TConfig> {
    /// Create a new plugin for registration.
    pub const fn new(
        identifier: &'static str,
        match_name_fn: fn(name: &str) -> bool,
        create_fn: fn(config: &TConfig) -> Result<TPlugin, PluginCreateError>,
    ) -> Self {
        Self {
            identifier,
            match_name_fn,
            create_fn,
        }
    }

    /// Create a `TPlugin` plugin from `config`.
    ///
    /// # Errors
    ///
    /// Returns a [`PluginCreateError`] if plugin creation fails.
    pub fn create(&self, config: &TConfig) -> Result<TPlugin, PluginCreateError> {
        (self.create_fn)(config)
    }

    /// Returns true if this plugin is associated with `name`.
    #[must_use]
    pub fn match_name(&self, name: &str) -> bool {
        (self.match_name_fn)(name)
    }

    /// Returns the identifier of the plugin.
    #[must_use]
    pub const fn identifier(&self) -> &'static str {
        self.identifier
    }
}
