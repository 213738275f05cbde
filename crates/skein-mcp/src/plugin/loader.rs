//! Plugin resolution
//!
//! Implementations are compiled in and looked up by key; nothing is loaded
//! dynamically.

use std::collections::HashMap;
use std::sync::Arc;

use super::{Plugin, PluginConfig, PluginError};

/// Builds a plugin instance from its config
pub type PluginFactory = Arc<dyn Fn(&PluginConfig) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync>;

/// Resolves a plugin config to an implementation
pub trait PluginLoader: Send + Sync {
    fn resolve(&self, config: &PluginConfig) -> Result<Arc<dyn Plugin>, PluginError>;

    /// Keys this loader can resolve
    fn available(&self) -> Vec<String>;
}

/// Loader backed by a fixed table of factories
#[derive(Clone, Default)]
pub struct StaticPluginLoader {
    factories: HashMap<String, PluginFactory>,
}

impl StaticPluginLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under `key`, replacing any previous one
    pub fn register<F>(&mut self, key: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&PluginConfig) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.factories.insert(key.into(), Arc::new(factory));
        self
    }

    pub fn with<F>(mut self, key: impl Into<String>, factory: F) -> Self
    where
        F: Fn(&PluginConfig) -> anyhow::Result<Arc<dyn Plugin>> + Send + Sync + 'static,
    {
        self.register(key, factory);
        self
    }
}

impl PluginLoader for StaticPluginLoader {
    fn resolve(&self, config: &PluginConfig) -> Result<Arc<dyn Plugin>, PluginError> {
        let key = config.loader_key();
        let factory = self
            .factories
            .get(key)
            .ok_or_else(|| PluginError::UnknownImplementation {
                name: config.name.clone(),
                key: key.to_string(),
            })?;
        factory(config).map_err(|e| PluginError::InitializationFailed {
            name: config.name.clone(),
            reason: e.to_string(),
        })
    }

    fn available(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.factories.keys().cloned().collect();
        keys.sort();
        keys
    }
}
