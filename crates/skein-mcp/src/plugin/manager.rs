//! Plugin lifecycle manager
//!
//! Lifecycle operations are serialized by an async mutex so hooks can be
//! awaited without holding the entry table lock; reads never wait on a hook.

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::{
    Plugin, PluginConfig, PluginError, PluginInfo, PluginLoader, PluginState, DEFAULT_INIT_TIMEOUT_MS,
};
use crate::protocol::{matches_pattern, ResourceHandler, ToolHandler};

struct PluginEntry {
    config: PluginConfig,
    state: PluginState,
    instance: Option<Arc<dyn Plugin>>,
    version: String,
    tools: Vec<Arc<dyn ToolHandler>>,
    resources: Vec<Arc<dyn ResourceHandler>>,
    error: Option<String>,
    loaded_at: Option<DateTime<Utc>>,
}

impl PluginEntry {
    fn new(config: PluginConfig) -> Self {
        let version = config.version.clone().unwrap_or_else(|| "unknown".to_string());
        Self {
            config,
            state: PluginState::Unloaded,
            instance: None,
            version,
            tools: Vec::new(),
            resources: Vec::new(),
            error: None,
            loaded_at: None,
        }
    }

    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: self.config.name.clone(),
            version: self.version.clone(),
            state: self.state,
            enabled: self.config.enabled,
            error: self.error.clone(),
            loaded_at: self.loaded_at,
            tools: self.tools.iter().map(|t| t.tool_info().name).collect(),
            resources: self.resources.iter().map(|r| r.resource_info().uri).collect(),
        }
    }
}

/// Owns every plugin and aggregates what the active ones provide
pub struct PluginManager {
    loader: Arc<dyn PluginLoader>,
    entries: RwLock<HashMap<String, PluginEntry>>,
    lifecycle: tokio::sync::Mutex<()>,
    reserved_tools: RwLock<HashSet<String>>,
    reserved_resources: RwLock<HashSet<String>>,
}

impl PluginManager {
    pub fn new(loader: Arc<dyn PluginLoader>) -> Self {
        Self {
            loader,
            entries: RwLock::new(HashMap::new()),
            lifecycle: tokio::sync::Mutex::new(()),
            reserved_tools: RwLock::new(HashSet::new()),
            reserved_resources: RwLock::new(HashSet::new()),
        }
    }

    /// Claim a tool name for a non-plugin provider
    pub fn reserve_tool(&self, name: impl Into<String>) {
        self.reserved_tools.write().insert(name.into());
    }

    /// Claim a resource URI for a non-plugin provider
    pub fn reserve_resource(&self, uri: impl Into<String>) {
        self.reserved_resources.write().insert(uri.into());
    }

    /// Load a plugin. Disabled configs are recorded but not started.
    pub async fn load(&self, config: PluginConfig) -> Result<PluginInfo, PluginError> {
        let _guard = self.lifecycle.lock().await;
        self.load_locked(config).await
    }

    /// Load every config in order; one failure does not stop the rest
    pub async fn initialize(&self, configs: Vec<PluginConfig>) -> Vec<Result<PluginInfo, PluginError>> {
        let mut results = Vec::with_capacity(configs.len());
        for config in configs {
            let name = config.name.clone();
            let result = self.load(config).await;
            if let Err(e) = &result {
                error!(plugin = %name, error = %e, "plugin failed to load");
            }
            results.push(result);
        }
        let active = results.iter().filter(|r| matches!(r, Ok(info) if info.state == PluginState::Active)).count();
        info!(total = results.len(), active, "plugins initialized");
        results
    }

    /// Stop a plugin and forget it
    pub async fn unload(&self, name: &str) -> Result<(), PluginError> {
        let _guard = self.lifecycle.lock().await;
        let entry = self
            .entries
            .write()
            .remove(name)
            .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
        Self::run_cleanup(name, entry.state, entry.instance).await;
        info!(plugin = %name, state = "removed", "plugin unloaded");
        Ok(())
    }

    /// Unload and load again with the stored config
    pub async fn reload(&self, name: &str) -> Result<PluginInfo, PluginError> {
        let _guard = self.lifecycle.lock().await;
        let config = self.deactivate(name).await?;
        info!(plugin = %name, "reloading plugin");
        self.load_locked(config).await
    }

    /// Disabling stops the plugin but keeps its config; enabling loads it
    pub async fn set_enabled(&self, name: &str, enabled: bool) -> Result<PluginInfo, PluginError> {
        let _guard = self.lifecycle.lock().await;
        if enabled {
            let config = {
                let entries = self.entries.read();
                let entry = entries
                    .get(name)
                    .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
                if entry.state == PluginState::Active {
                    return Ok(entry.info());
                }
                entry.config.clone()
            };
            let mut config = config;
            config.enabled = true;
            self.load_locked(config).await
        } else {
            let mut config = self.deactivate(name).await?;
            config.enabled = false;
            let mut entries = self.entries.write();
            let entry = entries
                .entry(name.to_string())
                .or_insert_with(|| PluginEntry::new(config.clone()));
            entry.config = config;
            info!(plugin = %name, state = %PluginState::Unloaded, "plugin disabled");
            Ok(entry.info())
        }
    }

    /// Unload everything
    pub async fn shutdown(&self) {
        let _guard = self.lifecycle.lock().await;
        let drained: Vec<(String, PluginEntry)> = self.entries.write().drain().collect();
        for (name, entry) in drained {
            Self::run_cleanup(&name, entry.state, entry.instance).await;
        }
        info!("plugin manager shut down");
    }

    /// Tools of every active plugin
    pub fn all_tools(&self) -> Vec<Arc<dyn ToolHandler>> {
        let entries = self.entries.read();
        let mut active: Vec<&PluginEntry> = entries
            .values()
            .filter(|e| e.state == PluginState::Active)
            .collect();
        active.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        active.iter().flat_map(|e| e.tools.iter().cloned()).collect()
    }

    /// Resources of every active plugin
    pub fn all_resources(&self) -> Vec<Arc<dyn ResourceHandler>> {
        let entries = self.entries.read();
        let mut active: Vec<&PluginEntry> = entries
            .values()
            .filter(|e| e.state == PluginState::Active)
            .collect();
        active.sort_by(|a, b| a.config.name.cmp(&b.config.name));
        active.iter().flat_map(|e| e.resources.iter().cloned()).collect()
    }

    pub fn find_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.entries
            .read()
            .values()
            .filter(|e| e.state == PluginState::Active)
            .flat_map(|e| e.tools.iter())
            .find(|t| t.tool_info().name == name)
            .cloned()
    }

    /// Exact URI match first, then `prefix/*` patterns
    pub fn find_resource(&self, uri: &str) -> Option<Arc<dyn ResourceHandler>> {
        let resources = self.all_resources();
        resources
            .iter()
            .find(|r| r.resource_info().uri == uri)
            .or_else(|| resources.iter().find(|r| matches_pattern(&r.resource_info().uri, uri)))
            .cloned()
    }

    pub fn get(&self, name: &str) -> Option<PluginInfo> {
        self.entries.read().get(name).map(PluginEntry::info)
    }

    pub fn list(&self) -> Vec<PluginInfo> {
        let mut infos: Vec<PluginInfo> = self.entries.read().values().map(PluginEntry::info).collect();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    pub fn active_count(&self) -> usize {
        self.entries
            .read()
            .values()
            .filter(|e| e.state == PluginState::Active)
            .count()
    }

    /// Stop an entry, leaving it UNLOADED, and hand back its config
    async fn deactivate(&self, name: &str) -> Result<PluginConfig, PluginError> {
        let (config, state, instance) = {
            let mut entries = self.entries.write();
            let entry = entries
                .get_mut(name)
                .ok_or_else(|| PluginError::NotFound(name.to_string()))?;
            let state = entry.state;
            entry.state = PluginState::Unloaded;
            entry.tools.clear();
            entry.resources.clear();
            entry.error = None;
            (entry.config.clone(), state, entry.instance.take())
        };
        Self::run_cleanup(name, state, instance).await;
        Ok(config)
    }

    async fn load_locked(&self, config: PluginConfig) -> Result<PluginInfo, PluginError> {
        let name = config.name.clone();
        {
            let mut entries = self.entries.write();
            if let Some(existing) = entries.get(&name) {
                if existing.state == PluginState::Active {
                    return Err(PluginError::AlreadyActive(name));
                }
            }
            let mut entry = PluginEntry::new(config.clone());
            if !config.enabled {
                debug!(plugin = %name, "plugin registered disabled");
                let info = entry.info();
                entries.insert(name, entry);
                return Ok(info);
            }
            entry.state = PluginState::Loading;
            entries.insert(name.clone(), entry);
        }
        debug!(plugin = %name, state = %PluginState::Loading, "loading plugin");

        let instance = match self.loader.resolve(&config) {
            Ok(instance) => instance,
            Err(e) => return Err(self.fail(&name, e)),
        };

        let timeout_ms = config.init_timeout_ms.unwrap_or(DEFAULT_INIT_TIMEOUT_MS);
        let init = AssertUnwindSafe(instance.initialize(&config.config)).catch_unwind();
        match tokio::time::timeout(Duration::from_millis(timeout_ms), init).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => {
                return Err(self.fail(
                    &name,
                    PluginError::InitializationFailed {
                        name: name.clone(),
                        reason: e.to_string(),
                    },
                ));
            }
            Ok(Err(_panic)) => {
                return Err(self.fail(
                    &name,
                    PluginError::InitializationFailed {
                        name: name.clone(),
                        reason: "initialize panicked".to_string(),
                    },
                ));
            }
            Err(_) => {
                return Err(self.fail(
                    &name,
                    PluginError::InitializationTimeout {
                        name: name.clone(),
                        timeout_ms,
                    },
                ));
            }
        }

        let tools = instance.tools();
        let resources = instance.resources();
        if let Err(conflict) = self.check_conflicts(&name, &tools, &resources) {
            if let Err(e) = instance.cleanup().await {
                warn!(plugin = %name, error = %e, "cleanup after conflict failed");
            }
            return Err(self.fail(&name, conflict));
        }

        let mut entries = self.entries.write();
        let entry = entries
            .entry(name.clone())
            .or_insert_with(|| PluginEntry::new(config.clone()));
        entry.version = config.version.clone().unwrap_or_else(|| instance.version());
        entry.state = PluginState::Active;
        entry.instance = Some(instance);
        entry.tools = tools;
        entry.resources = resources;
        entry.error = None;
        entry.loaded_at = Some(Utc::now());
        info!(
            plugin = %name,
            state = %PluginState::Active,
            tools = entry.tools.len(),
            resources = entry.resources.len(),
            "plugin loaded"
        );
        Ok(entry.info())
    }

    /// Record a load failure on the entry and pass the error through
    fn fail(&self, name: &str, err: PluginError) -> PluginError {
        if let Some(entry) = self.entries.write().get_mut(name) {
            entry.state = PluginState::Error;
            entry.error = Some(err.to_string());
            entry.instance = None;
            entry.tools.clear();
            entry.resources.clear();
        }
        warn!(plugin = %name, state = %PluginState::Error, error = %err, "plugin load failed");
        err
    }

    fn check_conflicts(
        &self,
        name: &str,
        tools: &[Arc<dyn ToolHandler>],
        resources: &[Arc<dyn ResourceHandler>],
    ) -> Result<(), PluginError> {
        let conflict = |kind: &'static str, key: String, owner: String| PluginError::Conflict {
            name: name.to_string(),
            kind,
            key,
            owner,
        };

        let reserved_tools = self.reserved_tools.read();
        let reserved_resources = self.reserved_resources.read();
        let entries = self.entries.read();
        let others: Vec<&PluginEntry> = entries
            .values()
            .filter(|e| e.state == PluginState::Active && e.config.name != name)
            .collect();

        let mut seen = HashSet::new();
        for tool in tools {
            let tool_name = tool.tool_info().name;
            if !seen.insert(tool_name.clone()) {
                return Err(conflict("tool", tool_name, format!("plugin '{}' itself", name)));
            }
            if reserved_tools.contains(&tool_name) {
                return Err(conflict("tool", tool_name, "the built-in set".to_string()));
            }
            if let Some(owner) = others
                .iter()
                .find(|e| e.tools.iter().any(|t| t.tool_info().name == tool_name))
            {
                return Err(conflict("tool", tool_name, format!("plugin '{}'", owner.config.name)));
            }
        }

        let mut seen = HashSet::new();
        for resource in resources {
            let uri = resource.resource_info().uri;
            if !seen.insert(uri.clone()) {
                return Err(conflict("resource", uri, format!("plugin '{}' itself", name)));
            }
            if reserved_resources.contains(&uri) {
                return Err(conflict("resource", uri, "the built-in set".to_string()));
            }
            if let Some(owner) = others
                .iter()
                .find(|e| e.resources.iter().any(|r| r.resource_info().uri == uri))
            {
                return Err(conflict("resource", uri, format!("plugin '{}'", owner.config.name)));
            }
        }
        Ok(())
    }

    async fn run_cleanup(name: &str, state: PluginState, instance: Option<Arc<dyn Plugin>>) {
        if state != PluginState::Active {
            return;
        }
        let Some(instance) = instance else {
            return;
        };
        match AssertUnwindSafe(instance.cleanup()).catch_unwind().await {
            Ok(Ok(())) => debug!(plugin = %name, "plugin cleanup complete"),
            Ok(Err(e)) => warn!(plugin = %name, error = %e, "plugin cleanup failed"),
            Err(_) => warn!(plugin = %name, "plugin cleanup panicked"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::StaticPluginLoader;
    use crate::types::{ToolCallResponse, ToolInfo};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NamedTool(&'static str);

    #[async_trait]
    impl ToolHandler for NamedTool {
        fn tool_info(&self) -> ToolInfo {
            ToolInfo {
                name: self.0.to_string(),
                description: format!("{} tool", self.0),
                input_schema: json!({"type": "object"}),
            }
        }

        async fn execute(&self, _arguments: Value) -> anyhow::Result<ToolCallResponse> {
            Ok(ToolCallResponse::text(self.0))
        }
    }

    struct TestPlugin {
        tool: &'static str,
        fail_init: bool,
        cleanups: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Plugin for TestPlugin {
        fn tools(&self) -> Vec<Arc<dyn ToolHandler>> {
            vec![Arc::new(NamedTool(self.tool))]
        }

        async fn initialize(&self, _config: &Value) -> anyhow::Result<()> {
            if self.fail_init {
                anyhow::bail!("initialization exploded");
            }
            Ok(())
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            self.cleanups.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn manager(cleanups: Arc<AtomicUsize>) -> PluginManager {
        let mut loader = StaticPluginLoader::new();
        for (key, tool, fail_init) in [("alpha", "alpha_tool", false), ("beta", "beta_tool", false), ("broken", "broken_tool", true), ("clash", "alpha_tool", false)] {
            let cleanups = Arc::clone(&cleanups);
            loader.register(key, move |_| {
                Ok(Arc::new(TestPlugin {
                    tool,
                    fail_init,
                    cleanups: Arc::clone(&cleanups),
                }) as Arc<dyn Plugin>)
            });
        }
        PluginManager::new(Arc::new(loader))
    }

    fn tool_names(manager: &PluginManager) -> Vec<String> {
        manager.all_tools().iter().map(|t| t.tool_info().name).collect()
    }

    #[tokio::test]
    async fn test_load_and_unload() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let manager = manager(Arc::clone(&cleanups));

        let info = manager.load(PluginConfig::new("alpha")).await.unwrap();
        assert_eq!(info.state, PluginState::Active);
        assert!(info.loaded_at.is_some());
        assert_eq!(tool_names(&manager), vec!["alpha_tool"]);

        manager.unload("alpha").await.unwrap();
        assert!(manager.get("alpha").is_none());
        assert!(manager.all_tools().is_empty());
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_init_keeps_entry_in_error() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        let err = manager.load(PluginConfig::new("broken")).await.unwrap_err();
        assert!(matches!(err, PluginError::InitializationFailed { .. }));

        let info = manager.get("broken").unwrap();
        assert_eq!(info.state, PluginState::Error);
        assert!(info.error.unwrap().contains("initialization exploded"));
        assert!(manager.all_tools().is_empty());
    }

    #[tokio::test]
    async fn test_disable_keeps_config_and_enable_restores() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        manager
            .load(PluginConfig::new("alpha").with_config(json!({"k": 1})))
            .await
            .unwrap();

        let info = manager.set_enabled("alpha", false).await.unwrap();
        assert_eq!(info.state, PluginState::Unloaded);
        assert!(!info.enabled);
        assert!(manager.all_tools().is_empty());

        let info = manager.set_enabled("alpha", true).await.unwrap();
        assert_eq!(info.state, PluginState::Active);
        assert_eq!(tool_names(&manager), vec!["alpha_tool"]);
    }

    #[tokio::test]
    async fn test_reload_updates_timestamp() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let manager = manager(Arc::clone(&cleanups));
        let first = manager.load(PluginConfig::new("beta")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let second = manager.reload("beta").await.unwrap();
        assert_eq!(second.state, PluginState::Active);
        assert!(second.loaded_at > first.loaded_at);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_conflicting_tool_rejected() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let manager = manager(Arc::clone(&cleanups));
        manager.load(PluginConfig::new("alpha")).await.unwrap();

        let err = manager.load(PluginConfig::new("clash")).await.unwrap_err();
        assert!(matches!(err, PluginError::Conflict { kind: "tool", .. }));
        assert_eq!(manager.get("clash").unwrap().state, PluginState::Error);
        assert_eq!(cleanups.load(Ordering::SeqCst), 1);
        assert_eq!(tool_names(&manager), vec!["alpha_tool"]);
    }

    #[tokio::test]
    async fn test_reserved_name_rejected() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        manager.reserve_tool("beta_tool");
        let err = manager.load(PluginConfig::new("beta")).await.unwrap_err();
        assert!(matches!(err, PluginError::Conflict { ref owner, .. } if owner == "the built-in set"));
    }

    #[tokio::test]
    async fn test_disabled_config_is_registered_unloaded() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        let info = manager.load(PluginConfig::new("alpha").disabled()).await.unwrap();
        assert_eq!(info.state, PluginState::Unloaded);
        assert!(manager.all_tools().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_plugin_is_error_state() {
        let manager = manager(Arc::new(AtomicUsize::new(0)));
        let err = manager.load(PluginConfig::new("ghost")).await.unwrap_err();
        assert!(matches!(err, PluginError::UnknownImplementation { .. }));
        assert_eq!(manager.get("ghost").unwrap().state, PluginState::Error);
    }

    #[tokio::test]
    async fn test_shutdown_cleans_up_active_plugins() {
        let cleanups = Arc::new(AtomicUsize::new(0));
        let manager = manager(Arc::clone(&cleanups));
        manager
            .initialize(vec![PluginConfig::new("alpha"), PluginConfig::new("beta"), PluginConfig::new("broken")])
            .await;

        manager.shutdown().await;
        assert!(manager.list().is_empty());
        assert_eq!(cleanups.load(Ordering::SeqCst), 2);
    }
}
