//! Aggregated capability registry
//!
//! Built-in tools and resources plus whatever the plugin manager currently
//! reports as active. This is what the router dispatches against.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::plugin::{PluginLoader, PluginManager, StaticPluginLoader};
use crate::protocol::{matches_pattern, McpHandler, ResourceHandler, ToolHandler};
use crate::types::{ResourceInfo, ToolInfo};

/// Registry errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RegistryError {
    #[error("Tool already registered: {0}")]
    ToolAlreadyRegistered(String),

    #[error("Resource already registered: {0}")]
    ResourceAlreadyRegistered(String),

    #[error("Handler already registered for pattern: {0}")]
    HandlerAlreadyRegistered(String),
}

/// Built-ins plus active plugin capabilities
pub struct CapabilityRegistry {
    tools: RwLock<BTreeMap<String, Arc<dyn ToolHandler>>>,
    resources: RwLock<BTreeMap<String, Arc<dyn ResourceHandler>>>,
    handlers: DashMap<String, Arc<dyn McpHandler>>,
    plugins: Arc<PluginManager>,
}

impl CapabilityRegistry {
    pub fn new(plugins: Arc<PluginManager>) -> Self {
        Self {
            tools: RwLock::new(BTreeMap::new()),
            resources: RwLock::new(BTreeMap::new()),
            handlers: DashMap::new(),
            plugins,
        }
    }

    /// Registry with a plugin manager over `loader`
    pub fn with_loader(loader: Arc<dyn PluginLoader>) -> Self {
        Self::new(Arc::new(PluginManager::new(loader)))
    }

    pub fn plugins(&self) -> &Arc<PluginManager> {
        &self.plugins
    }

    /// Register a built-in tool
    pub fn register_tool(&self, handler: Arc<dyn ToolHandler>) -> Result<(), RegistryError> {
        let name = handler.tool_info().name;
        let mut tools = self.tools.write();
        if tools.contains_key(&name) || self.plugins.find_tool(&name).is_some() {
            return Err(RegistryError::ToolAlreadyRegistered(name));
        }
        self.plugins.reserve_tool(name.clone());
        tools.insert(name, handler);
        Ok(())
    }

    /// Register a built-in resource
    pub fn register_resource(&self, handler: Arc<dyn ResourceHandler>) -> Result<(), RegistryError> {
        let uri = handler.resource_info().uri;
        let mut resources = self.resources.write();
        let plugin_owned = self
            .plugins
            .all_resources()
            .iter()
            .any(|r| r.resource_info().uri == uri);
        if resources.contains_key(&uri) || plugin_owned {
            return Err(RegistryError::ResourceAlreadyRegistered(uri));
        }
        self.plugins.reserve_resource(uri.clone());
        resources.insert(uri, handler);
        Ok(())
    }

    /// Register a handler for an extra method or `prefix/*` pattern
    pub fn register_handler(&self, handler: Arc<dyn McpHandler>) -> Result<(), RegistryError> {
        let pattern = handler.method_pattern().to_string();
        if self.handlers.contains_key(&pattern) {
            return Err(RegistryError::HandlerAlreadyRegistered(pattern));
        }
        self.handlers.insert(pattern, handler);
        Ok(())
    }

    /// Built-ins first, then active plugins
    pub fn list_tools(&self) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self.tools.read().values().map(|t| t.tool_info()).collect();
        infos.extend(self.plugins.all_tools().iter().map(|t| t.tool_info()));
        infos
    }

    pub fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut infos: Vec<ResourceInfo> = self
            .resources
            .read()
            .values()
            .map(|r| r.resource_info())
            .collect();
        infos.extend(self.plugins.all_resources().iter().map(|r| r.resource_info()));
        infos
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        if let Some(tool) = self.tools.read().get(name) {
            return Some(Arc::clone(tool));
        }
        self.plugins.find_tool(name)
    }

    /// Exact URI first, then `prefix/*` patterns; built-ins win ties
    pub fn get_resource(&self, uri: &str) -> Option<Arc<dyn ResourceHandler>> {
        {
            let resources = self.resources.read();
            if let Some(resource) = resources.get(uri) {
                return Some(Arc::clone(resource));
            }
            if let Some(resource) = resources
                .iter()
                .find(|(pattern, _)| matches_pattern(pattern, uri))
                .map(|(_, r)| Arc::clone(r))
            {
                return Some(resource);
            }
        }
        self.plugins.find_resource(uri)
    }

    /// Exact method first, then patterns
    pub fn get_handler(&self, method: &str) -> Option<Arc<dyn McpHandler>> {
        if let Some(entry) = self.handlers.get(method) {
            return Some(Arc::clone(entry.value()));
        }
        self.handlers
            .iter()
            .find(|entry| matches_pattern(entry.key(), method))
            .map(|entry| Arc::clone(entry.value()))
    }

    pub fn tool_count(&self) -> usize {
        self.tools.read().len() + self.plugins.all_tools().len()
    }

    pub fn resource_count(&self) -> usize {
        self.resources.read().len() + self.plugins.all_resources().len()
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::with_loader(Arc::new(StaticPluginLoader::new()))
    }
}
