//! Plugin registry: CRUD, lookup, and tool invocation.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;

use crate::errors::ForgeError;
use crate::plugins::{PluginEntry, ToolInput, build_entry};
use crate::sanitize;

/// Registry inner store holding validated plugin entries.
#[derive(Default)]
pub struct PluginCatalog {
    /// Plugin entries mapped by registration name.
    pub plugins: HashMap<String, Arc<PluginEntry>>,
}

impl PluginCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl fmt::Debug for PluginCatalog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginCatalog")
            .field("plugins", &self.plugins.keys())
            .finish()
    }
}

/// Metadata summary for listings.
#[derive(Debug, Clone, Serialize)]
pub struct PluginSummary {
    pub id: String,
    pub name: String,
    pub version: String,
    pub tools: Vec<String>,
}

/// Registry providing lookup, listing, reload, and invocation. It owns the
/// catalog behind a Tokio RwLock; entries are shared-immutable once
/// registered.
#[derive(Clone, Debug)]
pub struct PluginRegistry {
    pub catalog: Arc<tokio::sync::RwLock<PluginCatalog>>,
}

impl PluginRegistry {
    /// Create a registry backed by a fresh catalog.
    pub fn new_local() -> Self {
        Self {
            catalog: Arc::new(tokio::sync::RwLock::new(PluginCatalog::new())),
        }
    }

    /// Register a validated entry. Duplicate names are a contract violation.
    pub async fn register(&self, entry: PluginEntry) -> Result<(), ForgeError> {
        let mut catalog = self.catalog.write().await;
        if catalog.plugins.contains_key(&entry.name) {
            return Err(ForgeError::invalid_plugin(
                &entry.name,
                "name",
                "a plugin with this name is already registered",
            ));
        }
        catalog.plugins.insert(entry.name.clone(), Arc::new(entry));
        Ok(())
    }

    /// Look up a plugin by name.
    pub async fn get(&self, name: &str) -> Result<Arc<PluginEntry>, ForgeError> {
        let catalog = self.catalog.read().await;
        match catalog.plugins.get(name) {
            Some(entry) => Ok(Arc::clone(entry)),
            None => {
                let mut available: Vec<String> = catalog.plugins.keys().cloned().collect();
                available.sort();
                Err(ForgeError::plugin_not_found(name, available))
            }
        }
    }

    /// Registered plugin names, sorted.
    pub async fn names(&self) -> Vec<String> {
        let catalog = self.catalog.read().await;
        let mut names: Vec<String> = catalog.plugins.keys().cloned().collect();
        names.sort();
        names
    }

    /// Metadata summaries for all registered plugins, sorted by id.
    pub async fn list(&self) -> Vec<PluginSummary> {
        let catalog = self.catalog.read().await;
        let mut out: Vec<PluginSummary> = catalog
            .plugins
            .values()
            .map(|entry| PluginSummary {
                id: entry.name.clone(),
                name: entry.name.clone(),
                version: entry.version.clone(),
                tools: entry.tool_names(),
            })
            .collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    pub async fn is_empty(&self) -> bool {
        self.catalog.read().await.plugins.is_empty()
    }

    /// Check that `(plugin, tool)` resolves without invoking anything.
    pub async fn resolves(&self, plugin: &str, tool: &str) -> bool {
        let catalog = self.catalog.read().await;
        catalog
            .plugins
            .get(plugin)
            .is_some_and(|entry| entry.handlers.contains_key(tool))
    }

    /// Invoke a tool and sanitize its output.
    ///
    /// The handler is cloned while holding the lock and invoked outside it,
    /// so slow inference never blocks registry readers. Every tool return
    /// passes through the JSON-safety layer here — this is the enforcement
    /// boundary.
    pub async fn call(
        &self,
        plugin: &str,
        tool: &str,
        input: ToolInput,
    ) -> Result<Value, ForgeError> {
        let (entry, handler) = {
            let catalog = self.catalog.read().await;
            let entry = match catalog.plugins.get(plugin) {
                Some(entry) => Arc::clone(entry),
                None => {
                    let mut available: Vec<String> = catalog.plugins.keys().cloned().collect();
                    available.sort();
                    return Err(ForgeError::plugin_not_found(plugin, available));
                }
            };
            let handler = entry.handlers.get(tool).cloned();
            (entry, handler)
        };

        let handler = handler
            .ok_or_else(|| ForgeError::tool_not_found(plugin, tool, entry.tool_names()))?;

        let started = Instant::now();
        let result = handler(input).await;
        let latency_ms = started.elapsed().as_millis() as f64;
        crate::metrics::record_tool_invocation(plugin, tool, latency_ms, result.is_ok());

        sanitize::sanitize(&result?)
    }

    /// Re-instantiate a plugin from its factory and atomically swap the
    /// registration. On failure the current registration is untouched.
    pub async fn reload(&self, name: &str) -> Result<(), ForgeError> {
        let factory = {
            let catalog = self.catalog.read().await;
            let entry = catalog.plugins.get(name).ok_or_else(|| {
                let mut available: Vec<String> = catalog.plugins.keys().cloned().collect();
                available.sort();
                ForgeError::plugin_not_found(name, available)
            })?;
            entry.factory.ok_or_else(|| {
                ForgeError::invalid_plugin(name, "factory", "plugin has no reloadable factory")
            })?
        };

        // Build and validate the replacement outside the lock.
        let fresh = build_entry(factory(), Some(factory))?;
        if fresh.name != name {
            return Err(ForgeError::invalid_plugin(
                name,
                "name",
                format!("reload produced a plugin named '{}'", fresh.name),
            ));
        }

        let mut catalog = self.catalog.write().await;
        catalog.plugins.insert(name.to_string(), Arc::new(fresh));
        Ok(())
    }

    /// Remove a registration. Returns `true` when the plugin was present.
    pub async fn unregister(&self, name: &str) -> bool {
        self.catalog.write().await.plugins.remove(name).is_some()
    }
}
