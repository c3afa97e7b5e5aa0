//! Public plugin manifests and their TTL cache.
//!
//! A manifest is the public view of a plugin: id, version, description,
//! capabilities, and the full tool table with schemas. Building one means
//! walking the plugin entry, so manifests are cached per plugin id with a
//! monotonic TTL (default 60 s) to avoid repeated introspection.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;

use crate::errors::ForgeError;
use crate::plugins::PluginEntry;
use crate::plugins::registry::PluginRegistry;

/// Tool descriptor as exposed publicly.
#[derive(Debug, Clone, Serialize)]
pub struct ToolManifest {
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// The public descriptor of a plugin and its tools.
///
/// `id` always equals the plugin registration name, and the `tools` key-set
/// equals the plugin's declared tool set.
#[derive(Debug, Clone, Serialize)]
pub struct PluginManifest {
    pub id: String,
    pub name: String,
    pub version: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub tools: BTreeMap<String, ToolManifest>,
}

impl PluginManifest {
    pub fn from_entry(entry: &PluginEntry) -> Self {
        let tools = entry
            .tools
            .iter()
            .map(|(name, def)| {
                (
                    name.clone(),
                    ToolManifest {
                        description: def.description.clone(),
                        input_schema: def.input_schema.clone(),
                        output_schema: def.output_schema.clone(),
                    },
                )
            })
            .collect();
        Self {
            id: entry.name.clone(),
            name: entry.name.clone(),
            version: entry.version.clone(),
            description: entry.description.clone(),
            capabilities: entry.capabilities.clone(),
            tools,
        }
    }
}

/// TTL cache of manifests keyed by plugin id.
///
/// Entries are `(manifest, stored_at)` tuples swapped as a unit under a
/// short lock; readers never observe a torn entry. There is no eviction
/// beyond TTL expiry.
pub struct ManifestCache {
    ttl_secs: AtomicU64,
    entries: RwLock<HashMap<String, (Arc<PluginManifest>, Instant)>>,
}

impl Default for ManifestCache {
    fn default() -> Self {
        Self::new(Duration::from_secs(60))
    }
}

impl ManifestCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl_secs: AtomicU64::new(ttl.as_secs()),
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs.load(Ordering::Relaxed))
    }

    pub fn set_ttl(&self, ttl: Duration) {
        self.ttl_secs.store(ttl.as_secs(), Ordering::Relaxed);
    }

    /// Cached manifest for `id`, or `None` when absent or expired.
    pub fn get(&self, id: &str) -> Option<Arc<PluginManifest>> {
        let guard = self.entries.read().unwrap_or_else(|e| e.into_inner());
        let (manifest, stored_at) = guard.get(id)?;
        if stored_at.elapsed() >= self.ttl() {
            return None;
        }
        Some(Arc::clone(manifest))
    }

    pub fn set(&self, id: &str, manifest: Arc<PluginManifest>) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.insert(id.to_string(), (manifest, Instant::now()));
    }

    pub fn invalidate(&self, id: &str) {
        let mut guard = self.entries.write().unwrap_or_else(|e| e.into_inner());
        guard.remove(id);
    }
}

/// Cached manifest lookup with write-through rebuild on miss.
pub async fn manifest_for(
    registry: &PluginRegistry,
    cache: &ManifestCache,
    id: &str,
) -> Result<Arc<PluginManifest>, ForgeError> {
    if let Some(manifest) = cache.get(id) {
        return Ok(manifest);
    }
    let entry = registry.get(id).await?;
    let manifest = Arc::new(PluginManifest::from_entry(&entry));
    cache.set(id, Arc::clone(&manifest));
    Ok(manifest)
}
