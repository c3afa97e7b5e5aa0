//! Plugin contract and loading for ForgeSyte.
//!
//! This module provides the core plugin system for the vision service:
//! - The [`VisionPlugin`] trait every analysis unit implements
//! - Tool descriptors with schemas and a handler binding
//! - Contract enforcement at registration
//! - Plugin discovery and loading with per-plugin failure isolation
//!
//! # Plugin Loading Process
//!
//! 1. The statically linked factory table is enumerated
//! 2. Each factory instantiates its plugin
//! 3. The contract is enforced ([`build_entry`]); violations are recorded,
//!    not fatal to the rest of the load
//! 4. Valid plugins are registered with the registry, which rejects
//!    duplicate names
//!
//! The loader never invents tool names and never substitutes hardcoded
//! handlers for a plugin that fails validation.

pub mod builtin;
pub mod manifest;
pub mod registry;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use futures::future::BoxFuture;
use serde::Serialize;
use serde_json::Value;

use crate::errors::ForgeError;
use crate::plugins::registry::PluginRegistry;
use crate::sanitize;

/// Async tool handler. Handlers receive an owned input to avoid
/// borrow/lifetime issues crossing await points.
pub type ToolExecFn =
    Arc<dyn Fn(ToolInput) -> BoxFuture<'static, Result<Value, ForgeError>> + Send + Sync + 'static>;

/// Constructor for a plugin instance. The statically linked table of these
/// plays the role the original ecosystem's entrypoint group played: the set
/// of plugins discoverable at process start.
pub type PluginFactory = fn() -> Arc<dyn VisionPlugin>;

/// Input handed to a tool handler.
///
/// `data` is the JSON part of the payload; `image` carries raw JPEG bytes
/// when the payload originated from a frame. Raw bytes never appear inside
/// `data` — base64 is reserved for transport boundaries.
#[derive(Debug, Clone)]
pub struct ToolInput {
    pub data: Value,
    pub image: Option<Arc<Vec<u8>>>,
}

impl ToolInput {
    pub fn from_json(data: Value) -> Self {
        Self { data, image: None }
    }

    pub fn with_image(data: Value, image: Vec<u8>) -> Self {
        Self {
            data,
            image: Some(Arc::new(image)),
        }
    }

    /// The frame bytes, or `INVALID_INPUT` when the tool requires an image
    /// and the payload has none.
    pub fn require_image(&self) -> Result<&[u8], ForgeError> {
        self.image
            .as_deref()
            .map(|v| v.as_slice())
            .ok_or_else(|| ForgeError::invalid_input("payload carries no image data"))
    }
}

/// How a tool descriptor resolves to executable code.
///
/// The original system resolved handlers by attribute name at runtime; here
/// the two shapes are explicit and both are checked at registration.
#[derive(Clone)]
pub enum ToolBinding {
    /// A direct async handler.
    Handler(ToolExecFn),
    /// A dispatch key resolved against [`VisionPlugin::dispatch`].
    Dispatch(String),
}

impl std::fmt::Debug for ToolBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolBinding::Handler(_) => f.write_str("Handler(<fn>)"),
            ToolBinding::Dispatch(key) => write!(f, "Dispatch({:?})", key),
        }
    }
}

/// A tool as declared by its plugin: name, description, schemas, binding.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
    pub binding: ToolBinding,
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        output_schema: Value,
        binding: ToolBinding,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            output_schema,
            binding,
        }
    }
}

/// Tool metadata without the binding, as exposed through manifests and
/// listings.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub output_schema: Value,
}

/// An analysis unit exposing one or more schema'd tools.
#[async_trait::async_trait]
pub trait VisionPlugin: Send + Sync {
    /// Stable identifier, unique per registry.
    fn name(&self) -> &str;

    fn version(&self) -> &str {
        "0.0.0"
    }

    fn description(&self) -> &str {
        ""
    }

    fn capabilities(&self) -> Vec<String> {
        Vec::new()
    }

    /// Declared tools in declaration order. Order matters: the realtime
    /// analyzer's legacy fallback picks the first declared tool.
    fn tools(&self) -> Vec<ToolDescriptor>;

    /// Target for [`ToolBinding::Dispatch`] bindings.
    async fn dispatch(&self, tool: &str, _input: ToolInput) -> Result<Value, ForgeError> {
        Err(ForgeError::tool_not_found(self.name(), tool, Vec::new()))
    }

    /// Optional lifecycle hook, run at registration. A failure here rejects
    /// the plugin.
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// A validated, registered plugin: the instance, its public metadata, and
/// the resolved handler per tool. Shared-immutable after registration.
pub struct PluginEntry {
    pub plugin: Arc<dyn VisionPlugin>,
    pub name: String,
    pub version: String,
    pub description: String,
    pub capabilities: Vec<String>,
    pub tools: BTreeMap<String, ToolDef>,
    /// Declaration order of tool names (the `tools` map is sorted).
    pub tool_order: Vec<String>,
    pub handlers: HashMap<String, ToolExecFn>,
    /// Factory the entry was built from; used by `reload`.
    pub factory: Option<PluginFactory>,
}

impl std::fmt::Debug for PluginEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginEntry")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("tools", &self.tool_order)
            .finish()
    }
}

impl PluginEntry {
    /// First declared tool, if any. The realtime analyzer's documented
    /// legacy fallback for frames that omit a tool name.
    pub fn first_tool(&self) -> Option<&str> {
        self.tool_order.first().map(String::as_str)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.tool_order.clone()
    }
}

/// Result of a [`load_plugins`] pass: what registered and what was rejected.
/// One bad plugin never aborts the rest of the load.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub loaded: Vec<String>,
    pub errors: BTreeMap<String, ForgeError>,
}

/// Enforce the plugin contract and resolve handler bindings.
///
/// Violations yield `INVALID_PLUGIN` with `{name, field, reason}` naming the
/// offending field.
pub fn build_entry(
    plugin: Arc<dyn VisionPlugin>,
    factory: Option<PluginFactory>,
) -> Result<PluginEntry, ForgeError> {
    let name = plugin.name().to_string();
    if name.trim().is_empty() {
        return Err(ForgeError::invalid_plugin(
            "<unnamed>",
            "name",
            "plugin name must be a non-empty string",
        ));
    }

    let descriptors = plugin.tools();
    let mut tools = BTreeMap::new();
    let mut tool_order = Vec::with_capacity(descriptors.len());
    let mut handlers: HashMap<String, ToolExecFn> = HashMap::with_capacity(descriptors.len());

    for desc in descriptors {
        if desc.name.trim().is_empty() {
            return Err(ForgeError::invalid_plugin(
                &name,
                "tools",
                "tool name must be a non-empty string",
            ));
        }
        if tools.contains_key(&desc.name) {
            return Err(ForgeError::invalid_plugin(
                &name,
                "tools",
                format!("duplicate tool name '{}'", desc.name),
            ));
        }
        for (field, schema) in [
            ("input_schema", &desc.input_schema),
            ("output_schema", &desc.output_schema),
        ] {
            if !schema.is_object() {
                return Err(ForgeError::invalid_plugin(
                    &name,
                    field,
                    format!("tool '{}': schema must be a JSON object", desc.name),
                ));
            }
            sanitize::sanitize(schema).map_err(|e| {
                ForgeError::invalid_plugin(
                    &name,
                    field,
                    format!("tool '{}': schema is not JSON-serializable: {}", desc.name, e),
                )
            })?;
        }

        let handler: ToolExecFn = match &desc.binding {
            ToolBinding::Handler(exec) => Arc::clone(exec),
            ToolBinding::Dispatch(key) => {
                if key.trim().is_empty() {
                    return Err(ForgeError::invalid_plugin(
                        &name,
                        "handler",
                        format!("tool '{}': empty dispatch key", desc.name),
                    ));
                }
                let plugin = Arc::clone(&plugin);
                let key = key.clone();
                Arc::new(move |input: ToolInput| {
                    let plugin = Arc::clone(&plugin);
                    let key = key.clone();
                    Box::pin(async move { plugin.dispatch(&key, input).await })
                })
            }
        };

        handlers.insert(desc.name.clone(), handler);
        tool_order.push(desc.name.clone());
        tools.insert(
            desc.name.clone(),
            ToolDef {
                name: desc.name,
                description: desc.description,
                input_schema: desc.input_schema,
                output_schema: desc.output_schema,
            },
        );
    }

    if let Err(reason) = plugin.validate() {
        return Err(ForgeError::invalid_plugin(&name, "validate", reason));
    }

    Ok(PluginEntry {
        version: plugin.version().to_string(),
        description: plugin.description().to_string(),
        capabilities: plugin.capabilities(),
        plugin,
        name,
        tools,
        tool_order,
        handlers,
        factory,
    })
}

/// Instantiate, validate, and register every discoverable plugin.
///
/// Valid plugins are registered; invalid ones are logged and recorded under
/// `errors`. Callers decide whether an empty result is fatal (production
/// startup treats it as such).
pub async fn load_plugins(registry: &PluginRegistry, factories: &[PluginFactory]) -> LoadReport {
    let mut report = LoadReport::default();

    for factory in factories {
        let plugin = factory();
        let name = plugin.name().to_string();
        match build_entry(plugin, Some(*factory)) {
            Ok(entry) => {
                let registered = entry.name.clone();
                match registry.register(entry).await {
                    Ok(()) => {
                        tracing::debug!("Registered plugin '{}'", registered);
                        report.loaded.push(registered);
                    }
                    Err(e) => {
                        tracing::warn!("Failed to register plugin '{}': {}", registered, e);
                        report.errors.insert(registered, e);
                    }
                }
            }
            Err(e) => {
                tracing::warn!("Plugin '{}' rejected: {}", name, e);
                report.errors.insert(name, e);
            }
        }
    }

    tracing::info!(
        "Plugin load complete: {} loaded, {} rejected",
        report.loaded.len(),
        report.errors.len()
    );
    report
}

/// The factory table enumerated at startup.
pub fn default_factories() -> Vec<PluginFactory> {
    builtin::factories()
}
