mod common;

use std::sync::Arc;

use serde_json::{Value, json};

use forgesyte::errors::ErrorKind;
use forgesyte::plugins::builtin::{FRAME_PROBE_PLUGIN_ID, MOTION_PLUGIN_ID};
use forgesyte::plugins::manifest::manifest_for;
use forgesyte::plugins::registry::PluginRegistry;
use forgesyte::plugins::{
    self, ToolBinding, ToolDescriptor, ToolExecFn, ToolInput, VisionPlugin, build_entry,
};

/// Minimal configurable plugin for contract tests.
struct TestPlugin {
    name: &'static str,
    tools: Vec<ToolDescriptor>,
    validate_error: Option<&'static str>,
}

impl TestPlugin {
    fn with_tools(name: &'static str, tools: Vec<ToolDescriptor>) -> Arc<dyn VisionPlugin> {
        Arc::new(Self {
            name,
            tools,
            validate_error: None,
        })
    }
}

impl VisionPlugin for TestPlugin {
    fn name(&self) -> &str {
        self.name
    }

    fn tools(&self) -> Vec<ToolDescriptor> {
        self.tools
            .iter()
            .map(|t| {
                ToolDescriptor::new(
                    t.name.clone(),
                    t.description.clone(),
                    t.input_schema.clone(),
                    t.output_schema.clone(),
                    t.binding.clone(),
                )
            })
            .collect()
    }

    fn validate(&self) -> Result<(), String> {
        match self.validate_error {
            Some(msg) => Err(msg.to_string()),
            None => Ok(()),
        }
    }
}

fn echo_exec() -> ToolExecFn {
    Arc::new(|input: ToolInput| Box::pin(async move { Ok(input.data) }))
}

fn echo_tool(name: &str) -> ToolDescriptor {
    ToolDescriptor::new(
        name.to_string(),
        "echoes its input",
        json!({"type": "object"}),
        json!({"type": "object"}),
        ToolBinding::Handler(echo_exec()),
    )
}

#[tokio::test]
/// The factory table loads both builtin plugins with no errors.
async fn load_registers_builtin_plugins() {
    let registry = PluginRegistry::new_local();
    let report = plugins::load_plugins(&registry, &plugins::default_factories()).await;
    assert!(report.errors.is_empty(), "unexpected: {:?}", report.errors);
    let names = registry.names().await;
    assert!(names.contains(&FRAME_PROBE_PLUGIN_ID.to_string()));
    assert!(names.contains(&MOTION_PLUGIN_ID.to_string()));
}

#[tokio::test]
/// A tool descriptor whose output schema is not an object is rejected with
/// the violated field named, and the plugin is absent from the registry.
async fn contract_rejects_missing_output_schema() {
    let bad = ToolDescriptor::new(
        "analyze",
        "broken tool",
        json!({"type": "object"}),
        Value::Null,
        ToolBinding::Handler(echo_exec()),
    );
    let err = build_entry(TestPlugin::with_tools("broken", vec![bad]), None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidPlugin);
    let detail = err.detail.expect("contract errors carry detail");
    assert_eq!(detail["field"], "output_schema");
    assert_eq!(detail["name"], "broken");

    let registry = PluginRegistry::new_local();
    let lookup = registry.get("broken").await.unwrap_err();
    assert_eq!(lookup.kind, ErrorKind::PluginNotFound);
}

#[tokio::test]
/// Empty plugin names, duplicate tool names, and empty dispatch keys all
/// violate the contract.
async fn contract_rejects_structural_violations() {
    let err = build_entry(TestPlugin::with_tools("", vec![echo_tool("t")]), None).unwrap_err();
    assert_eq!(err.detail.as_ref().unwrap()["field"], "name");

    let err = build_entry(
        TestPlugin::with_tools("dup", vec![echo_tool("t"), echo_tool("t")]),
        None,
    )
    .unwrap_err();
    assert_eq!(err.detail.as_ref().unwrap()["field"], "tools");

    let empty_key = ToolDescriptor::new(
        "t",
        "bad dispatch",
        json!({"type": "object"}),
        json!({"type": "object"}),
        ToolBinding::Dispatch(String::new()),
    );
    let err = build_entry(TestPlugin::with_tools("bad-key", vec![empty_key]), None).unwrap_err();
    assert_eq!(err.detail.as_ref().unwrap()["field"], "handler");
}

#[tokio::test]
/// A failing validate() hook rejects the plugin.
async fn contract_runs_validate_hook() {
    let plugin = Arc::new(TestPlugin {
        name: "hooked",
        tools: vec![echo_tool("t")],
        validate_error: Some("refusing to start"),
    });
    let err = build_entry(plugin, None).unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidPlugin);
    assert_eq!(err.detail.as_ref().unwrap()["field"], "validate");
}

#[tokio::test]
/// Duplicate plugin names are rejected at registration, leaving the first
/// registration intact.
async fn duplicate_plugin_names_are_rejected() {
    let registry = PluginRegistry::new_local();
    let first = build_entry(TestPlugin::with_tools("twin", vec![echo_tool("a")]), None).unwrap();
    registry.register(first).await.unwrap();

    let second = build_entry(TestPlugin::with_tools("twin", vec![echo_tool("b")]), None).unwrap();
    let err = registry.register(second).await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidPlugin);

    let entry = registry.get("twin").await.unwrap();
    assert_eq!(entry.tool_names(), vec!["a".to_string()]);
}

#[tokio::test]
/// Unknown lookups name the registered alternatives.
async fn lookup_failures_list_available_plugins() {
    let registry = PluginRegistry::new_local();
    plugins::load_plugins(&registry, &plugins::default_factories()).await;

    let err = registry.get("nope").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::PluginNotFound);
    let available = err.detail.unwrap()["available"].clone();
    assert!(available.as_array().unwrap().iter().any(|v| v == FRAME_PROBE_PLUGIN_ID));

    let err = registry
        .call(FRAME_PROBE_PLUGIN_ID, "nope", ToolInput::from_json(json!({})))
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::ToolNotFound);
}

#[tokio::test]
/// Dispatch-bound tools route through the plugin's dispatch method.
async fn dispatch_binding_routes_through_the_plugin() {
    let registry = PluginRegistry::new_local();
    plugins::load_plugins(&registry, &plugins::default_factories()).await;

    let out = registry
        .call(
            MOTION_PLUGIN_ID,
            "detect",
            ToolInput::from_json(json!({ "luma": { "mean": 42.0 } })),
        )
        .await
        .unwrap();
    assert_eq!(out["baseline"], true);
}

#[tokio::test]
/// Reload keeps the registry key-set; failure leaves the old registration
/// intact.
async fn reload_swaps_atomically() {
    let registry = PluginRegistry::new_local();
    plugins::load_plugins(&registry, &plugins::default_factories()).await;
    let before = registry.names().await;

    registry.reload(FRAME_PROBE_PLUGIN_ID).await.unwrap();
    assert_eq!(registry.names().await, before);

    // A manually registered plugin has no factory: reload must fail and the
    // registration must survive.
    let manual = build_entry(TestPlugin::with_tools("manual", vec![echo_tool("t")]), None).unwrap();
    registry.register(manual).await.unwrap();
    let err = registry.reload("manual").await.unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidPlugin);
    assert!(registry.get("manual").await.is_ok());
}

#[tokio::test]
/// Manifests mirror the registration: id equals the plugin name and the
/// tool key-set equals the declared tool set. The cache serves repeats.
async fn manifest_matches_registration_and_caches() {
    let state = common::state_with_builtins().await;

    let manifest = manifest_for(
        &state.plugin_registry,
        &state.manifests,
        FRAME_PROBE_PLUGIN_ID,
    )
    .await
    .unwrap();
    assert_eq!(manifest.id, FRAME_PROBE_PLUGIN_ID);
    let entry = state.plugin_registry.get(FRAME_PROBE_PLUGIN_ID).await.unwrap();
    let manifest_tools: Vec<&String> = manifest.tools.keys().collect();
    let mut declared = entry.tool_names();
    declared.sort();
    assert_eq!(
        manifest_tools,
        declared.iter().collect::<Vec<_>>(),
        "manifest tool key-set equals the declared tool set"
    );

    // Second read is served from the cache (same Arc).
    let again = manifest_for(
        &state.plugin_registry,
        &state.manifests,
        FRAME_PROBE_PLUGIN_ID,
    )
    .await
    .unwrap();
    assert!(Arc::ptr_eq(&manifest, &again));
}
