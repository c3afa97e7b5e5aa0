//! Architecture guards: source scanners and runtime gates that keep the
//! plugin substrate honest. These run in CI like any other test.

mod common;

use std::path::{Path, PathBuf};

use regex::Regex;

use forgesyte::pipeline;
use forgesyte::plugins;
use forgesyte::plugins::registry::PluginRegistry;
use forgesyte::sanitize::sanitize;

fn rust_sources(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in std::fs::read_dir(dir).expect("readable source tree") {
        let path = entry.expect("dir entry").path();
        if path.is_dir() {
            rust_sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

fn scan_sources(root: &str, pattern: &Regex, exclude: &[&str]) -> Vec<(PathBuf, usize, String)> {
    let mut files = Vec::new();
    rust_sources(Path::new(root), &mut files);
    let mut hits = Vec::new();
    for file in files {
        let name = file.to_string_lossy().to_string();
        if exclude.iter().any(|ex| name.ends_with(ex)) {
            continue;
        }
        let text = std::fs::read_to_string(&file).expect("readable source file");
        for (lineno, line) in text.lines().enumerate() {
            if pattern.is_match(line) {
                hits.push((file.clone(), lineno + 1, line.trim().to_string()));
            }
        }
    }
    hits
}

#[test]
/// No literal string fallback for tool selection anywhere in the sources.
fn no_literal_default_tool_name() {
    let pattern = Regex::new("\"default\"").unwrap();
    let hits = scan_sources("src", &pattern, &[]);
    assert!(
        hits.is_empty(),
        "forbidden literal tool-name fallback found: {:?}",
        hits
    );
}

#[test]
/// The generic request path never branches on a hardcoded plugin id.
fn no_hardcoded_plugin_branches_in_request_path() {
    let pattern = Regex::new("==\\s*\"(frame-probe|motion)\"").unwrap();
    // The builtin definitions themselves may name their ids.
    let hits = scan_sources("src", &pattern, &["plugins/builtin.rs"]);
    assert!(
        hits.is_empty(),
        "hardcoded plugin-id branch found: {:?}",
        hits
    );
}

#[tokio::test]
/// The production factory table loads at least one plugin; a deployment
/// with zero plugins must fail startup instead of serving nothing.
async fn loader_yields_at_least_one_plugin() {
    let registry = PluginRegistry::new_local();
    let report = plugins::load_plugins(&registry, &plugins::default_factories()).await;
    assert!(
        !report.loaded.is_empty(),
        "factory table produced no loadable plugins: {:?}",
        report.errors
    );
}

#[tokio::test]
/// Every pipeline definition shipped in `pipelines/` resolves against the
/// loaded registry at startup, including the configured default.
async fn shipped_pipelines_resolve_against_the_registry() {
    let registry = PluginRegistry::new_local();
    plugins::load_plugins(&registry, &plugins::default_factories()).await;
    let store = pipeline::load_dir(Path::new("pipelines"), &registry)
        .await
        .expect("every shipped pipeline must compile against the registry");
    assert!(store.contains("frame_probe"), "default pipeline missing");
    assert!(!store.ids().is_empty());
}

#[tokio::test]
/// Every declared tool schema is itself JSON-safe: manifests must never be
/// the place a NaN or binary blob sneaks into a response.
async fn declared_schemas_are_json_safe() {
    let registry = PluginRegistry::new_local();
    plugins::load_plugins(&registry, &plugins::default_factories()).await;
    for name in registry.names().await {
        let entry = registry.get(&name).await.unwrap();
        for (tool, def) in &entry.tools {
            assert_eq!(
                sanitize(&def.input_schema).unwrap(),
                def.input_schema,
                "{}/{} input schema",
                name,
                tool
            );
            assert_eq!(
                sanitize(&def.output_schema).unwrap(),
                def.output_schema,
                "{}/{} output schema",
                name,
                tool
            );
        }
    }
}

#[tokio::test]
/// Property: for every builtin tool and a legal input, the registry's
/// output equals its own sanitization (the registry enforces the fixed
/// point).
async fn every_tool_return_is_json_safe() {
    use forgesyte::plugins::ToolInput;
    use serde_json::json;

    let registry = PluginRegistry::new_local();
    plugins::load_plugins(&registry, &plugins::default_factories()).await;
    let jpeg = common::tiny_jpeg(128, 8);

    let calls = [
        ("frame-probe", "probe", json!({ "frame_index": 0 })),
        ("frame-probe", "thumbnail", json!({ "max_dim": 8 })),
        ("motion", "detect", json!({})),
    ];
    for (plugin, tool, data) in calls {
        let out = registry
            .call(plugin, tool, ToolInput::with_image(data, jpeg.clone()))
            .await
            .unwrap_or_else(|e| panic!("{}/{} failed: {}", plugin, tool, e));
        assert_eq!(sanitize(&out).unwrap(), out, "{}/{}", plugin, tool);
        assert!(serde_json::to_string(&out).is_ok());
    }
}
