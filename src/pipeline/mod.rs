//! Declarative DAG pipeline definitions.
//!
//! Pipelines are loaded once from JSON files in a configured directory at
//! startup and are immutable at runtime. Validation happens entirely at load
//! time: unique node ids, edges over known nodes, entry/output membership,
//! acyclicity, reachability from the entry set, and resolution of every
//! `(plugin_id, tool_id)` pair against the live registry. The topological
//! order (lexicographic tie-break on node id) is computed once and stored
//! with the compiled pipeline.

pub mod executor;

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::ForgeError;
use crate::plugins::registry::PluginRegistry;

/// A single analysis step: one tool of one plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    pub plugin_id: String,
    pub tool_id: String,
    /// Optional schema constraining the node's collected input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
}

/// A payload-carrying edge between two nodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    pub from_node: String,
    pub to_node: String,
}

/// A pipeline definition file as written on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineDefinition {
    pub id: String,
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
    pub entry_nodes: Vec<String>,
    pub output_nodes: Vec<String>,
}

/// A validated pipeline with its precomputed execution order.
#[derive(Debug)]
pub struct CompiledPipeline {
    pub def: PipelineDefinition,
    /// Topological order, ties broken lexicographically on node id.
    pub order: Vec<String>,
    /// Predecessors per node, sorted for deterministic input assembly.
    pub predecessors: BTreeMap<String, Vec<String>>,
    nodes_by_id: HashMap<String, NodeDef>,
}

impl CompiledPipeline {
    pub fn id(&self) -> &str {
        &self.def.id
    }

    pub fn node(&self, id: &str) -> Option<&NodeDef> {
        self.nodes_by_id.get(id)
    }
}

fn definition_error(pipeline_id: &str, message: impl std::fmt::Display) -> ForgeError {
    ForgeError::invalid_input(format!("pipeline '{}': {}", pipeline_id, message))
}

/// Validate a definition and compute its execution order.
///
/// `resolves` answers whether a `(plugin_id, tool_id)` pair exists in the
/// registry snapshot the pipeline is being loaded against.
pub fn compile(
    def: PipelineDefinition,
    resolves: &dyn Fn(&str, &str) -> bool,
) -> Result<CompiledPipeline, ForgeError> {
    let pid = def.id.clone();
    if pid.trim().is_empty() {
        return Err(ForgeError::invalid_input("pipeline id must be non-empty"));
    }
    if def.nodes.is_empty() {
        return Err(definition_error(&pid, "must declare at least one node"));
    }

    let mut nodes_by_id: HashMap<String, NodeDef> = HashMap::with_capacity(def.nodes.len());
    for node in &def.nodes {
        if nodes_by_id.insert(node.id.clone(), node.clone()).is_some() {
            return Err(definition_error(
                &pid,
                format!("duplicate node id '{}'", node.id),
            ));
        }
        if !resolves(&node.plugin_id, &node.tool_id) {
            return Err(definition_error(
                &pid,
                format!(
                    "node '{}' references unknown tool '{}/{}'",
                    node.id, node.plugin_id, node.tool_id
                ),
            ));
        }
    }

    for edge in &def.edges {
        for endpoint in [&edge.from_node, &edge.to_node] {
            if !nodes_by_id.contains_key(endpoint) {
                return Err(definition_error(
                    &pid,
                    format!("edge references unknown node '{}'", endpoint),
                ));
            }
        }
        if edge.from_node == edge.to_node {
            return Err(definition_error(
                &pid,
                format!("self-edge on node '{}'", edge.from_node),
            ));
        }
    }

    if def.entry_nodes.is_empty() {
        return Err(definition_error(&pid, "must declare at least one entry node"));
    }
    if def.output_nodes.is_empty() {
        return Err(definition_error(
            &pid,
            "must declare at least one output node",
        ));
    }
    for (field, ids) in [("entry_nodes", &def.entry_nodes), ("output_nodes", &def.output_nodes)] {
        for id in ids {
            if !nodes_by_id.contains_key(id) {
                return Err(definition_error(
                    &pid,
                    format!("{} references unknown node '{}'", field, id),
                ));
            }
        }
    }

    // Adjacency and in-degrees. BTree containers keep iteration stable.
    let mut successors: BTreeMap<&str, BTreeSet<&str>> = BTreeMap::new();
    let mut indegree: BTreeMap<&str, usize> = nodes_by_id.keys().map(|id| (id.as_str(), 0)).collect();
    for edge in &def.edges {
        if successors
            .entry(edge.from_node.as_str())
            .or_default()
            .insert(edge.to_node.as_str())
        {
            *indegree.get_mut(edge.to_node.as_str()).expect("known node") += 1;
        }
    }

    // Kahn's algorithm; the min-heap yields ready nodes in lexicographic
    // order, making the execution order deterministic.
    let mut ready: BinaryHeap<Reverse<&str>> = indegree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();
    let mut order = Vec::with_capacity(nodes_by_id.len());
    let mut indegree_mut = indegree.clone();
    while let Some(Reverse(id)) = ready.pop() {
        order.push(id.to_string());
        if let Some(next) = successors.get(id) {
            for succ in next {
                let deg = indegree_mut.get_mut(succ).expect("known node");
                *deg -= 1;
                if *deg == 0 {
                    ready.push(Reverse(*succ));
                }
            }
        }
    }
    if order.len() != nodes_by_id.len() {
        return Err(definition_error(&pid, "graph contains a cycle"));
    }

    // Every node must be reachable from the entry set; an unreachable node
    // would never execute.
    let mut reachable: HashSet<&str> = HashSet::new();
    let mut stack: Vec<&str> = def.entry_nodes.iter().map(String::as_str).collect();
    while let Some(id) = stack.pop() {
        if !reachable.insert(id) {
            continue;
        }
        if let Some(next) = successors.get(id) {
            stack.extend(next.iter().copied());
        }
    }
    for id in nodes_by_id.keys() {
        if !reachable.contains(id.as_str()) {
            return Err(definition_error(
                &pid,
                format!("node '{}' is not reachable from any entry node", id),
            ));
        }
    }

    let mut predecessors: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for edge in &def.edges {
        predecessors
            .entry(edge.to_node.clone())
            .or_default()
            .push(edge.from_node.clone());
    }
    for preds in predecessors.values_mut() {
        preds.sort();
        preds.dedup();
    }

    Ok(CompiledPipeline {
        order,
        predecessors,
        nodes_by_id,
        def,
    })
}

/// Read-mostly store of compiled pipelines, owned by the bootstrapper.
#[derive(Debug, Default)]
pub struct PipelineStore {
    pipelines: HashMap<String, Arc<CompiledPipeline>>,
}

impl PipelineStore {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a store from in-memory definitions (test wiring).
    pub fn from_definitions(
        defs: Vec<PipelineDefinition>,
        resolves: &dyn Fn(&str, &str) -> bool,
    ) -> Result<Self, ForgeError> {
        let mut pipelines = HashMap::with_capacity(defs.len());
        for def in defs {
            let compiled = compile(def, resolves)?;
            let id = compiled.id().to_string();
            if pipelines.insert(id.clone(), Arc::new(compiled)).is_some() {
                return Err(ForgeError::invalid_input(format!(
                    "duplicate pipeline id '{}'",
                    id
                )));
            }
        }
        Ok(Self { pipelines })
    }

    pub fn get(&self, id: &str) -> Result<Arc<CompiledPipeline>, ForgeError> {
        self.pipelines
            .get(id)
            .cloned()
            .ok_or_else(|| ForgeError::pipeline_not_found(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.pipelines.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pipelines.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }
}

/// Load every `*.json` definition in `dir`, validated against the registry.
///
/// Fails on the first invalid file: a pipeline that references an unloaded
/// plugin must not reach serving.
pub async fn load_dir(dir: &Path, registry: &PluginRegistry) -> Result<PipelineStore, ForgeError> {
    // Snapshot the known (plugin, tool) pairs once.
    let known: HashSet<(String, String)> = {
        let catalog = registry.catalog.read().await;
        catalog
            .plugins
            .values()
            .flat_map(|entry| {
                entry
                    .tool_order
                    .iter()
                    .map(|tool| (entry.name.clone(), tool.clone()))
            })
            .collect()
    };
    let resolves = |plugin: &str, tool: &str| known.contains(&(plugin.to_string(), tool.to_string()));

    let mut defs = Vec::new();
    let entries = std::fs::read_dir(dir).map_err(|e| {
        ForgeError::invalid_input(format!(
            "cannot read pipeline directory {}: {}",
            dir.display(),
            e
        ))
    })?;
    let mut paths: Vec<_> = entries
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    paths.sort();

    for path in paths {
        let text = std::fs::read_to_string(&path).map_err(|e| {
            ForgeError::invalid_input(format!("cannot read {}: {}", path.display(), e))
        })?;
        let def: PipelineDefinition = serde_json::from_str(&text).map_err(|e| {
            ForgeError::invalid_input(format!("cannot parse {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded pipeline definition '{}' from {}", def.id, path.display());
        defs.push(def);
    }

    let store = PipelineStore::from_definitions(defs, &resolves)?;
    tracing::info!("Pipeline load complete: {} pipelines", store.len());
    Ok(store)
}
