//! DAG pipeline execution.
//!
//! Nodes run in the precomputed topological order; each node's sanitized
//! output is stored under its id and threaded to successors along edges.
//! Raw frame bytes ride alongside the JSON state for every node of the run,
//! so downstream vision tools keep access to the frame without base64
//! round-trips.

use serde_json::{Map, Value, json};

use crate::errors::{ErrorKind, ForgeError};
use crate::pipeline::CompiledPipeline;
use crate::plugins::ToolInput;
use crate::plugins::registry::PluginRegistry;

/// Execute `pipeline` over one input payload.
///
/// Any handler error fails the run with `PIPELINE_NODE_FAILED` naming the
/// pipeline and node; partial state is discarded. Single-output pipelines
/// flatten to the sole output's value; multi-output pipelines return a map
/// keyed by node id.
pub async fn execute(
    pipeline: &CompiledPipeline,
    registry: &PluginRegistry,
    input: ToolInput,
) -> Result<Value, ForgeError> {
    let mut state: Map<String, Value> = Map::with_capacity(pipeline.order.len());

    for node_id in &pipeline.order {
        let node = pipeline
            .node(node_id)
            .ok_or_else(|| ForgeError::internal(format!("compiled order names unknown node '{}'", node_id)))?;

        // Entry nodes see the run input; interior nodes see their
        // predecessors' outputs (a single value, or a map keyed by node id).
        let preds = pipeline
            .predecessors
            .get(node_id)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        let data = match preds {
            [] => input.data.clone(),
            [only] => state.get(only).cloned().unwrap_or(Value::Null),
            many => {
                let mut collected = Map::with_capacity(many.len());
                for pred in many {
                    collected.insert(
                        pred.clone(),
                        state.get(pred).cloned().unwrap_or(Value::Null),
                    );
                }
                Value::Object(collected)
            }
        };

        let node_input = ToolInput {
            data,
            image: input.image.clone(),
        };

        let output = registry
            .call(&node.plugin_id, &node.tool_id, node_input)
            .await
            .map_err(|cause| node_failed(pipeline.id(), node_id, cause))?;

        state.insert(node_id.clone(), output);
    }

    let outputs = &pipeline.def.output_nodes;
    if let [only] = outputs.as_slice() {
        return Ok(state.remove(only).unwrap_or(Value::Null));
    }
    let mut out = Map::with_capacity(outputs.len());
    for node_id in outputs {
        out.insert(node_id.clone(), state.remove(node_id).unwrap_or(Value::Null));
    }
    Ok(Value::Object(out))
}

fn node_failed(pipeline_id: &str, node_id: &str, cause: ForgeError) -> ForgeError {
    // Cooperative cancellation is not a node failure; let it surface as-is.
    if cause.kind == ErrorKind::Cancelled {
        return cause;
    }
    ForgeError::new(
        ErrorKind::PipelineNodeFailed,
        format!(
            "pipeline '{}' failed at node '{}': {}",
            pipeline_id, node_id, cause
        ),
    )
    .with_detail(json!({
        "pipeline_id": pipeline_id,
        "node_id": node_id,
        "cause": cause.to_body()["error"].clone(),
    }))
}
