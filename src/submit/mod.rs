use std::collections::HashSet;
use serde_json::{Map, Value};
use tracing::{debug, info};
use uuid::Uuid;
use crate::error::{Error, Result};
use crate::fields::{board_wire, AUTO_BOARD};
use crate::graph::GraphDocument;
use crate::inputs::InputStore;
use crate::queue::{Batch, EnqueueBatchRequest, ExecutionEdge, ExecutionGraph};

/// Input slot whose bare-string value must be wrapped for the endpoint.
pub const BOARD_FIELD: &str = "board";

/// Node-level flags copied from `data` into the execution graph.
const NODE_FLAGS: &[&str] = &["is_intermediate", "use_cache"];

#[derive(Debug, Clone)]
pub struct SubmitOptions {
    pub runs: u32,
    pub prepend: bool,
    /// Node types dropped from the execution graph.
    pub non_executable_types: Vec<String>,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self {
            runs: 1,
            prepend: false,
            non_executable_types: vec![crate::graph::NOTES_NODE_TYPE.to_string()],
        }
    }
}

/// Everything built for one submission.
#[derive(Debug, Clone)]
pub struct PreparedSubmission {
    /// Clone of the loaded document with modified inputs written back.
    pub working_copy: GraphDocument,
    pub request: EnqueueBatchRequest,
}

/// Build a fresh working copy and the enqueue payload. The loaded document
/// is never touched.
pub fn prepare(document: &GraphDocument, inputs: &InputStore, options: &SubmitOptions) -> Result<PreparedSubmission> {
    let mut working_copy = document.clone();
    apply_inputs(&mut working_copy, inputs)?;
    normalize_boards(&mut working_copy);

    let graph = execution_graph(&working_copy, &options.non_executable_types);
    let request = EnqueueBatchRequest {
        prepend: options.prepend,
        batch: Batch {
            batch_id: Uuid::new_v4().to_string(),
            runs: options.runs.max(1),
            graph,
            workflow: Some(working_copy.to_value()?),
        },
    };

    info!(
        batch_id = %request.batch.batch_id,
        nodes = request.batch.graph.nodes.len(),
        edges = request.batch.graph.edges.len(),
        runs = request.batch.runs,
        "Prepared submission"
    );
    Ok(PreparedSubmission { working_copy, request })
}

/// Write every modified input's wire value into its node slot.
pub fn apply_inputs(working_copy: &mut GraphDocument, inputs: &InputStore) -> Result<()> {
    for input in inputs.modified() {
        let Some(wire) = input.field().to_wire() else {
            debug!(input_index = input.input_index, "Modified input has no wire value, slot left as loaded");
            continue;
        };
        let slot = working_copy
            .node_mut(&input.node_id)
            .and_then(|node| node.data.inputs.get_mut(&input.field_name))
            .ok_or_else(|| {
                Error::Structural(format!(
                    "input {} addresses '{}.{}', which is not in the document",
                    input.input_index, input.node_id, input.field_name
                ))
            })?;
        debug!(input_index = input.input_index, node_id = %input.node_id, field_name = %input.field_name, "Applying input");
        slot.value = Some(wire);
    }
    Ok(())
}

/// Wrap bare board ids into `{"board_id": ..}` on every node, indexed or not.
pub fn normalize_boards(working_copy: &mut GraphDocument) {
    for node in &mut working_copy.nodes {
        let Some(slot) = node.data.inputs.get_mut(BOARD_FIELD) else {
            continue;
        };
        let wrapped = match &slot.value {
            Some(Value::String(id)) if id != AUTO_BOARD => board_wire(id),
            _ => continue,
        };
        debug!(node_id = %node.id, board = %wrapped, "Wrapping bare board id");
        slot.value = Some(wrapped);
    }
}

/// Flatten the working copy into the executable graph, dropping
/// non-executable nodes and every edge touching them.
pub fn execution_graph(working_copy: &GraphDocument, non_executable_types: &[String]) -> ExecutionGraph {
    let is_stripped = |kind: &str| non_executable_types.iter().any(|t| t == kind);

    let mut stripped: HashSet<&str> = HashSet::new();
    let mut nodes = Map::new();
    for node in &working_copy.nodes {
        if is_stripped(&node.kind) || is_stripped(node.invocation_type()) {
            stripped.insert(node.id.as_str());
            continue;
        }

        let mut entry = Map::new();
        entry.insert("id".to_string(), Value::String(node.id.clone()));
        entry.insert("type".to_string(), Value::String(node.invocation_type().to_string()));
        for flag in NODE_FLAGS {
            if let Some(v) = node.data.extra.get(*flag) {
                entry.insert(flag.to_string(), v.clone());
            }
        }
        for (name, input) in &node.data.inputs {
            if let Some(value) = input.value.as_ref().filter(|v| !v.is_null()) {
                entry.insert(name.clone(), value.clone());
            }
        }
        nodes.insert(node.id.clone(), Value::Object(entry));
    }

    let mut edges = Vec::with_capacity(working_copy.edges.len());
    for edge in &working_copy.edges {
        if stripped.contains(edge.source.node_id.as_str()) || stripped.contains(edge.destination.node_id.as_str()) {
            debug!(
                source = %edge.source.node_id,
                destination = %edge.destination.node_id,
                "Dropping edge touching a non-executable node"
            );
            continue;
        }
        edges.push(ExecutionEdge {
            source: edge.source.clone(),
            destination: edge.destination.clone(),
        });
    }

    if !stripped.is_empty() {
        debug!(count = stripped.len(), "Stripped non-executable nodes");
    }
    ExecutionGraph {
        id: Uuid::new_v4().to_string(),
        nodes,
        edges,
    }
}
