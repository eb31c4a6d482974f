use std::collections::{BTreeMap, HashSet, VecDeque};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use crate::error::{Error, Result};
use crate::fields::{board_id, AUTO_BOARD, UNCATEGORIZED_BOARD};
use crate::graph::{GraphDocument, GraphNode};
use crate::queue::QueueItem;
use crate::submit::BOARD_FIELD;

/// Invocation types that persist artifacts.
pub const DEFAULT_OUTPUT_KINDS: &[&str] = &[
    "save_image",
    "l2i",
    "flux_vae_decode",
    "sd3_l2i",
    "cogview4_l2i",
];

/// Which evidence produced an `OutputRecord`'s artifacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceTier {
    Results,
    Legacy,
    Traversal,
}

impl EvidenceTier {
    pub fn is_heuristic(&self) -> bool {
        matches!(self, EvidenceTier::Traversal)
    }
}

/// What one output node produced and where it was stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRecord {
    pub node_id: String,
    /// `Some("none")` is the uncategorized board; `None` means the remote
    /// side picked the board itself and it is not known here.
    pub collection: Option<String>,
    pub artifacts: Vec<String>,
    /// `None` when no tier found anything.
    pub tier: Option<EvidenceTier>,
    pub heuristic: bool,
}

/// Maps output nodes of a finished queue item to their artifacts.
#[derive(Debug, Clone)]
pub struct OutputCorrelator {
    output_kinds: HashSet<String>,
}

impl Default for OutputCorrelator {
    fn default() -> Self {
        Self::new()
    }
}

/// Artifact names found in one source, grouped by original node id.
type Evidence = BTreeMap<String, Vec<String>>;

impl OutputCorrelator {
    pub fn new() -> Self {
        Self {
            output_kinds: DEFAULT_OUTPUT_KINDS.iter().map(|k| k.to_string()).collect(),
        }
    }

    pub fn with_output_kind(mut self, kind: impl Into<String>) -> Self {
        self.output_kinds.insert(kind.into());
        self
    }

    pub fn is_output_node(&self, node: &GraphNode) -> bool {
        self.output_kinds.contains(node.invocation_type())
    }

    /// Correlate every output node of `document` (the submitted working
    /// copy) with the artifacts reported in `item`.
    pub fn correlate(&self, document: &GraphDocument, item: &QueueItem) -> Result<BTreeMap<String, OutputRecord>> {
        if !item.status.is_terminal() {
            return Err(Error::NotCompleted {
                item_id: item.item_id,
                status: item.status,
            });
        }

        let results = results_evidence(item);
        let legacy = legacy_evidence(item);
        let mut records = BTreeMap::new();

        for node in document.nodes.iter().filter(|n| self.is_output_node(n)) {
            let from_results = results.get(&node.id).filter(|a| !a.is_empty());
            let from_legacy = legacy.get(&node.id).filter(|a| !a.is_empty());

            let (tier, artifacts) = match (from_results, from_legacy) {
                (Some(r), Some(l)) => {
                    if !same_artifacts(r, l) {
                        warn!(
                            node_id = %node.id,
                            results = ?r,
                            legacy = ?l,
                            "Results and legacy outputs disagree, keeping results"
                        );
                    }
                    (Some(EvidenceTier::Results), r.clone())
                }
                (Some(r), None) => (Some(EvidenceTier::Results), r.clone()),
                (None, Some(l)) => (Some(EvidenceTier::Legacy), l.clone()),
                (None, None) => {
                    let found = traverse(document, &node.id, &results, &legacy);
                    if found.is_empty() {
                        (None, found)
                    } else {
                        (Some(EvidenceTier::Traversal), found)
                    }
                }
            };

            debug!(node_id = %node.id, tier = ?tier, artifacts = artifacts.len(), "Correlated output node");
            records.insert(
                node.id.clone(),
                OutputRecord {
                    node_id: node.id.clone(),
                    collection: node_collection(node),
                    heuristic: tier.is_some_and(|t| t.is_heuristic()),
                    artifacts,
                    tier,
                },
            );
        }

        Ok(records)
    }
}

/// The board the submitted node itself asked for.
pub fn node_collection(node: &GraphNode) -> Option<String> {
    let value = node
        .input(BOARD_FIELD)
        .and_then(|input| input.value.as_ref())
        .filter(|v| !v.is_null());
    match value.and_then(board_id) {
        Some(id) if id == AUTO_BOARD => None,
        Some(id) => Some(id),
        None => Some(UNCATEGORIZED_BOARD.to_string()),
    }
}

fn push_unique(artifacts: &mut Vec<String>, name: String) {
    if !artifacts.contains(&name) {
        artifacts.push(name);
    }
}

/// Every `image_name` string inside an invocation output, in document order.
fn artifact_names(output: &Value, found: &mut Vec<String>) {
    match output {
        Value::Object(map) => {
            for (key, value) in map {
                match (key.as_str(), value) {
                    ("image_name", Value::String(name)) => push_unique(found, name.clone()),
                    _ => artifact_names(value, found),
                }
            }
        }
        Value::Array(items) => items.iter().for_each(|v| artifact_names(v, found)),
        _ => {}
    }
}

/// Results tier. Prepared ids reach an original node only through the
/// mapping table; unmapped ids contribute nothing.
fn results_evidence(item: &QueueItem) -> Evidence {
    let mut evidence = Evidence::new();
    let Some(session) = &item.session else {
        return evidence;
    };
    for (prepared_id, output) in &session.results {
        let Some(source_id) = session.prepared_source_mapping.get(prepared_id) else {
            debug!(%prepared_id, "Result without a source mapping, skipped");
            continue;
        };
        let artifacts = evidence.entry(source_id.clone()).or_default();
        artifact_names(output, artifacts);
    }
    evidence
}

/// Legacy tier. Node ids are mapped when they happen to be prepared ids.
fn legacy_evidence(item: &QueueItem) -> Evidence {
    let mapping = item.session.as_ref().map(|s| &s.prepared_source_mapping);
    let mut evidence = Evidence::new();
    for output in &item.outputs {
        let node_id = mapping
            .and_then(|m| m.get(&output.node_id))
            .unwrap_or(&output.node_id);
        push_unique(evidence.entry(node_id.clone()).or_default(), output.image_name.clone());
    }
    evidence
}

/// Traversal tier: breadth-first over outgoing edges, gathering whatever the
/// other tiers reported for descendant nodes.
fn traverse(document: &GraphDocument, start: &str, results: &Evidence, legacy: &Evidence) -> Vec<String> {
    let mut found = Vec::new();
    let mut seen: HashSet<&str> = HashSet::from([start]);
    let mut queue: VecDeque<&str> = VecDeque::from([start]);

    while let Some(current) = queue.pop_front() {
        for edge in document.outgoing(current) {
            let next = edge.destination.node_id.as_str();
            if !seen.insert(next) {
                continue;
            }
            for source in [results, legacy] {
                for name in source.get(next).into_iter().flatten() {
                    push_unique(&mut found, name.clone());
                }
            }
            queue.push_back(next);
        }
    }

    if !found.is_empty() {
        debug!(node_id = %start, artifacts = found.len(), "Traversal found descendant artifacts");
    }
    found
}

fn same_artifacts(a: &[String], b: &[String]) -> bool {
    let a: HashSet<&String> = a.iter().collect();
    let b: HashSet<&String> = b.iter().collect();
    a == b
}
