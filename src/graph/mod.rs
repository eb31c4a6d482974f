pub mod builder;
pub mod loader;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use crate::error::{Error, Result};

/// Node type used by the editor for free-text annotations.
pub const NOTES_NODE_TYPE: &str = "notes";

/// 编辑器导出的工作流文档
///
/// Only the keys the crate reasons about are typed. Everything else lands in
/// `extra` and is written back verbatim by `to_value`, so documents from newer
/// editor versions survive a load/serialize cycle untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphDocument {
    pub nodes: Vec<GraphNode>,
    #[serde(default)]
    pub edges: Vec<GraphEdge>,
    pub form: Form,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphNode {
    pub id: String,
    /// Outer editor type ("invocation", "notes", ...). Open set.
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub data: NodeData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeData {
    /// Invocation type, e.g. "save_image" or "integer".
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default)]
    /// Declaration order is kept through a load/save cycle.
    pub inputs: IndexMap<String, NodeInput>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One named input slot on a node.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NodeInput {
    /// Inline literal. An explicit `null` is kept as `Some(Value::Null)`.
    #[serde(
        default,
        deserialize_with = "present_value",
        skip_serializing_if = "Option::is_none"
    )]
    pub value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn present_value<'de, D>(deserializer: D) -> std::result::Result<Option<Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Value::deserialize(deserializer).map(Some)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct EdgeEndpoint {
    pub node_id: String,
    pub field: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphEdge {
    pub source: EdgeEndpoint,
    pub destination: EdgeEndpoint,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The user-facing form: a tree of elements hanging off one root container.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Form {
    #[serde(rename = "rootElementId", alias = "root_element_id")]
    pub root_element_id: String,
    #[serde(default)]
    pub elements: IndexMap<String, FormElement>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub data: Value,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Typed reading of a `FormElement`, borrowed from its raw data.
#[derive(Debug, Clone, PartialEq)]
pub enum ElementView<'a> {
    Container {
        layout: Option<&'a str>,
        children: Vec<&'a str>,
    },
    FieldRef {
        node_id: &'a str,
        field_name: &'a str,
    },
    Divider,
    Text,
    Heading,
    Other(&'a str),
}

impl FormElement {
    pub fn view(&self) -> Result<ElementView<'_>> {
        match self.kind.as_str() {
            "container" => {
                let children = match self.data.get("children") {
                    None | Some(Value::Null) => Vec::new(),
                    Some(Value::Array(items)) => items
                        .iter()
                        .map(|c| {
                            c.as_str().ok_or_else(|| {
                                Error::Structural(format!(
                                    "container '{}' has a non-string child id",
                                    self.id
                                ))
                            })
                        })
                        .collect::<Result<Vec<_>>>()?,
                    Some(_) => {
                        return Err(Error::Structural(format!(
                            "container '{}' children must be a list",
                            self.id
                        )))
                    }
                };
                let layout = self.data.get("layout").and_then(|v| v.as_str());
                Ok(ElementView::Container { layout, children })
            }
            "node-field" | "node_field" => {
                let identifier = self
                    .data
                    .get("fieldIdentifier")
                    .or_else(|| self.data.get("field_identifier"))
                    .ok_or_else(|| {
                        Error::Structural(format!(
                            "field element '{}' has no field identifier",
                            self.id
                        ))
                    })?;
                let lookup = |camel: &str, snake: &str| {
                    identifier
                        .get(camel)
                        .or_else(|| identifier.get(snake))
                        .and_then(|v| v.as_str())
                };
                match (lookup("nodeId", "node_id"), lookup("fieldName", "field_name")) {
                    (Some(node_id), Some(field_name)) => Ok(ElementView::FieldRef { node_id, field_name }),
                    _ => Err(Error::Structural(format!(
                        "field element '{}' must name both a node and a field",
                        self.id
                    ))),
                }
            }
            "divider" => Ok(ElementView::Divider),
            "text" => Ok(ElementView::Text),
            "heading" => Ok(ElementView::Heading),
            other => Ok(ElementView::Other(other)),
        }
    }
}

impl GraphNode {
    /// The invocation type the remote service executes.
    pub fn invocation_type(&self) -> &str {
        self.data.kind.as_deref().unwrap_or(&self.kind)
    }

    pub fn input(&self, name: &str) -> Option<&NodeInput> {
        self.data.inputs.get(name)
    }

    /// Display label for the node, falling back to its invocation type.
    pub fn display_label(&self) -> &str {
        non_blank(self.data.extra.get("label")).unwrap_or_else(|| self.invocation_type())
    }
}

impl NodeInput {
    pub fn label(&self) -> Option<&str> {
        non_blank(self.extra.get("label"))
    }

    pub fn description(&self) -> Option<&str> {
        non_blank(self.extra.get("description"))
    }
}

fn non_blank(value: Option<&Value>) -> Option<&str> {
    value
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
}

impl GraphDocument {
    /// Parse an exported document.
    ///
    /// Rejects only documents missing the anchors needed for traversal
    /// (`nodes`, `form`); every other key is kept.
    pub fn from_value(raw: Value) -> Result<Self> {
        let object = raw
            .as_object()
            .ok_or_else(|| Error::Structural("workflow document must be a JSON object".into()))?;
        match object.get("nodes") {
            Some(Value::Array(_)) => {}
            Some(_) => return Err(Error::Structural("'nodes' must be a list".into())),
            None => return Err(Error::Structural("missing 'nodes'".into())),
        }
        match object.get("form") {
            Some(Value::Object(_)) => {}
            Some(_) => return Err(Error::Structural("'form' must be an object".into())),
            None => return Err(Error::Structural("missing 'form'".into())),
        }

        serde_json::from_value(raw).map_err(|e| Error::Structural(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(raw)?;
        Self::from_value(value)
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut GraphNode> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    /// Edges whose source is `node_id`, in document order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a GraphEdge> + 'a {
        self.edges.iter().filter(move |e| e.source.node_id == node_id)
    }

    pub fn has_incoming(&self, node_id: &str, field: &str) -> bool {
        self.edges
            .iter()
            .any(|e| e.destination.node_id == node_id && e.destination.field == field)
    }
}
