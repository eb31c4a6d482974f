use serde_json::{json, Map, Value};
use crate::error::Result;
use crate::graph::GraphDocument;

/// Builds exported-workflow documents in code, mostly for tests and for
/// embedders generating simple workflows.
pub struct DocumentBuilder {
    name: String,
    nodes: Vec<Value>,
    edges: Vec<Value>,
    root: String,
    elements: Map<String, Value>,
}

impl DocumentBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            nodes: Vec::new(),
            edges: Vec::new(),
            root: "root".to_string(),
            elements: Map::new(),
        }
    }

    pub fn node(self, id: &str, invocation_type: &str) -> NodeBuilder {
        NodeBuilder {
            document_builder: self,
            id: id.to_string(),
            outer_type: "invocation".to_string(),
            invocation_type: invocation_type.to_string(),
            label: None,
            inputs: Map::new(),
        }
    }

    /// A descriptive `notes` node with no inputs.
    pub fn notes(mut self, id: &str, text: &str) -> Self {
        self.nodes.push(json!({
            "id": id,
            "type": crate::graph::NOTES_NODE_TYPE,
            "data": { "id": id, "type": crate::graph::NOTES_NODE_TYPE, "notes": text, "inputs": {} }
        }));
        self
    }

    pub fn edge(mut self, source: (&str, &str), destination: (&str, &str)) -> Self {
        self.edges.push(json!({
            "id": format!("{}-{}-{}-{}", source.0, source.1, destination.0, destination.1),
            "source": { "node_id": source.0, "field": source.1 },
            "destination": { "node_id": destination.0, "field": destination.1 }
        }));
        self
    }

    pub fn root(mut self, id: &str) -> Self {
        self.root = id.to_string();
        self
    }

    pub fn container(mut self, id: &str, children: &[&str]) -> Self {
        self.elements.insert(
            id.to_string(),
            json!({ "id": id, "type": "container", "data": { "layout": "column", "children": children } }),
        );
        self
    }

    pub fn field(mut self, id: &str, node_id: &str, field_name: &str) -> Self {
        self.elements.insert(
            id.to_string(),
            json!({
                "id": id,
                "type": "node-field",
                "data": { "fieldIdentifier": { "nodeId": node_id, "fieldName": field_name } }
            }),
        );
        self
    }

    pub fn divider(mut self, id: &str) -> Self {
        self.elements
            .insert(id.to_string(), json!({ "id": id, "type": "divider" }));
        self
    }

    pub fn text(mut self, id: &str, content: &str) -> Self {
        self.elements.insert(
            id.to_string(),
            json!({ "id": id, "type": "text", "data": { "content": content } }),
        );
        self
    }

    pub fn build(self) -> Value {
        json!({
            "name": self.name,
            "version": "3.0.0",
            "nodes": self.nodes,
            "edges": self.edges,
            "form": { "rootElementId": self.root, "elements": self.elements }
        })
    }

    pub fn build_document(self) -> Result<GraphDocument> {
        GraphDocument::from_value(self.build())
    }
}

pub struct NodeBuilder {
    document_builder: DocumentBuilder,
    id: String,
    outer_type: String,
    invocation_type: String,
    label: Option<String>,
    inputs: Map<String, Value>,
}

impl NodeBuilder {
    pub fn label(mut self, label: &str) -> Self {
        self.label = Some(label.to_string());
        self
    }

    /// Input carrying an inline value.
    pub fn input(mut self, name: &str, value: impl Into<Value>) -> Self {
        self.inputs.insert(
            name.to_string(),
            json!({ "name": name, "label": "", "value": value.into() }),
        );
        self
    }

    /// Input described by a raw record (options, bounds, type tags, ...).
    pub fn raw_input(mut self, name: &str, mut record: Value) -> Self {
        if let Some(map) = record.as_object_mut() {
            map.entry("name").or_insert_with(|| json!(name));
        }
        self.inputs.insert(name.to_string(), record);
        self
    }

    pub fn done(mut self) -> DocumentBuilder {
        let mut data = json!({
            "id": self.id,
            "type": self.invocation_type,
            "inputs": self.inputs,
            "is_intermediate": true,
            "use_cache": true
        });
        if let (Some(label), Some(map)) = (self.label, data.as_object_mut()) {
            map.insert("label".to_string(), json!(label));
        }
        self.document_builder.nodes.push(json!({
            "id": self.id,
            "type": self.outer_type,
            "data": data
        }));
        self.document_builder
    }
}
