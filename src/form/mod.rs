use std::collections::HashSet;
use tracing::debug;
use crate::error::{Error, Result};
use crate::graph::{ElementView, GraphDocument};

/// One field-reference found in the form, before its field is resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSeed {
    /// Position in depth-first form order. The only identifier that is stable
    /// across runs.
    pub input_index: usize,
    pub element_id: String,
    pub node_id: String,
    pub field_name: String,
    /// Best-effort label: the input's own label, else its field name.
    pub label: String,
    pub node_label: String,
}

/// Walk the form tree from its root and number every reachable field-reference.
///
/// Containers are visited strictly in the order of their child list, nested
/// containers before the next sibling. Fields present on nodes but never placed
/// in the form are not returned.
pub fn index_form(document: &GraphDocument) -> Result<Vec<InputSeed>> {
    let mut walker = FormWalker {
        document,
        visited: HashSet::new(),
        seeds: Vec::new(),
    };

    let root_id = document.form.root_element_id.as_str();
    let root = document.form.elements.get(root_id).ok_or_else(|| {
        Error::Structural(format!("form root element '{}' does not exist", root_id))
    })?;
    if !matches!(root.view()?, ElementView::Container { .. }) {
        return Err(Error::Structural(format!(
            "form root element '{}' is a '{}', expected a container",
            root_id, root.kind
        )));
    }

    walker.visit(root_id)?;

    debug!(inputs = walker.seeds.len(), "Indexed workflow form");
    Ok(walker.seeds)
}

struct FormWalker<'a> {
    document: &'a GraphDocument,
    visited: HashSet<&'a str>,
    seeds: Vec<InputSeed>,
}

impl<'a> FormWalker<'a> {
    fn visit(&mut self, element_id: &'a str) -> Result<()> {
        if !self.visited.insert(element_id) {
            return Err(Error::Structural(format!(
                "form element '{}' is reachable more than once",
                element_id
            )));
        }

        let document = self.document;
        let element = document.form.elements.get(element_id).ok_or_else(|| {
            Error::Structural(format!("form references missing element '{}'", element_id))
        })?;

        match element.view()? {
            ElementView::Container { children, .. } => {
                for child in children {
                    self.visit(child)?;
                }
            }
            ElementView::FieldRef { node_id, field_name } => {
                let node = document.node(node_id).ok_or_else(|| {
                    Error::Structural(format!(
                        "form element '{}' points at missing node '{}'",
                        element_id, node_id
                    ))
                })?;
                let input = node.input(field_name).ok_or_else(|| {
                    Error::Structural(format!(
                        "form element '{}' points at '{}.{}', which the node does not declare",
                        element_id, node_id, field_name
                    ))
                })?;

                let label = input.label().unwrap_or(field_name).to_string();
                self.seeds.push(InputSeed {
                    input_index: self.seeds.len(),
                    element_id: element_id.to_string(),
                    node_id: node_id.to_string(),
                    field_name: field_name.to_string(),
                    label,
                    node_label: node.display_label().to_string(),
                });
            }
            ElementView::Divider | ElementView::Text | ElementView::Heading => {}
            ElementView::Other(kind) => {
                debug!(element_id, kind, "Skipping unknown form element kind");
            }
        }
        Ok(())
    }
}
