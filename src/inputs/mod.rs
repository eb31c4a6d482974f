pub mod rules;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use crate::error::{Error, Result, ValidationError};
use crate::fields::{describe, Field, FieldKind, FieldResolver};
use crate::form::InputSeed;
use crate::graph::GraphDocument;

pub use rules::WorkflowRule;

/// 用户可编辑的工作流输入
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowInput {
    pub input_index: usize,
    pub element_id: String,
    pub node_id: String,
    pub field_name: String,
    pub label: String,
    pub node_label: String,
    field: Field,
    modified: bool,
}

impl WorkflowInput {
    pub fn field(&self) -> &Field {
        &self.field
    }

    pub fn kind(&self) -> FieldKind {
        self.field.kind()
    }

    /// Whether the value changed since the workflow was loaded.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    /// `<node label>.<field name>`, used as a fallback lookup key.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.node_label, self.field_name)
    }
}

/// Persisted form of one input, see `InputStore::export`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedInput {
    pub input_index: usize,
    pub node_id: String,
    pub field_name: String,
    pub field: Field,
}

/// The ordered, index-addressed set of typed inputs for one workflow.
///
/// Every mutation compares the incoming variant against the one fixed at
/// resolution time. Nothing here touches the graph document.
#[derive(Debug)]
pub struct InputStore {
    inputs: Vec<WorkflowInput>,
    rules: Vec<WorkflowRule>,
}

impl InputStore {
    /// Resolve every seed against the document. The first failure aborts.
    pub fn resolve(document: &GraphDocument, seeds: Vec<InputSeed>, resolver: &FieldResolver) -> Result<Self> {
        let mut inputs = Vec::with_capacity(seeds.len());
        for seed in seeds {
            let node = document.node(&seed.node_id).ok_or_else(|| {
                Error::Structural(format!("input {} points at missing node '{}'", seed.input_index, seed.node_id))
            })?;
            let raw = node.input(&seed.field_name).ok_or_else(|| {
                Error::Structural(format!(
                    "input {} points at undeclared field '{}.{}'",
                    seed.input_index, seed.node_id, seed.field_name
                ))
            })?;
            let field = resolver.resolve(node, &seed.field_name, raw)?;
            debug!(
                input_index = seed.input_index,
                node_id = %seed.node_id,
                field_name = %seed.field_name,
                kind = ?field.kind(),
                "Resolved input"
            );
            inputs.push(WorkflowInput {
                input_index: seed.input_index,
                element_id: seed.element_id,
                node_id: seed.node_id,
                field_name: seed.field_name,
                label: seed.label,
                node_label: seed.node_label,
                field,
                modified: false,
            });
        }

        Ok(Self {
            inputs,
            rules: rules::builtin_rules(),
        })
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &WorkflowInput> {
        self.inputs.iter()
    }

    pub fn input(&self, index: usize) -> Result<&WorkflowInput> {
        self.inputs
            .get(index)
            .ok_or_else(|| Error::UnknownInput(format!("index {}", index)))
    }

    fn input_mut(&mut self, index: usize) -> Result<&mut WorkflowInput> {
        self.inputs
            .get_mut(index)
            .ok_or_else(|| Error::UnknownInput(format!("index {}", index)))
    }

    pub fn get(&self, index: usize) -> Result<&Field> {
        self.input(index).map(|i| &i.field)
    }

    /// Replace the value of input `index`, keeping its variant.
    ///
    /// A value whose shape the locked variant cannot hold is rejected with
    /// `Error::TypeLock` and the stored field is left as it was.
    pub fn set_value(&mut self, index: usize, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let input = self.input_mut(index)?;
        let mut candidate = input.field.clone();
        candidate.accept(value.clone()).map_err(|reason| {
            warn!(input_index = index, locked = ?input.field.kind(), %reason, "Rejected value");
            Error::TypeLock {
                input_index: index,
                locked: input.field.kind(),
                attempted: format!("{} ({})", describe(&value), reason),
            }
        })?;
        input.field = candidate;
        input.modified = true;
        Ok(())
    }

    /// Update one named component of a structured input (color channel, model
    /// key, bounding-box edge).
    pub fn set_component(&mut self, index: usize, component: &str, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        let input = self.input_mut(index)?;
        let mut candidate = input.field.clone();
        candidate
            .set_component(component, value.clone())
            .map_err(|reason| Error::TypeLock {
                input_index: index,
                locked: input.field.kind(),
                attempted: format!("component '{}' = {} ({})", component, describe(&value), reason),
            })?;
        input.field = candidate;
        input.modified = true;
        Ok(())
    }

    /// Swap the whole field. The replacement must be the same variant, and a
    /// collection must keep its element type.
    pub fn replace(&mut self, index: usize, field: Field) -> Result<()> {
        let input = self.input_mut(index)?;
        if input.field.lock_key() != field.lock_key() {
            return Err(Error::TypeLock {
                input_index: index,
                locked: input.field.kind(),
                attempted: format!("a {}", lock_label(&field)),
            });
        }
        input.field = field;
        input.modified = true;
        Ok(())
    }

    /// Add a whole-workflow rule checked by `validate_all`.
    pub fn add_rule(&mut self, rule: WorkflowRule) {
        self.rules.push(rule);
    }

    /// Run every field's own checks and every workflow rule. Never fails;
    /// an empty list means the inputs are ready to submit.
    pub fn validate_all(&self) -> Vec<ValidationError> {
        let mut problems: Vec<ValidationError> = self
            .inputs
            .iter()
            .flat_map(|input| {
                input
                    .field
                    .validate()
                    .into_iter()
                    .map(move |message| ValidationError::field(input.input_index, message))
            })
            .collect();

        for rule in &self.rules {
            problems.extend(rule.check(self));
        }
        problems
    }

    /// Find the single input whose label (or `node label.field name`)
    /// matches `reference`, ignoring case.
    pub fn find(&self, reference: &str) -> Result<usize> {
        let wanted = reference.trim();
        let candidates: Vec<usize> = self
            .inputs
            .iter()
            .filter(|i| i.label.eq_ignore_ascii_case(wanted) || i.qualified_name().eq_ignore_ascii_case(wanted))
            .map(|i| i.input_index)
            .collect();

        match candidates.as_slice() {
            [] => Err(Error::UnknownInput(reference.to_string())),
            [index] => Ok(*index),
            _ => Err(Error::AmbiguousReference {
                reference: reference.to_string(),
                candidates,
            }),
        }
    }

    /// Inputs changed since load, in index order.
    pub fn modified(&self) -> impl Iterator<Item = &WorkflowInput> {
        self.inputs.iter().filter(|i| i.modified)
    }

    /// Snapshot every input's field for later `import`.
    pub fn export(&self) -> Result<Value> {
        let records: Vec<PersistedInput> = self
            .inputs
            .iter()
            .map(|i| PersistedInput {
                input_index: i.input_index,
                node_id: i.node_id.clone(),
                field_name: i.field_name.clone(),
                field: i.field.clone(),
            })
            .collect();
        Ok(serde_json::to_value(records)?)
    }

    /// Re-apply a snapshot taken by `export`. Every record must address the
    /// same (node, field) as the input at its index and carry the same
    /// variant; the first mismatch aborts before anything is changed.
    pub fn import(&mut self, snapshot: Value) -> Result<()> {
        let records: Vec<PersistedInput> = serde_json::from_value(snapshot)?;
        for record in &records {
            let input = self.input(record.input_index)?;
            if input.node_id != record.node_id || input.field_name != record.field_name {
                return Err(Error::UnknownInput(format!(
                    "index {} is '{}.{}' here, snapshot has '{}.{}'",
                    record.input_index, input.node_id, input.field_name, record.node_id, record.field_name
                )));
            }
            if input.field.lock_key() != record.field.lock_key() {
                return Err(Error::TypeLock {
                    input_index: record.input_index,
                    locked: input.field.kind(),
                    attempted: format!("a {} from the snapshot", lock_label(&record.field)),
                });
            }
        }
        for record in records {
            let input = self.input_mut(record.input_index)?;
            if input.field != record.field {
                input.field = record.field;
                input.modified = true;
            }
        }
        Ok(())
    }
}

fn lock_label(field: &Field) -> String {
    match field.lock_key() {
        (kind, Some(item)) => format!("{:?} field of {:?}", kind, item),
        (kind, None) => format!("{:?} field", kind),
    }
}
