use evalexpr::{build_operator_tree, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node as EvalNode};
use serde_json::Value;
use tracing::debug;
use crate::error::{Error, Result, ValidationError};
use crate::inputs::InputStore;

pub const PAIRED_BOUNDS: &str = "paired_bounds";

/// A whole-workflow constraint spanning several inputs.
#[derive(Debug)]
pub enum WorkflowRule {
    /// `low <= high`, `min <= max` and `x_start <= x_end` for inputs exposed on
    /// the same node.
    PairedBounds,
    /// Boolean expression over `in_<index>` variables. A false result, or an
    /// expression that cannot be evaluated, is a validation failure.
    Expression {
        name: String,
        source: String,
        tree: EvalNode,
    },
}

pub(crate) fn builtin_rules() -> Vec<WorkflowRule> {
    vec![WorkflowRule::PairedBounds]
}

impl WorkflowRule {
    /// Compile an expression rule, e.g. `in_2 * in_3 <= 1048576`.
    pub fn expression(name: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let source = source.into();
        let tree = build_operator_tree(&source).map_err(|e| {
            Error::Validation(ValidationError::rule(
                name.clone(),
                format!("invalid expression '{}': {}", source, e),
            ))
        })?;
        Ok(WorkflowRule::Expression { name, source, tree })
    }

    pub fn name(&self) -> &str {
        match self {
            WorkflowRule::PairedBounds => PAIRED_BOUNDS,
            WorkflowRule::Expression { name, .. } => name,
        }
    }

    pub fn check(&self, store: &InputStore) -> Vec<ValidationError> {
        match self {
            WorkflowRule::PairedBounds => check_paired_bounds(store),
            WorkflowRule::Expression { name, source, tree } => {
                let context = expression_context(store);
                match tree.eval_boolean_with_context(&context) {
                    Ok(true) => Vec::new(),
                    Ok(false) => vec![ValidationError::rule(name.clone(), format!("'{}' does not hold", source))],
                    Err(e) => vec![ValidationError::rule(
                        name.clone(),
                        format!("cannot evaluate '{}': {}", source, e),
                    )],
                }
            }
        }
    }
}

fn expression_context(store: &InputStore) -> HashMapContext<DefaultNumericTypes> {
    let mut context = HashMapContext::<DefaultNumericTypes>::new();
    for input in store.iter() {
        let value = match input.field().value() {
            Value::String(s) => Some(evalexpr::Value::String(s)),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Some(evalexpr::Value::Int(i))
                } else {
                    n.as_f64().map(evalexpr::Value::Float)
                }
            }
            Value::Bool(b) => Some(evalexpr::Value::Boolean(b)),
            _ => None,
        };
        if let Some(v) = value {
            let _ = context.set_value(format!("in_{}", input.input_index), v);
        }
    }
    context
}

/// Name of the upper partner for a lower-bound field name.
fn upper_partner(field_name: &str) -> Option<String> {
    match field_name {
        "low" => Some("high".to_string()),
        "min" => Some("max".to_string()),
        name => name.strip_suffix("_start").map(|stem| format!("{}_end", stem)),
    }
}

fn check_paired_bounds(store: &InputStore) -> Vec<ValidationError> {
    let mut problems = Vec::new();
    for lower in store.iter() {
        let Some(partner) = upper_partner(&lower.field_name) else {
            continue;
        };
        let Some(upper) = store
            .iter()
            .find(|i| i.node_id == lower.node_id && i.field_name == partner)
        else {
            continue;
        };
        let (Some(lo), Some(hi)) = (lower.field().value().as_f64(), upper.field().value().as_f64()) else {
            continue;
        };
        if lo > hi {
            debug!(node_id = %lower.node_id, lower = lo, upper = hi, "Paired bounds out of order");
            problems.push(ValidationError::rule(
                PAIRED_BOUNDS,
                format!(
                    "input {} ({}) = {} is greater than input {} ({}) = {}",
                    lower.input_index, lower.label, lo, upper.input_index, upper.label, hi
                ),
            ));
        }
    }
    problems
}
