use serde_json::Value;
use tracing::{debug, trace};
use crate::error::{Error, Result};
use crate::fields::{describe, rules, Field};
use crate::graph::{GraphNode, NodeInput};

/// Built-in rule priorities. Lower runs first.
pub const PRIORITY_EXPLICIT_TYPE: u32 = 100;
pub const PRIORITY_NAME_PATTERN: u32 = 200;
pub const PRIORITY_NODE_KIND: u32 = 300;
pub const PRIORITY_VALUE_SHAPE: u32 = 400;
pub const PRIORITY_ENUM_OPTIONS: u32 = 500;
pub const PRIORITY_NUMERIC_BOUNDS: u32 = 600;

/// The raw description of one input as it appears in the document.
#[derive(Debug, Clone, Copy)]
pub struct RawField<'a> {
    pub node: &'a GraphNode,
    pub field_name: &'a str,
    pub input: &'a NodeInput,
}

impl<'a> RawField<'a> {
    pub fn new(node: &'a GraphNode, field_name: &'a str, input: &'a NodeInput) -> Self {
        Self { node, field_name, input }
    }

    /// Inline value, treating an explicit `null` as absent.
    pub fn value(&self) -> Option<&'a Value> {
        self.input.value.as_ref().filter(|v| !v.is_null())
    }

    /// Any extra attribute on the raw input (`options`, `minimum`, `type`, ...).
    pub fn attr(&self, key: &str) -> Option<&'a Value> {
        self.input.extra.get(key).filter(|v| !v.is_null())
    }

    /// First present attribute among `keys`.
    pub fn attr_any(&self, keys: &[&str]) -> Option<&'a Value> {
        keys.iter().find_map(|k| self.attr(k))
    }

    pub fn shape(&self) -> String {
        let mut keys: Vec<&str> = self.input.extra.keys().map(String::as_str).collect();
        if self.input.value.is_some() {
            keys.insert(0, "value");
        }
        let value = self
            .input
            .value
            .as_ref()
            .map(describe)
            .unwrap_or_else(|| "absent".to_string());
        format!(
            "node type '{}', keys {:?}, value {}",
            self.node.invocation_type(),
            keys,
            value
        )
    }
}

pub type Predicate = Box<dyn Fn(&RawField<'_>) -> bool + Send + Sync>;
pub type Builder = Box<dyn Fn(&RawField<'_>) -> std::result::Result<Field, String> + Send + Sync>;

/// A (predicate, builder, priority) entry of the resolver chain.
pub struct FieldRule {
    name: String,
    priority: u32,
    predicate: Predicate,
    builder: Builder,
}

impl FieldRule {
    pub fn new<P, B>(name: impl Into<String>, priority: u32, predicate: P, builder: B) -> Self
    where
        P: Fn(&RawField<'_>) -> bool + Send + Sync + 'static,
        B: Fn(&RawField<'_>) -> std::result::Result<Field, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            priority,
            predicate: Box::new(predicate),
            builder: Box::new(builder),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn priority(&self) -> u32 {
        self.priority
    }
}

impl std::fmt::Debug for FieldRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldRule")
            .field("name", &self.name)
            .field("priority", &self.priority)
            .finish_non_exhaustive()
    }
}

/// 字段解析器：按优先级顺序扫描规则，第一个匹配的规则胜出
#[derive(Debug)]
pub struct FieldResolver {
    rules: Vec<FieldRule>,
}

impl Default for FieldResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl FieldResolver {
    /// Resolver carrying the built-in rule chain.
    pub fn new() -> Self {
        let mut resolver = Self::empty();
        rules::register_builtin(&mut resolver);
        resolver
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    /// Insert a rule at its priority. Rules sharing a priority keep
    /// registration order.
    pub fn register(&mut self, rule: FieldRule) {
        let position = self
            .rules
            .iter()
            .position(|r| r.priority > rule.priority)
            .unwrap_or(self.rules.len());
        debug!(rule = %rule.name, priority = rule.priority, position, "Registering field rule");
        self.rules.insert(position, rule);
    }

    /// Shorthand for `register(FieldRule::new(..))`.
    pub fn register_fn<P, B>(&mut self, name: impl Into<String>, priority: u32, predicate: P, builder: B)
    where
        P: Fn(&RawField<'_>) -> bool + Send + Sync + 'static,
        B: Fn(&RawField<'_>) -> std::result::Result<Field, String> + Send + Sync + 'static,
    {
        self.register(FieldRule::new(name, priority, predicate, builder));
    }

    pub fn rules(&self) -> impl Iterator<Item = &FieldRule> {
        self.rules.iter()
    }

    pub fn resolve(&self, node: &GraphNode, field_name: &str, input: &NodeInput) -> Result<Field> {
        let raw = RawField::new(node, field_name, input);

        for rule in &self.rules {
            if !(rule.predicate)(&raw) {
                continue;
            }
            trace!(node_id = %node.id, field_name, rule = %rule.name, "Field rule matched");
            return (rule.builder)(&raw).map_err(|detail| Error::Resolution {
                node_id: node.id.clone(),
                field_name: field_name.to_string(),
                shape: raw.shape(),
                detail: format!("rule '{}' failed: {}", rule.name, detail),
            });
        }

        Err(Error::Resolution {
            node_id: node.id.clone(),
            field_name: field_name.to_string(),
            shape: raw.shape(),
            detail: "no rule matched".to_string(),
        })
    }
}
