pub mod resolver;
pub mod rules;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use resolver::{FieldResolver, FieldRule, RawField};

/// Board id meaning "no board". Distinct from an unset board.
pub const UNCATEGORIZED_BOARD: &str = "none";
/// Board value asking the remote side to pick the board itself.
pub const AUTO_BOARD: &str = "auto";

/// 字段变体标签，用于类型锁定比较
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    String,
    Integer,
    Float,
    Boolean,
    Enum,
    Image,
    Board,
    Collection,
    Color,
    BoundingBox,
    Model,
}

/// Element type of a homogeneous collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    String,
    Integer,
    Float,
    Boolean,
    Image,
}

/// A resolved, typed input.
///
/// The first seven variants carry a single value; `Color`, `BoundingBox` and
/// `Model` are records addressed by named components. Serializing a `Field`
/// with serde gives the persistence encoding; `to_wire` gives what is written
/// into the graph on submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Field {
    String(StringField),
    Integer(IntegerField),
    Float(FloatField),
    Boolean(BooleanField),
    Enum(EnumField),
    Image(ImageField),
    Board(BoardField),
    Collection(CollectionField),
    Color(ColorField),
    BoundingBox(BoundingBoxField),
    Model(ModelField),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StringField {
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_length: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IntegerField {
    pub value: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multiple_of: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FloatField {
    pub value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
    /// `minimum` itself is out of range.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_minimum: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub exclusive_maximum: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BooleanField {
    pub value: Option<bool>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EnumField {
    pub value: Option<String>,
    pub options: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageField {
    pub image_name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoardField {
    /// `Some("none")` is the uncategorized board; `None` means not set.
    pub board_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollectionField {
    pub item_kind: ItemKind,
    pub items: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_items: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorField {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Default for ColorField {
    fn default() -> Self {
        Self { r: 0, g: 0, b: 0, a: 255 }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBoxField {
    pub x_min: i64,
    pub x_max: i64,
    pub y_min: i64,
    pub y_max: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
}

/// Model descriptor. `key` identifies the installed model; the other
/// components describe it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelField {
    pub key: Option<String>,
    pub hash: Option<String>,
    pub name: Option<String>,
    pub base: Option<String>,
    #[serde(rename = "type")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submodel_type: Option<String>,
}

impl Field {
    pub fn kind(&self) -> FieldKind {
        match self {
            Field::String(_) => FieldKind::String,
            Field::Integer(_) => FieldKind::Integer,
            Field::Float(_) => FieldKind::Float,
            Field::Boolean(_) => FieldKind::Boolean,
            Field::Enum(_) => FieldKind::Enum,
            Field::Image(_) => FieldKind::Image,
            Field::Board(_) => FieldKind::Board,
            Field::Collection(_) => FieldKind::Collection,
            Field::Color(_) => FieldKind::Color,
            Field::BoundingBox(_) => FieldKind::BoundingBox,
            Field::Model(_) => FieldKind::Model,
        }
    }

    /// What the type lock compares: the variant, plus the element type for
    /// collections.
    pub fn lock_key(&self) -> (FieldKind, Option<ItemKind>) {
        match self {
            Field::Collection(f) => (FieldKind::Collection, Some(f.item_kind)),
            other => (other.kind(), None),
        }
    }

    /// True for the record-shaped variants addressed by component name.
    pub fn is_structured(&self) -> bool {
        matches!(self, Field::Color(_) | Field::BoundingBox(_) | Field::Model(_))
    }

    /// Current value as plain JSON (`Null` when unset).
    pub fn value(&self) -> Value {
        match self {
            Field::String(f) => json!(f.value),
            Field::Integer(f) => json!(f.value),
            Field::Float(f) => json!(f.value),
            Field::Boolean(f) => json!(f.value),
            Field::Enum(f) => json!(f.value),
            Field::Image(f) => json!(f.image_name),
            Field::Board(f) => json!(f.board_id),
            Field::Collection(f) => Value::Array(f.items.clone()),
            Field::Color(f) => json!({ "r": f.r, "g": f.g, "b": f.b, "a": f.a }),
            Field::BoundingBox(f) => bounding_box_value(f),
            Field::Model(f) => model_value(f),
        }
    }

    /// Encoding written into the node's inline slot on submission.
    /// `None` leaves the slot untouched.
    pub fn to_wire(&self) -> Option<Value> {
        match self {
            Field::String(f) => f.value.as_ref().map(|v| json!(v)),
            Field::Integer(f) => f.value.map(|v| json!(v)),
            Field::Float(f) => f.value.map(|v| json!(v)),
            Field::Boolean(f) => f.value.map(|v| json!(v)),
            Field::Enum(f) => f.value.as_ref().map(|v| json!(v)),
            Field::Image(f) => f.image_name.as_ref().map(|n| json!({ "image_name": n })),
            Field::Board(f) => f.board_id.as_ref().map(|id| board_wire(id)),
            Field::Collection(f) => Some(Value::Array(f.items.clone())),
            Field::Color(_) | Field::BoundingBox(_) => Some(self.value()),
            Field::Model(f) => f.key.as_ref().map(|_| model_value(f)),
        }
    }

    /// Replace the value, keeping the variant. Fails when `value`'s shape does
    /// not fit this variant; range and option constraints are left to
    /// `validate`.
    pub fn accept(&mut self, value: Value) -> Result<(), String> {
        match self {
            Field::String(f) => f.value = nullable(value, |v| v.as_str().map(str::to_string), "a string")?,
            Field::Integer(f) => f.value = nullable(value, |v| as_integral(v), "an integer")?,
            Field::Float(f) => f.value = nullable(value, |v| v.as_f64(), "a number")?,
            Field::Boolean(f) => f.value = nullable(value, |v| v.as_bool(), "a boolean")?,
            Field::Enum(f) => f.value = nullable(value, |v| v.as_str().map(str::to_string), "an option name")?,
            Field::Image(f) => f.image_name = nullable(value, |v| image_name(v), "an image reference")?,
            Field::Board(f) => f.board_id = nullable(value, |v| board_id(v), "a board reference")?,
            Field::Collection(f) => {
                f.items = collection_items(f.item_kind, &value)?;
            }
            Field::Color(f) => *f = color_from(&value)?,
            Field::BoundingBox(f) => *f = bounding_box_from(&value)?,
            Field::Model(f) => *f = model_from(&value)?,
        }
        Ok(())
    }

    /// Read one named component of a structured field.
    pub fn component(&self, name: &str) -> Option<Value> {
        if !self.is_structured() {
            return None;
        }
        self.value().get(name).cloned()
    }

    /// Update one named component of a structured field.
    pub fn set_component(&mut self, name: &str, component: Value) -> Result<(), String> {
        if !self.is_structured() {
            return Err(format!("{:?} fields have no named components", self.kind()));
        }
        let mut record = match self.value() {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        let known = match self {
            Field::Color(_) => &["r", "g", "b", "a"][..],
            Field::BoundingBox(_) => &["x_min", "x_max", "y_min", "y_max", "score"][..],
            _ => &["key", "hash", "name", "base", "type", "submodel_type"][..],
        };
        if !known.contains(&name) {
            return Err(format!("{:?} fields have no component '{}'", self.kind(), name));
        }
        record.insert(name.to_string(), component);
        self.accept(Value::Object(record))
    }

    /// Per-field constraint check. An empty list means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        match self {
            Field::String(f) => {
                if let Some(v) = &f.value {
                    let len = v.chars().count();
                    if let Some(min) = f.min_length.filter(|min| len < *min) {
                        problems.push(format!("length {} is below the minimum of {}", len, min));
                    }
                    if let Some(max) = f.max_length.filter(|max| len > *max) {
                        problems.push(format!("length {} exceeds the maximum of {}", len, max));
                    }
                }
            }
            Field::Integer(f) => {
                if let Some(v) = f.value {
                    if let Some(min) = f.minimum.filter(|min| v < *min) {
                        problems.push(format!("{} is below the minimum of {}", v, min));
                    }
                    if let Some(max) = f.maximum.filter(|max| v > *max) {
                        problems.push(format!("{} exceeds the maximum of {}", v, max));
                    }
                    if let Some(step) = f.multiple_of.filter(|step| *step != 0 && v % *step != 0) {
                        problems.push(format!("{} is not a multiple of {}", v, step));
                    }
                }
            }
            Field::Float(f) => {
                if let Some(v) = f.value {
                    if !v.is_finite() {
                        problems.push(format!("{} is not a finite number", v));
                    }
                    if let Some(min) = f.minimum {
                        if f.exclusive_minimum && v <= min {
                            problems.push(format!("{} must be greater than {}", v, min));
                        } else if v < min {
                            problems.push(format!("{} is below the minimum of {}", v, min));
                        }
                    }
                    if let Some(max) = f.maximum {
                        if f.exclusive_maximum && v >= max {
                            problems.push(format!("{} must be less than {}", v, max));
                        } else if v > max {
                            problems.push(format!("{} exceeds the maximum of {}", v, max));
                        }
                    }
                }
            }
            Field::Boolean(_) => {}
            Field::Enum(f) => {
                if let Some(v) = &f.value {
                    if !f.options.iter().any(|o| o == v) {
                        problems.push(format!("'{}' is not one of {:?}", v, f.options));
                    }
                }
            }
            Field::Image(f) => {
                if f.image_name.as_deref().is_some_and(|n| n.trim().is_empty()) {
                    problems.push("image name is empty".to_string());
                }
            }
            Field::Board(f) => {
                if f.board_id.as_deref().is_some_and(|id| id.trim().is_empty()) {
                    problems.push("board id is empty".to_string());
                }
            }
            Field::Collection(f) => {
                if let Some(min) = f.min_items.filter(|min| f.items.len() < *min) {
                    problems.push(format!("{} items, at least {} required", f.items.len(), min));
                }
                if let Some(max) = f.max_items.filter(|max| f.items.len() > *max) {
                    problems.push(format!("{} items, at most {} allowed", f.items.len(), max));
                }
                for (position, item) in f.items.iter().enumerate() {
                    if !item_matches(f.item_kind, item) {
                        problems.push(format!(
                            "item {} is {}, not a {:?}",
                            position,
                            describe(item),
                            f.item_kind
                        ));
                    }
                }
            }
            Field::Color(_) => {}
            Field::BoundingBox(f) => {
                if f.x_min > f.x_max {
                    problems.push(format!("x_min {} is greater than x_max {}", f.x_min, f.x_max));
                }
                if f.y_min > f.y_max {
                    problems.push(format!("y_min {} is greater than y_max {}", f.y_min, f.y_max));
                }
                if let Some(score) = f.score.filter(|s| !(0.0..=1.0).contains(s)) {
                    problems.push(format!("score {} is outside 0..1", score));
                }
            }
            Field::Model(f) => {
                if f.key.as_deref().is_none_or(|k| k.trim().is_empty()) {
                    problems.push("no model selected".to_string());
                }
            }
        }
        problems
    }
}

fn nullable<T>(value: Value, read: impl Fn(&Value) -> Option<T>, expected: &str) -> Result<Option<T>, String> {
    if value.is_null() {
        return Ok(None);
    }
    read(&value)
        .map(Some)
        .ok_or_else(|| format!("expected {}, got {}", expected, describe(&value)))
}

/// Short human description of a JSON value's shape.
pub fn describe(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "a boolean".to_string(),
        Value::Number(n) if n.is_f64() => "a float".to_string(),
        Value::Number(_) => "an integer".to_string(),
        Value::String(_) => "a string".to_string(),
        Value::Array(items) => format!("a list of {}", items.len()),
        Value::Object(map) => {
            let keys: Vec<&str> = map.keys().map(String::as_str).collect();
            format!("a record with keys {:?}", keys)
        }
    }
}

/// Integral number, accepting floats with no fractional part.
pub(crate) fn as_integral(value: &Value) -> Option<i64> {
    if let Some(i) = value.as_i64() {
        return Some(i);
    }
    value
        .as_f64()
        .filter(|f| f.fract() == 0.0 && *f >= i64::MIN as f64 && *f <= i64::MAX as f64)
        .map(|f| f as i64)
}

pub(crate) fn image_name(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("image_name").and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

pub(crate) fn board_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map.get("board_id").and_then(|v| v.as_str()).map(str::to_string),
        _ => None,
    }
}

/// Wire shape for a board reference: the remote side wants a record, except
/// for the `auto` keyword which it takes as a bare string.
pub fn board_wire(id: &str) -> Value {
    if id == AUTO_BOARD {
        json!(AUTO_BOARD)
    } else {
        json!({ "board_id": id })
    }
}

pub(crate) fn item_matches(kind: ItemKind, value: &Value) -> bool {
    match kind {
        ItemKind::String => value.is_string(),
        ItemKind::Integer => as_integral(value).is_some(),
        ItemKind::Float => value.is_number(),
        ItemKind::Boolean => value.is_boolean(),
        ItemKind::Image => image_name(value).is_some(),
    }
}

pub(crate) fn collection_items(kind: ItemKind, value: &Value) -> Result<Vec<Value>, String> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => return Err(format!("expected a list, got {}", describe(other))),
    };
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            if !item_matches(kind, item) {
                return Err(format!("item {} is {}, expected {:?}", i, describe(item), kind));
            }
            Ok(match kind {
                ItemKind::Image => json!({ "image_name": image_name(item).unwrap_or_default() }),
                ItemKind::Integer => json!(as_integral(item).unwrap_or_default()),
                _ => item.clone(),
            })
        })
        .collect()
}

pub(crate) fn is_color_record(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| ["r", "g", "b"].iter().all(|k| m.contains_key(*k)))
}

pub(crate) fn color_from(value: &Value) -> Result<ColorField, String> {
    if !is_color_record(value) {
        return Err(format!("expected an r/g/b/a record, got {}", describe(value)));
    }
    let channel = |key: &str, default: Option<u8>| -> Result<u8, String> {
        match value.get(key) {
            None | Some(Value::Null) => default.ok_or_else(|| format!("channel '{}' is missing", key)),
            Some(v) => as_integral(v)
                .and_then(|i| u8::try_from(i).ok())
                .ok_or_else(|| format!("channel '{}' must be an integer in 0..=255", key)),
        }
    };
    Ok(ColorField {
        r: channel("r", None)?,
        g: channel("g", None)?,
        b: channel("b", None)?,
        a: channel("a", Some(255))?,
    })
}

pub(crate) fn is_bounding_box_record(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| ["x_min", "x_max", "y_min", "y_max"].iter().all(|k| m.contains_key(*k)))
}

fn bounding_box_value(f: &BoundingBoxField) -> Value {
    let mut record = json!({
        "x_min": f.x_min,
        "x_max": f.x_max,
        "y_min": f.y_min,
        "y_max": f.y_max,
    });
    if let (Some(score), Some(map)) = (f.score, record.as_object_mut()) {
        map.insert("score".to_string(), json!(score));
    }
    record
}

pub(crate) fn bounding_box_from(value: &Value) -> Result<BoundingBoxField, String> {
    if !is_bounding_box_record(value) {
        return Err(format!("expected an x_min/x_max/y_min/y_max record, got {}", describe(value)));
    }
    let coordinate = |key: &str| {
        value
            .get(key)
            .and_then(as_integral)
            .ok_or_else(|| format!("'{}' must be an integer", key))
    };
    let score = match value.get("score") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v.as_f64().ok_or("'score' must be a number")?),
    };
    Ok(BoundingBoxField {
        x_min: coordinate("x_min")?,
        x_max: coordinate("x_max")?,
        y_min: coordinate("y_min")?,
        y_max: coordinate("y_max")?,
        score,
    })
}

pub(crate) fn is_model_record(value: &Value) -> bool {
    value
        .as_object()
        .is_some_and(|m| m.contains_key("key") && (m.contains_key("base") || m.contains_key("hash")))
}

fn model_value(f: &ModelField) -> Value {
    let mut record = Map::new();
    let components = [
        ("key", &f.key),
        ("hash", &f.hash),
        ("name", &f.name),
        ("base", &f.base),
        ("type", &f.model_type),
        ("submodel_type", &f.submodel_type),
    ];
    for (name, component) in components {
        if let Some(v) = component {
            record.insert(name.to_string(), json!(v));
        }
    }
    if record.is_empty() {
        Value::Null
    } else {
        Value::Object(record)
    }
}

pub(crate) fn model_from(value: &Value) -> Result<ModelField, String> {
    let map = match value {
        Value::Null => return Ok(ModelField::default()),
        Value::Object(map) => map,
        other => return Err(format!("expected a model record, got {}", describe(other))),
    };
    let text = |key: &str| -> Result<Option<String>, String> {
        match map.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(format!("model component '{}' must be a string, got {}", key, describe(other))),
        }
    };
    Ok(ModelField {
        key: text("key")?,
        hash: text("hash")?,
        name: text("name")?,
        base: text("base")?,
        model_type: text("type")?,
        submodel_type: text("submodel_type")?,
    })
}
