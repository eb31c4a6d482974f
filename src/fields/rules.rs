use serde_json::Value;
use crate::fields::resolver::{
    FieldResolver, RawField, PRIORITY_ENUM_OPTIONS, PRIORITY_EXPLICIT_TYPE, PRIORITY_NAME_PATTERN,
    PRIORITY_NODE_KIND, PRIORITY_NUMERIC_BOUNDS, PRIORITY_VALUE_SHAPE,
};
use crate::fields::{
    as_integral, board_id, bounding_box_from, collection_items, color_from, describe, image_name,
    is_bounding_box_record, is_color_record, is_model_record, item_matches, model_from,
    BoardField, BooleanField, CollectionField, EnumField, Field, FieldKind, FloatField, ImageField,
    IntegerField, ItemKind, ModelField, StringField,
};

/// Scheduler names offered when a `scheduler` input carries no option list.
pub const SCHEDULERS: &[&str] = &[
    "ddim", "ddpm", "deis", "deis_k", "lms", "lms_k", "pndm", "heun", "heun_k", "euler",
    "euler_k", "euler_a", "kdpm_2", "kdpm_2_k", "kdpm_2_a", "kdpm_2_a_k", "dpmpp_2s",
    "dpmpp_2s_k", "dpmpp_2m", "dpmpp_2m_k", "dpmpp_2m_sde", "dpmpp_2m_sde_k", "dpmpp_3m",
    "dpmpp_3m_k", "dpmpp_sde", "dpmpp_sde_k", "unipc", "unipc_k", "lcm", "tcd",
];

/// Target of a rule: a variant, plus the element type for collections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Target {
    pub kind: FieldKind,
    pub item: Option<ItemKind>,
}

impl Target {
    const fn of(kind: FieldKind) -> Self {
        Self { kind, item: None }
    }

    const fn collection(item: ItemKind) -> Self {
        Self { kind: FieldKind::Collection, item: Some(item) }
    }
}

pub(crate) fn register_builtin(resolver: &mut FieldResolver) {
    resolver.register_fn(
        "explicit-type",
        PRIORITY_EXPLICIT_TYPE,
        |raw| explicit_target(raw).is_some(),
        |raw| {
            let target = explicit_target(raw).ok_or("type tag disappeared")?;
            build(target, raw)
        },
    );
    resolver.register_fn(
        "name-pattern",
        PRIORITY_NAME_PATTERN,
        |raw| name_target(raw.field_name).is_some_and(|t| fits(t, raw.value())),
        |raw| {
            let target = name_target(raw.field_name).ok_or("name pattern disappeared")?;
            build(target, raw)
        },
    );
    resolver.register_fn(
        "node-kind",
        PRIORITY_NODE_KIND,
        |raw| node_kind_target(raw).is_some(),
        |raw| {
            let target = node_kind_target(raw).ok_or("node kind disappeared")?;
            build(target, raw)
        },
    );
    resolver.register_fn(
        "value-shape",
        PRIORITY_VALUE_SHAPE,
        |raw| shape_target(raw).is_some(),
        |raw| {
            let target = shape_target(raw).ok_or("value shape disappeared")?;
            build(target, raw)
        },
    );
    resolver.register_fn(
        "enum-options",
        PRIORITY_ENUM_OPTIONS,
        |raw| options(raw).is_some_and(|o| !o.is_empty()),
        |raw| build(Target::of(FieldKind::Enum), raw),
    );
    resolver.register_fn(
        "numeric-bounds",
        PRIORITY_NUMERIC_BOUNDS,
        |raw| bounds_target(raw).is_some(),
        |raw| {
            let target = bounds_target(raw).ok_or("bounds disappeared")?;
            build(target, raw)
        },
    );
}

/// Map a type tag such as `"IntegerField"`, `"integer"` or
/// `{"name": "ImageField", "cardinality": "COLLECTION"}` to a target.
pub fn parse_type_tag(tag: &Value) -> Option<Target> {
    let (name, cardinality) = match tag {
        Value::String(s) => (s.as_str(), None),
        Value::Object(map) => (
            map.get("name").and_then(|v| v.as_str())?,
            map.get("cardinality").and_then(|v| v.as_str()),
        ),
        _ => return None,
    };

    let normalized: String = name
        .chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .collect::<String>()
        .to_ascii_lowercase();
    let normalized = normalized.strip_suffix("field").unwrap_or(&normalized).to_string();

    let as_collection = matches!(cardinality, Some(c) if c.eq_ignore_ascii_case("collection"));
    if let Some(item) = normalized
        .strip_suffix("collection")
        .or_else(|| normalized.strip_prefix("list"))
        .and_then(item_kind_named)
    {
        return Some(Target::collection(item));
    }
    if as_collection {
        return item_kind_named(&normalized).map(Target::collection);
    }

    let kind = match normalized.as_str() {
        "string" | "str" => FieldKind::String,
        "integer" | "int" => FieldKind::Integer,
        "float" | "number" => FieldKind::Float,
        "boolean" | "bool" => FieldKind::Boolean,
        "enum" | "choice" => FieldKind::Enum,
        "image" => FieldKind::Image,
        "board" => FieldKind::Board,
        "color" => FieldKind::Color,
        "boundingbox" | "bbox" => FieldKind::BoundingBox,
        other if other.ends_with("model") || other == "modelidentifier" => FieldKind::Model,
        _ => return None,
    };
    Some(Target::of(kind))
}

fn item_kind_named(name: &str) -> Option<ItemKind> {
    match name {
        "string" | "str" => Some(ItemKind::String),
        "integer" | "int" => Some(ItemKind::Integer),
        "float" | "number" => Some(ItemKind::Float),
        "boolean" | "bool" => Some(ItemKind::Boolean),
        "image" => Some(ItemKind::Image),
        _ => None,
    }
}

fn explicit_target(raw: &RawField<'_>) -> Option<Target> {
    raw.attr_any(&["type", "field_type"]).and_then(parse_type_tag)
}

/// Conventional input names and the variant they imply.
pub fn name_target(field_name: &str) -> Option<Target> {
    let name = field_name.to_ascii_lowercase();
    let kind = match name.as_str() {
        "board" => FieldKind::Board,
        "image" | "mask" => FieldKind::Image,
        "color" => FieldKind::Color,
        "bounding_box" | "bbox" => FieldKind::BoundingBox,
        "model" => FieldKind::Model,
        "scheduler" => FieldKind::Enum,
        "prompt" => FieldKind::String,
        "seed" | "width" | "height" | "steps" => FieldKind::Integer,
        "cfg_scale" | "cfg_rescale_multiplier" | "denoising_start" | "denoising_end" | "strength" => {
            FieldKind::Float
        }
        n if n.ends_with("_image") || n.ends_with("_mask") => FieldKind::Image,
        n if n.ends_with("_color") => FieldKind::Color,
        n if n.ends_with("_model") => FieldKind::Model,
        n if n.ends_with("_prompt") => FieldKind::String,
        _ => return None,
    };
    Some(Target::of(kind))
}

/// Primitive node types and the single input that carries their value.
const PRIMITIVE_NODES: &[(&str, &str, Target)] = &[
    ("string", "value", Target::of(FieldKind::String)),
    ("integer", "value", Target::of(FieldKind::Integer)),
    ("float", "value", Target::of(FieldKind::Float)),
    ("boolean", "value", Target::of(FieldKind::Boolean)),
    ("image", "image", Target::of(FieldKind::Image)),
    ("color", "color", Target::of(FieldKind::Color)),
    ("board", "board", Target::of(FieldKind::Board)),
    ("model_identifier", "model", Target::of(FieldKind::Model)),
    ("string_collection", "collection", Target::collection(ItemKind::String)),
    ("integer_collection", "collection", Target::collection(ItemKind::Integer)),
    ("float_collection", "collection", Target::collection(ItemKind::Float)),
    ("boolean_collection", "collection", Target::collection(ItemKind::Boolean)),
    ("image_collection", "collection", Target::collection(ItemKind::Image)),
    ("rand_int", "low", Target::of(FieldKind::Integer)),
    ("rand_int", "high", Target::of(FieldKind::Integer)),
];

fn node_kind_target(raw: &RawField<'_>) -> Option<Target> {
    let node_type = raw.node.invocation_type();
    PRIMITIVE_NODES
        .iter()
        .find(|(kind, field, _)| *kind == node_type && *field == raw.field_name)
        .map(|(_, _, target)| *target)
}

fn shape_target(raw: &RawField<'_>) -> Option<Target> {
    let value = raw.value()?;
    let kind = match value {
        v if is_color_record(v) => FieldKind::Color,
        v if is_bounding_box_record(v) => FieldKind::BoundingBox,
        v if is_model_record(v) => FieldKind::Model,
        Value::Object(map) if map.contains_key("image_name") => FieldKind::Image,
        Value::Object(map) if map.contains_key("board_id") => FieldKind::Board,
        Value::Bool(_) => FieldKind::Boolean,
        Value::Number(n) if n.is_i64() || n.is_u64() => FieldKind::Integer,
        Value::Number(_) => FieldKind::Float,
        // A string with an option list is an enumeration, left to the next rule.
        Value::String(_) if options(raw).is_none() => FieldKind::String,
        Value::Array(items) => {
            let first = items.first()?;
            let item = [ItemKind::Image, ItemKind::Boolean, ItemKind::Integer, ItemKind::Float, ItemKind::String]
                .into_iter()
                .find(|k| match k {
                    ItemKind::Image => first.is_object() && image_name(first).is_some(),
                    ItemKind::Integer => first.is_i64() || first.is_u64(),
                    other => item_matches(*other, first),
                })?;
            if !items.iter().all(|i| item_matches(item, i)) {
                return None;
            }
            return Some(Target::collection(item));
        }
        _ => return None,
    };
    Some(Target::of(kind))
}

fn options(raw: &RawField<'_>) -> Option<Vec<String>> {
    let list = raw.attr_any(&["options", "choices", "enum"])?.as_array()?;
    list.iter().map(|o| o.as_str().map(str::to_string)).collect()
}

const MIN_KEYS: &[&str] = &["minimum", "ge", "min"];
const MAX_KEYS: &[&str] = &["maximum", "le", "max"];
const EXCLUSIVE_MIN_KEYS: &[&str] = &["exclusiveMinimum", "exclusive_minimum", "gt"];
const EXCLUSIVE_MAX_KEYS: &[&str] = &["exclusiveMaximum", "exclusive_maximum", "lt"];
const STEP_KEYS: &[&str] = &["multipleOf", "multiple_of"];

fn bound_values<'a>(raw: &RawField<'a>) -> Vec<&'a Value> {
    [MIN_KEYS, MAX_KEYS, EXCLUSIVE_MIN_KEYS, EXCLUSIVE_MAX_KEYS, STEP_KEYS]
        .iter()
        .filter_map(|keys| raw.attr_any(keys))
        .filter(|v| v.is_number())
        .collect()
}

fn bounds_target(raw: &RawField<'_>) -> Option<Target> {
    let bounds = bound_values(raw);
    if bounds.is_empty() {
        return None;
    }
    let integral = |v: &Value| v.is_i64() || v.is_u64();
    let all_integral = bounds.iter().all(|v| integral(*v)) && raw.value().is_none_or(integral);
    if all_integral {
        Some(Target::of(FieldKind::Integer))
    } else if raw.value().is_none_or(|v| v.is_number()) {
        Some(Target::of(FieldKind::Float))
    } else {
        None
    }
}

/// Whether an inline value (if any) could be held by `target`.
fn fits(target: Target, value: Option<&Value>) -> bool {
    let Some(value) = value else {
        return true;
    };
    match target.kind {
        FieldKind::String | FieldKind::Enum => value.is_string(),
        FieldKind::Integer => as_integral(value).is_some(),
        FieldKind::Float => value.is_number(),
        FieldKind::Boolean => value.is_boolean(),
        FieldKind::Image => image_name(value).is_some(),
        FieldKind::Board => board_id(value).is_some(),
        FieldKind::Collection => target
            .item
            .is_some_and(|item| collection_items(item, value).is_ok()),
        FieldKind::Color => is_color_record(value),
        FieldKind::BoundingBox => is_bounding_box_record(value),
        FieldKind::Model => value.is_object(),
    }
}

fn integer_attr(raw: &RawField<'_>, keys: &[&str]) -> Result<Option<i64>, String> {
    match raw.attr_any(keys) {
        None => Ok(None),
        Some(v) => as_integral(v)
            .map(Some)
            .ok_or_else(|| format!("bound {} is not an integer", v)),
    }
}

fn float_attr(raw: &RawField<'_>, keys: &[&str]) -> Result<Option<f64>, String> {
    match raw.attr_any(keys) {
        None => Ok(None),
        Some(v) => v
            .as_f64()
            .map(Some)
            .ok_or_else(|| format!("bound {} is not a number", v)),
    }
}

fn length_attr(raw: &RawField<'_>, keys: &[&str]) -> Option<usize> {
    raw.attr_any(keys)
        .and_then(|v| v.as_u64())
        .and_then(|n| usize::try_from(n).ok())
}

/// Build the variant for `target` from the raw input, carrying over its inline
/// value and any constraints it declares.
pub fn build(target: Target, raw: &RawField<'_>) -> Result<Field, String> {
    let value = raw.value().cloned().unwrap_or(Value::Null);
    if !fits(target, raw.value()) {
        return Err(format!("inline value is {}, which a {:?} field cannot hold", describe(&value), target.kind));
    }

    let mut field = match target.kind {
        FieldKind::String => Field::String(StringField {
            value: None,
            min_length: length_attr(raw, &["minLength", "min_length"]),
            max_length: length_attr(raw, &["maxLength", "max_length"]),
        }),
        FieldKind::Integer => {
            let minimum = match integer_attr(raw, EXCLUSIVE_MIN_KEYS)? {
                Some(gt) => Some(gt.checked_add(1).ok_or("bound out of range")?),
                None => integer_attr(raw, MIN_KEYS)?,
            };
            let maximum = match integer_attr(raw, EXCLUSIVE_MAX_KEYS)? {
                Some(lt) => Some(lt.checked_sub(1).ok_or("bound out of range")?),
                None => integer_attr(raw, MAX_KEYS)?,
            };
            Field::Integer(IntegerField {
                value: None,
                minimum,
                maximum,
                multiple_of: integer_attr(raw, STEP_KEYS)?,
            })
        }
        FieldKind::Float => {
            let (minimum, exclusive_minimum) = match float_attr(raw, MIN_KEYS)? {
                Some(ge) => (Some(ge), false),
                None => {
                    let gt = float_attr(raw, EXCLUSIVE_MIN_KEYS)?;
                    (gt, gt.is_some())
                }
            };
            let (maximum, exclusive_maximum) = match float_attr(raw, MAX_KEYS)? {
                Some(le) => (Some(le), false),
                None => {
                    let lt = float_attr(raw, EXCLUSIVE_MAX_KEYS)?;
                    (lt, lt.is_some())
                }
            };
            Field::Float(FloatField {
                value: None,
                minimum,
                maximum,
                exclusive_minimum,
                exclusive_maximum,
            })
        }
        FieldKind::Boolean => Field::Boolean(BooleanField::default()),
        FieldKind::Enum => {
            let options = match options(raw) {
                Some(list) if !list.is_empty() => list,
                _ if raw.field_name.eq_ignore_ascii_case("scheduler") => {
                    SCHEDULERS.iter().map(|s| s.to_string()).collect()
                }
                _ => return Err("enumeration without a list of options".to_string()),
            };
            Field::Enum(EnumField { value: None, options })
        }
        FieldKind::Image => Field::Image(ImageField::default()),
        FieldKind::Board => Field::Board(BoardField::default()),
        FieldKind::Collection => Field::Collection(CollectionField {
            item_kind: target.item.ok_or("collection without an element type")?,
            items: Vec::new(),
            min_items: length_attr(raw, &["minItems", "min_items", "min_length"]),
            max_items: length_attr(raw, &["maxItems", "max_items", "max_length"]),
        }),
        FieldKind::Color => {
            return match raw.value() {
                Some(v) => color_from(v).map(Field::Color),
                None => Ok(Field::Color(Default::default())),
            };
        }
        FieldKind::BoundingBox => {
            return match raw.value() {
                Some(v) => bounding_box_from(v).map(Field::BoundingBox),
                None => Ok(Field::BoundingBox(Default::default())),
            };
        }
        FieldKind::Model => {
            return match raw.value() {
                Some(v) => model_from(v).map(Field::Model),
                None => Ok(Field::Model(ModelField::default())),
            };
        }
    };

    field.accept(value)?;
    Ok(field)
}
