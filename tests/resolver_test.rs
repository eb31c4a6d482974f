mod common;

use flowgate::fields::resolver::{PRIORITY_EXPLICIT_TYPE, PRIORITY_NAME_PATTERN};
use flowgate::fields::rules::{parse_type_tag, SCHEDULERS};
use flowgate::fields::{Field, FieldKind, FieldResolver, ItemKind, StringField};
use flowgate::graph::builder::DocumentBuilder;
use flowgate::graph::GraphDocument;
use flowgate::Error;
use serde_json::{json, Value};

/// Resolve `field` on a single node of `node_type` described by `record`.
fn resolve_raw(resolver: &FieldResolver, node_type: &str, field: &str, record: Value) -> flowgate::Result<Field> {
    let document = DocumentBuilder::new("one")
        .node("n", node_type).raw_input(field, record).done()
        .container("root", &[])
        .build_document()
        .unwrap();
    let node = document.node("n").unwrap();
    resolver.resolve(node, field, node.input(field).unwrap())
}

fn kind_of(node_type: &str, field: &str, record: Value) -> FieldKind {
    resolve_raw(&FieldResolver::new(), node_type, field, record)
        .expect("Resolution failed")
        .kind()
}

#[test]
fn test_fixture_inputs_resolve_to_expected_variants() {
    let document = GraphDocument::from_value(common::fixture("sdxl_text_to_image.json")).unwrap();
    let resolver = FieldResolver::new();

    let expect = [
        ("positive_prompt", "value", FieldKind::String),
        ("seed", "value", FieldKind::Integer),
        ("denoise", "steps", FieldKind::Integer),
        ("denoise", "cfg_scale", FieldKind::Float),
        ("denoise", "scheduler", FieldKind::Enum),
        ("save", "board", FieldKind::Board),
        ("model_loader", "model", FieldKind::Model),
        ("noise", "use_cpu", FieldKind::Boolean),
    ];
    for (node_id, field, kind) in expect {
        let node = document.node(node_id).unwrap();
        let resolved = resolver.resolve(node, field, node.input(field).unwrap()).unwrap();
        assert_eq!(resolved.kind(), kind, "{}.{}", node_id, field);
    }
}

#[test]
fn test_scheduler_without_options_gets_known_list() {
    let field = resolve_raw(&FieldResolver::new(), "denoise_latents", "scheduler", json!({ "value": "euler" })).unwrap();
    match field {
        Field::Enum(e) => {
            assert_eq!(e.value.as_deref(), Some("euler"));
            assert_eq!(e.options.len(), SCHEDULERS.len());
        }
        other => panic!("expected enum, got {:?}", other),
    }
}

#[test]
fn test_explicit_type_tag_wins_over_name_pattern() {
    // "seed" would be an integer by name; the tag says string.
    let kind = kind_of("custom", "seed", json!({ "value": "abc", "type": "StringField" }));
    assert_eq!(kind, FieldKind::String);

    let kind = kind_of(
        "custom",
        "frames",
        json!({ "value": [{ "image_name": "a.png" }], "type": { "name": "ImageField", "cardinality": "COLLECTION" } }),
    );
    assert_eq!(kind, FieldKind::Collection);
}

#[test]
fn test_name_pattern_is_skipped_when_value_does_not_fit() {
    // "width" names an integer, but the inline value is a float.
    let kind = kind_of("custom", "width", json!({ "value": 0.5 }));
    assert_eq!(kind, FieldKind::Float);
}

#[test]
fn test_value_shape_rules() {
    assert_eq!(kind_of("custom", "tint", json!({ "value": { "r": 1, "g": 2, "b": 3, "a": 255 } })), FieldKind::Color);
    assert_eq!(
        kind_of("custom", "region", json!({ "value": { "x_min": 0, "x_max": 10, "y_min": 0, "y_max": 10 } })),
        FieldKind::BoundingBox
    );
    assert_eq!(kind_of("custom", "source", json!({ "value": { "image_name": "x.png" } })), FieldKind::Image);
    assert_eq!(kind_of("custom", "flag", json!({ "value": false })), FieldKind::Boolean);
    assert_eq!(kind_of("custom", "text", json!({ "value": "hello" })), FieldKind::String);

    let field = resolve_raw(&FieldResolver::new(), "custom", "sizes", json!({ "value": [1, 2, 3] })).unwrap();
    match field {
        Field::Collection(c) => {
            assert_eq!(c.item_kind, ItemKind::Integer);
            assert_eq!(c.items, vec![json!(1), json!(2), json!(3)]);
        }
        other => panic!("expected collection, got {:?}", other),
    }
}

#[test]
fn test_options_make_an_enum() {
    let field = resolve_raw(
        &FieldResolver::new(),
        "custom",
        "mode",
        json!({ "value": "fast", "options": ["fast", "slow"] }),
    )
    .unwrap();
    assert_eq!(
        field,
        Field::Enum(flowgate::fields::EnumField { value: Some("fast".into()), options: vec!["fast".into(), "slow".into()] })
    );

    // No inline value at all: options still decide.
    assert_eq!(kind_of("custom", "mode", json!({ "options": ["a", "b"] })), FieldKind::Enum);
}

#[test]
fn test_bounds_make_a_constrained_scalar() {
    let field = resolve_raw(&FieldResolver::new(), "custom", "count", json!({ "ge": 1, "lt": 65, "multiple_of": 8 })).unwrap();
    match field {
        Field::Integer(i) => {
            assert_eq!(i.value, None);
            assert_eq!(i.minimum, Some(1));
            assert_eq!(i.maximum, Some(64));
            assert_eq!(i.multiple_of, Some(8));
        }
        other => panic!("expected integer, got {:?}", other),
    }

    assert_eq!(kind_of("custom", "weight", json!({ "minimum": 0, "maximum": 1.5 })), FieldKind::Float);
}

#[test]
fn test_exclusive_integer_bounds_at_the_limits_are_errors() {
    for record in [json!({ "value": 1, "gt": i64::MAX }), json!({ "value": 1, "lt": i64::MIN })] {
        match resolve_raw(&FieldResolver::new(), "custom", "count", record.clone()) {
            Err(Error::Resolution { detail, .. }) => assert!(detail.contains("bound out of range"), "{}", detail),
            other => panic!("expected resolution error for {}, got {:?}", record, other),
        }
    }
}

#[test]
fn test_exclusive_float_bounds_exclude_the_bound() {
    let field = resolve_raw(&FieldResolver::new(), "custom", "strength", json!({ "value": 0.5, "gt": 0.0, "lt": 1.0 })).unwrap();
    let Field::Float(float) = &field else {
        panic!("expected float, got {:?}", field);
    };
    assert_eq!(float.minimum, Some(0.0));
    assert_eq!(float.maximum, Some(1.0));
    assert!(float.exclusive_minimum && float.exclusive_maximum);
    assert!(field.validate().is_empty());

    let mut at_lower = field.clone();
    at_lower.accept(json!(0.0)).unwrap();
    assert_eq!(at_lower.validate(), vec!["0 must be greater than 0".to_string()]);

    let mut at_upper = field.clone();
    at_upper.accept(json!(1.0)).unwrap();
    assert_eq!(at_upper.validate(), vec!["1 must be less than 1".to_string()]);

    // Inclusive keys still admit the bound itself.
    let mut inclusive = resolve_raw(&FieldResolver::new(), "custom", "strength", json!({ "value": 0.5, "ge": 0.0, "le": 1.0 })).unwrap();
    inclusive.accept(json!(1.0)).unwrap();
    assert!(inclusive.validate().is_empty());
}

#[test]
fn test_unmatched_input_is_a_resolution_error() {
    let err = resolve_raw(&FieldResolver::new(), "custom", "mystery", json!({ "label": "Mystery" })).unwrap_err();
    match err {
        Error::Resolution { node_id, field_name, shape, detail } => {
            assert_eq!(node_id, "n");
            assert_eq!(field_name, "mystery");
            assert!(shape.contains("custom"));
            assert_eq!(detail, "no rule matched");
        }
        other => panic!("expected resolution error, got {:?}", other),
    }
}

#[test]
fn test_builder_failure_names_the_rule() {
    let err = resolve_raw(&FieldResolver::new(), "custom", "mode", json!({ "value": 3, "type": "enum" })).unwrap_err();
    match err {
        Error::Resolution { detail, .. } => assert!(detail.contains("explicit-type"), "{}", detail),
        other => panic!("expected resolution error, got {:?}", other),
    }
}

#[test]
fn test_registered_rule_runs_at_its_priority() {
    let mut resolver = FieldResolver::new();
    resolver.register_fn(
        "prompts-are-long-text",
        PRIORITY_EXPLICIT_TYPE + 1,
        |raw| raw.field_name == "seed",
        |_| Ok(Field::String(StringField { value: None, min_length: None, max_length: Some(10) })),
    );

    let names: Vec<&str> = resolver.rules().map(|r| r.name()).collect();
    assert_eq!(names[0], "explicit-type");
    assert_eq!(names[1], "prompts-are-long-text");

    // Beats the name-pattern rule that would make it an integer.
    let field = resolve_raw(&resolver, "custom", "seed", json!({ "value": 3 })).unwrap();
    assert_eq!(field.kind(), FieldKind::String);
}

#[test]
fn test_rules_with_equal_priority_keep_registration_order() {
    let mut resolver = FieldResolver::empty();
    resolver.register_fn("first", PRIORITY_NAME_PATTERN, |_| true, |_| Ok(Field::Boolean(Default::default())));
    resolver.register_fn("second", PRIORITY_NAME_PATTERN, |_| true, |_| Ok(Field::Image(Default::default())));

    let field = resolve_raw(&resolver, "custom", "anything", json!({})).unwrap();
    assert_eq!(field.kind(), FieldKind::Boolean);
}

#[test]
fn test_type_tag_parsing() {
    assert_eq!(parse_type_tag(&json!("IntegerField")).map(|t| t.kind), Some(FieldKind::Integer));
    assert_eq!(parse_type_tag(&json!("MainModelField")).map(|t| t.kind), Some(FieldKind::Model));
    assert_eq!(parse_type_tag(&json!("StringCollection")).and_then(|t| t.item), Some(ItemKind::String));
    assert_eq!(parse_type_tag(&json!("LatentsField")), None);
}
