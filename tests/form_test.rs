mod common;

use flowgate::form::index_form;
use flowgate::graph::builder::DocumentBuilder;
use flowgate::graph::GraphDocument;
use flowgate::Error;
use serde_json::json;

fn addresses(document: &GraphDocument) -> Vec<(usize, String, String)> {
    index_form(document)
        .expect("Indexing failed")
        .into_iter()
        .map(|s| (s.input_index, s.node_id, s.field_name))
        .collect()
}

#[test]
fn test_two_level_form_yields_two_inputs() {
    let document = GraphDocument::from_value(common::two_field_document()).unwrap();
    let seeds = index_form(&document).unwrap();

    assert_eq!(seeds.len(), 2);
    assert_eq!(seeds[0].input_index, 0);
    assert_eq!(seeds[0].node_id, "width");
    assert_eq!(seeds[1].input_index, 1);
    assert_eq!(seeds[1].node_id, "height");
    // Empty input label falls back to the field name.
    assert_eq!(seeds[0].label, "value");
    assert_eq!(seeds[0].node_label, "Width");
}

#[test]
fn test_fixture_order_follows_form_not_nodes() {
    let document = GraphDocument::from_value(common::fixture("sdxl_text_to_image.json")).unwrap();
    let seeds = index_form(&document).unwrap();

    let labels: Vec<&str> = seeds.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(
        labels,
        vec!["Positive Prompt", "Negative Prompt", "Seed", "Steps", "CFG Scale", "scheduler", "Board", "model"]
    );
    let indices: Vec<usize> = seeds.iter().map(|s| s.input_index).collect();
    assert_eq!(indices, (0..8).collect::<Vec<_>>());
}

#[test]
fn test_indexing_is_deterministic() {
    let document = GraphDocument::from_value(common::fixture("sdxl_text_to_image.json")).unwrap();
    assert_eq!(index_form(&document).unwrap(), index_form(&document).unwrap());
}

#[test]
fn test_reordering_fields_within_a_container_only_moves_them() {
    let build = |order: &[&str]| {
        DocumentBuilder::new("reorder")
            .node("a", "integer").input("value", 1).done()
            .node("b", "integer").input("value", 2).done()
            .node("c", "integer").input("value", 3).done()
            .node("d", "integer").input("value", 4).done()
            .container("root", &["f_a", "left", "right", "f_d"])
            .container("left", order)
            .container("right", &[])
            .field("f_a", "a", "value")
            .field("f_b", "b", "value")
            .field("f_c", "c", "value")
            .field("f_d", "d", "value")
            .build_document()
            .unwrap()
    };

    let before = addresses(&build(&["f_b", "f_c"]));
    let after = addresses(&build(&["f_c", "f_b"]));

    assert_eq!(before[0], after[0]);
    assert_eq!(before[3], after[3]);
    assert_eq!(before[1].1, "b");
    assert_eq!(after[1].1, "c");
}

#[test]
fn test_swapping_sibling_containers_only_moves_their_inputs() {
    let build = |root: &[&str]| {
        DocumentBuilder::new("swap")
            .node("a", "integer").input("value", 1).done()
            .node("b", "integer").input("value", 2).done()
            .node("c", "integer").input("value", 3).done()
            .node("d", "integer").input("value", 4).done()
            .node("e", "integer").input("value", 5).done()
            .node("f", "integer").input("value", 6).done()
            .container("root", root)
            .container("left", &["f_b", "f_c"])
            .container("right", &["f_d", "f_e"])
            .field("f_a", "a", "value")
            .field("f_b", "b", "value")
            .field("f_c", "c", "value")
            .field("f_d", "d", "value")
            .field("f_e", "e", "value")
            .field("f_f", "f", "value")
            .build_document()
            .unwrap()
    };
    let nodes = |document: &GraphDocument| -> Vec<String> {
        addresses(document).into_iter().map(|(_, n, _)| n).collect()
    };

    let before = build(&["f_a", "left", "right", "f_f"]);
    let after = build(&["f_a", "right", "left", "f_f"]);

    assert_eq!(nodes(&before), vec!["a", "b", "c", "d", "e", "f"]);
    assert_eq!(nodes(&after), vec!["a", "d", "e", "b", "c", "f"]);
    // Indices stay dense; the surrounding inputs keep theirs.
    let (before, after) = (addresses(&before), addresses(&after));
    assert_eq!(after.iter().map(|a| a.0).collect::<Vec<_>>(), (0..6).collect::<Vec<_>>());
    assert_eq!(before[0], after[0]);
    assert_eq!(before[5], after[5]);
}

#[test]
fn test_nested_containers_are_visited_before_next_sibling() {
    let document = DocumentBuilder::new("nested")
        .node("a", "integer").input("value", 1).done()
        .node("b", "integer").input("value", 2).done()
        .node("c", "integer").input("value", 3).done()
        .container("root", &["outer", "f_c"])
        .container("outer", &["inner", "div"])
        .container("inner", &["f_a", "f_b"])
        .divider("div")
        .field("f_a", "a", "value")
        .field("f_b", "b", "value")
        .field("f_c", "c", "value")
        .build_document()
        .unwrap();

    let nodes: Vec<String> = addresses(&document).into_iter().map(|(_, n, _)| n).collect();
    assert_eq!(nodes, vec!["a", "b", "c"]);
}

#[test]
fn test_fields_outside_the_form_are_invisible() {
    let document = DocumentBuilder::new("hidden")
        .node("a", "integer").input("value", 1).done()
        .node("b", "integer").input("value", 2).done()
        .container("root", &["f_a", "note"])
        .text("note", "only a is exposed")
        .field("f_a", "a", "value")
        // Defined but never placed under the root.
        .field("f_b", "b", "value")
        .build_document()
        .unwrap();

    assert_eq!(addresses(&document), vec![(0, "a".to_string(), "value".to_string())]);
}

#[test]
fn test_unknown_element_kinds_contribute_nothing() {
    let mut raw = DocumentBuilder::new("unknown")
        .node("a", "integer").input("value", 1).done()
        .container("root", &["f_a", "fancy"])
        .field("f_a", "a", "value")
        .build();
    raw["form"]["elements"]["fancy"] = json!({ "id": "fancy", "type": "image-gallery", "data": {} });

    let document = GraphDocument::from_value(raw).unwrap();
    assert_eq!(index_form(&document).unwrap().len(), 1);
}

#[test]
fn test_snake_case_identifiers_are_accepted() {
    let raw = json!({
        "nodes": [{ "id": "n", "type": "invocation", "data": { "type": "integer", "inputs": { "value": { "value": 5 } } } }],
        "edges": [],
        "form": {
            "root_element_id": "root",
            "elements": {
                "root": { "id": "root", "type": "container", "data": { "children": ["f"] } },
                "f": { "id": "f", "type": "node-field", "data": { "field_identifier": { "node_id": "n", "field_name": "value" } } }
            }
        }
    });

    let document = GraphDocument::from_value(raw).unwrap();
    assert_eq!(addresses(&document), vec![(0, "n".to_string(), "value".to_string())]);
}

fn assert_structural(raw: serde_json::Value) {
    let document = GraphDocument::from_value(raw).expect("Document should parse");
    let err = index_form(&document).unwrap_err();
    assert!(matches!(err, Error::Structural(_)), "expected structural error, got {:?}", err);
}

#[test]
fn test_structural_failures() {
    let base = || {
        DocumentBuilder::new("broken")
            .node("a", "integer").input("value", 1).done()
            .field("f_a", "a", "value")
    };

    // Root missing.
    assert_structural(base().container("other", &[]).build());
    // Root is not a container.
    assert_structural(base().root("f_a").build());
    // Child id not in elements.
    assert_structural(base().container("root", &["ghost"]).build());
    // Element reachable twice.
    assert_structural(base().container("root", &["loop"]).container("loop", &["root"]).build());
    assert_structural(base().container("root", &["f_a", "f_a"]).build());
    // Field reference to a missing node.
    assert_structural(base().container("root", &["f_x"]).field("f_x", "x", "value").build());
    // Field reference to an undeclared field.
    assert_structural(base().container("root", &["f_y"]).field("f_y", "a", "nope").build());
}
