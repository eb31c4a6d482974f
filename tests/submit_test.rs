mod common;

use flowgate::graph::builder::DocumentBuilder;
use flowgate::submit::{execution_graph, prepare, SubmitOptions};
use flowgate::Workflow;
use serde_json::json;

fn fixture_workflow() -> Workflow {
    Workflow::load(common::fixture("sdxl_text_to_image.json")).expect("Failed to load workflow")
}

#[test]
fn test_only_modified_inputs_are_written() {
    let mut workflow = fixture_workflow();
    workflow.inputs.set_value(2, 1234).unwrap();

    let prepared = prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default()).unwrap();
    let nodes = &prepared.request.batch.graph.nodes;

    assert_eq!(nodes["seed"]["value"], json!(1234));
    assert_eq!(nodes["positive_prompt"]["value"], json!("a lighthouse at dusk, oil painting"));
    assert_eq!(nodes["denoise"]["steps"], json!(30));

    // The loaded document is never touched.
    let original = workflow.document().node("seed").unwrap();
    assert_eq!(original.input("value").unwrap().value, Some(json!(42)));
    let copied = prepared.working_copy.node("seed").unwrap();
    assert_eq!(copied.input("value").unwrap().value, Some(json!(1234)));
}

#[test]
fn test_execution_graph_shape() {
    let workflow = fixture_workflow();
    let prepared = prepare(
        workflow.document(),
        &workflow.inputs,
        &SubmitOptions { runs: 3, ..SubmitOptions::default() },
    )
    .unwrap();
    let batch = &prepared.request.batch;

    assert_eq!(batch.runs, 3);
    assert!(!prepared.request.prepend);
    assert!(uuid::Uuid::parse_str(&batch.batch_id).is_ok());

    let save = &batch.graph.nodes["save"];
    assert_eq!(save["id"], json!("save"));
    assert_eq!(save["type"], json!("save_image"));
    assert_eq!(save["is_intermediate"], json!(false));
    assert_eq!(save["use_cache"], json!(false));
    // Inputs with no inline value are omitted.
    assert!(save.get("image").is_none());

    // An inline value on a field that also receives an edge is kept.
    assert_eq!(batch.graph.nodes["noise"]["seed"], json!(0));
    assert!(batch
        .graph
        .edges
        .iter()
        .any(|e| e.destination.node_id == "noise" && e.destination.field == "seed"));

    let workflow_copy = batch.workflow.as_ref().expect("Workflow copy attached");
    assert_eq!(workflow_copy["name"], json!("SDXL Text to Image"));
}

#[test]
fn test_notes_nodes_and_their_edges_are_stripped() {
    let document = DocumentBuilder::new("notes")
        .node("a", "integer").input("value", 1).done()
        .notes("memo", "remember to raise steps")
        .edge(("a", "value"), ("memo", "text"))
        .container("root", &[])
        .build_document()
        .unwrap();

    let graph = execution_graph(&document, &SubmitOptions::default().non_executable_types);
    assert!(graph.nodes.contains_key("a"));
    assert!(!graph.nodes.contains_key("memo"));
    assert!(graph.edges.is_empty());
    // Still present in the document itself.
    assert!(document.node("memo").is_some());

    let workflow = Workflow::load(common::fixture("sdxl_text_to_image.json")).unwrap();
    let prepared = prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default()).unwrap();
    assert!(!prepared.request.batch.graph.nodes.contains_key("note_1"));
    assert_eq!(prepared.request.batch.graph.edges.len(), 6);
}

#[test]
fn test_bare_board_ids_are_wrapped() {
    let mut workflow = fixture_workflow();
    workflow.inputs.set_value(6, "none").unwrap();

    let prepared = prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default()).unwrap();
    assert_eq!(prepared.request.batch.graph.nodes["save"]["board"], json!({ "board_id": "none" }));
}

#[test]
fn test_board_normalisation_covers_undiscovered_nodes() {
    let document = DocumentBuilder::new("boards")
        .node("save_a", "save_image").input("board", "none").done()
        .node("save_b", "save_image").input("board", "auto").done()
        .node("save_c", "save_image").input("board", json!({ "board_id": "kept" })).done()
        .container("root", &[])
        .build_document()
        .unwrap();
    let workflow = Workflow::from_document(document, &Default::default()).unwrap();

    let prepared = prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default()).unwrap();
    let nodes = &prepared.request.batch.graph.nodes;
    assert_eq!(nodes["save_a"]["board"], json!({ "board_id": "none" }));
    assert_eq!(nodes["save_b"]["board"], json!("auto"));
    assert_eq!(nodes["save_c"]["board"], json!({ "board_id": "kept" }));
}

#[test]
fn test_each_submission_gets_a_fresh_batch() {
    let workflow = fixture_workflow();
    let first = prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default()).unwrap();
    let second = prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default()).unwrap();
    assert_ne!(first.request.batch.batch_id, second.request.batch.batch_id);
    assert_eq!(first.working_copy, second.working_copy);
}
