use std::collections::BTreeMap;

use flowgate::assets::{AssetStore, HttpAssetStore};
use flowgate::config::ClientConfig;
use flowgate::outputs::{EvidenceTier, OutputRecord};
use flowgate::queue::{HttpQueueClient, JobStatus, QueueApi};
use flowgate::submit::{prepare, SubmitOptions};
use flowgate::workflow::{cleanup_outputs, download_outputs};
use flowgate::{Error, Workflow};
use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn setup() -> (MockServer, ClientConfig) {
    let mock_server = MockServer::start().await;
    let config = ClientConfig::default().with_base_url(mock_server.uri());
    (mock_server, config)
}

fn fixture_request() -> flowgate::queue::EnqueueBatchRequest {
    let raw = std::fs::read_to_string(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/sdxl_text_to_image.json"))
        .expect("Failed to read fixture");
    let workflow = Workflow::from_json(&raw).expect("Failed to load workflow");
    prepare(workflow.document(), &workflow.inputs, &SubmitOptions::default())
        .expect("Failed to prepare")
        .request
}

#[tokio::test]
async fn test_enqueue_batch_accepted() {
    let (mock_server, config) = setup().await;
    let request = fixture_request();

    Mock::given(method("POST"))
        .and(path("/api/v1/queue/default/enqueue_batch"))
        .and(body_partial_json(json!({ "prepend": false, "batch": { "runs": 1 } })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "queue_id": "default",
            "enqueued": 1,
            "requested": 1,
            "batch": { "batch_id": request.batch.batch_id, "runs": 1 },
            "priority": 0,
            "item_ids": [41]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let client = HttpQueueClient::new(config).unwrap();
    let response = client.enqueue_batch(&request).await.expect("Enqueue failed");
    assert_eq!(response.item_ids, vec![41]);
    assert_eq!(response.batch.batch_id, request.batch.batch_id);
    assert_eq!(response.extra["requested"], json!(1));
}

#[tokio::test]
async fn test_enqueue_batch_rejected_keeps_diagnostic() {
    let (mock_server, config) = setup().await;
    let request = fixture_request();

    Mock::given(method("POST"))
        .and(path("/api/v1/queue/default/enqueue_batch"))
        .respond_with(ResponseTemplate::new(422).set_body_json(json!({
            "detail": [{ "loc": ["body", "batch", "graph"], "msg": "invalid edge" }]
        })))
        .mount(&mock_server)
        .await;

    let client = HttpQueueClient::new(config).unwrap();
    match client.enqueue_batch(&request).await {
        Err(Error::SubmissionRejected { status, diagnostic, payload }) => {
            assert_eq!(status, 422);
            assert_eq!(diagnostic["detail"][0]["msg"], json!("invalid edge"));
            assert_eq!(payload["batch"]["batch_id"], json!(request.batch.batch_id));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_plain_text_diagnostic() {
    let (mock_server, config) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/queue/default/enqueue_batch"))
        .respond_with(ResponseTemplate::new(500).set_body_string("Internal Server Error"))
        .mount(&mock_server)
        .await;

    let client = HttpQueueClient::new(config).unwrap();
    match client.enqueue_batch(&fixture_request()).await {
        Err(Error::SubmissionRejected { status, diagnostic, .. }) => {
            assert_eq!(status, 500);
            assert_eq!(diagnostic, json!("Internal Server Error"));
        }
        other => panic!("expected rejection, got {:?}", other),
    }
}

#[tokio::test]
async fn test_get_and_cancel_queue_item() {
    let (mock_server, config) = setup().await;
    let config = config.with_queue_id("studio");

    Mock::given(method("GET"))
        .and(path("/api/v1/queue/studio/i/41"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "item_id": 41,
            "batch_id": "b-1",
            "queue_id": "studio",
            "status": "completed",
            "priority": 0,
            "session": {
                "id": "s-1",
                "results": { "prep-1": { "image": { "image_name": "x.png" } } },
                "prepared_source_mapping": { "prep-1": "save" },
                "execution_graph": {}
            }
        })))
        .mount(&mock_server)
        .await;
    Mock::given(method("PUT"))
        .and(path("/api/v1/queue/studio/i/42/cancel"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "item_id": 42,
            "batch_id": "b-1",
            "status": "cancelled"
        })))
        .mount(&mock_server)
        .await;

    let client = HttpQueueClient::new(config).unwrap();
    assert_eq!(client.queue_id(), "studio");

    let item = client.get_queue_item(41).await.unwrap();
    assert_eq!(item.status, JobStatus::Completed);
    let session = item.session.expect("Session expected");
    assert_eq!(session.prepared_source_mapping["prep-1"], "save");
    assert!(session.extra.contains_key("execution_graph"));

    let canceled = client.cancel_queue_item(42).await.unwrap();
    assert_eq!(canceled.status, JobStatus::Canceled);
}

#[tokio::test]
async fn test_missing_item_is_a_transport_error() {
    let (mock_server, config) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/queue/default/i/404"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&mock_server)
        .await;

    let client = HttpQueueClient::new(config).unwrap();
    assert!(matches!(client.get_queue_item(404).await, Err(Error::Transport(_))));
}

#[tokio::test]
async fn test_asset_store_and_downloads() {
    let (mock_server, config) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/v1/images/i/a.png/full"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/v1/boards/b-1/image_names"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!(["a.png", "b.png"])))
        .mount(&mock_server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/api/v1/images/i/a.png"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&mock_server)
        .await;

    let store = HttpAssetStore::new(config).unwrap();
    assert_eq!(store.list_names("b-1").await.unwrap(), vec!["a.png", "b.png"]);

    let mut records = BTreeMap::new();
    records.insert(
        "save".to_string(),
        OutputRecord {
            node_id: "save".to_string(),
            collection: Some("b-1".to_string()),
            artifacts: vec!["a.png".to_string()],
            tier: Some(EvidenceTier::Results),
            heuristic: false,
        },
    );

    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let written = download_outputs(&store, &records, temp_dir.path().join("out")).await.unwrap();
    assert_eq!(written.len(), 1);
    assert_eq!(std::fs::read(&written[0]).unwrap(), vec![0x89, b'P', b'N', b'G']);

    assert_eq!(cleanup_outputs(&store, &records).await, 1);
}

#[tokio::test]
async fn test_download_rejects_names_outside_the_directory() {
    let (mock_server, config) = setup().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(b"x".to_vec()))
        .expect(0)
        .mount(&mock_server)
        .await;

    let store = HttpAssetStore::new(config).unwrap();
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let out = temp_dir.path().join("out");

    for name in ["../escaped.png", "/tmp/absolute.png", "nested/inner.png", ".."] {
        let mut records = BTreeMap::new();
        records.insert(
            "save".to_string(),
            OutputRecord {
                node_id: "save".to_string(),
                collection: None,
                artifacts: vec![name.to_string()],
                tier: Some(EvidenceTier::Results),
                heuristic: false,
            },
        );
        match download_outputs(&store, &records, &out).await {
            Err(Error::UnsafeArtifactName(rejected)) => assert_eq!(rejected, name),
            other => panic!("Expected UnsafeArtifactName for {}, got {:?}", name, other),
        }
    }

    assert!(!temp_dir.path().join("escaped.png").exists());
    assert!(!out.exists());
}
