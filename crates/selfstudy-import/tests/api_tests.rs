//! Integration tests for the import API

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

use selfstudy_import::config::ImportConfig;
use selfstudy_import::gateway::{ChunkRequest, ChunkTransport, ExternalMappingGateway, GatewaySettings};
use selfstudy_import::server::{build_router, state::AppState};
use selfstudy_import::storage::ImportStore;

const BOUNDARY: &str = "selfstudy-test-boundary";

fn para(text: &str) -> String {
    format!("<w:p><w:r><w:t xml:space=\"preserve\">{}</w:t></w:r></w:p>", text)
}

fn docx(paragraphs: &[&str]) -> Vec<u8> {
    let body: String = paragraphs.iter().map(|p| para(p)).collect();
    let xml = format!(
        "<w:document xmlns:w=\"http://schemas.openxmlformats.org/wordprocessingml/2006/main\"><w:body>{}</w:body></w:document>",
        body
    );
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    zip.start_file("word/document.xml", zip::write::SimpleFileOptions::default())
        .unwrap();
    zip.write_all(xml.as_bytes()).unwrap();
    zip.finish().unwrap().into_inner()
}

fn self_study() -> Vec<u8> {
    docx(&[
        "STANDARD 3 FACULTY",
        "All faculty hold terminal degree credentials and meet the qualifications for their teaching load.",
        "PART II PROGRAM NOTES",
        "The weather was pleasant this year.",
    ])
}

fn multipart_body(submission_id: Option<&str>, file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(id) = submission_id {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"submissionId\"\r\n\r\n{}\r\n",
                BOUNDARY, id
            )
            .as_bytes(),
        );
    }
    if let Some((filename, data)) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\nContent-Type: application/octet-stream\r\n\r\n",
                BOUNDARY, filename
            )
            .as_bytes(),
        );
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

/// Records outbound chunks instead of calling a classifier
#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<ChunkRequest>>,
}

#[async_trait]
impl ChunkTransport for RecordingTransport {
    async fn send(&self, chunk: &ChunkRequest) -> selfstudy_import::Result<()> {
        self.sent.lock().push(chunk.clone());
        Ok(())
    }

    fn name(&self) -> &str {
        "recording"
    }
}

fn create_test_app(config: ImportConfig, gateway: Option<Arc<ExternalMappingGateway>>) -> Router {
    let store = ImportStore::in_memory().expect("Failed to create in-memory store");
    let state = AppState::from_parts(config, store, gateway).expect("Failed to build state");
    build_router(state)
}

fn external_app(secret: Option<&str>) -> (Router, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let gateway = ExternalMappingGateway::new(
        transport.clone(),
        GatewaySettings {
            callback_url: "http://localhost/api/callbacks/classification".into(),
            taxonomy_name: "default".into(),
            confidence_threshold: 50,
            chunk_delay: Duration::ZERO,
        },
    );
    let mut config = ImportConfig::default();
    config.classifier.callback_secret = secret.map(str::to_string);
    (create_test_app(config, Some(Arc::new(gateway))), transport)
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    let json = if body.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body).unwrap_or(Value::Null)
    };
    (status, json)
}

async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Request::builder().uri(uri).body(Body::empty()).unwrap()).await
}

async fn post_json(app: &Router, uri: &str, body: Value) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
    )
    .await
}

async fn upload(app: &Router, submission_id: Option<&str>, file: Option<(&str, &[u8])>) -> (StatusCode, Value) {
    send(
        app,
        Request::builder()
            .method("POST")
            .uri("/api/imports")
            .header(
                "content-type",
                format!("multipart/form-data; boundary={}", BOUNDARY),
            )
            .body(Body::from(multipart_body(submission_id, file)))
            .unwrap(),
    )
    .await
}

/// Poll the status endpoint until `done` holds
async fn wait_for(app: &Router, import_id: &str, done: impl Fn(&Value) -> bool) -> Value {
    for _ in 0..200 {
        let (status, json) = get(app, &format!("/api/imports/{}", import_id)).await;
        assert_eq!(status, StatusCode::OK);
        if done(&json) {
            return json;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("import {} did not reach the expected state", import_id);
}

fn is_terminal(json: &Value) -> bool {
    json["status"] == "completed" || json["status"] == "failed"
}

#[tokio::test]
async fn test_health_and_ready() {
    let app = create_test_app(ImportConfig::default(), None);

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (status, _) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);

    let (status, info) = get(&app, "/api/info").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(info["name"], "selfstudy-import");
    assert_eq!(info["mapper"], "local-patterns");
}

#[tokio::test]
async fn test_ready_reports_unavailable_after_shutdown_begins() {
    let store = ImportStore::in_memory().expect("Failed to create in-memory store");
    let state = AppState::from_parts(ImportConfig::default(), store, None).expect("Failed to build state");
    let app = build_router(state.clone());

    let (status, _) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::OK);

    state.set_ready(false);
    let (status, _) = get(&app, "/ready").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);

    let (status, _) = get(&app, "/health").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_local_import_review_and_apply() {
    let app = create_test_app(ImportConfig::default(), None);
    let data = self_study();

    let (status, accepted) = upload(&app, Some("sub-42"), Some(("study.docx", data.as_slice()))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(accepted["status"], "processing");
    let import_id = accepted["importId"].as_str().unwrap().to_string();

    let done = wait_for(&app, &import_id, is_terminal).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["phase"], "completed");
    assert_eq!(done["counts"]["sections"], 2);
    assert_eq!(done["counts"]["mapped"], 1);
    assert_eq!(done["counts"]["unmapped"], 1);
    assert_eq!(done["recentActivity"][0]["standardCode"], "3");

    // one bucket per section
    let (status, listing) = get(&app, &format!("/api/imports/{}/sections", import_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listing["totalCount"], 2);
    for section in listing["sections"].as_array().unwrap() {
        assert!(section["mapping"].is_null() != section["unmapped"].is_null());
    }

    let (status, queue) = get(&app, &format!("/api/imports/{}/unmapped", import_id)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(queue["totalCount"], 1);
    let section_id = queue["items"][0]["extractedSectionId"].as_str().unwrap().to_string();
    assert_eq!(queue["items"][0]["heading"], "PART II PROGRAM NOTES");

    // unknown codes are rejected before anything changes
    let (status, err) = post_json(
        &app,
        &format!("/api/unmapped/{}/review", section_id),
        json!({"action": "assign", "standardCode": "99"}),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["type"], "validation_error");

    let (status, reviewed) = post_json(
        &app,
        &format!("/api/unmapped/{}/review", section_id),
        json!({"action": "assign", "standardCode": "7", "reviewer": "dean"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(reviewed["reviewAction"], "assigned");
    assert_eq!(reviewed["reviewer"], "dean");

    let (_, after_review) = get(&app, &format!("/api/imports/{}", import_id)).await;
    assert_eq!(after_review["counts"]["mapped"], 2);
    assert_eq!(after_review["counts"]["manual"], 1);
    assert_eq!(after_review["counts"]["unmapped"], 0);

    let (status, applied) = post_json(&app, &format!("/api/imports/{}/apply", import_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(applied["submissionId"], "sub-42");
    assert_eq!(applied["sectionsApplied"], 2);

    let (status, first) = get(&app, "/api/submissions/sub-42/narratives").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(first["slots"].as_array().unwrap().len(), 2);

    // applying again leaves narrative content unchanged
    let (status, again) = post_json(&app, &format!("/api/imports/{}/apply", import_id), json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(again["sectionsApplied"], 0);
    assert_eq!(again["sectionsSkipped"], 2);

    let (_, second) = get(&app, "/api/submissions/sub-42/narratives").await;
    let contents = |v: &Value| -> Vec<Value> {
        v["slots"].as_array().unwrap().iter().map(|s| s["content"].clone()).collect()
    };
    assert_eq!(contents(&first), contents(&second));
    assert_eq!(second["imports"].as_array().unwrap().len(), 2);

    // finished imports cannot be cancelled
    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/imports/{}", import_id))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_manual_mapping_endpoint() {
    let app = create_test_app(ImportConfig::default(), None);
    let data = self_study();
    let (_, accepted) = upload(&app, Some("sub-7"), Some(("study.docx", data.as_slice()))).await;
    let import_id = accepted["importId"].as_str().unwrap().to_string();
    wait_for(&app, &import_id, is_terminal).await;

    let (_, listing) = get(&app, &format!("/api/imports/{}/sections", import_id)).await;
    let section_id = listing["sections"][0]["id"].as_str().unwrap().to_string();

    let (status, mapping) = post_json(
        &app,
        "/api/mappings",
        json!({
            "extractedSectionId": section_id,
            "standardCode": "3",
            "specCode": "b",
            "fieldType": "narrative",
            "mappedBy": "coordinator"
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mapping["provenance"], "manual");
    assert_eq!(mapping["specCode"], "b");
    assert_eq!(mapping["mappedBy"], "coordinator");

    let (status, _) = post_json(
        &app,
        "/api/mappings",
        json!({"extractedSectionId": uuid::Uuid::new_v4(), "standardCode": "3"}),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_upload_validation() {
    let app = create_test_app(ImportConfig::default(), None);
    let data = self_study();

    let (status, err) = upload(&app, None, Some(("study.docx", data.as_slice()))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["type"], "validation_error");

    let (status, _) = upload(&app, Some("sub-1"), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, err) = upload(&app, Some("sub-1"), Some(("legacy.doc", &b"\xd0\xcf\x11\xe0"[..]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(err["error"]["type"], "unsupported_format");

    let (status, _) = get(&app, &format!("/api/imports/{}", uuid::Uuid::new_v4())).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Request::builder()
            .method("DELETE")
            .uri(format!("/api/imports/{}", uuid::Uuid::new_v4()))
            .body(Body::empty())
            .unwrap(),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_failed_parse_is_reported() {
    let app = create_test_app(ImportConfig::default(), None);
    let (status, accepted) = upload(&app, Some("sub-9"), Some(("broken.pptx", &b"PK not a deck"[..]))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let import_id = accepted["importId"].as_str().unwrap().to_string();

    let done = wait_for(&app, &import_id, is_terminal).await;
    assert_eq!(done["status"], "failed");
    assert_eq!(done["phase"], "failed");
    assert!(done["error"].as_str().unwrap().contains("broken.pptx"));

    // a failed import no longer blocks the submission
    let data = self_study();
    let (status, _) = upload(&app, Some("sub-9"), Some(("study.docx", data.as_slice()))).await;
    assert_eq!(status, StatusCode::ACCEPTED);
}

#[tokio::test]
async fn test_external_classification_callbacks() {
    let (app, transport) = external_app(Some("s3cret"));
    let data = self_study();

    let (_, accepted) = upload(&app, Some("sub-ext"), Some(("study.docx", data.as_slice()))).await;
    let import_id = accepted["importId"].as_str().unwrap().to_string();

    let waiting = wait_for(&app, &import_id, |s| s["progress"]["sent"] == true).await;
    assert_eq!(waiting["status"], "processing");
    assert_eq!(waiting["phase"], "awaiting_results");
    assert_eq!(waiting["progress"]["totalChunks"], 2);

    for _ in 0..200 {
        if transport.sent.lock().len() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    let job_id = {
        let sent = transport.sent.lock();
        assert_eq!(sent.len(), 2);
        assert!(!sent[1].more_data_follows);
        sent[0].job_id
    };

    let callback = |body: Value, secret: Option<&str>| {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/api/callbacks/classification")
            .header("content-type", "application/json");
        if let Some(secret) = secret {
            builder = builder.header("x-callback-secret", secret);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    };

    let first = json!({
        "type": "section_result",
        "jobId": job_id,
        "documentId": import_id,
        "moreData": true,
        "sectionIndex": 0,
        "totalSections": 2,
        "section": {
            "heading": "STANDARD 3 FACULTY",
            "richTextContent": "<p>All faculty hold <b>terminal degrees</b>.</p>",
            "match": {"status": "matched", "standard": "3", "confidence": 80}
        }
    });

    let (status, _) = send(&app, callback(first.clone(), Some("wrong"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, ack) = send(&app, callback(first.clone(), Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "accepted");
    assert_eq!(ack["receivedChunks"], 1);

    // redelivery counts once
    let (_, ack) = send(&app, callback(first, Some("s3cret"))).await;
    assert_eq!(ack["receivedChunks"], 1);

    let receiving = wait_for(&app, &import_id, |_| true).await;
    assert_eq!(receiving["phase"], "receiving_results");

    let last = json!({
        "type": "section_result",
        "jobId": job_id,
        "documentId": import_id,
        "moreData": false,
        "sectionIndex": 1,
        "totalSections": 2,
        "section": {
            "heading": "PART II PROGRAM NOTES",
            "richTextContent": "<p>Weather report.</p>",
            "match": {"status": "matched", "standard": "1", "confidence": 49}
        }
    });
    let (status, ack) = send(&app, callback(last.clone(), Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["importStatus"], "completed");
    assert_eq!(ack["receivedChunks"], 2);

    let done = wait_for(&app, &import_id, is_terminal).await;
    assert_eq!(done["status"], "completed");
    assert_eq!(done["counts"]["mapped"], 1);
    assert_eq!(done["recentActivity"][0]["standardCode"], "3");

    // late delivery after completion is acknowledged and ignored
    let (status, ack) = send(&app, callback(last, Some("s3cret"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ack["status"], "ignored");

    let unknown = json!({"type": "complete", "jobId": uuid::Uuid::new_v4(), "moreData": false});
    let (status, _) = send(&app, callback(unknown, Some("s3cret"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
