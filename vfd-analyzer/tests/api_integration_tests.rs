//! Integration tests for vfd-analyzer API endpoints
//!
//! Drives the real router with `oneshot` over an in-memory database and
//! stub backends.

mod helpers;

use axum::{
    body::Body,
    http::{Request, StatusCode},
    response::Response,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

use helpers::*;
use vfd_analyzer::anchor::LedgerClient;
use vfd_analyzer::models::AnalysisId;
use vfd_analyzer::types::ModelKind;

const BOUNDARY: &str = "vfd-test-boundary";

fn stub_models() -> Vec<Arc<StubAdapter>> {
    adapters(vec![
        StubAdapter::scoring("semantic", ModelKind::Semantic, 0.92),
        StubAdapter::scoring("artifact", ModelKind::Artifact, 0.88),
        StubAdapter::scoring("face", ModelKind::FaceLocalizer, 0.95),
    ])
}

async fn create_test_service() -> TestService {
    build_service(test_config(), &stub_models(), StubMedia::default(), None).await
}

/// Multipart body with a `file` part plus plain text fields
fn multipart(file: Option<&[u8]>, fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    if let Some(bytes) = file {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\nContent-Type: video/mp4\r\n\r\n",
                BOUNDARY
            )
            .as_bytes(),
        );
        body.extend_from_slice(bytes);
        body.extend_from_slice(b"\r\n");
    }
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(format!("--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn upload_request(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header(
            "content-type",
            format!("multipart/form-data; boundary={}", BOUNDARY),
        )
        .body(Body::from(body))
        .unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_string(&body).unwrap()))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_json(response: Response) -> Value {
    let body = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&body).unwrap()
}

/// Upload `bytes` and wait until the job finishes
async fn analyze_and_wait(service: &TestService, bytes: &[u8], fields: &[(&str, &str)]) -> String {
    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(bytes), fields)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let json = body_json(response).await;
    let id = json["analysis_id"].as_str().unwrap().to_string();
    wait_terminal(&service.coordinator, &AnalysisId::parse(&id).unwrap()).await;
    id
}

#[tokio::test]
async fn test_health_endpoint() {
    let service = create_test_service().await;

    let response = service.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "vfd-analyzer");
    assert_eq!(json["database"], "ok");
    assert_eq!(json["models"], json!(["artifact", "face", "semantic"]));
    assert_eq!(json["anchoring_enabled"], false);
    assert!(json["uptime_seconds"].is_number());
}

#[tokio::test]
async fn test_upload_then_result_then_cache_hit() {
    let service = create_test_service().await;
    let bytes = video_bytes(21);

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&bytes), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    let accepted = body_json(response).await;
    assert_eq!(accepted["cached"], false);
    assert!(accepted.get("result").is_none());
    let id = accepted["analysis_id"].as_str().unwrap().to_string();
    assert_eq!(accepted["progress_url"], format!("/progress/{}/events", id));
    assert_eq!(accepted["fingerprint"]["digest"].as_str().unwrap().len(), 64);

    wait_terminal(&service.coordinator, &AnalysisId::parse(&id).unwrap()).await;

    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/result/{}", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result = body_json(response).await;
    assert_eq!(result["status"], "COMPLETE");
    assert_eq!(result["result"]["verdict"]["label"], "FAKE");
    assert_eq!(result["result"]["model_scores"].as_array().unwrap().len(), 3);
    assert_eq!(
        result["result"]["forensics"]["spatial_entropy_heatmap"]
            .as_array()
            .unwrap()
            .len(),
        vfd_analyzer::forensics::HEATMAP_SECTORS
    );
    assert!(result.get("anchor").is_none());

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&bytes), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let cached = body_json(response).await;
    assert_eq!(cached["cached"], true);
    assert_eq!(cached["status"], "COMPLETE");
    assert_eq!(
        cached["result"]["verdict"],
        result["result"]["verdict"]
    );
}

#[tokio::test]
async fn test_caller_supplied_id_and_status() {
    let service = create_test_service().await;
    let id = analyze_and_wait(&service, &video_bytes(22), &[("analysis_id", "client-job-7")]).await;
    assert_eq!(id, "client-job-7");

    let response = service
        .app
        .clone()
        .oneshot(get("/status/client-job-7"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["analysis_id"], "client-job-7");
    assert_eq!(status["state"], "COMPLETE");
    assert_eq!(status["last_event"]["type"], "complete");

    // the id is now taken
    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(
            Some(&video_bytes(23)),
            &[("analysis_id", "client-job-7")],
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_upload_validation_errors() {
    let service = create_test_service().await;

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(None, &[("models", "face")])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(
            Some(&video_bytes(24)),
            &[("models", "face,voice-clone")],
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json = body_json(response).await;
    assert!(json["error"]["message"].as_str().unwrap().contains("voice-clone"));

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(b""), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "INPUT_UNREADABLE");

    let oversized = vec![7u8; test_config().limits.max_video_bytes as usize + 1];
    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&oversized), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_analyze_url_rejects_unsupported_scheme() {
    let service = create_test_service().await;

    let response = service
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/analyze-url",
            json!({"url": "ftp://example.com/clip.mp4"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let json = body_json(response).await;
    assert_eq!(json["error"]["code"], "INPUT_UNREADABLE");
}

#[tokio::test]
async fn test_unknown_and_invalid_ids() {
    let service = create_test_service().await;

    let response = service
        .app
        .clone()
        .oneshot(get("/result/never-submitted"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = service.app.clone().oneshot(get("/status/bad!id")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = service
        .app
        .clone()
        .oneshot(json_request("POST", "/cancel/never-submitted", json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_cancel_finished_job_conflicts() {
    let service = create_test_service().await;
    let id = analyze_and_wait(&service, &video_bytes(25), &[]).await;

    let response = service
        .app
        .clone()
        .oneshot(json_request("POST", &format!("/cancel/{}", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_cancel_running_job() {
    let models = adapters(vec![StubAdapter::scoring("artifact", ModelKind::Artifact, 0.4)
        .with_delay(Duration::from_millis(500))]);
    let service = build_service(test_config(), &models, StubMedia::default(), None).await;

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&video_bytes(26)), &[])))
        .await
        .unwrap();
    let id = body_json(response).await["analysis_id"]
        .as_str()
        .unwrap()
        .to_string();

    let response = service
        .app
        .clone()
        .oneshot(json_request("POST", &format!("/cancel/{}", id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::ACCEPTED);
    assert_eq!(body_json(response).await["cancel_requested"], true);

    wait_terminal(&service.coordinator, &AnalysisId::parse(&id).unwrap()).await;
    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/result/{}", id)))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["status"], "CANCELLED");
    assert_eq!(json["error"]["code"], "CANCELLED");
    assert!(json.get("result").is_none());
}

#[tokio::test]
async fn test_anchor_endpoint_without_ledger_is_unavailable() {
    let service = create_test_service().await;
    let id = analyze_and_wait(&service, &video_bytes(27), &[]).await;

    let response = service
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/blockchain/submit",
            json!({"analysis_id": id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn test_anchor_endpoint_submits_and_result_reports_it() {
    let ledger = Arc::new(StubLedger::accepting());
    let service = build_service(
        test_config(),
        &stub_models(),
        StubMedia::default(),
        Some(ledger.clone() as Arc<dyn LedgerClient>),
    )
    .await;
    let id = analyze_and_wait(&service, &video_bytes(28), &[]).await;

    let response = service
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/blockchain/submit",
            json!({"analysis_id": id}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let record = body_json(response).await;
    assert_eq!(record["status"], "submitted");
    assert_eq!(record["checksum"].as_str().unwrap().len(), 64);

    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/result/{}", id)))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["anchor"]["status"], "submitted");
    assert_eq!(json["anchor"]["transaction_ref"], record["transaction_ref"]);

    let response = service
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/blockchain/submit",
            json!({"analysis_id": "no-such-job"}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(ledger.calls(), 1);
}

#[tokio::test]
async fn test_anchor_requested_on_upload() {
    let ledger = Arc::new(StubLedger::accepting());
    let service = build_service(
        test_config(),
        &stub_models(),
        StubMedia::default(),
        Some(ledger.clone() as Arc<dyn LedgerClient>),
    )
    .await;
    let id = analyze_and_wait(&service, &video_bytes(29), &[("anchor", "true")]).await;

    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/result/{}", id)))
        .await
        .unwrap();
    let json = body_json(response).await;
    assert_eq!(json["anchor"]["status"], "submitted");
    assert_eq!(ledger.calls(), 1);
}

#[tokio::test]
async fn test_no_adapters_is_service_unavailable() {
    let service = build_service(test_config(), &[], StubMedia::default(), None).await;

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&video_bytes(30)), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

    let response = service.app.clone().oneshot(get("/health")).await.unwrap();
    assert_eq!(body_json(response).await["status"], "degraded");
}

#[tokio::test]
async fn test_sse_stream_replays_terminal_event_and_closes() {
    let service = create_test_service().await;
    let id = analyze_and_wait(&service, &video_bytes(31), &[]).await;

    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/progress/{}/events", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .get("content-type")
        .unwrap()
        .to_str()
        .unwrap()
        .starts_with("text/event-stream"));

    let body = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("SSE stream should close after the terminal event")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: complete"), "{}", text);
    assert!(text.contains(&format!("\"analysis_id\":\"{}\"", id)));
}

#[tokio::test]
async fn test_sse_after_sweep_still_reports_completion() {
    let service = create_test_service().await;
    let id = analyze_and_wait(&service, &video_bytes(32), &[]).await;
    service.coordinator.sweep(Duration::ZERO).await;

    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/progress/{}/events", id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("SSE stream for a swept job should close")
        .unwrap()
        .to_bytes();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("event: complete"), "{}", text);
}

#[tokio::test]
async fn test_cache_hit_reports_model_set_mismatch() {
    let service = create_test_service().await;
    let bytes = video_bytes(33);
    analyze_and_wait(&service, &bytes, &[("models", "semantic")]).await;

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&bytes), &[])))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let json = body_json(response).await;
    assert_eq!(json["cached"], true);
    assert_eq!(json["requested_models_mismatch"], true);
    let id = json["analysis_id"].as_str().unwrap().to_string();

    let response = service
        .app
        .clone()
        .oneshot(get(&format!("/result/{}", id)))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["requested_models_mismatch"], true);

    let response = service
        .app
        .clone()
        .oneshot(upload_request(multipart(Some(&bytes), &[("models", "semantic")])))
        .await
        .unwrap();
    assert_eq!(body_json(response).await["requested_models_mismatch"], false);
}
