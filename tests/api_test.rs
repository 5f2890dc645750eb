//! HTTP surface tests over in-process backends.

mod helpers;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use doc_jobs::config::JobSettings;
use helpers::*;

#[tokio::test]
async fn test_health_reports_components() {
    let app = test_app(JobSettings::default());
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, _, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["checks"]["state_store"]["status"], "ok");
    assert_eq!(json["checks"]["queue"]["status"], "ok");
}

#[tokio::test]
async fn test_health_degrades_when_queue_unreachable() {
    let app = test_app(JobSettings::default());
    app.queue.set_unavailable(true);
    let request = Request::get("/health").body(Body::empty()).unwrap();
    let (status, _, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "degraded");
}

#[tokio::test]
async fn test_missing_bearer_is_unauthorized_and_echoes_request_id() {
    let app = test_app(JobSettings::default());
    let request = Request::get("/api/v1/jobs")
        .header("x-request-id", "client-trace-0001")
        .body(Body::empty())
        .unwrap();
    let (status, headers, json) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(json["error_code"], "UNAUTHORIZED");
    assert_eq!(json["request_id"], "client-trace-0001");
    assert_eq!(headers["x-request-id"], "client-trace-0001");
}

#[tokio::test]
async fn test_malformed_request_id_is_replaced() {
    let app = test_app(JobSettings::default());
    let request = Request::get("/health")
        .header("x-request-id", "bad id")
        .body(Body::empty())
        .unwrap();
    let (_, headers, _) = send(&app.router, request).await;

    let echoed = headers["x-request-id"].to_str().unwrap();
    assert!(echoed.starts_with("req-"));
}

#[tokio::test]
async fn test_submit_pdf_routes_to_ocr_queue() {
    let app = test_app(partitioned_settings());
    let (status, json) = submit(
        &app,
        "alice@example.com",
        "OCR",
        "Quarterly Report.pdf",
        "application/pdf",
        &pdf_with_pages(3),
    )
    .await;

    assert_eq!(status, StatusCode::OK, "{json}");
    assert_eq!(json["reused"], false);
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let messages = app.queue.messages("doc_jobs_ocr");
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].job_id, job_id);
    assert_eq!(messages[0].output_filename, "Quarterly_Report.txt");
    assert!(app.queue.messages("doc_jobs").is_empty());
    assert!(app.blobs.object(&messages[0].input_storage_uri).is_some());

    let (status, _, view) = send(
        &app.router,
        authed("GET", &format!("/api/v1/jobs/{job_id}"), "alice@example.com"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["status"], "QUEUED");
    assert_eq!(view["job_type"], "OCR");
    assert_eq!(view["total_pages"], 3);
    assert_eq!(view["source"], "ocr");
}

#[tokio::test]
async fn test_idempotency_header_reuses_job() {
    let app = test_app(JobSettings::default());
    let mut job_ids = Vec::new();
    for _ in 0..2 {
        let body = multipart_body("memo.mp3", "audio/mpeg", b"ID3", &[("job_type", "TRANSCRIPTION")]);
        let request = upload_request("bob@example.com")
            .header("idempotency-key", "upload-42")
            .body(Body::from(body))
            .unwrap();
        let (status, _, json) = send(&app.router, request).await;
        assert_eq!(status, StatusCode::OK, "{json}");
        job_ids.push((json["job_id"].as_str().unwrap().to_string(), json["reused"].clone()));
    }

    assert_eq!(job_ids[0].0, job_ids[1].0);
    assert_eq!(job_ids[0].1, false);
    assert_eq!(job_ids[1].1, true);
    assert_eq!(app.queue.messages("doc_jobs").len(), 1);
}

#[tokio::test]
async fn test_unsupported_extension_is_rejected() {
    let app = test_app(JobSettings::default());
    let (status, json) = submit(&app, "a@b.com", "OCR", "setup.exe", "application/octet-stream", b"MZ").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error_code"], "UNSUPPORTED_FILE_TYPE");
    assert!(app.queue.messages("doc_jobs").is_empty());
}

#[tokio::test]
async fn test_unknown_job_type_is_rejected() {
    let app = test_app(JobSettings::default());
    let (status, json) = submit(&app, "a@b.com", "VIDEO", "clip.mp4", "video/mp4", b"x").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["error_code"], "INVALID_JOB_TYPE");
}

#[tokio::test]
async fn test_other_owner_gets_forbidden() {
    let app = test_app(JobSettings::default());
    let (_, json) = submit(&app, "alice@example.com", "OCR", "scan.png", "image/png", b"png").await;
    let job_id = json["job_id"].as_str().unwrap();

    for (method, uri) in [
        ("GET", format!("/api/v1/jobs/{job_id}")),
        ("POST", format!("/api/v1/jobs/{job_id}/cancel")),
        ("POST", format!("/api/v1/jobs/{job_id}/retry")),
    ] {
        let (status, _, body) = send(&app.router, authed(method, &uri, "mallory@example.com")).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "{method} {uri}");
        assert_eq!(body["error_code"], "FORBIDDEN");
        assert_eq!(body["job_id"], job_id);
    }
}

#[tokio::test]
async fn test_missing_job_is_not_found() {
    let app = test_app(JobSettings::default());
    let (status, _, body) = send(&app.router, authed("GET", "/api/v1/jobs/nope", "a@b.com")).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "JOB_NOT_FOUND");
}

#[tokio::test]
async fn test_cancel_retry_and_list_with_counts() {
    let app = test_app(JobSettings::default());
    let owner = "carol@example.com";
    let (_, json) = submit(&app, owner, "OCR", "scan.png", "image/png", b"png").await;
    let job_id = json["job_id"].as_str().unwrap().to_string();

    let (status, _, body) = send(
        &app.router,
        authed("POST", &format!("/api/v1/jobs/{job_id}/retry"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "CONFLICT");

    let (status, _, body) = send(
        &app.router,
        authed("POST", &format!("/api/v1/jobs/{job_id}/cancel"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "CANCELLED");

    let (status, _, body) = send(
        &app.router,
        authed("POST", &format!("/api/v1/jobs/{job_id}/retry"), owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["retry_of_job_id"], job_id.as_str());
    let retry_id = body["job_id"].as_str().unwrap().to_string();
    assert_ne!(retry_id, job_id);

    let (status, _, page) = send(
        &app.router,
        authed("GET", "/api/v1/jobs?limit=10&include_counts=true", owner),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(page["total"], 2);
    assert_eq!(page["has_more"], false);
    assert_eq!(page["counts_by_status"]["CANCELLED"], 1);
    assert_eq!(page["counts_by_status"]["QUEUED"], 1);
    assert_eq!(page["counts_by_type"]["OCR"], 2);
    assert_eq!(page["items"][0]["job_id"], retry_id.as_str());

    let (status, _, all) = send(&app.router, authed("GET", "/api/v1/jobs", owner)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_unknown_list_filter_is_rejected() {
    let app = test_app(JobSettings::default());
    let (status, _, body) = send(
        &app.router,
        authed("GET", "/api/v1/jobs?limit=5&status=PAUSED", "a@b.com"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_FILTER");
}

#[tokio::test]
async fn test_out_of_range_offset_is_rejected() {
    let app = test_app(JobSettings::default());
    let (status, _, body) = send(
        &app.router,
        authed("GET", "/api/v1/jobs?limit=10&offset=18446744073709551615", "a@b.com"),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "INVALID_QUERY");
}

#[tokio::test]
async fn test_precheck_detects_transcription() {
    let app = test_app(JobSettings::default());
    let request = Request::post("/api/v1/intake/precheck")
        .header("authorization", bearer("a@b.com"))
        .header("content-type", "application/json")
        .body(Body::from(
            serde_json::json!({
                "filename": "interview.mp3",
                "mime_type": "audio/mpeg",
                "file_size_bytes": 1048576,
                "media_duration_sec": 600.0
            })
            .to_string(),
        ))
        .unwrap();
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["detected_job_type"], "TRANSCRIPTION");
    assert_eq!(body["eta_sec"], 120);
    assert_eq!(body["policy_decision"], "ALLOW");
}

#[tokio::test]
async fn test_precheck_disabled_is_not_found() {
    let mut settings = JobSettings::default();
    settings.features.smart_intake = false;
    let app = test_app(settings);
    let request = Request::post("/api/v1/intake/precheck")
        .header("authorization", bearer("a@b.com"))
        .header("content-type", "application/json")
        .body(Body::from(r#"{"filename":"scan.pdf"}"#))
        .unwrap();
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "FEATURE_DISABLED");
}

#[tokio::test]
async fn test_queue_health_lists_partitioned_queues() {
    let app = test_app(partitioned_settings());
    let request = authed("GET", "/api/v1/queue/health", "ops@example.com");
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue_mode"], "partitioned");
    assert_eq!(body["partitioning_enabled"], true);
    let names: Vec<&str> = body["queues"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(|q| q["name"].as_str())
        .collect();
    assert_eq!(names, vec!["doc_jobs_ocr", "doc_jobs_transcription"]);
}

#[tokio::test]
async fn test_queue_health_requires_bearer() {
    let app = test_app(partitioned_settings());
    let request = Request::get("/api/v1/queue/health").body(Body::empty()).unwrap();
    let (status, _, body) = send(&app.router, request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "UNAUTHORIZED");
    assert!(body.get("queues").is_none());
}
