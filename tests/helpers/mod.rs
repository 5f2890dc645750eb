//! Shared fixtures for the HTTP and lifecycle tests.

#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

use doc_jobs::app_state::AppState;
use doc_jobs::config::JobSettings;
use doc_jobs::models::job::{fields, FieldMap};
use doc_jobs::routes;
use doc_jobs::services::identity::{Claims, JwtVerifier};
use doc_jobs::services::memory::{MemoryBlobStore, MemoryJobQueue, MemoryStateStore};
use doc_jobs::services::state_store::{StateStore, StoreError};

pub const JWT_SECRET: &str = "integration-test-secret";
pub const BOUNDARY: &str = "doc-jobs-test-boundary";

/// Router backed by in-process stores, plus handles to inspect them.
pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStateStore>,
    pub queue: Arc<MemoryJobQueue>,
    pub blobs: Arc<MemoryBlobStore>,
}

pub fn test_app(settings: JobSettings) -> TestApp {
    let store = Arc::new(MemoryStateStore::new());
    let queue = Arc::new(MemoryJobQueue::new());
    let blobs = Arc::new(MemoryBlobStore::new("test-bucket"));
    let state = AppState::new(
        store.clone(),
        queue.clone(),
        blobs.clone(),
        Arc::new(JwtVerifier::new(JWT_SECRET, None)),
        settings,
    );
    TestApp {
        router: routes::router(state.clone()),
        state,
        store,
        queue,
        blobs,
    }
}

pub fn partitioned_settings() -> JobSettings {
    let mut settings = JobSettings::default();
    settings.queues.partitioning_enabled = true;
    settings
}

/// `Authorization` header value for `email`, valid for an hour.
pub fn bearer(email: &str) -> String {
    let claims = Claims {
        sub: format!("user-{email}"),
        email: email.to_string(),
        exp: (Utc::now().timestamp() + 3600) as usize,
        aud: None,
    };
    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(JWT_SECRET.as_bytes()),
    )
    .expect("token should encode");
    format!("Bearer {token}")
}

/// Minimal PDF with `pages` page objects under one page tree.
pub fn pdf_with_pages(pages: usize) -> Vec<u8> {
    let mut pdf = b"%PDF-1.4\n1 0 obj << /Type /Pages /Count 0 >> endobj\n".to_vec();
    for n in 0..pages {
        pdf.extend_from_slice(format!("{} 0 obj << /Type /Page >> endobj\n", n + 2).as_bytes());
    }
    pdf.extend_from_slice(b"%%EOF\n");
    pdf
}

/// Multipart body with a `file` part followed by plain text fields.
pub fn multipart_body(filename: &str, content_type: &str, data: &[u8], fields: &[(&str, &str)]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!("--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n")
                .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"{filename}\"\r\nContent-Type: {content_type}\r\n\r\n"
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(email: &str) -> axum::http::request::Builder {
    Request::builder()
        .method("POST")
        .uri("/api/v1/jobs")
        .header("authorization", bearer(email))
        .header(
            "content-type",
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
}

/// Send `request` and decode the JSON body (`Null` for an empty body).
pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, serde_json::Value) {
    let response = router
        .clone()
        .oneshot(request)
        .await
        .expect("router should respond");
    let status = response.status();
    let headers = response.headers().clone();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body should be readable");
    let json = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
    };
    (status, headers, json)
}

pub async fn submit(
    app: &TestApp,
    email: &str,
    job_type: &str,
    filename: &str,
    content_type: &str,
    data: &[u8],
) -> (StatusCode, serde_json::Value) {
    let body = multipart_body(filename, content_type, data, &[("job_type", job_type)]);
    let request = upload_request(email)
        .body(Body::from(body))
        .expect("request should build");
    let (status, _, json) = send(&app.router, request).await;
    (status, json)
}

pub fn authed(method: &str, uri: &str, email: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", bearer(email))
        .body(Body::empty())
        .expect("request should build")
}

/// Memory store that yields to the scheduler before every call. It can also
/// fail a named operation once, or slip a competing write in ahead of the
/// next versioned compare-and-set.
#[derive(Default)]
pub struct ScriptedStore {
    inner: MemoryStateStore,
    failures: Mutex<Vec<&'static str>>,
    version_race: Mutex<Option<FieldMap>>,
    lost_version_writes: AtomicUsize,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Direct access, without yields or scripted failures.
    pub fn inner(&self) -> &MemoryStateStore {
        &self.inner
    }

    /// The next call to `operation` times out.
    pub fn fail_next(&self, operation: &'static str) {
        self.failures.lock().unwrap().push(operation);
    }

    /// Merge `competing` into the record just before the next compare-and-set
    /// on `version`, as a concurrent writer would.
    pub fn race_next_version_write(&self, competing: FieldMap) {
        *self.version_race.lock().unwrap() = Some(competing);
    }

    /// Versioned compare-and-set calls that did not land.
    pub fn lost_version_writes(&self) -> usize {
        self.lost_version_writes.load(Ordering::SeqCst)
    }

    async fn before(&self, operation: &'static str) -> Result<(), StoreError> {
        tokio::task::yield_now().await;
        let mut failures = self.failures.lock().unwrap();
        if let Some(idx) = failures.iter().position(|op| *op == operation) {
            failures.remove(idx);
            return Err(StoreError::Timeout(Duration::from_millis(1)));
        }
        Ok(())
    }
}

#[async_trait]
impl StateStore for ScriptedStore {
    async fn ping(&self) -> Result<(), StoreError> {
        self.before("ping").await?;
        self.inner.ping().await
    }

    async fn get_fields(&self, key: &str) -> Result<FieldMap, StoreError> {
        self.before("get_fields").await?;
        self.inner.get_fields(key).await
    }

    async fn set_fields(&self, key: &str, fields: &FieldMap) -> Result<(), StoreError> {
        self.before("set_fields").await?;
        self.inner.set_fields(key, fields).await
    }

    async fn compare_and_set_fields(
        &self,
        key: &str,
        guard_field: &str,
        expected: Option<&str>,
        fields: &FieldMap,
    ) -> Result<bool, StoreError> {
        self.before("compare_and_set_fields").await?;
        let versioned = guard_field == fields::VERSION;
        if versioned {
            let competing = self.version_race.lock().unwrap().take();
            if let Some(competing) = competing {
                self.inner.set_fields(key, &competing).await?;
            }
        }
        let landed = self
            .inner
            .compare_and_set_fields(key, guard_field, expected, fields)
            .await?;
        if versioned && !landed {
            self.lost_version_writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(landed)
    }

    async fn get_fields_batch(&self, keys: &[String]) -> Result<Vec<FieldMap>, StoreError> {
        self.before("get_fields_batch").await?;
        self.inner.get_fields_batch(keys).await
    }

    async fn get_projection_batch(
        &self,
        keys: &[String],
        fields: &[&str],
    ) -> Result<Vec<Vec<Option<String>>>, StoreError> {
        self.before("get_projection_batch").await?;
        self.inner.get_projection_batch(keys, fields).await
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.before("get").await?;
        self.inner.get(key).await
    }

    async fn set_with_expiry(&self, key: &str, value: &str, ttl: Duration) -> Result<(), StoreError> {
        self.before("set_with_expiry").await?;
        self.inner.set_with_expiry(key, value, ttl).await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.before("set_if_absent").await?;
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn expire(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.before("expire").await?;
        self.inner.expire(key, ttl).await
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.before("delete").await?;
        self.inner.delete(key).await
    }

    async fn increment(&self, key: &str, ttl: Duration) -> Result<i64, StoreError> {
        self.before("increment").await?;
        self.inner.increment(key, ttl).await
    }

    async fn list_append(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.before("list_append").await?;
        self.inner.list_append(key, value).await
    }

    async fn list_range(&self, key: &str, start: isize, stop: isize) -> Result<Vec<String>, StoreError> {
        self.before("list_range").await?;
        self.inner.list_range(key, start, stop).await
    }

    async fn list_length(&self, key: &str) -> Result<u64, StoreError> {
        self.before("list_length").await?;
        self.inner.list_length(key).await
    }
}
