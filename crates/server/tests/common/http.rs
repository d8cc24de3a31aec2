//! Request helpers driving the router in-process.

use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use bytes::Bytes;
use serde_json::Value;
use tower::ServiceExt;

/// Helper to make JSON requests.
#[allow(dead_code)]
pub async fn json_request(
    router: &axum::Router,
    method: &str,
    uri: &str,
    body: Option<Value>,
    auth_token: Option<&str>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);

    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }

    let body = match body {
        Some(v) => {
            builder = builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&v).unwrap())
        }
        None => Body::empty(),
    };

    let request = builder.body(body).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    let json: Value = if body_bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
    };

    (status, json)
}

/// A streamed upload as the CLI sends it.
#[allow(dead_code)]
pub struct Upload<'a> {
    pub name: &'a str,
    pub content_type: &'a str,
    pub data: Bytes,
    /// Extra query string, without the leading `?`.
    pub query: Option<String>,
    pub sha256: Option<String>,
    pub idempotency_key: Option<&'a str>,
}

#[allow(dead_code)]
impl<'a> Upload<'a> {
    pub fn new(name: &'a str, content_type: &'a str, data: Bytes) -> Self {
        Self {
            name,
            content_type,
            data,
            query: None,
            sha256: None,
            idempotency_key: None,
        }
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn sha256(mut self, hex: impl Into<String>) -> Self {
        self.sha256 = Some(hex.into());
        self
    }

    pub fn idempotency_key(mut self, key: &'a str) -> Self {
        self.idempotency_key = Some(key);
        self
    }
}

/// POST a file to `/v1/files` and return the JSON response.
#[allow(dead_code)]
pub async fn upload(router: &axum::Router, token: &str, upload: Upload<'_>) -> (StatusCode, Value) {
    let uri = match &upload.query {
        Some(q) => format!("/v1/files?{q}"),
        None => "/v1/files".to_string(),
    };
    let name = percent_encoding::utf8_percent_encode(
        upload.name,
        percent_encoding::NON_ALPHANUMERIC,
    )
    .to_string();

    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Authorization", format!("Bearer {}", token))
        .header("Content-Type", upload.content_type)
        .header("Content-Length", upload.data.len().to_string())
        .header("X-File-Name", name);
    if let Some(hash) = &upload.sha256 {
        builder = builder.header("X-Content-SHA256", hash.as_str());
    }
    if let Some(key) = upload.idempotency_key {
        builder = builder.header("Idempotency-Key", key);
    }

    let request = builder.body(Body::from(upload.data)).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let body_bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body_bytes).unwrap_or(Value::Null);
    (status, json)
}

/// GET a URI and return status, headers and the raw body.
#[allow(dead_code)]
pub async fn raw_get(
    router: &axum::Router,
    uri: &str,
    auth_token: Option<&str>,
) -> (StatusCode, HeaderMap, Bytes) {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = auth_token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    let request = builder.body(Body::empty()).unwrap();
    let response = router.clone().oneshot(request).await.unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, body)
}
