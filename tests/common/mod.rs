//! In-process HTTP stand-ins for the captioning and refinement backends.

#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

/// Serve `app` on an ephemeral localhost port
pub fn serve(app: Router) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.set_nonblocking(true).unwrap();
    let addr = listener.local_addr().unwrap();

    let server = axum::Server::from_tcp(listener)
        .unwrap()
        .serve(app.into_make_service());
    tokio::spawn(server);

    addr
}

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::to_string)
}

/// Chat completions endpoint with scripted rate limiting
pub struct ChatBackend {
    /// Number of leading requests answered with 429
    pub rate_limited: usize,
    /// Retry-After value sent with each 429
    pub retry_after: Option<&'static str>,
    /// Status returned instead of a completion, once past the rate limit
    pub fail_with: Option<StatusCode>,
    /// Number of leading requests held for `stall` before answering
    pub stalled: usize,
    pub stall: Duration,
    /// Completion text
    pub reply: String,
    pub hits: AtomicUsize,
    pub requests: Mutex<Vec<(Option<String>, Value)>>,
}

impl Default for ChatBackend {
    fn default() -> Self {
        Self {
            rate_limited: 0,
            retry_after: Some("0"),
            fail_with: None,
            stalled: 0,
            stall: Duration::ZERO,
            reply: "a zxc standing on a hill".to_string(),
            hits: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }
}

impl ChatBackend {
    pub fn start(self) -> (Arc<Self>, String) {
        let backend = Arc::new(self);
        let app = Router::new()
            .route("/v1/chat/completions", post(chat_completions))
            .with_state(backend.clone());
        let addr = serve(app);
        (backend, format!("http://{}/v1", addr))
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::SeqCst)
    }

    pub fn requests(&self) -> Vec<(Option<String>, Value)> {
        self.requests.lock().unwrap().clone()
    }
}

async fn chat_completions(
    State(backend): State<Arc<ChatBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let hit = backend.hits.fetch_add(1, Ordering::SeqCst) + 1;
    backend
        .requests
        .lock()
        .unwrap()
        .push((bearer(&headers), body));

    if hit <= backend.stalled {
        tokio::time::sleep(backend.stall).await;
    }

    if hit <= backend.rate_limited {
        let mut response =
            (StatusCode::TOO_MANY_REQUESTS, "Rate limit reached for gpt-4").into_response();
        if let Some(value) = backend.retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from_static(value));
        }
        return response;
    }

    if let Some(status) = backend.fail_with {
        return (status, "model overloaded").into_response();
    }

    Json(json!({
        "id": "chatcmpl-1",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": format!("  {}\n", backend.reply) },
            "finish_reason": "stop"
        }]
    }))
    .into_response()
}

/// Gradio app exposing `/upload` and the `stream_chat` call endpoints
pub struct GradioBackend {
    pub token: String,
    /// Output segments sent with the `complete` event
    pub segments: Vec<String>,
    /// Error message sent as an `error` event instead of a result
    pub error: Option<String>,
    pub uploads: Mutex<Vec<String>>,
    pub calls: Mutex<Vec<Value>>,
}

impl Default for GradioBackend {
    fn default() -> Self {
        Self {
            token: "hf_test".to_string(),
            segments: vec!["a cat".to_string(), "sitting on a mat".to_string()],
            error: None,
            uploads: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
        }
    }
}

impl GradioBackend {
    pub fn start(self) -> (Arc<Self>, String) {
        let backend = Arc::new(self);
        let app = Router::new()
            .route("/upload", post(upload))
            .route("/call/stream_chat", post(submit))
            .route("/call/stream_chat/:event_id", get(result))
            .with_state(backend.clone());
        let addr = serve(app);
        (backend, format!("http://{}", addr))
    }

    pub fn uploads(&self) -> Vec<String> {
        self.uploads.lock().unwrap().clone()
    }

    pub fn calls(&self) -> Vec<Value> {
        self.calls.lock().unwrap().clone()
    }

    fn authorized(&self, headers: &HeaderMap) -> bool {
        bearer(headers).as_deref() == Some(self.token.as_str())
    }
}

/// Pull the uploaded file name out of a multipart body
fn uploaded_file_name(body: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(body);
    if !text.contains("name=\"files\"") {
        return None;
    }
    let start = text.find("filename=\"")? + "filename=\"".len();
    let end = text[start..].find('"')? + start;
    Some(text[start..end].to_string())
}

async fn upload(
    State(backend): State<Arc<GradioBackend>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if !backend.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    }

    match uploaded_file_name(&body) {
        Some(name) => {
            backend.uploads.lock().unwrap().push(name.clone());
            Json(json!([format!("/tmp/gradio/0f3a/{}", name)])).into_response()
        }
        None => (StatusCode::UNPROCESSABLE_ENTITY, "missing files field").into_response(),
    }
}

async fn submit(
    State(backend): State<Arc<GradioBackend>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    if !backend.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    }

    backend.calls.lock().unwrap().push(body);
    Json(json!({ "event_id": "evt-42" })).into_response()
}

async fn result(
    State(backend): State<Arc<GradioBackend>>,
    Path(event_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    if !backend.authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, "Invalid token").into_response();
    }
    if event_id != "evt-42" {
        return (StatusCode::NOT_FOUND, "unknown event").into_response();
    }

    let stream = match &backend.error {
        Some(message) => format!("event: error\ndata: {}\n\n", json!(message)),
        None => {
            let partial = backend
                .segments
                .first()
                .map(|s| s.chars().take(3).collect::<String>())
                .unwrap_or_default();
            format!(
                "event: generating\ndata: {}\n\nevent: heartbeat\ndata: null\n\nevent: complete\ndata: {}\n\n",
                json!([partial]),
                json!(backend.segments)
            )
        }
    };

    ([(CONTENT_TYPE, "text/event-stream")], stream).into_response()
}
