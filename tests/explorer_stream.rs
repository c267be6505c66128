use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::stream::{self, BoxStream};
use futures_util::StreamExt;
use serde_json::json;

use explorer_rs::config::{AppConfig, ExplorerConfig};
use explorer_rs::protocol::{ApiFlavor, Operation};
use explorer_rs::{Explorer, ExplorerSnapshot, Outcome, RequestPreset};

const OLLAMA_HELLO_WORLD: [&str; 3] = [
    "{\"model\":\"llama2\",\"message\":{\"role\":\"assistant\",\"content\":\"Hello\"},\"done\":false}\n",
    "{\"model\":\"llama2\",\"message\":{\"role\":\"assistant\",\"content\":\" world\"},\"done\":false}\n",
    "{\"model\":\"llama2\",\"message\":{\"role\":\"assistant\",\"content\":\"\"},\"done\":true}\n",
];

async fn serve(app: Router) -> (String, tokio::task::JoinHandle<()>) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind mock upstream");
    let addr = listener.local_addr().expect("local addr");
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}"), server)
}

/// A chunked body emitting `chunks` in order; with `hang` the connection
/// stays open afterwards instead of closing.
fn chunked_response(content_type: &'static str, chunks: Vec<&'static str>, hang: bool) -> Response {
    let tail: BoxStream<'static, Result<&'static str, std::io::Error>> = if hang {
        stream::pending().boxed()
    } else {
        stream::empty().boxed()
    };
    let body = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>)).chain(tail);
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .body(Body::from_stream(body))
        .expect("stream response")
}

/// A chunked body that emits `chunks` and then fails, cutting the
/// connection mid-body.
fn broken_response(content_type: &'static str, chunks: Vec<&'static str>) -> Response {
    let failure = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "upstream reset");
    let body = stream::iter(chunks.into_iter().map(Ok::<_, std::io::Error>))
        .chain(stream::once(async move {
            // Let hyper flush the head and chunks before the body errors;
            // otherwise the connection drops before anything is written.
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(failure)
        }));
    Response::builder()
        .status(StatusCode::OK)
        .header("content-type", content_type)
        .body(Body::from_stream(body))
        .expect("broken response")
}

fn explorer_for(base_url: &str, preset: RequestPreset) -> Explorer {
    let config = AppConfig {
        explorer: ExplorerConfig {
            base_url: base_url.to_string(),
            preset,
            ..ExplorerConfig::default()
        },
        ..AppConfig::default()
    };
    Explorer::new(&config)
}

fn preset(api_flavor: ApiFlavor, operation: Operation, stream: bool) -> RequestPreset {
    RequestPreset {
        api_flavor,
        operation,
        model: "llama2".to_string(),
        stream,
    }
}

async fn wait_until(
    explorer: &Explorer,
    predicate: impl Fn(&ExplorerSnapshot) -> bool,
) -> ExplorerSnapshot {
    let mut revisions = explorer.subscribe();
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let snapshot = explorer.snapshot();
            if predicate(&snapshot) {
                return snapshot;
            }
            revisions.changed().await.expect("explorer alive");
        }
    })
    .await
    .expect("condition reached in time")
}

#[tokio::test]
async fn test_ollama_chat_stream_accumulates_preview() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            chunked_response("application/x-ndjson", OLLAMA_HELLO_WORLD.to_vec(), false)
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert!(!snapshot.is_sending);
    assert_eq!(snapshot.response_preview, "Hello world");
    assert_eq!(snapshot.response_body, OLLAMA_HELLO_WORLD.concat());
    assert!(snapshot.response_headers.contains("content-type: application/x-ndjson"));

    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Success);
    assert_eq!(status.http_status, 200);
    assert_eq!(status.status_text, "OK");
    assert!(status.total_streaming_time_ms.is_some());

    server.abort();
}

#[tokio::test]
async fn test_openai_sse_stream_timings_are_ordered() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            chunked_response(
                "text/event-stream",
                vec![
                    "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\"}}]}\n\n",
                    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Hel\"}}]}\n\n",
                    "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo\"}}]}\n\n",
                    "data: [DONE]\n\n",
                ],
                false,
            )
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::OpenAi, Operation::Chat, true));
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert_eq!(snapshot.response_preview, "Hello");
    assert!(snapshot.response_body.contains("data: [DONE]"));

    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Success);
    let ttfb = status.time_to_first_byte_ms.expect("first byte recorded");
    let ttft = status.time_to_first_token_ms.expect("first token recorded");
    assert!(ttfb <= ttft);
    assert!(ttft <= status.request_time_ms);
    assert!(status.total_streaming_time_ms.expect("streaming time") <= status.request_time_ms);

    server.abort();
}

#[tokio::test]
async fn test_ollama_done_flag_ends_stream_without_close() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            chunked_response("application/x-ndjson", OLLAMA_HELLO_WORLD.to_vec(), true)
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    tokio::time::timeout(Duration::from_secs(5), explorer.send_request())
        .await
        .expect("done flag ends the attempt");

    let status = explorer.snapshot().status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Success);

    server.abort();
}

#[tokio::test]
async fn test_stop_mid_stream_keeps_partial_output() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            chunked_response(
                "application/x-ndjson",
                OLLAMA_HELLO_WORLD[..2].to_vec(),
                true,
            )
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    let sender = explorer.clone();
    let send = tokio::spawn(async move { sender.send_request().await });

    wait_until(&explorer, |snapshot| snapshot.response_preview == "Hello world").await;
    assert!(explorer.is_sending());
    assert!(explorer.stop_request());
    tokio::time::timeout(Duration::from_secs(5), send)
        .await
        .expect("send finishes after stop")
        .expect("send task");

    let snapshot = explorer.snapshot();
    assert!(!snapshot.is_sending);
    assert_eq!(snapshot.response_preview, "Hello world");
    assert_eq!(snapshot.response_body, OLLAMA_HELLO_WORLD[..2].concat());

    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Cancelled);
    assert_eq!(status.http_status, 200);
    assert!(status.time_to_first_token_ms.is_some());

    assert!(!explorer.stop_request());
    server.abort();
}

#[tokio::test]
async fn test_send_while_sending_is_ignored() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let app = Router::new().route(
        "/api/chat",
        post(move || {
            let hits = Arc::clone(&hits_clone);
            async move {
                hits.fetch_add(1, Ordering::Relaxed);
                chunked_response("application/x-ndjson", OLLAMA_HELLO_WORLD[..1].to_vec(), true)
            }
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    let sender = explorer.clone();
    let send = tokio::spawn(async move { sender.send_request().await });

    let before = wait_until(&explorer, |snapshot| snapshot.response_preview == "Hello").await;
    explorer.send_request().await;
    assert_eq!(explorer.snapshot(), before);
    assert_eq!(hits.load(Ordering::Relaxed), 1);

    explorer.stop_request();
    send.await.expect("send task");
    server.abort();
}

#[tokio::test]
async fn test_stop_before_headers_is_cancelled() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            std::future::pending::<()>().await;
            StatusCode::OK
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    let sender = explorer.clone();
    let send = tokio::spawn(async move { sender.send_request().await });

    wait_until(&explorer, |snapshot| snapshot.is_sending).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(explorer.stop_request());
    tokio::time::timeout(Duration::from_secs(5), send)
        .await
        .expect("send finishes after stop")
        .expect("send task");

    let snapshot = explorer.snapshot();
    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Cancelled);
    assert_eq!(status.http_status, 0);
    assert!(status.time_to_first_byte_ms.is_none());
    assert!(snapshot.response_body.is_empty());

    server.abort();
}

#[tokio::test]
async fn test_malformed_body_makes_no_network_call() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let app = Router::new().route(
        "/api/chat",
        post(move || {
            let hits = Arc::clone(&hits_clone);
            async move {
                hits.fetch_add(1, Ordering::Relaxed);
                StatusCode::OK
            }
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    explorer.set_request_body_manual("{\"model\": \"llama2\", ");
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Error);
    assert!(snapshot.response_body.starts_with("Invalid JSON in request body"));
    assert_eq!(hits.load(Ordering::Relaxed), 0);

    server.abort();
}

#[tokio::test]
async fn test_error_status_keeps_body() {
    let app = Router::new().route(
        "/v1/chat/completions",
        post(|| async {
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": { "message": "model not loaded" } })),
            )
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::OpenAi, Operation::Chat, true));
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Error);
    assert_eq!(status.http_status, 500);
    assert_eq!(status.status_text, "Internal Server Error");
    assert!(snapshot.response_body.contains("model not loaded"));
    assert!(snapshot.response_body.contains('\n'));

    server.abort();
}

#[tokio::test]
async fn test_missing_route_reports_404() {
    let (base_url, server) = serve(Router::new()).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, false));
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.http_status, 404);
    assert_eq!(status.outcome, Outcome::Error);
    assert_eq!(snapshot.response_body, "HTTP 404 Not Found");

    server.abort();
}

#[tokio::test]
async fn test_connection_refused_is_network_error() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().expect("local addr");
    drop(listener);

    let explorer = explorer_for(
        &format!("http://{addr}"),
        preset(ApiFlavor::Ollama, Operation::Chat, true),
    );
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.http_status, 0);
    assert_eq!(status.status_text, "Network Error");
    assert_eq!(status.outcome, Outcome::Error);
    assert!(status.time_to_first_byte_ms.is_none());
    assert!(!snapshot.response_body.is_empty());
    assert!(!snapshot.is_sending);
}

#[tokio::test]
async fn test_buffered_response_preview() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            Json(json!({
                "model": "llama2",
                "message": { "role": "assistant", "content": "pong" },
                "done": true
            }))
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, false));
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert_eq!(snapshot.response_preview, "pong");
    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Success);
    assert!(status.total_streaming_time_ms.is_none());

    server.abort();
}

#[tokio::test]
async fn test_list_models_uses_get() {
    let app = Router::new().route(
        "/api/tags",
        get(|| async {
            Json(json!({
                "models": [ { "name": "llama2:latest" }, { "name": "mistral:7b" } ]
            }))
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(
        &base_url,
        preset(ApiFlavor::Ollama, Operation::ListModels, false),
    );
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert_eq!(snapshot.response_preview, "llama2:latest\nmistral:7b");
    assert_eq!(
        snapshot.status.expect("status recorded").outcome,
        Outcome::Success
    );

    server.abort();
}

#[tokio::test]
async fn test_malformed_stream_line_is_skipped() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async {
            chunked_response(
                "application/x-ndjson",
                vec![
                    "{\"response\":\"A\",\"done\":false}\n{broken\n",
                    "{\"response\":\"B\",\"done\":false}\n",
                    "{\"response\":\"\",\"done\":true}\n",
                ],
                false,
            )
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(
        &base_url,
        preset(ApiFlavor::Ollama, Operation::Completion, true),
    );
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert_eq!(snapshot.response_preview, "AB");
    assert!(snapshot.response_body.contains("{broken"));
    assert_eq!(
        snapshot.status.expect("status recorded").outcome,
        Outcome::Success
    );

    server.abort();
}

#[tokio::test]
async fn test_api_key_sent_as_bearer() {
    let seen = Arc::new(parking_lot::Mutex::new(None::<String>));
    let seen_clone = Arc::clone(&seen);
    let app = Router::new().route(
        "/v1/models",
        get(move |headers: HeaderMap| {
            let seen = Arc::clone(&seen_clone);
            async move {
                *seen.lock() = headers
                    .get("authorization")
                    .and_then(|value| value.to_str().ok())
                    .map(str::to_string);
                Json(json!({ "data": [ { "id": "gpt-4o-mini" } ] }))
            }
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(
        &base_url,
        preset(ApiFlavor::OpenAi, Operation::ListModels, false),
    );
    explorer.set_api_key(Some("sk-test".to_string()));
    explorer.send_request().await;

    assert_eq!(seen.lock().as_deref(), Some("Bearer sk-test"));
    assert_eq!(explorer.snapshot().response_preview, "gpt-4o-mini");

    server.abort();
}

#[tokio::test]
async fn test_new_send_clears_previous_response() {
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    let app = Router::new().route(
        "/api/generate",
        post(move || {
            let hits = Arc::clone(&hits_clone);
            async move {
                let n = hits.fetch_add(1, Ordering::Relaxed);
                Json(json!({ "response": format!("reply {n}"), "done": true }))
            }
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(
        &base_url,
        preset(ApiFlavor::Ollama, Operation::Completion, false),
    );
    explorer.send_request().await;
    assert_eq!(explorer.snapshot().response_preview, "reply 0");
    explorer.send_request().await;
    assert_eq!(explorer.snapshot().response_preview, "reply 1");

    server.abort();
}

#[tokio::test]
async fn test_buffered_read_failure_is_error_with_partial_body() {
    let app = Router::new().route(
        "/api/generate",
        post(|| async { broken_response("application/json", vec!["{\"response\":\"par"]) }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(
        &base_url,
        preset(ApiFlavor::Ollama, Operation::Completion, false),
    );
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert!(!snapshot.is_sending);
    assert_eq!(snapshot.response_body, "{\"response\":\"par");

    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Error);
    assert_eq!(status.http_status, 200);
    assert!(status
        .message
        .as_deref()
        .is_some_and(|message| message.contains("body read failed")));

    server.abort();
}

#[tokio::test]
async fn test_stream_read_failure_keeps_partial_output() {
    let app = Router::new().route(
        "/api/chat",
        post(|| async {
            broken_response("application/x-ndjson", OLLAMA_HELLO_WORLD[..1].to_vec())
        }),
    );
    let (base_url, server) = serve(app).await;

    let explorer = explorer_for(&base_url, preset(ApiFlavor::Ollama, Operation::Chat, true));
    explorer.send_request().await;

    let snapshot = explorer.snapshot();
    assert!(!snapshot.is_sending);
    assert_eq!(snapshot.response_preview, "Hello");
    assert_eq!(snapshot.response_body, OLLAMA_HELLO_WORLD[0]);

    let status = snapshot.status.expect("status recorded");
    assert_eq!(status.outcome, Outcome::Error);
    assert_eq!(status.http_status, 200);
    assert!(status.time_to_first_token_ms.is_some());

    server.abort();
}
