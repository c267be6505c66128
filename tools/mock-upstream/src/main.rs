use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::stream::{self, BoxStream, StreamExt};
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde_json::{json, Value};
use tokio::net::TcpListener;

const DEFAULT_UPSTREAM_PORT: u16 = 11_434;
const DEFAULT_DELAY_MS: u64 = 80;
const REPLY: &str = "The sky looks blue because air scatters short wavelengths of sunlight more than long ones.";

type MockBody = UnsyncBoxBody<Bytes, Infallible>;

#[derive(Copy, Clone)]
enum MockScenario {
    /// Normal replies.
    Text,
    /// Every generation endpoint answers 503.
    Error,
    /// Streams the reply, then keeps the connection open without ending.
    Hang,
}

impl MockScenario {
    fn as_str(self) -> &'static str {
        match self {
            MockScenario::Text => "text",
            MockScenario::Error => "error",
            MockScenario::Hang => "hang",
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq)]
enum Route {
    OllamaChat,
    OllamaGenerate,
    OllamaEmbed,
    OllamaTags,
    OpenAiChat,
    OpenAiCompletion,
    OpenAiEmbeddings,
    OpenAiModels,
}

impl Route {
    fn is_ollama(self) -> bool {
        matches!(
            self,
            Route::OllamaChat | Route::OllamaGenerate | Route::OllamaEmbed | Route::OllamaTags
        )
    }

    fn generates_text(self) -> bool {
        matches!(
            self,
            Route::OllamaChat | Route::OllamaGenerate | Route::OpenAiChat | Route::OpenAiCompletion
        )
    }
}

struct MockState {
    scenario: MockScenario,
    delay: Duration,
    requests: AtomicU64,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u64("UPSTREAM_PORT", u64::from(DEFAULT_UPSTREAM_PORT));
    let port = u16::try_from(port).unwrap_or(DEFAULT_UPSTREAM_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        delay: Duration::from_millis(env_u64("MOCK_DELAY_MS", DEFAULT_DELAY_MS)),
        requests: AtomicU64::new(0),
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock upstream on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock upstream listening on http://127.0.0.1:{port} (scenario={})",
        state.scenario.as_str()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock upstream connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("error") => MockScenario::Error,
        Ok("hang") => MockScenario::Hang,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<MockBody> {
    let (parts, body) = request.into_parts();
    let body = body
        .collect()
        .await
        .map(|collected| collected.to_bytes())
        .unwrap_or_default();
    let path = parts.uri.path();

    if parts.method == Method::GET && path == "/_mock/stats" {
        let stats = json!({
            "scenario": state.scenario.as_str(),
            "requests": state.requests.load(Ordering::Relaxed),
        });
        return json_response(StatusCode::OK, &stats);
    }
    state.requests.fetch_add(1, Ordering::Relaxed);

    let Some(route) = route_for(&parts.method, path) else {
        return json_response(StatusCode::NOT_FOUND, &json!({ "error": "not_found" }));
    };
    if route.generates_text() && matches!(state.scenario, MockScenario::Error) {
        return json_response(
            StatusCode::SERVICE_UNAVAILABLE,
            &json!({ "error": "mock_injected_error" }),
        );
    }

    let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let model = request
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or("mock-model")
        .to_string();
    // Ollama streams unless told otherwise; OpenAI only when asked.
    let stream = request
        .get("stream")
        .and_then(Value::as_bool)
        .unwrap_or(route.is_ollama());

    match route {
        Route::OllamaTags => json_response(
            StatusCode::OK,
            &json!({ "models": [ { "name": "llama2:latest" }, { "name": "mistral:7b" } ] }),
        ),
        Route::OpenAiModels => json_response(
            StatusCode::OK,
            &json!({ "object": "list", "data": [ { "id": "gpt-4o-mini", "object": "model" } ] }),
        ),
        Route::OllamaEmbed => json_response(
            StatusCode::OK,
            &json!({ "model": model, "embeddings": [sample_embedding()] }),
        ),
        Route::OpenAiEmbeddings => json_response(
            StatusCode::OK,
            &json!({
                "object": "list",
                "data": [ { "object": "embedding", "index": 0, "embedding": sample_embedding() } ],
                "model": model,
            }),
        ),
        _ if stream => streaming_response(route, &model, state),
        _ => json_response(StatusCode::OK, &full_reply(route, &model)),
    }
}

fn route_for(method: &Method, path: &str) -> Option<Route> {
    let route = match path {
        "/api/chat" => Route::OllamaChat,
        "/api/generate" => Route::OllamaGenerate,
        "/api/embed" | "/api/embeddings" => Route::OllamaEmbed,
        "/api/tags" => Route::OllamaTags,
        "/v1/chat/completions" => Route::OpenAiChat,
        "/v1/completions" => Route::OpenAiCompletion,
        "/v1/embeddings" => Route::OpenAiEmbeddings,
        "/v1/models" => Route::OpenAiModels,
        _ => return None,
    };
    let expected = if matches!(route, Route::OllamaTags | Route::OpenAiModels) {
        Method::GET
    } else {
        Method::POST
    };
    (*method == expected).then_some(route)
}

fn sample_embedding() -> Vec<f64> {
    (0..8).map(|i| f64::from(i) / 10.0).collect()
}

fn full_reply(route: Route, model: &str) -> Value {
    match route {
        Route::OllamaChat => json!({
            "model": model,
            "message": { "role": "assistant", "content": REPLY },
            "done": true,
        }),
        Route::OllamaGenerate => json!({ "model": model, "response": REPLY, "done": true }),
        Route::OpenAiCompletion => json!({
            "id": "cmpl-mock",
            "object": "text_completion",
            "model": model,
            "choices": [ { "index": 0, "text": REPLY, "finish_reason": "stop" } ],
        }),
        _ => json!({
            "id": "chatcmpl-mock",
            "object": "chat.completion",
            "model": model,
            "choices": [ {
                "index": 0,
                "message": { "role": "assistant", "content": REPLY },
                "finish_reason": "stop",
            } ],
        }),
    }
}

/// One wire frame per word: NDJSON lines for Ollama, SSE events for OpenAI.
fn stream_frames(route: Route, model: &str) -> Vec<Bytes> {
    let words: Vec<String> = REPLY
        .split_inclusive(' ')
        .map(str::to_string)
        .collect();
    let mut frames: Vec<String> = words
        .iter()
        .map(|word| match route {
            Route::OllamaChat => json!({
                "model": model,
                "message": { "role": "assistant", "content": word },
                "done": false,
            })
            .to_string() + "\n",
            Route::OllamaGenerate => {
                json!({ "model": model, "response": word, "done": false }).to_string() + "\n"
            }
            Route::OpenAiCompletion => format!(
                "data: {}\n\n",
                json!({
                    "id": "cmpl-mock",
                    "object": "text_completion",
                    "model": model,
                    "choices": [ { "index": 0, "text": word, "finish_reason": null } ],
                })
            ),
            _ => format!(
                "data: {}\n\n",
                json!({
                    "id": "chatcmpl-mock",
                    "object": "chat.completion.chunk",
                    "model": model,
                    "choices": [ { "index": 0, "delta": { "content": word }, "finish_reason": null } ],
                })
            ),
        })
        .collect();

    match route {
        Route::OllamaChat => frames.push(
            json!({
                "model": model,
                "message": { "role": "assistant", "content": "" },
                "done": true,
                "done_reason": "stop",
            })
            .to_string()
                + "\n",
        ),
        Route::OllamaGenerate => frames.push(
            json!({ "model": model, "response": "", "done": true, "done_reason": "stop" })
                .to_string()
                + "\n",
        ),
        _ => frames.push("data: [DONE]\n\n".to_string()),
    }
    frames.into_iter().map(Bytes::from).collect()
}

fn streaming_response(route: Route, model: &str, state: &MockState) -> Response<MockBody> {
    let mut frames = stream_frames(route, model);
    let hang = matches!(state.scenario, MockScenario::Hang);
    if hang {
        // Drop the terminal frame so the client cannot tell the reply is over.
        frames.pop();
    }
    let delay = state.delay;
    let paced = stream::iter(frames).then(move |frame| async move {
        tokio::time::sleep(delay).await;
        Ok::<_, Infallible>(Frame::data(frame))
    });
    let tail: BoxStream<'static, Result<Frame<Bytes>, Infallible>> = if hang {
        stream::pending().boxed()
    } else {
        stream::empty().boxed()
    };
    let body = StreamBody::new(paced.chain(tail)).boxed_unsync();

    let content_type = if route.is_ollama() {
        "application/x-ndjson"
    } else {
        "text/event-stream"
    };
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn json_response(status: StatusCode, body: &Value) -> Response<MockBody> {
    let mut response = Response::new(Full::new(Bytes::from(body.to_string())).boxed_unsync());
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}
