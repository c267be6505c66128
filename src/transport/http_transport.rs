use std::error::Error as _;
use std::time::Duration;

use http::header::{HeaderMap, AUTHORIZATION, CONTENT_TYPE};

use crate::config::validation::validate_base_url;
use crate::config::HttpConfig;
use crate::error::{ExplorerError, SYNTHETIC_STATUS};

/// A fully resolved outbound request.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: http::Method,
    pub url: url::Url,
    pub body: Option<String>,
    pub api_key: Option<String>,
}

fn build_reqwest_client(
    pool_max_idle_per_host: usize,
    pool_idle_timeout: Option<Duration>,
    connect_timeout: Duration,
    use_env_proxy: bool,
    proxy_url: Option<&str>,
) -> Result<reqwest::Client, ExplorerError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(pool_max_idle_per_host)
        .pool_idle_timeout(pool_idle_timeout)
        .tcp_nodelay(true)
        .connect_timeout(connect_timeout)
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = proxy_url {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| ExplorerError::network(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ExplorerError::network(format!("Failed to build HTTP client: {err}")))
}

/// HTTP client used for every explorer request.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a pooled client from the given settings.
    ///
    /// A client that fails to build (bad proxy, TLS backend error) is logged
    /// and replaced by a default client.
    #[must_use]
    pub fn new(config: &HttpConfig) -> Self {
        let pool_idle_timeout = if config.pool_idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(config.pool_idle_timeout_secs))
        };
        let client = match build_reqwest_client(
            config.pool_max_idle_per_host.max(1),
            pool_idle_timeout,
            Duration::from_secs(config.connect_timeout_secs),
            config.use_env_proxy,
            config.proxy.as_deref(),
        ) {
            Ok(client) => client,
            Err(err) => {
                tracing::error!(error = %err, "failed to build configured reqwest client, falling back to default client");
                reqwest::Client::new()
            }
        };
        Self { client }
    }

    /// Issue the request and return once the response headers are in.
    ///
    /// Non-2xx statuses are returned as responses; only wire failures are errors.
    ///
    /// # Errors
    ///
    /// Returns [`ExplorerError::Transport`] with the synthetic network status
    /// when the connection or request write fails.
    pub async fn send(
        &self,
        request: &OutboundRequest,
    ) -> Result<reqwest::Response, ExplorerError> {
        let mut builder = self
            .client
            .request(request.method.clone(), request.url.clone());
        if let Some(body) = &request.body {
            builder = builder
                .header(CONTENT_TYPE, "application/json")
                .body(body.clone());
        }
        if let Some(api_key) = &request.api_key {
            builder = builder.header(AUTHORIZATION, format!("Bearer {api_key}"));
        }

        tracing::debug!(method = %request.method, url = %request.url, "sending request");
        builder
            .send()
            .await
            .map_err(|err| ExplorerError::network(describe_reqwest_error(&err)))
    }
}

fn describe_reqwest_error(err: &reqwest::Error) -> String {
    let kind = if err.is_connect() {
        "connection failed"
    } else if err.is_timeout() {
        "timed out"
    } else if err.is_body() {
        "body error"
    } else {
        "request failed"
    };
    let mut message = format!("{kind}: {err}");
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Join a user-supplied base URL and an endpoint path.
///
/// # Errors
///
/// Returns [`ExplorerError::Transport`] with status `(0, "Invalid URL")` when
/// the base URL is not an absolute http(s) URL.
pub fn join_url(base_url: &str, path: &str) -> Result<url::Url, ExplorerError> {
    let invalid = |message: String| ExplorerError::Transport {
        status: SYNTHETIC_STATUS,
        status_text: "Invalid URL".to_string(),
        message,
    };
    validate_base_url(base_url).map_err(|err| invalid(err.to_string()))?;
    let joined = format!("{}{}", base_url.trim().trim_end_matches('/'), path);
    url::Url::parse(&joined).map_err(|err| invalid(format!("invalid URL '{joined}': {err}")))
}

/// Render headers as `key: value` lines, one per header value.
#[must_use]
pub fn format_headers(headers: &HeaderMap) -> String {
    let mut out = String::new();
    for (name, value) in headers {
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(name.as_str());
        out.push_str(": ");
        out.push_str(&String::from_utf8_lossy(value.as_bytes()));
    }
    out
}
