use tracing_subscriber::EnvFilter;

use crate::explorer::ResponseStatusInfo;

/// Initialize the tracing subscriber with the configured log level.
///
/// Maps config log levels to tracing levels:
/// - "DISABLED" -> no subscriber installed
/// - "WARNING" -> WARN
/// - "CRITICAL" -> ERROR
/// - Others map directly (DEBUG, INFO, ERROR)
///
/// `log_format` selects plain lines or one JSON object per event. Output
/// goes to stderr; stdout carries the streamed reply.
pub fn init_tracing(log_level: &str, log_format: &str) {
    let level = log_level.to_uppercase();

    if level == "DISABLED" {
        return;
    }

    let tracing_level = match level.as_str() {
        "WARNING" => "WARN",
        "CRITICAL" => "ERROR",
        other => other,
    };

    let filter = EnvFilter::try_new(tracing_level).unwrap_or_else(|_| EnvFilter::new("INFO"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);
    if log_format.eq_ignore_ascii_case("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// One structured line per finalized request attempt.
pub fn log_attempt_complete(url: &str, status: &ResponseStatusInfo, body_len: usize) {
    tracing::info!(
        url,
        outcome = ?status.outcome,
        http_status = status.http_status,
        request_time_ms = status.request_time_ms,
        ttfb_ms = ?status.time_to_first_byte_ms,
        ttft_ms = ?status.time_to_first_token_ms,
        body_len,
        "request finished"
    );
}
