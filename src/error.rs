/// Status code used when no HTTP status line was ever received.
pub const SYNTHETIC_STATUS: u16 = 0;

/// Error type shared by the composer, transport and stream layers.
#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("Invalid JSON in request body: {0}")]
    MalformedRequestBody(String),
    #[error("Transport error: status={status} {status_text}, message={message}")]
    Transport {
        status: u16,
        status_text: String,
        message: String,
    },
    #[error("Stream decode warning: {0}")]
    StreamDecode(String),
    #[error("Request cancelled")]
    Cancelled,
}

/// How an attempt ended, as seen by the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Success,
    Error,
    Cancelled,
}

impl ExplorerError {
    /// Failure on the wire before any status line was read.
    #[must_use]
    pub fn network(message: impl Into<String>) -> Self {
        ExplorerError::Transport {
            status: SYNTHETIC_STATUS,
            status_text: "Network Error".to_string(),
            message: message.into(),
        }
    }

    /// Non-2xx response with its status line.
    #[must_use]
    pub fn upstream(status: http::StatusCode, message: impl Into<String>) -> Self {
        ExplorerError::Transport {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            message: message.into(),
        }
    }

    /// The `(status, status_text)` pair recorded when this error ends an attempt.
    #[must_use]
    pub fn status_line(&self) -> (u16, String) {
        match self {
            ExplorerError::MalformedRequestBody(_) => {
                (SYNTHETIC_STATUS, "Invalid Request Body".to_string())
            }
            ExplorerError::Transport {
                status,
                status_text,
                ..
            } => (*status, status_text.clone()),
            ExplorerError::StreamDecode(_) => (SYNTHETIC_STATUS, "Stream Error".to_string()),
            ExplorerError::Cancelled => (SYNTHETIC_STATUS, "Cancelled".to_string()),
        }
    }

    #[must_use]
    pub fn outcome(&self) -> Outcome {
        match self {
            ExplorerError::Cancelled => Outcome::Cancelled,
            _ => Outcome::Error,
        }
    }

    /// Human-readable text placed into the response body for the view.
    #[must_use]
    pub fn body_message(&self) -> String {
        match self {
            ExplorerError::Transport { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}
