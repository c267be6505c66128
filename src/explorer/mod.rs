//! The explorer aggregate: one request composer, one in-flight request at a
//! time, and the response state a view renders.
mod request;
mod status;

use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;

pub use status::ResponseStatusInfo;

use self::request::Attempt;
use self::status::StatusDraft;
use crate::cancel::CancelHandle;
use crate::composer::{ManualEditPolicy, RequestComposer, RequestPreset};
use crate::config::{AppConfig, ExplorerConfig};
use crate::error::{ExplorerError, Outcome};
use crate::observability::log_attempt_complete;
use crate::transport::{join_url, HttpTransport, OutboundRequest};

/// Live explorer state. `is_sending` is derived from the active cancel
/// handle, so the two can never disagree.
#[derive(Debug)]
struct ExplorerSession {
    base_url: String,
    api_key: Option<String>,
    composer: RequestComposer,
    response_body: String,
    response_preview: String,
    response_headers: String,
    status: Option<ResponseStatusInfo>,
    active_cancel: Option<CancelHandle>,
}

impl ExplorerSession {
    fn is_sending(&self) -> bool {
        self.active_cancel.is_some()
    }

    fn clear_response(&mut self) {
        self.response_body.clear();
        self.response_preview.clear();
        self.response_headers.clear();
        self.status = None;
    }

    fn snapshot(&self) -> ExplorerSnapshot {
        ExplorerSnapshot {
            base_url: self.base_url.clone(),
            preset: self.composer.preset().clone(),
            request_body: self.composer.body().to_string(),
            request_body_edited: self.composer.is_edited(),
            response_body: self.response_body.clone(),
            response_preview: self.response_preview.clone(),
            response_headers: self.response_headers.clone(),
            status: self.status.clone(),
            is_sending: self.is_sending(),
        }
    }

    /// Validate the current body and URL into a request ready for the wire.
    fn prepare(&self) -> Result<(OutboundRequest, bool), ExplorerError> {
        let preset = self.composer.preset();
        let endpoint = preset.endpoint();
        let mut stream_requested = false;
        let body = if preset.operation.has_body() {
            let text = self.composer.body();
            let parsed: serde_json::Value = serde_json::from_str(text)
                .map_err(|err| ExplorerError::MalformedRequestBody(err.to_string()))?;
            stream_requested = parsed
                .get("stream")
                .and_then(serde_json::Value::as_bool)
                .unwrap_or(false);
            Some(text.to_string())
        } else {
            None
        };
        let url = join_url(&self.base_url, &endpoint.path)?;
        let request = OutboundRequest {
            method: endpoint.method,
            url,
            body,
            api_key: self.api_key.clone(),
        };
        Ok((request, stream_requested))
    }
}

/// Read-only view of the explorer handed to renderers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExplorerSnapshot {
    pub base_url: String,
    pub preset: RequestPreset,
    pub request_body: String,
    pub request_body_edited: bool,
    pub response_body: String,
    pub response_preview: String,
    pub response_headers: String,
    pub status: Option<ResponseStatusInfo>,
    pub is_sending: bool,
}

struct ExplorerInner {
    transport: HttpTransport,
    session: Mutex<ExplorerSession>,
    revision: watch::Sender<u64>,
}

/// Handle to one explorer instance. Clones share the same session.
#[derive(Clone)]
pub struct Explorer {
    inner: Arc<ExplorerInner>,
}

impl Explorer {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self::with_transport(HttpTransport::new(&config.http), &config.explorer)
    }

    #[must_use]
    pub fn with_transport(transport: HttpTransport, config: &ExplorerConfig) -> Self {
        let session = ExplorerSession {
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            composer: RequestComposer::new(config.preset.clone(), config.manual_edit_policy),
            response_body: String::new(),
            response_preview: String::new(),
            response_headers: String::new(),
            status: None,
            active_cancel: None,
        };
        let (revision, _) = watch::channel(0);
        Self {
            inner: Arc::new(ExplorerInner {
                transport,
                session: Mutex::new(session),
                revision,
            }),
        }
    }

    #[must_use]
    pub fn snapshot(&self) -> ExplorerSnapshot {
        self.inner.session.lock().snapshot()
    }

    /// Revision counter bumped after every state change.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.revision.subscribe()
    }

    #[must_use]
    pub fn is_sending(&self) -> bool {
        self.inner.session.lock().is_sending()
    }

    #[must_use]
    pub fn manual_edit_policy(&self) -> ManualEditPolicy {
        self.inner.session.lock().composer.policy()
    }

    pub fn update_base_url(&self, base_url: impl Into<String>) {
        let base_url = base_url.into();
        self.mutate(|session| session.base_url = base_url);
    }

    pub fn set_api_key(&self, api_key: Option<String>) {
        self.mutate(|session| session.api_key = api_key);
    }

    /// Apply a new preset; the body is regenerated per the manual-edit policy.
    pub fn update_request_body(&self, preset: RequestPreset) {
        self.mutate(|session| {
            session.composer.update_preset(preset);
        });
    }

    pub fn set_request_body_manual(&self, text: impl Into<String>) {
        let text = text.into();
        self.mutate(|session| session.composer.set_body_manual(text));
    }

    /// Discard manual edits and rebuild the body from the current preset.
    pub fn reset_request_body(&self) {
        self.mutate(|session| session.composer.reset());
    }

    /// Send the current request body and drive it to completion.
    ///
    /// The outcome is observed through [`snapshot`](Self::snapshot); this
    /// returns once the attempt is finalized. A call made while another
    /// request is in flight returns immediately without touching state.
    pub async fn send_request(&self) {
        let Some(attempt) = self.begin_attempt() else {
            return;
        };
        let mut guard = AbandonGuard {
            explorer: self,
            started: attempt.started,
            armed: true,
        };
        let mut draft = StatusDraft::new(attempt.started);
        let result = request::run(self, &attempt, &mut draft).await;
        self.finish_attempt(&attempt, draft, result);
        guard.armed = false;
    }

    /// Signal the in-flight request to stop. Returns `false` when idle.
    pub fn stop_request(&self) -> bool {
        let session = self.inner.session.lock();
        match &session.active_cancel {
            Some(cancel) => {
                tracing::info!("stopping in-flight request");
                cancel.cancel();
                true
            }
            None => false,
        }
    }

    fn transport(&self) -> &HttpTransport {
        &self.inner.transport
    }

    fn mutate<R>(&self, f: impl FnOnce(&mut ExplorerSession) -> R) -> R {
        let result = {
            let mut session = self.inner.session.lock();
            f(&mut session)
        };
        self.inner.revision.send_modify(|revision| *revision += 1);
        result
    }

    fn begin_attempt(&self) -> Option<Attempt> {
        let started = Instant::now();
        let mut session = self.inner.session.lock();
        if session.is_sending() {
            tracing::debug!("request already in flight, ignoring send");
            return None;
        }
        session.clear_response();

        let attempt = match session.prepare() {
            Ok((request, stream_requested)) => {
                let cancel = CancelHandle::new();
                session.active_cancel = Some(cancel.clone());
                Some(Attempt {
                    request,
                    flavor: session.composer.preset().api_flavor,
                    stream_requested,
                    cancel,
                    started,
                })
            }
            Err(err) => {
                tracing::warn!(error = %err, "request rejected before sending");
                session.response_body = err.body_message();
                let status = StatusDraft::new(started).finalize_error(&err);
                log_attempt_complete(&session.base_url, &status, session.response_body.len());
                session.status = Some(status);
                None
            }
        };
        drop(session);
        self.inner.revision.send_modify(|revision| *revision += 1);
        attempt
    }

    fn finish_attempt(
        &self,
        attempt: &Attempt,
        draft: StatusDraft,
        result: Result<(), ExplorerError>,
    ) {
        self.mutate(|session| {
            let status = match &result {
                Ok(()) => draft.finalize(Outcome::Success, None),
                Err(err) => {
                    let cancelled = matches!(err, ExplorerError::Cancelled);
                    if session.response_body.is_empty() && !cancelled {
                        session.response_body = err.body_message();
                    }
                    draft.finalize_error(err)
                }
            };
            log_attempt_complete(
                attempt.request.url.as_str(),
                &status,
                session.response_body.len(),
            );
            session.status = Some(status);
            session.active_cancel = None;
        });
    }
}

/// Finalizes the attempt as cancelled if the `send_request` future is
/// dropped mid-flight.
struct AbandonGuard<'a> {
    explorer: &'a Explorer,
    started: Instant,
    armed: bool,
}

impl Drop for AbandonGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let draft = StatusDraft::new(self.started);
        self.explorer.mutate(|session| {
            if let Some(cancel) = session.active_cancel.take() {
                cancel.cancel();
            }
            session.status = Some(draft.finalize_error(&ExplorerError::Cancelled));
        });
        tracing::debug!("send future dropped, attempt finalized as cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpConfig;
    use crate::protocol::{ApiFlavor, Operation};

    fn explorer(policy: ManualEditPolicy) -> Explorer {
        let config = ExplorerConfig {
            manual_edit_policy: policy,
            ..ExplorerConfig::default()
        };
        Explorer::with_transport(HttpTransport::new(&HttpConfig::default()), &config)
    }

    #[test]
    fn test_initial_snapshot() {
        let explorer = explorer(ManualEditPolicy::Regenerate);
        let snapshot = explorer.snapshot();
        assert!(!snapshot.is_sending);
        assert!(snapshot.status.is_none());
        assert!(snapshot.request_body.contains("\"messages\""));
        assert!(!snapshot.request_body_edited);
    }

    #[tokio::test]
    async fn test_malformed_body_never_sends() {
        let explorer = explorer(ManualEditPolicy::Regenerate);
        explorer.update_base_url("http://127.0.0.1:1");
        explorer.set_request_body_manual("{not json");
        explorer.send_request().await;

        let snapshot = explorer.snapshot();
        let status = snapshot.status.expect("status recorded");
        assert_eq!(status.outcome, Outcome::Error);
        assert_eq!(status.status_text, "Invalid Request Body");
        assert!(status.time_to_first_byte_ms.is_none());
        assert!(snapshot.response_body.starts_with("Invalid JSON in request body"));
        assert!(!snapshot.is_sending);
    }

    #[tokio::test]
    async fn test_invalid_base_url_is_an_error() {
        let explorer = explorer(ManualEditPolicy::Regenerate);
        explorer.update_base_url("localhost-without-scheme");
        explorer.send_request().await;
        let status = explorer.snapshot().status.expect("status recorded");
        assert_eq!(status.outcome, Outcome::Error);
        assert_eq!(status.status_text, "Invalid URL");
    }

    #[test]
    fn test_update_request_body_regenerates() {
        let explorer = explorer(ManualEditPolicy::Regenerate);
        explorer.set_request_body_manual("{}");
        explorer.update_request_body(RequestPreset {
            api_flavor: ApiFlavor::OpenAi,
            operation: Operation::Completion,
            model: "m".to_string(),
            stream: false,
        });
        let snapshot = explorer.snapshot();
        assert!(snapshot.request_body.contains("\"prompt\""));
        assert!(!snapshot.request_body_edited);
    }

    #[test]
    fn test_sticky_edits_survive_preset_change() {
        let explorer = explorer(ManualEditPolicy::Sticky);
        explorer.set_request_body_manual("{\"custom\":1}");
        explorer.update_request_body(RequestPreset {
            model: "other".to_string(),
            ..RequestPreset::default()
        });
        assert_eq!(explorer.snapshot().request_body, "{\"custom\":1}");
        explorer.reset_request_body();
        assert!(explorer.snapshot().request_body.contains("\"other\""));
    }

    #[test]
    fn test_stop_when_idle_is_noop() {
        let explorer = explorer(ManualEditPolicy::Regenerate);
        assert!(!explorer.stop_request());
    }

    #[test]
    fn test_mutations_bump_revision() {
        let explorer = explorer(ManualEditPolicy::Regenerate);
        let receiver = explorer.subscribe();
        let before = *receiver.borrow();
        explorer.update_base_url("http://127.0.0.1:8080");
        assert!(*receiver.borrow() > before);
        assert_eq!(explorer.snapshot().base_url, "http://127.0.0.1:8080");
    }
}
