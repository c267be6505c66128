use serde::{Deserialize, Serialize};

use crate::protocol::{ApiFlavor, Endpoint, Operation};

/// Inputs a request body is derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestPreset {
    #[serde(default)]
    pub api_flavor: ApiFlavor,
    #[serde(default)]
    pub operation: Operation,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

fn default_model() -> String {
    "llama2".to_string()
}
fn default_stream() -> bool {
    true
}

impl Default for RequestPreset {
    fn default() -> Self {
        Self {
            api_flavor: ApiFlavor::default(),
            operation: Operation::default(),
            model: default_model(),
            stream: default_stream(),
        }
    }
}

impl RequestPreset {
    #[must_use]
    pub fn endpoint(&self) -> Endpoint {
        self.api_flavor.endpoint(&self.operation)
    }

    #[must_use]
    pub fn build_body(&self) -> String {
        build_request_body(self.api_flavor, &self.operation, &self.model, self.stream)
    }
}

/// What a preset change does to a body the user has edited by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ManualEditPolicy {
    /// Every preset change regenerates the body and discards edits.
    #[default]
    Regenerate,
    /// Edits survive preset changes until the body is reset explicitly.
    Sticky,
}

/// Serialized JSON body for a preset, pretty-printed with two-space indentation.
#[must_use]
pub fn build_request_body(
    api_flavor: ApiFlavor,
    operation: &Operation,
    model: &str,
    stream: bool,
) -> String {
    let body = api_flavor.build_body(operation, model, stream);
    serde_json::to_string_pretty(&body).unwrap_or_else(|_| body.to_string())
}

/// Request body text plus the preset it was derived from.
#[derive(Debug, Clone)]
pub struct RequestComposer {
    preset: RequestPreset,
    body: String,
    edited: bool,
    policy: ManualEditPolicy,
}

impl RequestComposer {
    #[must_use]
    pub fn new(preset: RequestPreset, policy: ManualEditPolicy) -> Self {
        let body = preset.build_body();
        Self {
            preset,
            body,
            edited: false,
            policy,
        }
    }

    #[must_use]
    pub fn preset(&self) -> &RequestPreset {
        &self.preset
    }

    #[must_use]
    pub fn body(&self) -> &str {
        &self.body
    }

    #[must_use]
    pub fn is_edited(&self) -> bool {
        self.edited
    }

    #[must_use]
    pub fn policy(&self) -> ManualEditPolicy {
        self.policy
    }

    /// Replace the preset. Returns whether the body was regenerated.
    pub fn update_preset(&mut self, preset: RequestPreset) -> bool {
        let changed = preset != self.preset;
        self.preset = preset;
        if !changed {
            return false;
        }
        if self.edited && self.policy == ManualEditPolicy::Sticky {
            tracing::debug!("preset changed, keeping manually edited body");
            return false;
        }
        self.regenerate();
        true
    }

    pub fn set_body_manual(&mut self, text: impl Into<String>) {
        self.body = text.into();
        self.edited = true;
    }

    /// Drop manual edits and rebuild the body from the current preset.
    pub fn reset(&mut self) {
        self.regenerate();
    }

    fn regenerate(&mut self) {
        self.body = self.preset.build_body();
        self.edited = false;
    }
}
