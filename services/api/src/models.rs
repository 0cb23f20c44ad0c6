//! Control-Plane API Models
//!
//! This module defines the request and response bodies for the REST control
//! plane, annotated for OpenAPI documentation with `utoipa`.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Which session(s) a control request applies to. Both fields are optional:
/// with neither set, the request targets the last-active session (falling
/// back to the most recently connected one).
#[derive(Deserialize, Serialize, ToSchema, Debug, Default, Clone)]
pub struct TargetSelector {
    /// Target one specific session by id.
    #[serde(default)]
    #[schema(value_type = Option<String>, format = Uuid)]
    pub client_uid: Option<Uuid>,
    /// Broadcast to every connected session. Takes precedence over
    /// `client_uid`.
    #[serde(default)]
    pub apply_to_all: bool,
}

/// Make the avatar speak a given text verbatim, bypassing the agent.
#[derive(Deserialize, ToSchema, Debug)]
pub struct SpeakRequest {
    pub text: String,
    #[serde(flatten)]
    pub target: TargetSelector,
}

/// How a system-prompt update combines with the session's baseline prompt.
#[derive(Deserialize, Serialize, ToSchema, Debug, Clone, Copy, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SystemPromptMode {
    /// Baseline prompt followed by the new text.
    Append,
    /// New text followed by the baseline prompt.
    Prepend,
    /// Discard updates and restore the baseline prompt. `prompt` is ignored.
    Reset,
}

impl Default for SystemPromptMode {
    fn default() -> Self {
        Self::Append
    }
}

/// Rewrite a session's system prompt relative to its baseline.
#[derive(Deserialize, ToSchema, Debug)]
pub struct SystemRequest {
    #[serde(default)]
    pub prompt: String,
    #[serde(default)]
    pub mode: SystemPromptMode,
    #[serde(flatten)]
    pub target: TargetSelector,
}

/// Trigger a full conversational turn as if the user had typed the text.
#[derive(Deserialize, ToSchema, Debug)]
pub struct RespondRequest {
    pub text: String,
    #[serde(flatten)]
    pub target: TargetSelector,
}

/// Uniform control-plane acknowledgement.
#[derive(Serialize, ToSchema, Debug)]
pub struct ControlResponse {
    pub status: String,
    /// The sessions the operation was applied to.
    #[schema(value_type = Vec<String>, format = Uuid)]
    pub targets: Vec<Uuid>,
    pub message: String,
}

impl ControlResponse {
    pub fn ok(targets: Vec<Uuid>, message: impl Into<String>) -> Self {
        Self {
            status: "ok".to_string(),
            targets,
            message: message.into(),
        }
    }
}

#[derive(Serialize, ToSchema, Debug)]
pub struct ErrorResponse {
    pub message: String,
}

/// Result of the standalone transcription endpoint.
#[derive(Serialize, ToSchema, Debug)]
pub struct TranscriptionResponse {
    pub text: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn selector_defaults_to_last_active() {
        let req: SpeakRequest = serde_json::from_str(r#"{"text": "hello"}"#).unwrap();
        assert!(req.target.client_uid.is_none());
        assert!(!req.target.apply_to_all);
    }

    #[test]
    fn selector_fields_flatten_into_the_request_body() {
        let id = Uuid::new_v4();
        let json = format!(r#"{{"text": "hi", "client_uid": "{id}"}}"#);
        let req: SpeakRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(req.target.client_uid, Some(id));

        let req: RespondRequest =
            serde_json::from_str(r#"{"text": "hi", "apply_to_all": true}"#).unwrap();
        assert!(req.target.apply_to_all);
    }

    #[test]
    fn system_request_mode_defaults_to_append() {
        let req: SystemRequest = serde_json::from_str(r#"{"prompt": "be terse"}"#).unwrap();
        assert_eq!(req.mode, SystemPromptMode::Append);

        let req: SystemRequest = serde_json::from_str(r#"{"mode": "reset"}"#).unwrap();
        assert_eq!(req.mode, SystemPromptMode::Reset);
        assert!(req.prompt.is_empty());
    }
}
