//! Axum Handlers for the REST Control Plane
//!
//! This module contains the logic for the control-plane endpoints that drive
//! connected avatar sessions from outside the WebSocket, plus the standalone
//! transcription endpoint. It uses `utoipa` doc comments to generate OpenAPI
//! documentation.

use axum::{
    extract::{Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

use crate::{
    audio::AudioClip,
    models::{
        ControlResponse, ErrorResponse, RespondRequest, SpeakRequest, SystemPromptMode,
        SystemRequest, TranscriptionResponse,
    },
    registry::RegistryError,
    state::AppState,
    ws::turn::{self, TurnInput},
};

const WAV_HEADER_LEN: usize = 44;

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    InternalServerError(anyhow::Error),
}

impl ApiError {
    /// Maps registry failures to control-plane status codes: a missing
    /// explicit target is the caller's mistake (404), an empty registry is a
    /// state conflict (409).
    pub fn from_registry(err: RegistryError) -> Self {
        match err {
            RegistryError::SessionNotFound(_) => Self::NotFound(err.to_string()),
            RegistryError::NoActiveSession | RegistryError::DuplicateSession(_) => {
                Self::Conflict(err.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(ErrorResponse { message })).into_response()
            }
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
            ApiError::Conflict(message) => {
                (StatusCode::CONFLICT, Json(ErrorResponse { message })).into_response()
            }
            ApiError::InternalServerError(err) => {
                error!("Internal Server Error: {:?}", err);
                let message = "An internal server error occurred.".to_string();
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(ErrorResponse { message }),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for ApiError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::InternalServerError(err.into())
    }
}

/// List the ids of all currently connected sessions.
#[utoipa::path(
    get,
    path = "/v1/sessions",
    responses(
        (status = 200, description = "Connected session ids", body = [String])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<Uuid>> {
    Json(state.registry.list_ids())
}

/// Make the targeted avatar(s) speak a text verbatim.
#[utoipa::path(
    post,
    path = "/v1/control/speak",
    request_body = SpeakRequest,
    responses(
        (status = 200, description = "Speech started", body = ControlResponse),
        (status = 404, description = "Target session not connected", body = ErrorResponse),
        (status = 409, description = "No session connected", body = ErrorResponse)
    )
)]
pub async fn speak(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SpeakRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let targets = state
        .registry
        .resolve_targets(&payload.target)
        .map_err(ApiError::from_registry)?;

    let mut applied = Vec::new();
    for &id in &targets {
        if start_turn(&state, id, TurnInput::Spoken(payload.text.clone())).await {
            applied.push(id);
        }
    }
    Ok(Json(ControlResponse::ok(applied, "speaking")))
}

/// Rewrite the system prompt of the targeted session(s).
#[utoipa::path(
    post,
    path = "/v1/control/system",
    request_body = SystemRequest,
    responses(
        (status = 200, description = "Prompt updated", body = ControlResponse),
        (status = 404, description = "Target session not connected", body = ErrorResponse),
        (status = 409, description = "No session connected", body = ErrorResponse)
    )
)]
pub async fn apply_system_prompt(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<SystemRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let targets = state
        .registry
        .resolve_targets(&payload.target)
        .map_err(ApiError::from_registry)?;

    let mut applied = Vec::new();
    for &id in &targets {
        let Some(context) = state.registry.get_context(id) else {
            continue;
        };
        // Append and prepend stack on whatever prompt is currently in effect;
        // only reset goes back to the connect-time baseline.
        let prompt = context.update_system_prompt(&payload.prompt, payload.mode);
        if let Err(e) = context.agent.apply_system_prompt(&prompt).await {
            info!(session_id = %id, error = ?e, "Agent does not accept system prompt updates");
        }
        applied.push(id);
    }
    Ok(Json(ControlResponse::ok(applied, "system prompt updated")))
}

/// Trigger a full conversational turn, as if the viewer had typed the text.
#[utoipa::path(
    post,
    path = "/v1/control/respond",
    request_body = RespondRequest,
    responses(
        (status = 200, description = "Turn started", body = ControlResponse),
        (status = 404, description = "Target session not connected", body = ErrorResponse),
        (status = 409, description = "No session connected", body = ErrorResponse)
    )
)]
pub async fn respond(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RespondRequest>,
) -> Result<Json<ControlResponse>, ApiError> {
    let targets = state
        .registry
        .resolve_targets(&payload.target)
        .map_err(ApiError::from_registry)?;

    let mut applied = Vec::new();
    for &id in &targets {
        let Some(context) = state.registry.get_context(id) else {
            continue;
        };
        // An externally injected turn may follow conversation the agent never
        // saw; give it a chance to refresh before responding.
        if let Err(e) = context.agent.sync_memory(&context.history_uid).await {
            info!(session_id = %id, error = ?e, "Agent memory sync failed");
        }
        let started = start_turn(
            &state,
            id,
            TurnInput::Conversation {
                user_text: payload.text.clone(),
            },
        )
        .await;
        if started {
            applied.push(id);
        }
    }
    Ok(Json(ControlResponse::ok(applied, "responding")))
}

/// Transcribe an uploaded WAV file (PCM16 mono) to text.
#[utoipa::path(
    post,
    path = "/asr",
    request_body(content = String, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Transcription", body = TranscriptionResponse),
        (status = 400, description = "Malformed upload", body = ErrorResponse)
    )
)]
pub async fn transcribe(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Json<TranscriptionResponse>, ApiError> {
    let mut wav_bytes = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(format!("Malformed multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(format!("Failed to read upload: {e}")))?;
            wav_bytes = Some(bytes);
            break;
        }
    }
    let wav_bytes =
        wav_bytes.ok_or_else(|| ApiError::BadRequest("Missing 'file' field".to_string()))?;

    if wav_bytes.len() <= WAV_HEADER_LEN {
        return Err(ApiError::BadRequest(
            "Upload too short to contain audio".to_string(),
        ));
    }
    let pcm16 = &wav_bytes[WAV_HEADER_LEN..];
    if pcm16.len() % 2 != 0 {
        return Err(ApiError::BadRequest(
            "Audio payload has an odd byte length".to_string(),
        ));
    }

    let samples = AudioClip::from_pcm16(pcm16, stagecast_core::openai::ASR_SAMPLE_RATE).samples;
    let text = state.asr.transcribe(samples).await?;
    Ok(Json(TranscriptionResponse { text }))
}

/// Looks up a session's context and transport, then hands the input to the
/// turn manager. Returns whether the turn was actually started: a session
/// that unregistered between resolution and lookup is skipped, and skipped
/// sessions are not reported as acted on.
async fn start_turn(state: &AppState, id: Uuid, input: TurnInput) -> bool {
    let (Some(context), Some(transport)) = (
        state.registry.get_context(id),
        state.registry.get_transport(id),
    ) else {
        return false;
    };
    turn::begin_turn(
        &state.registry,
        id,
        context,
        transport,
        input,
        state.config.slice_length_ms,
    )
    .await;
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetSelector;
    use crate::state::testing::{stub_app_state, stub_context};
    use crate::ws::protocol::ServerMessage;
    use tokio::sync::mpsc;

    async fn settle_turn(state: &AppState, id: Uuid) {
        if let Some(context) = state.registry.get_context(id) {
            if let Some(turn) = context.active_turn.lock().await.take() {
                turn.handle.await.unwrap();
            }
        }
    }

    fn explicit(id: Uuid) -> TargetSelector {
        TargetSelector {
            client_uid: Some(id),
            apply_to_all: false,
        }
    }

    #[tokio::test]
    async fn speak_reports_only_sessions_it_reached() {
        let state = stub_app_state(None);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.registry.register(id, tx, stub_context()).unwrap();

        let response = speak(
            State(state.clone()),
            Json(SpeakRequest {
                text: "Hello there.".to_string(),
                target: TargetSelector {
                    client_uid: None,
                    apply_to_all: true,
                },
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.targets, vec![id]);

        // The reported session really received a turn.
        settle_turn(&state, id).await;
        let mut saw_full_text = false;
        while let Ok(message) = rx.try_recv() {
            if matches!(message, ServerMessage::FullText { .. }) {
                saw_full_text = true;
            }
        }
        assert!(saw_full_text);

        // A session that vanished before the turn could start is skipped,
        // so it can never be reported as acted on.
        assert!(!start_turn(&state, Uuid::new_v4(), TurnInput::Spoken("x".to_string())).await);
    }

    #[tokio::test]
    async fn system_prompt_appends_stack_across_requests() {
        let state = stub_app_state(None);
        let (tx, _rx) = mpsc::unbounded_channel();
        let id = Uuid::new_v4();
        state.registry.register(id, tx, stub_context()).unwrap();

        for instruction in ["be dramatic", "whisper"] {
            apply_system_prompt(
                State(state.clone()),
                Json(SystemRequest {
                    prompt: instruction.to_string(),
                    mode: SystemPromptMode::Append,
                    target: explicit(id),
                }),
            )
            .await
            .unwrap();
        }
        let context = state.registry.get_context(id).unwrap();
        assert_eq!(
            context.current_system_prompt(),
            "base prompt\n\nbe dramatic\n\nwhisper"
        );

        let response = apply_system_prompt(
            State(state.clone()),
            Json(SystemRequest {
                prompt: String::new(),
                mode: SystemPromptMode::Reset,
                target: explicit(id),
            }),
        )
        .await
        .unwrap();
        assert_eq!(response.0.targets, vec![id]);
        assert_eq!(context.current_system_prompt(), "base prompt");
    }

    #[tokio::test]
    async fn control_errors_map_to_conflict_and_not_found() {
        let state = stub_app_state(None);
        let err = speak(
            State(state.clone()),
            Json(SpeakRequest {
                text: "x".to_string(),
                target: TargetSelector::default(),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::Conflict(_)));

        let (tx, _rx) = mpsc::unbounded_channel();
        state
            .registry
            .register(Uuid::new_v4(), tx, stub_context())
            .unwrap();
        let err = speak(
            State(state.clone()),
            Json(SpeakRequest {
                text: "x".to_string(),
                target: explicit(Uuid::new_v4()),
            }),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, ApiError::NotFound(_)));
    }
}
