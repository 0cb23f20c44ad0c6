//! Axum Router Configuration
//!
//! This module defines the complete HTTP routing for the application,
//! including the REST control plane, the WebSocket endpoints, and OpenAPI
//! documentation.

use crate::{
    handlers,
    models::{
        ControlResponse, ErrorResponse, RespondRequest, SpeakRequest, SystemPromptMode,
        SystemRequest, TargetSelector, TranscriptionResponse,
    },
    state::AppState,
    ws::{proxy_ws_handler, ws_handler},
};

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::list_sessions,
        handlers::speak,
        handlers::apply_system_prompt,
        handlers::respond,
        handlers::transcribe,
    ),
    components(
        schemas(
            TargetSelector,
            SpeakRequest,
            SystemRequest,
            SystemPromptMode,
            RespondRequest,
            ControlResponse,
            ErrorResponse,
            TranscriptionResponse,
        )
    ),
    tags(
        (name = "Stagecast API", description = "Session orchestration and control plane for the avatar server")
    )
)]
pub struct ApiDoc;

/// Creates the main Axum router for the application.
pub fn create_router(app_state: Arc<AppState>) -> Router {
    // Group all routes that require AppState into their own router.
    let api_router = Router::new()
        .route("/v1/sessions", get(handlers::list_sessions))
        .route("/v1/control/speak", post(handlers::speak))
        .route("/v1/control/system", post(handlers::apply_system_prompt))
        .route("/v1/control/respond", post(handlers::respond))
        .route("/asr", post(handlers::transcribe))
        .route("/ws", get(ws_handler))
        .route("/proxy-ws", get(proxy_ws_handler))
        // Apply the state ONLY to this group of routes.
        .with_state(app_state);

    // Merge the stateful routes with the stateless Swagger UI.
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .merge(api_router)
}
