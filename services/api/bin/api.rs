//! Main Entrypoint for the Stagecast API Service
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Initializing the shared collaborator engines (agent, TTS, ASR).
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use async_openai::config::OpenAIConfig;
use stagecast_api::{config::Config, registry::SessionRegistry, router::create_router, state::AppState};
use stagecast_core::{
    expression::{ExpressionExtractor, KeywordExpressionExtractor, NoExpressions},
    openai::{OpenAICompatibleAgent, OpenAISpeechTts, OpenAIWhisperAsr, parse_voice},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl+C handler");
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Engines ---
    let openai_config = OpenAIConfig::new()
        .with_api_key(&config.openai_api_key)
        .with_api_base(&config.api_base);

    let agent = Arc::new(OpenAICompatibleAgent::new(
        openai_config.clone(),
        config.chat_model.clone(),
    ));
    let tts = Arc::new(OpenAISpeechTts::new(
        openai_config.clone(),
        config.tts_model.clone(),
        parse_voice(&config.tts_voice),
    ));
    let asr = Arc::new(OpenAIWhisperAsr::new(
        openai_config,
        config.asr_model.clone(),
    ));

    let expressions: Arc<dyn ExpressionExtractor> = if config.expression_map.is_empty() {
        Arc::new(NoExpressions)
    } else {
        info!(
            keywords = config.expression_map.len(),
            "Expression extraction enabled"
        );
        Arc::new(KeywordExpressionExtractor::new(
            config.expression_map.clone(),
        ))
    };

    let app_state = Arc::new(AppState {
        registry: Arc::new(SessionRegistry::new()),
        agent,
        tts,
        asr,
        expressions,
        config: Arc::new(config.clone()),
    });

    // --- 4. Build Router and Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    let listener = tokio::net::TcpListener::bind(config.bind_address)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_address))?;
    info!("Listening on {}", config.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}
