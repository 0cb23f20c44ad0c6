//! Manages the WebSocket connection lifecycle for a viewer session.
//!
//! Each connection gets a fresh session id, a dedicated writer task, and an
//! entry in the registry. The read loop dispatches viewer messages to the
//! turn manager; teardown cancels the active turn and unregisters, in that
//! order, so a turn can never outlive its session.

use super::{
    protocol::{ClientMessage, ServerMessage},
    turn::{self, TurnInput},
};
use crate::{audio, registry::OutboundSender, state::AppState};
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

/// Axum handler to upgrade an HTTP connection to a viewer WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Main handler for an individual viewer connection.
#[instrument(name = "ws_session", skip_all, fields(session_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session_id = Uuid::new_v4();
    tracing::Span::current().record("session_id", session_id.to_string());
    info!("New viewer connection");

    let (sink, mut stream) = socket.split();
    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    let writer = tokio::spawn(write_outbound(sink, outbound_rx));

    let context = state.new_session_context();
    if let Err(e) = state
        .registry
        .register(session_id, outbound_tx.clone(), context.clone())
    {
        error!(error = %e, "Failed to register session");
        return;
    }

    while let Some(Ok(message)) = stream.next().await {
        match message {
            Message::Text(text) => match serde_json::from_str::<ClientMessage>(text.as_str()) {
                Ok(client_message) => {
                    handle_client_message(&state, session_id, &context, &outbound_tx, client_message)
                        .await;
                }
                Err(e) => {
                    warn!(error = %e, "Unparseable client message");
                    let _ = outbound_tx.send(ServerMessage::Error {
                        message: format!("Unrecognized message: {e}"),
                    });
                }
            },
            Message::Close(_) => break,
            // Pings are answered by axum; binary frames are not part of the
            // viewer protocol.
            _ => {}
        }
    }

    info!("Viewer disconnected; tearing down session");
    turn::cancel_turn(&context).await;
    state.registry.unregister(session_id);
    // All senders are gone now, so the writer drains and exits on its own.
    drop(outbound_tx);
    let _ = writer.await;
}

async fn handle_client_message(
    state: &Arc<AppState>,
    session_id: Uuid,
    context: &Arc<crate::state::SessionContext>,
    transport: &OutboundSender,
    message: ClientMessage,
) {
    match message {
        ClientMessage::TextInput { text } => {
            turn::begin_turn(
                &state.registry,
                session_id,
                context.clone(),
                transport.clone(),
                TurnInput::Conversation { user_text: text },
                state.config.slice_length_ms,
            )
            .await;
        }
        ClientMessage::Speak { text } => {
            turn::begin_turn(
                &state.registry,
                session_id,
                context.clone(),
                transport.clone(),
                TurnInput::Spoken(text),
                state.config.slice_length_ms,
            )
            .await;
        }
        ClientMessage::MicAudio { audio } => {
            let samples = audio::decode_pcm16_base64(&audio);
            if samples.is_empty() {
                let _ = transport.send(ServerMessage::Error {
                    message: "Received an empty audio clip".to_string(),
                });
                return;
            }
            match context.asr.transcribe(samples).await {
                Ok(text) if !text.trim().is_empty() => {
                    turn::begin_turn(
                        &state.registry,
                        session_id,
                        context.clone(),
                        transport.clone(),
                        TurnInput::Conversation { user_text: text },
                        state.config.slice_length_ms,
                    )
                    .await;
                }
                Ok(_) => {
                    info!("Transcription came back empty; ignoring clip");
                }
                Err(e) => {
                    warn!(error = ?e, "Transcription failed");
                    let _ = transport.send(ServerMessage::Error {
                        message: format!("Transcription failed: {e}"),
                    });
                }
            }
        }
        ClientMessage::Interrupt => {
            info!("Viewer barge-in");
            turn::cancel_turn(context).await;
        }
    }
}

/// The session's writer task: the single owner of the socket's sending half.
/// Serializes messages in channel order; a failed write means the socket is
/// gone, and the read loop handles the teardown.
async fn write_outbound(
    mut sink: SplitSink<WebSocket, Message>,
    mut outbound_rx: mpsc::UnboundedReceiver<ServerMessage>,
) {
    while let Some(message) = outbound_rx.recv().await {
        let text = match serde_json::to_string(&message) {
            Ok(text) => text,
            Err(e) => {
                error!(error = %e, "Failed to serialize outbound message");
                continue;
            }
        };
        if sink.send(Message::Text(text.into())).await.is_err() {
            break;
        }
    }
}
