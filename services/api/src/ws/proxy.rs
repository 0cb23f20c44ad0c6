//! Transparent WebSocket relay to an upstream avatar server.
//!
//! A front end that cannot reach the real server directly (mixed-content
//! restrictions, NAT) connects here instead; every text and binary frame is
//! forwarded verbatim in both directions. The relay terminates as soon as
//! either side closes or errors, tearing down its peer with it. Relayed
//! sessions are invisible to the local registry and control plane.

use crate::state::AppState;
use axum::{
    extract::{
        State,
        ws::{Message as ClientFrame, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use tokio_tungstenite::{connect_async, tungstenite::Message as UpstreamFrame};
use tracing::{info, instrument, warn};

/// Axum handler for the relay endpoint. Refuses the upgrade when no upstream
/// is configured.
pub async fn proxy_ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(upstream_url) = state.config.relay_upstream_url.clone() else {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            "No relay upstream configured",
        )
            .into_response();
    };
    ws.on_upgrade(move |socket| relay_socket(socket, upstream_url))
}

#[instrument(name = "ws_relay", skip(socket))]
async fn relay_socket(socket: WebSocket, upstream_url: String) {
    let upstream = match connect_async(&upstream_url).await {
        Ok((stream, _response)) => stream,
        Err(e) => {
            warn!(error = %e, "Failed to connect to relay upstream");
            // Dropping the client socket closes it.
            return;
        }
    };
    info!("Relay established");

    let (mut client_tx, mut client_rx) = socket.split();
    let (mut upstream_tx, mut upstream_rx) = upstream.split();

    loop {
        tokio::select! {
            frame = client_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                match client_to_upstream(frame) {
                    Some(forward) => {
                        if upstream_tx.send(forward).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            frame = upstream_rx.next() => {
                let Some(Ok(frame)) = frame else { break };
                match upstream_to_client(frame) {
                    Some(forward) => {
                        if client_tx.send(forward).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }
    info!("Relay closed");
}

/// Maps a client frame onto the upstream connection. `None` means the relay
/// should terminate.
fn client_to_upstream(frame: ClientFrame) -> Option<UpstreamFrame> {
    match frame {
        ClientFrame::Text(text) => Some(UpstreamFrame::Text(text.as_str().into())),
        ClientFrame::Binary(bytes) => Some(UpstreamFrame::Binary(bytes)),
        ClientFrame::Ping(payload) => Some(UpstreamFrame::Ping(payload)),
        ClientFrame::Pong(payload) => Some(UpstreamFrame::Pong(payload)),
        ClientFrame::Close(_) => None,
    }
}

/// Maps an upstream frame back onto the client connection.
fn upstream_to_client(frame: UpstreamFrame) -> Option<ClientFrame> {
    match frame {
        UpstreamFrame::Text(text) => Some(ClientFrame::Text(text.as_str().into())),
        UpstreamFrame::Binary(bytes) => Some(ClientFrame::Binary(bytes)),
        UpstreamFrame::Ping(payload) => Some(ClientFrame::Ping(payload)),
        UpstreamFrame::Pong(payload) => Some(ClientFrame::Pong(payload)),
        UpstreamFrame::Close(_) => None,
        // Raw frames never surface from a read loop.
        UpstreamFrame::Frame(_) => None,
    }
}
