//! WebSocket side of the control channel
//!
//! Each connection gets a reply for every text message it sends and, in
//! between, every lifecycle announcement (`UpdateAvailable`, `Activated`).

use crate::AppState;
use axum::extract::ws::{Message, WebSocket};
use fincache_proto::ControlReply;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

/// Serve one control connection until either side closes it
pub async fn handle_control_socket(socket: WebSocket, state: AppState) {
    info!("🔌 Control connection established");

    let (mut sender, mut receiver) = socket.split();
    let mut announcements = state.control.subscribe();

    loop {
        let reply = tokio::select! {
            msg = receiver.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    debug!("Control message: {}", text.as_str());
                    state.control.handle_text(text.as_str()).await
                }
                Some(Ok(Message::Binary(_))) => ControlReply::Error {
                    message: "control messages are JSON text frames".to_string(),
                },
                Some(Ok(Message::Close(_))) | None => {
                    info!("🔌 Control connection closed by client");
                    break;
                }
                // Ping/pong are answered by axum
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    warn!("Control connection error: {}", e);
                    break;
                }
            },
            announcement = announcements.recv() => match announcement {
                Ok(reply) => reply,
                Err(RecvError::Lagged(skipped)) => {
                    warn!("Control connection missed {} announcements", skipped);
                    continue;
                }
                Err(RecvError::Closed) => break,
            },
        };

        let json = match reply.to_json() {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to encode control reply: {}", e);
                continue;
            }
        };
        if let Err(e) = sender.send(Message::Text(json.into())).await {
            warn!("Failed to send control reply: {}", e);
            break;
        }
    }

    let _ = sender.close().await;
    debug!("Control connection finished");
}
