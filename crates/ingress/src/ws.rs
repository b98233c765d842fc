use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use bus::CommandBus;
use serde_json::Value;
use tracing::{debug, warn};
use types::Command;

/// The WebSocket half of command ingress. Each inbound text frame is treated
/// exactly like an HTTP POST body: a JSON object, or it is dropped with a
/// warning rather than closing the socket.
pub fn router(bus: CommandBus) -> Router {
    Router::new()
        .route("/", get(handle_upgrade))
        .with_state(bus)
}

async fn handle_upgrade(
    ws: WebSocketUpgrade,
    State(bus): State<CommandBus>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, bus))
}

async fn handle_socket(mut socket: WebSocket, bus: CommandBus) {
    while let Some(Ok(message)) = socket.recv().await {
        let Message::Text(text) = message else {
            continue;
        };

        let parsed: Result<Value, _> = serde_json::from_str(&text);
        match parsed {
            Ok(value) if value.is_object() => match serde_json::from_value::<Command>(value) {
                Ok(command) => {
                    debug!(kind = %command.kind, "ingested command over websocket");
                    bus.publish_command(command).await;
                }
                Err(e) => warn!(error = %e, "websocket command missing `type`"),
            },
            Ok(_) => warn!("rejected non-object websocket command body"),
            Err(e) => warn!(error = %e, "failed to parse websocket frame as json"),
        }
    }
}
