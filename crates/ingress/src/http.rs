use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bus::CommandBus;
use serde_json::Value;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};
use types::Command;

/// The HTTP half of command ingress: any JSON object body posted here is
/// parsed as a `Command` and pushed onto the command bus.
/// A non-object body is rejected outright rather than silently coerced,
/// since a bare string or number can never carry the required `type` field.
pub fn router(bus: CommandBus) -> Router {
    Router::new()
        .route("/", post(handle_post))
        .layer(CorsLayer::permissive())
        .with_state(bus)
}

async fn handle_post(
    State(bus): State<CommandBus>,
    Json(body): Json<Value>,
) -> (StatusCode, &'static str) {
    if !body.is_object() {
        warn!("rejected non-object command body");
        return (StatusCode::BAD_REQUEST, "command body must be a JSON object");
    }

    match serde_json::from_value::<Command>(body) {
        Ok(command) => {
            debug!(kind = %command.kind, "ingested command over http");
            bus.publish_command(command).await;
            (StatusCode::OK, "ok")
        }
        Err(e) => {
            warn!(error = %e, "failed to parse command body");
            (StatusCode::BAD_REQUEST, "command body missing `type`")
        }
    }
}
