//! Webhook server — liveness probe and the Telegram update endpoint.
//!
//! Every update is acknowledged with 200, whatever happened while handling
//! it, so the platform never redelivers because of an application error.

use std::any::Any;
use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

use crate::channels::telegram::parse_update;
use crate::form::DialogueEngine;

/// Largest update body read. Bigger bodies are acknowledged and dropped.
const MAX_UPDATE_BYTES: usize = 1024 * 1024;

/// Shared state for the webhook routes.
#[derive(Clone)]
pub struct WebhookState {
    pub engine: Arc<DialogueEngine>,
}

/// Build the webhook router: `GET /` liveness, `POST /` updates.
pub fn webhook_routes(engine: Arc<DialogueEngine>) -> Router {
    Router::new()
        .route("/", get(liveness).post(receive_update))
        .with_state(WebhookState { engine })
        .layer(CatchPanicLayer::custom(acknowledge_panic))
        .layer(TraceLayer::new_for_http())
}

async fn liveness() -> &'static str {
    "OK"
}

/// POST /
///
/// The body is taken raw, with its own size limit, so that invalid JSON and
/// oversized payloads are acknowledged too.
async fn receive_update(State(state): State<WebhookState>, body: Body) -> StatusCode {
    let body = match axum::body::to_bytes(body, MAX_UPDATE_BYTES).await {
        Ok(body) => body,
        Err(e) => {
            debug!(limit = MAX_UPDATE_BYTES, "Ignoring unreadable update body: {e}");
            return StatusCode::OK;
        }
    };

    let update: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(update) => update,
        Err(e) => {
            debug!(bytes = body.len(), "Ignoring unparsable update: {e}");
            return StatusCode::OK;
        }
    };

    let Some(message) = parse_update(&update) else {
        debug!(
            update_id = update.get("update_id").and_then(serde_json::Value::as_i64),
            "Ignoring update without a text message"
        );
        return StatusCode::OK;
    };

    state.engine.handle(message).await;
    StatusCode::OK
}

fn acknowledge_panic(err: Box<dyn Any + Send + 'static>) -> Response {
    let reason = err
        .downcast_ref::<String>()
        .map(String::as_str)
        .or_else(|| err.downcast_ref::<&str>().copied())
        .unwrap_or("unknown panic");
    error!("Update handler panicked: {reason}");
    StatusCode::OK.into_response()
}
