use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};

use crate::{
    protocol::admin_id_from,
    timer::{TimerAction, TimerRecord},
};

use super::AppState;

const ENABLE_LOGS: bool = true;

use crate::log_warn;

pub async fn get_timer_state(State(state): State<AppState>) -> Json<TimerRecord> {
    Json(state.timer.current().await)
}

/// The body is optional and never rejected: anything that is not an object
/// with a string `adminId` falls back to the default actor.
pub async fn start_timer(State(state): State<AppState>, body: Bytes) -> Response {
    let payload: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let requested = admin_id_from(&payload);

    match state.gate.admit(TimerAction::Start, requested.as_deref()) {
        Ok(actor) => Json(state.timer.start(actor).await).into_response(),
        Err(err) => refused(TimerAction::Start, err),
    }
}

pub async fn stop_timer(State(state): State<AppState>) -> Response {
    match state.gate.admit(TimerAction::Stop, None) {
        Ok(_) => Json(state.timer.stop().await).into_response(),
        Err(err) => refused(TimerAction::Stop, err),
    }
}

fn refused(action: TimerAction, err: anyhow::Error) -> Response {
    log_warn!("{:?} refused: {}", action, err);
    (
        StatusCode::FORBIDDEN,
        Json(json!({ "error": err.to_string() })),
    )
        .into_response()
}
