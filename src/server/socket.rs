use anyhow::{Context, Result};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, StreamExt},
};
use tokio::sync::broadcast::error::RecvError;
use uuid::Uuid;

use crate::{
    protocol::{ClientCommand, ServerEvent},
    timer::TimerAction,
};

use super::AppState;

const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info, log_warn};

/// Browser upgrades must come from an allowed origin. Upgrades without an
/// `Origin` header are not from a browser and are let through.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Response {
    if let Some(origin) = headers.get(header::ORIGIN) {
        let origin = origin.to_str().unwrap_or_default();
        if !state.config.is_origin_allowed(origin) {
            log_warn!("refusing websocket from origin {:?}", origin);
            return (StatusCode::FORBIDDEN, "origin not allowed").into_response();
        }
    }

    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let peer_id = Uuid::new_v4();
    log_info!("Client connected: {}", peer_id);

    let (mut outbound, mut inbound) = socket.split();

    // Subscribing and snapshotting happen under one lock, so the hello and
    // the broadcasts that follow it line up exactly.
    let (hello, mut events) = state.timer.subscribe().await;
    if let Err(err) = send_event(&mut outbound, &ServerEvent::State(hello)).await {
        log_debug!("hello to {} failed: {err:#}", peer_id);
        return;
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    if let Err(err) = send_event(&mut outbound, &event).await {
                        log_debug!("push to {} failed: {err:#}", peer_id);
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    log_warn!("{} lagged by {} events; pushing current state", peer_id, skipped);
                    let current = state.timer.current().await;
                    let event = if current.is_running() {
                        ServerEvent::Started(current)
                    } else {
                        ServerEvent::Stopped(current)
                    };
                    if send_event(&mut outbound, &event).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Closed) => break,
            },
            message = inbound.next() => match message {
                Some(Ok(Message::Text(text))) => handle_command(&state, peer_id, &text).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    log_debug!("read from {} failed: {}", peer_id, err);
                    break;
                }
            },
            _ = state.shutdown.cancelled() => {
                let _ = outbound.send(Message::Close(None)).await;
                break;
            }
        }
    }

    log_info!("Client disconnected: {}", peer_id);
}

async fn handle_command(state: &AppState, peer_id: Uuid, text: &str) {
    let Some(command) = ClientCommand::parse(text) else {
        log_debug!("ignoring unrecognised frame from {}: {}", peer_id, text);
        return;
    };

    // The resulting broadcast reaches this socket through `events` like
    // every other observer; nothing is echoed here directly.
    match command {
        ClientCommand::Start { admin_id } => {
            match state.gate.admit(TimerAction::Start, admin_id.as_deref()) {
                Ok(actor) => {
                    state.timer.start(actor).await;
                }
                Err(err) => log_warn!("start from {} refused: {}", peer_id, err),
            }
        }
        ClientCommand::Stop => match state.gate.admit(TimerAction::Stop, None) {
            Ok(_) => {
                state.timer.stop().await;
            }
            Err(err) => log_warn!("stop from {} refused: {}", peer_id, err),
        },
    }
}

async fn send_event(
    outbound: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<()> {
    let text = event.to_json()?;
    outbound
        .send(Message::Text(text))
        .await
        .with_context(|| format!("failed to push {}", event.name()))
}
