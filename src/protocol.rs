//! Messages exchanged over the persistent push channel.
//!
//! Every frame is a JSON text message `{"event": <name>, "data": <payload>}`.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::timer::TimerRecord;

pub const EVENT_STATE: &str = "timer:state";
pub const EVENT_STARTED: &str = "timer:started";
pub const EVENT_STOPPED: &str = "timer:stopped";
pub const COMMAND_START: &str = "timer:start";
pub const COMMAND_STOP: &str = "timer:stop";

/// Server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum ServerEvent {
    /// Sent once to each new connection, before any broadcast.
    #[serde(rename = "timer:state")]
    State(TimerRecord),
    #[serde(rename = "timer:started")]
    Started(TimerRecord),
    #[serde(rename = "timer:stopped")]
    Stopped(TimerRecord),
}

impl ServerEvent {
    pub fn record(&self) -> &TimerRecord {
        match self {
            ServerEvent::State(record)
            | ServerEvent::Started(record)
            | ServerEvent::Stopped(record) => record,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::State(_) => EVENT_STATE,
            ServerEvent::Started(_) => EVENT_STARTED,
            ServerEvent::Stopped(_) => EVENT_STOPPED,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).context("failed to encode server event")
    }

    pub fn from_json(text: &str) -> Result<Self> {
        serde_json::from_str(text).context("failed to decode server event")
    }
}

/// Client to server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Start { admin_id: Option<String> },
    Stop,
}

#[derive(Deserialize)]
struct RawCommand {
    event: String,
    #[serde(default)]
    data: Value,
}

impl ClientCommand {
    pub fn to_json(&self) -> String {
        match self {
            ClientCommand::Start { admin_id: Some(id) } => {
                json!({ "event": COMMAND_START, "data": { "adminId": id } }).to_string()
            }
            ClientCommand::Start { admin_id: None } => {
                json!({ "event": COMMAND_START, "data": {} }).to_string()
            }
            ClientCommand::Stop => json!({ "event": COMMAND_STOP }).to_string(),
        }
    }

    /// Parses a command frame. Unknown events yield `None`; a start command
    /// with a missing or malformed payload is still a start command.
    pub fn parse(text: &str) -> Option<Self> {
        let raw: RawCommand = serde_json::from_str(text).ok()?;
        match raw.event.as_str() {
            COMMAND_START => Some(ClientCommand::Start {
                admin_id: admin_id_from(&raw.data),
            }),
            COMMAND_STOP => Some(ClientCommand::Stop),
            _ => None,
        }
    }
}

/// Pulls a string `adminId` out of an arbitrary payload, ignoring anything else.
pub fn admin_id_from(payload: &Value) -> Option<String> {
    payload
        .get("adminId")
        .and_then(Value::as_str)
        .map(str::to_string)
}
