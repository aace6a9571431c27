//! Wire types for the admission queue and the session control channel.
//!
//! Queue: requesters push a [`SessionRequest`] and wait on a list named by
//! the session id for an [`EndpointInfo`].
//!
//! Control channel: the peer's first websocket message is a JSON
//! [`ControlMessage::Start`]; the agent answers with a [`Reply`]. After a
//! successful start, binary messages carry input frames.

use serde::{Deserialize, Serialize};

/// A request to run one session, as pushed by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRequest {
    #[serde(rename = "sessionId", alias = "id")]
    pub id: String,
    #[serde(rename = "userId", alias = "user")]
    pub user: String,
    #[serde(rename = "gameId", alias = "game")]
    pub game: String,
}

/// Coordinates published back to the requester.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointInfo {
    pub ws_endpoint: String,
    pub video_signalling_endpoint: String,
    pub audio_signalling_endpoint: String,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartMessage {
    pub user: String,
    pub game: String,
    pub id: String,
}

impl StartMessage {
    /// Whether this start names exactly the session `request` admitted.
    pub fn matches(&self, request: &SessionRequest) -> bool {
        self.id == request.id && self.user == request.user && self.game == request.game
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlMessage {
    Start(StartMessage),
    /// Any other tagged message; accepted and logged only.
    #[serde(other)]
    Unknown,
}

impl ControlMessage {
    pub fn parse(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Reply {
    Ok,
    Err { msg: String },
}

impl Reply {
    pub fn err(msg: impl Into<String>) -> Self {
        Reply::Err { msg: msg.into() }
    }

    pub fn to_json(&self) -> String {
        // Serializing these variants cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"result":"err"}"#.to_string())
    }
}
