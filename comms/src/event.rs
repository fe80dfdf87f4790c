use serde::{Deserialize, Serialize};

/// A command could not be applied; carries a human readable reason for the requester.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorMessageReplyEvent {
    /// Why the command was refused
    #[serde(rename = "m")]
    pub message: String,
}

/// Directive instructing a client to adopt the given playback position and play/pause state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForceSeekEvent {
    /// The playback cursor to adopt, in seconds
    #[serde(rename = "ts")]
    pub timestamp: f64,
    /// Whether playback should run after adopting the cursor
    #[serde(rename = "sp")]
    pub should_play: bool,
    /// Set when this is the first correction after joining a room, so the
    /// client adopts the timeline unconditionally instead of starting at zero
    #[serde(rename = "init", default, skip_serializing_if = "Option::is_none")]
    pub is_initial: Option<bool>,
}

/// Reply confirming the requester has joined a room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinedRoomReplyEvent {
    /// The id of the room that was joined
    #[serde(rename = "r")]
    pub room: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "t", rename_all = "snake_case")]
/// Events that can be sent to the client
/// An event is either a direct reply to the receiving connection or a correction rebroadcast from another room member
pub enum Event {
    ErrorMessage(ErrorMessageReplyEvent),
    ForceSeek(ForceSeekEvent),
    JoinedRoom(JoinedRoomReplyEvent),
}
