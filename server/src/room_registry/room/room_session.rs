use tokio::sync::broadcast;

use super::member_handle::{MemberHandle, RoomBroadcast};

const BROADCAST_CHANNEL_CAPACITY: usize = 100;

/// Seeks landing closer than this to the current cursor are treated as echo
/// of an earlier correction and dropped, so near-simultaneous seeks from
/// different members cannot feed back into each other.
const SEEK_ECHO_THRESHOLD: f64 = 0.3;

/// A room's authoritative timeline at one point in time, read under the room lock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoomSnapshot {
    pub current_time: f64,
    pub is_playing: bool,
}

#[derive(Debug)]
/// [RoomSession] holds the members of one room and its authoritative playback
/// timeline. The timeline is last-write-wins: whichever member reported most
/// recently owns the cursor and the play state.
///
/// A [MemberHandle] is handed out to a connection when it joins the room.
pub struct RoomSession {
    room_id: String,
    passcode: String,
    members: Vec<String>,
    current_time: f64,
    is_playing: bool,
    broadcast_tx: broadcast::Sender<RoomBroadcast>,
}

impl RoomSession {
    pub fn new(room_id: &str, passcode: &str) -> Self {
        let (broadcast_tx, _) = broadcast::channel(BROADCAST_CHANNEL_CAPACITY);

        RoomSession {
            room_id: String::from(room_id),
            passcode: String::from(passcode),
            members: Vec::new(),
            current_time: 0.0,
            is_playing: false,
            broadcast_tx,
        }
    }

    /// The passcode is a shared-secret gate, compared in plaintext. It is not
    /// a security boundary.
    pub fn passcode_matches(&self, passcode: &str) -> bool {
        self.passcode == passcode
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            current_time: self.current_time,
            is_playing: self.is_playing,
        }
    }

    /// Add a connection to the room
    ///
    /// # Returns
    ///
    /// - A broadcast receiver for the connection to receive corrections from the room
    /// - A [MemberHandle] for the connection to publish corrections to the other members
    pub fn join(
        &mut self,
        connection_id: &str,
    ) -> (broadcast::Receiver<RoomBroadcast>, MemberHandle) {
        let broadcast_rx = self.broadcast_tx.subscribe();
        let member_handle = MemberHandle::new(
            self.room_id.clone(),
            String::from(connection_id),
            self.broadcast_tx.clone(),
        );

        self.members.push(String::from(connection_id));

        (broadcast_rx, member_handle)
    }

    /// Remove a connection from the room, returns true once the member list is
    /// empty and the room should be dropped from the registry
    pub fn leave(&mut self, connection_id: &str) -> bool {
        self.members.retain(|id| id != connection_id);

        self.members.is_empty()
    }

    /// Overwrite the authoritative timeline with a member's playback report
    pub fn apply_playback_state(&mut self, timestamp: f64, is_playing: bool) {
        self.current_time = timestamp;
        self.is_playing = is_playing;
    }

    /// Apply a proposed seek, returns false when the delta to the current
    /// cursor is below the echo threshold and the proposal was dropped
    pub fn apply_seek(&mut self, timestamp: f64, should_play: bool) -> bool {
        if (timestamp - self.current_time).abs() < SEEK_ECHO_THRESHOLD {
            return false;
        }

        self.current_time = timestamp;
        self.is_playing = should_play;

        true
    }
}
