use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, Mutex};
use tracing::debug;

use super::room::{MemberHandle, RoomBroadcast, RoomSession, RoomSnapshot};

/// Everything a session needs after joining a room: the receiver for the
/// room's corrections, the member handle to publish its own, and the timeline
/// snapshot when the room already existed before this join.
#[derive(Debug)]
pub struct RoomJoin {
    pub broadcast_rx: broadcast::Receiver<RoomBroadcast>,
    pub handle: MemberHandle,
    /// Present only when the join did not create the room. A late joiner uses
    /// it to adopt the authoritative timeline instead of starting at zero.
    pub timeline: Option<RoomSnapshot>,
}

/// Why a join was refused. The room is left untouched in either case.
#[derive(Debug, PartialEq, Eq)]
pub enum JoinRoomError {
    IncorrectPasscode,
}

/// Outcome of a proposed seek.
#[derive(Debug, PartialEq, Eq)]
pub enum SeekOutcome {
    /// The timeline was updated; a correction should be broadcast.
    Applied,
    /// The delta was below the echo threshold; nothing changed.
    Echo,
    /// The room no longer exists.
    RoomGone,
}

#[derive(Debug, Default)]
/// [RoomRegistry] owns every live [RoomSession], keyed by room id.
///
/// Rooms are created implicitly by the first join and dropped as soon as the
/// last member leaves; a room id is present in the map if and only if the
/// room has at least one member. Lock order is always map before room.
pub struct RoomRegistry {
    rooms: Mutex<HashMap<String, Arc<Mutex<RoomSession>>>>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        RoomRegistry {
            rooms: Mutex::new(HashMap::new()),
        }
    }

    /// Join a room as the given connection, creating the room with the given
    /// passcode when no room with that id exists yet.
    pub async fn join_room(
        &self,
        room_id: &str,
        passcode: &str,
        connection_id: &str,
    ) -> Result<RoomJoin, JoinRoomError> {
        let mut rooms = self.rooms.lock().await;

        match rooms.get(room_id) {
            Some(room) => {
                let mut room = room.lock().await;

                if !room.passcode_matches(passcode) {
                    return Err(JoinRoomError::IncorrectPasscode);
                }

                // Snapshot before adding the member, so the joiner's initial
                // correction carries the timeline it has to catch up to
                let timeline = room.snapshot();
                let (broadcast_rx, handle) = room.join(connection_id);

                Ok(RoomJoin {
                    broadcast_rx,
                    handle,
                    timeline: Some(timeline),
                })
            }
            None => {
                let mut room = RoomSession::new(room_id, passcode);
                let (broadcast_rx, handle) = room.join(connection_id);

                rooms.insert(String::from(room_id), Arc::new(Mutex::new(room)));
                debug!(room = room_id, "created room");

                Ok(RoomJoin {
                    broadcast_rx,
                    handle,
                    timeline: None,
                })
            }
        }
    }

    /// Remove the member behind the handle from its room, dropping the room
    /// once the member list empties. A no-op when the room is already gone.
    pub async fn leave_room(&self, handle: MemberHandle) {
        let mut rooms = self.rooms.lock().await;

        let Some(room) = rooms.get(handle.room_id()).cloned() else {
            return;
        };

        let emptied = room.lock().await.leave(handle.connection_id());
        if emptied {
            rooms.remove(handle.room_id());
            debug!(room = handle.room_id(), "last member left, dropped room");
        }
    }

    /// Overwrite a room's timeline with a member's playback report,
    /// last-write-wins. Returns false when the room no longer exists.
    pub async fn apply_playback_state(
        &self,
        handle: &MemberHandle,
        timestamp: f64,
        is_playing: bool,
    ) -> bool {
        let Some(room) = self.lookup(handle.room_id()).await else {
            return false;
        };

        room.lock().await.apply_playback_state(timestamp, is_playing);

        true
    }

    /// Apply a member's proposed seek to its room.
    pub async fn apply_seek(
        &self,
        handle: &MemberHandle,
        timestamp: f64,
        should_play: bool,
    ) -> SeekOutcome {
        let Some(room) = self.lookup(handle.room_id()).await else {
            return SeekOutcome::RoomGone;
        };

        if room.lock().await.apply_seek(timestamp, should_play) {
            SeekOutcome::Applied
        } else {
            SeekOutcome::Echo
        }
    }

    /// The timeline of a room, absent for room ids that were never joined or
    /// whose last member has left.
    pub async fn snapshot(&self, room_id: &str) -> Option<RoomSnapshot> {
        let room = self.lookup(room_id).await?;
        let room = room.lock().await;

        Some(room.snapshot())
    }

    pub async fn member_count(&self, room_id: &str) -> Option<usize> {
        let room = self.lookup(room_id).await?;
        let room = room.lock().await;

        Some(room.member_count())
    }

    async fn lookup(&self, room_id: &str) -> Option<Arc<Mutex<RoomSession>>> {
        self.rooms.lock().await.get(room_id).cloned()
    }
}
