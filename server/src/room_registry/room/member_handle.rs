use anyhow::Context;
use comms::event::Event;
use tokio::sync::broadcast;

/// A room-wide correction tagged with the connection that produced it, so
/// every session can drop its own echoes while forwarding to its client.
/// This is how "all other members of the room" is carved out of a single
/// broadcast channel.
#[derive(Debug, Clone)]
pub struct RoomBroadcast {
    pub origin: String,
    pub event: Event,
}

#[derive(Debug, Clone)]
/// [MemberHandle] lets one connection publish corrections to the room it has
/// joined. It is created when the connection joins and consumed by the
/// registry when the connection leaves; clones of it may outlive membership,
/// in which case publishing becomes a no-op once every receiver is gone.
pub struct MemberHandle {
    /// The id of the room which is associated with this handle
    room_id: String,
    /// The connection this handle was handed out to; stamped on every publish
    connection_id: String,
    /// The channel to use for publishing corrections to the members of the room
    broadcast_tx: broadcast::Sender<RoomBroadcast>,
}

impl MemberHandle {
    pub(super) fn new(
        room_id: String,
        connection_id: String,
        broadcast_tx: broadcast::Sender<RoomBroadcast>,
    ) -> Self {
        MemberHandle {
            room_id,
            connection_id,
            broadcast_tx,
        }
    }

    pub fn room_id(&self) -> &str {
        &self.room_id
    }

    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// Publish a correction to every other member of the room
    pub fn publish(&self, event: Event) -> anyhow::Result<()> {
        self.broadcast_tx
            .send(RoomBroadcast {
                origin: self.connection_id.clone(),
                event,
            })
            .context("could not write to the broadcast channel")?;

        Ok(())
    }
}
