use std::{sync::Arc, time::Duration};

use anyhow::Context;
use comms::{
    command,
    event::{self, Event},
};
use tokio::{
    sync::mpsc,
    task::{AbortHandle, JoinSet},
};
use tracing::debug;

use crate::room_registry::{JoinRoomError, MemberHandle, RoomRegistry, SeekOutcome};

/// How long an accepted seek waits before the correction goes out to the rest
/// of the room. Debounces the rebroadcast storm when several members seek in
/// quick succession; the timeline update itself is never delayed.
const SEEK_BROADCAST_DELAY: Duration = Duration::from_millis(50);

pub(super) struct SyncSession {
    connection_id: String,
    registry: Arc<RoomRegistry>,
    /// At most one room association per connection, set on successful join
    /// and cleared on leave. The abort handle stops the forwarding task.
    joined_room: Option<(MemberHandle, AbortHandle)>,
    join_set: JoinSet<()>,
    mpsc_tx: mpsc::Sender<Event>,
    mpsc_rx: mpsc::Receiver<Event>,
}

impl SyncSession {
    pub fn new(connection_id: &str, registry: Arc<RoomRegistry>) -> Self {
        let (mpsc_tx, mpsc_rx) = mpsc::channel(100);

        SyncSession {
            connection_id: String::from(connection_id),
            registry,
            joined_room: None,
            join_set: JoinSet::new(),
            mpsc_tx,
            mpsc_rx,
        }
    }

    /// Handle a single user command, returning the reply events to write back
    /// to this connection in order.
    pub async fn handle_user_command(&mut self, cmd: command::UserCommand) -> Vec<Event> {
        match cmd {
            command::UserCommand::JoinRoom(cmd) => self.handle_join_room(cmd).await,
            command::UserCommand::PlaybackState(cmd) => {
                self.handle_playback_state(cmd).await;
                Vec::new()
            }
            command::UserCommand::Seek(cmd) => {
                self.handle_seek(cmd).await;
                Vec::new()
            }
            // Quit is intercepted by the session loop before it gets here
            command::UserCommand::Quit(_) => Vec::new(),
        }
    }

    async fn handle_join_room(&mut self, cmd: command::JoinRoomCommand) -> Vec<Event> {
        // A connection carries at most one room association. Rejecting the
        // second join keeps membership a set without an implicit leave.
        if self.joined_room.is_some() {
            return vec![error_message("already in a room")];
        }

        let join = match self
            .registry
            .join_room(&cmd.room, &cmd.passcode, &self.connection_id)
            .await
        {
            Ok(join) => join,
            Err(JoinRoomError::IncorrectPasscode) => {
                return vec![error_message("Incorrect passcode")];
            }
        };

        // Forward the room's corrections to this session's mpsc channel,
        // dropping our own so a correction never bounces back to its origin
        let abort_handle = self.join_set.spawn({
            let mpsc_tx = self.mpsc_tx.clone();
            let connection_id = self.connection_id.clone();
            let mut broadcast_rx = join.broadcast_rx;

            async move {
                while let Ok(broadcast) = broadcast_rx.recv().await {
                    if broadcast.origin != connection_id {
                        let _ = mpsc_tx.send(broadcast.event).await;
                    }
                }
            }
        });

        debug!(
            connection_id = %self.connection_id,
            room = %cmd.room,
            "joined room"
        );

        let mut replies = Vec::new();

        // A late joiner adopts the room's timeline before the join ack, so it
        // never starts playback at zero in a room that has moved on
        if let Some(timeline) = join.timeline {
            replies.push(Event::ForceSeek(event::ForceSeekEvent {
                timestamp: timeline.current_time,
                should_play: timeline.is_playing,
                is_initial: Some(true),
            }));
        }
        replies.push(Event::JoinedRoom(event::JoinedRoomReplyEvent {
            room: cmd.room,
        }));

        self.joined_room = Some((join.handle, abort_handle));

        replies
    }

    async fn handle_playback_state(&mut self, cmd: command::PlaybackStateCommand) {
        // Non-finite cursors are protocol noise
        if !cmd.timestamp.is_finite() {
            return;
        }
        let Some((handle, _)) = &self.joined_room else {
            return;
        };

        if !self
            .registry
            .apply_playback_state(handle, cmd.timestamp, cmd.is_playing)
            .await
        {
            return;
        }

        let _ = handle.publish(Event::ForceSeek(event::ForceSeekEvent {
            timestamp: cmd.timestamp,
            should_play: cmd.is_playing,
            is_initial: None,
        }));
    }

    async fn handle_seek(&mut self, cmd: command::SeekCommand) {
        if !cmd.timestamp.is_finite() || cmd.timestamp < 0.0 {
            return;
        }
        let Some((handle, _)) = &self.joined_room else {
            return;
        };

        debug!(
            connection_id = %self.connection_id,
            timestamp = cmd.timestamp,
            should_play = cmd.should_play,
            "seek request"
        );

        match self
            .registry
            .apply_seek(handle, cmd.timestamp, cmd.should_play)
            .await
        {
            SeekOutcome::Applied => {}
            SeekOutcome::Echo | SeekOutcome::RoomGone => return,
        }

        // The timeline is already updated, only the outgoing correction is
        // delayed. The task is detached rather than tracked in the join set:
        // a disconnect during the delay must not cancel the correction the
        // other members are owed. The captured values are the ones accepted
        // here, never re-read at emit time.
        let handle = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(SEEK_BROADCAST_DELAY).await;

            let _ = handle.publish(Event::ForceSeek(event::ForceSeekEvent {
                timestamp: cmd.timestamp,
                should_play: cmd.should_play,
                is_initial: None,
            }));
        });
    }

    /// Leave the joined room, if any, dropping the room when this connection
    /// was its last member. Safe to call when no room was ever joined.
    pub async fn leave_room(&mut self) {
        if let Some((handle, abort_handle)) = self.joined_room.take() {
            self.registry.leave_room(handle).await;
            abort_handle.abort();
        }
    }

    /// Receive the next correction forwarded from the joined room
    pub async fn recv(&mut self) -> anyhow::Result<Event> {
        self.mpsc_rx
            .recv()
            .await
            .context("could not recv from the broadcast channel")
    }
}

fn error_message(message: &str) -> Event {
    Event::ErrorMessage(event::ErrorMessageReplyEvent {
        message: String::from(message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use comms::command::{JoinRoomCommand, PlaybackStateCommand, SeekCommand, UserCommand};
    use tokio::time::timeout;

    fn join_cmd(room: &str, passcode: &str) -> UserCommand {
        UserCommand::JoinRoom(JoinRoomCommand {
            room: String::from(room),
            passcode: String::from(passcode),
        })
    }

    async fn joined_session(
        registry: &Arc<RoomRegistry>,
        connection_id: &str,
        room: &str,
        passcode: &str,
    ) -> SyncSession {
        let mut session = SyncSession::new(connection_id, Arc::clone(registry));
        let replies = session.handle_user_command(join_cmd(room, passcode)).await;
        assert!(matches!(replies.last(), Some(Event::JoinedRoom(_))));
        session
    }

    #[tokio::test]
    async fn test_creating_join_acks_without_initial_correction() {
        let registry = Arc::new(RoomRegistry::new());
        let mut session = SyncSession::new("conn-a", Arc::clone(&registry));

        let replies = session.handle_user_command(join_cmd("r1", "p")).await;

        assert_eq!(
            replies,
            vec![Event::JoinedRoom(event::JoinedRoomReplyEvent {
                room: "r1".into(),
            })]
        );
    }

    #[tokio::test]
    async fn test_late_join_gets_initial_correction_before_ack() {
        let registry = Arc::new(RoomRegistry::new());
        let mut a = joined_session(&registry, "conn-a", "r1", "p").await;
        a.handle_user_command(UserCommand::PlaybackState(PlaybackStateCommand {
            is_playing: true,
            timestamp: 33.5,
        }))
        .await;

        let mut b = SyncSession::new("conn-b", Arc::clone(&registry));
        let replies = b.handle_user_command(join_cmd("r1", "p")).await;

        assert_eq!(
            replies,
            vec![
                Event::ForceSeek(event::ForceSeekEvent {
                    timestamp: 33.5,
                    should_play: true,
                    is_initial: Some(true),
                }),
                Event::JoinedRoom(event::JoinedRoomReplyEvent { room: "r1".into() }),
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_is_rejected() {
        let registry = Arc::new(RoomRegistry::new());
        let mut session = joined_session(&registry, "conn-a", "r1", "p").await;

        let replies = session.handle_user_command(join_cmd("r2", "p")).await;

        assert!(matches!(replies.as_slice(), [Event::ErrorMessage(_)]));
        assert_eq!(registry.member_count("r1").await, Some(1));
        assert_eq!(registry.member_count("r2").await, None);
    }

    #[tokio::test]
    async fn test_non_finite_playback_report_is_dropped() {
        let registry = Arc::new(RoomRegistry::new());
        let mut session = joined_session(&registry, "conn-a", "r1", "p").await;

        let replies = session
            .handle_user_command(UserCommand::PlaybackState(PlaybackStateCommand {
                is_playing: true,
                timestamp: f64::NAN,
            }))
            .await;

        assert!(replies.is_empty());
        let snapshot = registry.snapshot("r1").await.unwrap();
        assert_eq!(snapshot.current_time, 0.0);
        assert!(!snapshot.is_playing);
    }

    #[tokio::test]
    async fn test_playback_report_without_room_is_dropped() {
        let registry = Arc::new(RoomRegistry::new());
        let mut session = SyncSession::new("conn-a", Arc::clone(&registry));

        let replies = session
            .handle_user_command(UserCommand::PlaybackState(PlaybackStateCommand {
                is_playing: true,
                timestamp: 12.0,
            }))
            .await;

        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn test_playback_report_reaches_other_members_but_not_sender() {
        let registry = Arc::new(RoomRegistry::new());
        let mut a = joined_session(&registry, "conn-a", "r1", "p").await;
        let mut b = joined_session(&registry, "conn-b", "r1", "p").await;

        a.handle_user_command(UserCommand::PlaybackState(PlaybackStateCommand {
            is_playing: true,
            timestamp: 12.0,
        }))
        .await;

        let event = timeout(Duration::from_millis(200), b.recv())
            .await
            .expect("other member should receive the correction")
            .unwrap();
        assert_eq!(
            event,
            Event::ForceSeek(event::ForceSeekEvent {
                timestamp: 12.0,
                should_play: true,
                is_initial: None,
            })
        );

        // the sender is assumed to already be in that state
        assert!(timeout(Duration::from_millis(100), a.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_negative_seek_is_dropped() {
        let registry = Arc::new(RoomRegistry::new());
        let mut session = joined_session(&registry, "conn-a", "r1", "p").await;

        session
            .handle_user_command(UserCommand::Seek(SeekCommand {
                timestamp: -1.0,
                should_play: true,
            }))
            .await;

        let snapshot = registry.snapshot("r1").await.unwrap();
        assert_eq!(snapshot.current_time, 0.0);
        assert!(!snapshot.is_playing);
    }

    #[tokio::test]
    async fn test_sub_threshold_seek_is_dropped_entirely() {
        let registry = Arc::new(RoomRegistry::new());
        let mut a = joined_session(&registry, "conn-a", "r1", "p").await;
        let mut b = joined_session(&registry, "conn-b", "r1", "p").await;

        a.handle_user_command(UserCommand::Seek(SeekCommand {
            timestamp: 0.2,
            should_play: true,
        }))
        .await;

        // no correction even after the broadcast delay has long passed
        assert!(timeout(Duration::from_millis(200), b.recv()).await.is_err());
        let snapshot = registry.snapshot("r1").await.unwrap();
        assert_eq!(snapshot.current_time, 0.0);
        assert!(!snapshot.is_playing);
    }

    #[tokio::test]
    async fn test_accepted_seek_updates_now_and_broadcasts_after_delay() {
        let registry = Arc::new(RoomRegistry::new());
        let mut a = joined_session(&registry, "conn-a", "r1", "p").await;
        let mut b = joined_session(&registry, "conn-b", "r1", "p").await;

        b.handle_user_command(UserCommand::Seek(SeekCommand {
            timestamp: 120.0,
            should_play: true,
        }))
        .await;

        // the timeline update is immediate, only the correction is delayed
        assert_eq!(
            registry.snapshot("r1").await,
            Some(crate::room_registry::RoomSnapshot {
                current_time: 120.0,
                is_playing: true,
            })
        );

        let event = timeout(Duration::from_millis(500), a.recv())
            .await
            .expect("other member should receive the delayed correction")
            .unwrap();
        assert_eq!(
            event,
            Event::ForceSeek(event::ForceSeekEvent {
                timestamp: 120.0,
                should_play: true,
                is_initial: None,
            })
        );

        // the seeking member never hears its own correction
        assert!(timeout(Duration::from_millis(100), b.recv()).await.is_err());
    }

    #[tokio::test]
    async fn test_delayed_correction_survives_sender_disconnect() {
        let registry = Arc::new(RoomRegistry::new());
        let mut a = joined_session(&registry, "conn-a", "r1", "p").await;
        let mut b = joined_session(&registry, "conn-b", "r1", "p").await;

        b.handle_user_command(UserCommand::Seek(SeekCommand {
            timestamp: 60.0,
            should_play: false,
        }))
        .await;
        // the sender leaves during the broadcast delay
        b.leave_room().await;

        let event = timeout(Duration::from_millis(500), a.recv())
            .await
            .expect("correction should not be cancelled by the disconnect")
            .unwrap();
        assert_eq!(
            event,
            Event::ForceSeek(event::ForceSeekEvent {
                timestamp: 60.0,
                should_play: false,
                is_initial: None,
            })
        );
    }

    #[tokio::test]
    async fn test_leave_room_is_idempotent() {
        let registry = Arc::new(RoomRegistry::new());
        let mut session = joined_session(&registry, "conn-a", "r1", "p").await;

        session.leave_room().await;
        assert_eq!(registry.snapshot("r1").await, None);

        // second leave has nothing to do
        session.leave_room().await;
    }
}
