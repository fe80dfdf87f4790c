use std::sync::Arc;

use comms::{command::UserCommand, event::Event, transport};
use nanoid::nanoid;
use tokio::{net::TcpStream, sync::broadcast};
use tokio_stream::StreamExt;
use tracing::debug;

use crate::room_registry::RoomRegistry;

use self::sync_session::SyncSession;

mod sync_session;

/// Given a tcp stream and the shared room registry, drives the connection's
/// sync session until the client quits, the stream closes, or the server
/// shuts down. Every exit path funnels through membership cleanup, so a peer
/// that vanishes mid-write can never linger in its room.
pub async fn handle_connection(
    registry: Arc<RoomRegistry>,
    mut quit_rx: broadcast::Receiver<()>,
    stream: TcpStream,
) -> anyhow::Result<()> {
    let connection_id = nanoid!();
    // Split the tcp stream into a command stream and an event writer with better ergonomics
    let (mut commands, mut event_writer) = transport::server::split_tcp_stream(stream);

    debug!(%connection_id, "session started");

    let mut sync_session = SyncSession::new(&connection_id, registry);

    let result = loop {
        tokio::select! {
            cmd = commands.next() => match cmd {
                // The client closed the stream or asked to quit
                None | Some(Ok(UserCommand::Quit(_))) => {
                    debug!(%connection_id, "client disconnected");
                    break Ok(());
                }
                Some(Ok(cmd)) => {
                    // Replies go straight back to this connection; corrections
                    // for the rest of the room travel through the room channel
                    let replies = sync_session.handle_user_command(cmd).await;
                    if let Err(e) = write_replies(&mut event_writer, replies).await {
                        break Err(e);
                    }
                }
                Some(Err(e)) => {
                    // A failed read means the socket is gone. Only frames we
                    // could read but not parse are protocol noise
                    if e.downcast_ref::<std::io::Error>().is_some() {
                        debug!(%connection_id, error = %e, "client stream failed");
                        break Ok(());
                    }
                    debug!(%connection_id, error = %e, "dropped malformed frame");
                }
            },
            // Corrections published by the other members of the joined room
            Ok(event) = sync_session.recv() => {
                if let Err(e) = event_writer.write(&event).await {
                    break Err(e);
                }
            }
            // If the server is shutting down, we can just close the tcp stream
            // and exit the session handler
            Ok(_) = quit_rx.recv() => {
                drop(event_writer);
                debug!(%connection_id, "closed client stream for shutdown");
                break Ok(());
            }
        }
    };

    // Cleanup must not depend on how the session ended: a write failing
    // against a resetting peer vacates the member's slot just like a clean
    // quit, and an emptied room still gets dropped
    sync_session.leave_room().await;

    result
}

async fn write_replies(
    event_writer: &mut transport::server::EventWriter,
    replies: Vec<Event>,
) -> anyhow::Result<()> {
    for event in replies {
        event_writer.write(&event).await?;
    }

    Ok(())
}
