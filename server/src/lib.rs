use std::sync::Arc;

use anyhow::Context;
use tokio::{net::TcpListener, sync::broadcast, task::JoinSet};
use tracing::debug;

use crate::room_registry::RoomRegistry;

pub mod room_registry;
pub mod session;

/// Accepts connections on the given listener until the quit signal fires,
/// handling each connection's sync session in its own task. Owns the single
/// [RoomRegistry] all sessions share.
pub async fn serve(
    listener: TcpListener,
    mut quit_rx: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let registry = Arc::new(RoomRegistry::new());
    let mut join_set: JoinSet<anyhow::Result<()>> = JoinSet::new();

    loop {
        tokio::select! {
            Ok(_) = quit_rx.recv() => {
                break;
            }
            accepted = listener.accept() => {
                let (socket, addr) = accepted.context("failed to accept a connection")?;
                debug!(%addr, "new client connected");
                join_set.spawn(session::handle_connection(
                    Arc::clone(&registry),
                    quit_rx.resubscribe(),
                    socket,
                ));
            }
        }
    }

    while join_set.join_next().await.is_some() {}

    Ok(())
}
