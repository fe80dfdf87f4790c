use anyhow::Context;
use tokio::{
    net::TcpListener,
    signal::unix::{signal, SignalKind},
    sync::broadcast,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

const DEFAULT_PORT: u16 = 3001;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let port = std::env::var("PORT")
        .ok()
        .and_then(|port| port.parse::<u16>().ok())
        .unwrap_or(DEFAULT_PORT);
    let listener = TcpListener::bind(("0.0.0.0", port))
        .await
        .context("could not bind to the port")?;

    let (quit_tx, quit_rx) = broadcast::channel::<()>(1);
    let mut interrupt =
        signal(SignalKind::interrupt()).context("failed to create interrupt signal stream")?;

    tokio::spawn(async move {
        interrupt.recv().await;
        info!("server interrupted, shutting down gracefully");
        let _ = quit_tx.send(());
    });

    info!(port, "listening");
    server::serve(listener, quit_rx).await?;
    info!("server shut down");

    Ok(())
}
