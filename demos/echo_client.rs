//! Connects to `echo_server`, waits for a position update, answers with a
//! move and disconnects.

use std::time::Duration;

use serde_json::json;
use sockwire::{Client, ClientConfig};
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> sockwire::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let port = std::env::args()
        .nth(1)
        .and_then(|p| p.parse().ok())
        .unwrap_or(sockwire::DEFAULT_PORT);

    let client = Client::new(ClientConfig::new("127.0.0.1", port))?;

    let (tx, mut updates) = mpsc::unbounded_channel();
    client.on_received(move |message, _server| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(message);
            Ok(())
        }
    });
    client.on_disconnected(|server| async move {
        tracing::info!(server = %server, "Server closed the connection");
        Ok(())
    });

    client.connect().await?;

    if let Some(update) = updates.recv().await {
        tracing::info!(%update, "Got positions");
        tokio::time::sleep(Duration::from_secs(1)).await;
        client.send(&json!({"player2": [360, 100]})).await?;
    }

    client.disconnect().await;
    Ok(())
}
