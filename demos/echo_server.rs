//! Waits for one client, pushes a position update, waits for the reply and
//! for the client to leave, then stops.
//!
//! ```text
//! cargo run --example echo_server
//! cargo run --example echo_client   # in another terminal
//! ```

use serde_json::json;
use sockwire::{PeerId, Server, ServerConfig};
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

    let server = Server::new(ServerConfig::new("127.0.0.1", port))?;

    let (joined_tx, mut joined) = mpsc::unbounded_channel::<PeerId>();
    server.on_connected(move |peer| {
        let tx = joined_tx.clone();
        async move {
            tracing::info!(peer = %peer, "Player joined");
            let _ = tx.send(peer);
            Ok(())
        }
    });

    let (reply_tx, mut replies) = mpsc::unbounded_channel();
    server.on_received(move |message, peer| {
        let tx = reply_tx.clone();
        async move {
            tracing::info!(peer = %peer, %message, "Player moved");
            let _ = tx.send(message);
            Ok(())
        }
    });

    let (left_tx, mut left) = mpsc::unbounded_channel::<PeerId>();
    server.on_disconnected(move |peer| {
        let tx = left_tx.clone();
        async move {
            tracing::info!(peer = %peer, "Player left");
            let _ = tx.send(peer);
            Ok(())
        }
    });

    let addr = server.start().await?;
    tracing::info!(addr = %addr, "Waiting for a player");

    let Some(player) = joined.recv().await else {
        return Ok(());
    };

    let positions = json!({"player": {"player1": [500, 30], "player2": [352, 103]}});
    server.send(&positions, &[player]).await?;

    if let Some(reply) = replies.recv().await {
        tracing::info!(%reply, "Got reply");
    }
    left.recv().await;

    server.stop().await;
    Ok(())
}
