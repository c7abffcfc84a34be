//! # sockwire
//!
//! Length-prefixed message passing over TCP.
//!
//! Every message travels as one frame: a fixed-width ASCII header holding
//! the body length, then the body followed by a terminator byte. A reserved
//! `!DISCONNECT` body asks the peer to close.
//!
//! ## Architecture
//!
//! - **Framing** ([`protocol`]): header/body encoding and a stream reader
//! - **Payloads** ([`codec`]): JSON by default, raw bytes on request
//! - **Connections**: one read loop and one writer task per socket
//! - **Events** ([`handler`]): `received`, `connected` and `disconnected`
//!   handlers run off the read loop under a concurrency limit
//!
//! ## Example
//!
//! ```ignore
//! use sockwire::{Client, ClientConfig, Server, ServerConfig};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> sockwire::Result<()> {
//!     let server = Server::new(ServerConfig::new("127.0.0.1", 5000))?;
//!     server.on_received(|message, peer| async move {
//!         println!("{peer}: {message}");
//!         Ok(())
//!     });
//!     server.start().await?;
//!
//!     let client = Client::new(ClientConfig::new("127.0.0.1", 5000))?;
//!     client.connect().await?;
//!     client.send(&json!({"x": 1})).await?;
//!
//!     client.disconnect().await;
//!     server.stop().await;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod transport;
pub mod writer;

mod client;
mod connection;
mod server;
mod session;

pub use client::{Client, ClientConfig};
pub use connection::{Connection, ConnectionState, Side, DEFAULT_GRACE_PERIOD};
pub use error::{Result, SockwireError};
pub use handler::{EventKind, PeerEvent};
pub use server::{Server, ServerConfig, DEFAULT_BACKLOG, DEFAULT_HOST, DEFAULT_PORT};
pub use session::SessionRegistry;
pub use transport::PeerId;
pub use writer::WriterConfig;
