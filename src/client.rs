//! TCP client facade.
//!
//! The [`Client`] manages one connection at a time:
//! 1. Connect to the configured server
//! 2. Start the read loop (fires `connected`)
//! 3. Send messages and dispatch received ones to handlers
//! 4. Close with the disconnect handshake (fires `disconnected`)
//!
//! # Example
//!
//! ```ignore
//! use sockwire::{Client, ClientConfig};
//! use serde_json::json;
//!
//! let client = Client::new(ClientConfig::new("127.0.0.1", 5000))?;
//! client.on_received(|message, _peer| async move {
//!     println!("server sent {message}");
//!     Ok(())
//! });
//!
//! client.connect().await?;
//! client.send(&json!({"player2": [360, 100]})).await?;
//! client.disconnect().await;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::codec::{JsonCodec, PayloadCodec};
use crate::connection::{Connection, ConnectionContext, Side, DEFAULT_GRACE_PERIOD};
use crate::error::{Result, SockwireError};
use crate::handler::{
    message_handler, peer_handler, Dispatcher, EventKind, HandlerResult, MessageHandler,
    PeerEvent, PeerHandler, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
use crate::protocol::{FrameConfig, Framer};
use crate::server::{DEFAULT_HOST, DEFAULT_PORT};
use crate::transport::{self, PeerId};
use crate::writer::WriterConfig;

/// Configuration for a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server host.
    pub host: String,

    /// Server port.
    pub port: u16,

    /// Wire framing. Must match the server's.
    pub frame: FrameConfig,

    /// Writer settings.
    pub writer: WriterConfig,

    /// Upper bound on each step of the close handshake.
    pub grace_period: Duration,

    /// Maximum handler invocations running at once.
    pub max_concurrent_handlers: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            frame: FrameConfig::default(),
            writer: WriterConfig::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

impl ClientConfig {
    /// Create a config for the given server address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_frame(mut self, frame: FrameConfig) -> Self {
        self.frame = frame;
        self
    }

    #[must_use]
    pub fn with_writer(mut self, writer: WriterConfig) -> Self {
        self.writer = writer;
        self
    }

    #[must_use]
    pub const fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period = grace;
        self
    }

    #[must_use]
    pub const fn with_max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }
}

/// Live connection plus the addresses it was made with.
#[derive(Clone)]
struct Session {
    connection: Connection,
    local_addr: SocketAddr,
}

/// Held for the duration of one `connect` call.
struct ConnectGuard<'a>(&'a AtomicBool);

impl<'a> ConnectGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| Self(flag))
            .map_err(|_| SockwireError::AlreadyRunning)
    }
}

impl Drop for ConnectGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// A TCP client speaking the length-prefixed frame protocol.
pub struct Client<C: PayloadCodec = JsonCodec> {
    config: ClientConfig,
    ctx: ConnectionContext<C>,
    session: Mutex<Option<Session>>,
    connecting: AtomicBool,
}

impl Client<JsonCodec> {
    /// Create a client exchanging JSON values.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the frame configuration is invalid.
    pub fn new(config: ClientConfig) -> Result<Self> {
        Self::with_codec(config, JsonCodec::new())
    }
}

impl<C: PayloadCodec> Client<C> {
    /// Create a client with a custom payload codec.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the frame configuration is invalid.
    pub fn with_codec(config: ClientConfig, codec: C) -> Result<Self> {
        let framer = Framer::new(config.frame)?;
        if config.max_concurrent_handlers == 0 {
            return Err(SockwireError::Config(
                "max_concurrent_handlers must be at least 1".to_string(),
            ));
        }

        let ctx = ConnectionContext {
            framer,
            writer_config: config.writer.clone(),
            grace_period: config.grace_period,
            codec: Arc::new(codec),
            dispatcher: Dispatcher::new(config.max_concurrent_handlers),
        };

        Ok(Self {
            config,
            ctx,
            session: Mutex::new(None),
            connecting: AtomicBool::new(false),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Connect to the server and start the read loop.
    ///
    /// A client whose previous connection has closed may connect again.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if a connection is still open or another
    ///   `connect` is in progress
    /// - `Io` if the server cannot be reached
    pub async fn connect(&self) -> Result<()> {
        let _guard = ConnectGuard::acquire(&self.connecting)?;
        if self.is_connected() {
            return Err(SockwireError::AlreadyRunning);
        }

        let stream = transport::connect(&self.config.host, self.config.port).await?;
        let server = PeerId::new(stream.peer_addr()?);
        let local_addr = stream.local_addr()?;

        let (reader, writer) = stream.into_split();
        let (connection, read_loop) = Connection::open(server, Side::Client, reader, writer, &self.ctx);

        let replaced = self.session.lock().replace(Session {
            connection,
            local_addr,
        });
        if let Some(old) = replaced {
            tracing::debug!(server = %old.connection.peer(), "Replacing closed connection");
        }

        read_loop.spawn();
        tracing::info!(server = %server, local = %local_addr, "Connected");
        Ok(())
    }

    /// Close the connection with the disconnect handshake.
    ///
    /// Does nothing if not connected.
    pub async fn disconnect(&self) {
        let Some(session) = self.session.lock().take() else {
            return;
        };

        let server = session.connection.peer();
        if let Err(e) = session.connection.close(self.config.grace_period).await {
            tracing::warn!(server = %server, "Disconnect failed: {}", e);
        }
        tracing::info!(server = %server, "Disconnected");
    }

    /// Send a message to the server.
    ///
    /// # Errors
    ///
    /// - `NotConnected` if there is no open connection
    /// - codec or framing errors from encoding the message
    pub async fn send(&self, message: &C::Value) -> Result<()> {
        let connection = self
            .open_connection()
            .ok_or(SockwireError::NotConnected)?;

        let frame = self.ctx.encode(message)?;
        connection.send(frame).await?;
        tracing::debug!(server = %connection.peer(), "Sent message");
        Ok(())
    }

    /// Check if the connection is open.
    pub fn is_connected(&self) -> bool {
        self.open_connection().is_some()
    }

    /// Address of the connected server.
    pub fn server_addr(&self) -> Option<SocketAddr> {
        self.open_connection().map(|c| c.peer().addr())
    }

    /// Local address of the open connection, as the server sees it.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.session
            .lock()
            .as_ref()
            .filter(|s| s.connection.is_open())
            .map(|s| s.local_addr)
    }

    fn open_connection(&self) -> Option<Connection> {
        self.session
            .lock()
            .as_ref()
            .map(|s| s.connection.clone())
            .filter(Connection::is_open)
    }

    /// Register a closure for messages from the server.
    ///
    /// Returns the registered handler so it can be unregistered later.
    pub fn on_received<F, Fut>(&self, f: F) -> Arc<dyn MessageHandler<C::Value>>
    where
        F: Fn(C::Value, PeerId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = message_handler(f);
        self.register_received(handler.clone());
        handler
    }

    /// Register a closure for when the read loop starts.
    pub fn on_connected<F, Fut>(&self, f: F) -> Arc<dyn PeerHandler>
    where
        F: Fn(PeerId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = peer_handler(f);
        self.register_peer(PeerEvent::Connected, handler.clone());
        handler
    }

    /// Register a closure for when the connection closes.
    pub fn on_disconnected<F, Fut>(&self, f: F) -> Arc<dyn PeerHandler>
    where
        F: Fn(PeerId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = peer_handler(f);
        self.register_peer(PeerEvent::Disconnected, handler.clone());
        handler
    }

    pub fn register_received(&self, handler: Arc<dyn MessageHandler<C::Value>>) -> bool {
        self.ctx.dispatcher.register_received(handler)
    }

    pub fn register_peer(&self, event: PeerEvent, handler: Arc<dyn PeerHandler>) -> bool {
        self.ctx.dispatcher.register_peer(event, handler)
    }

    pub fn unregister_received(&self, handler: &Arc<dyn MessageHandler<C::Value>>) -> bool {
        self.ctx.dispatcher.unregister_received(handler)
    }

    pub fn unregister_peer(&self, event: PeerEvent, handler: &Arc<dyn PeerHandler>) -> bool {
        self.ctx.dispatcher.unregister_peer(event, handler)
    }

    /// Number of handlers registered for an event.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.ctx.dispatcher.handler_count(kind)
    }
}
