//! TCP server facade.
//!
//! A [`Server`] owns a listener, a [`SessionRegistry`] of live peers and
//! its own handler set. Every accepted socket gets a [`Connection`] with
//! its own read loop and writer task.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::{Server, ServerConfig};
//! use serde_json::json;
//!
//! let server = Server::new(ServerConfig::new("127.0.0.1", 5000))?;
//! server.on_received(|message, peer| async move {
//!     println!("{peer} sent {message}");
//!     Ok(())
//! });
//!
//! server.start().await?;
//! server.send(&json!({"hello": "everyone"}), &[]).await?;
//! server.stop().await;
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};

use crate::codec::{JsonCodec, PayloadCodec};
use crate::connection::{Connection, ConnectionContext, Side, DEFAULT_GRACE_PERIOD};
use crate::error::{Result, SockwireError};
use crate::handler::{
    message_handler, peer_handler, Dispatcher, EventKind, HandlerResult, MessageHandler,
    PeerEvent, PeerHandler, DEFAULT_MAX_CONCURRENT_HANDLERS,
};
use crate::protocol::{FrameConfig, Framer};
use crate::session::SessionRegistry;
use crate::transport::{Listener, PeerId};
use crate::writer::WriterConfig;

/// Default listen host.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default listen port.
pub const DEFAULT_PORT: u16 = 5000;

/// Default listen backlog.
pub const DEFAULT_BACKLOG: u32 = 128;

/// Pause after a failed accept before trying again.
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Configuration for a [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,

    /// Port to bind. Port 0 picks a free port.
    pub port: u16,

    /// Listen backlog.
    pub backlog: u32,

    /// Wire framing.
    pub frame: FrameConfig,

    /// Per-connection writer settings.
    pub writer: WriterConfig,

    /// Upper bound on each step of the close handshake.
    pub grace_period: Duration,

    /// Maximum handler invocations running at once.
    pub max_concurrent_handlers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: DEFAULT_BACKLOG,
            frame: FrameConfig::default(),
            writer: WriterConfig::default(),
            grace_period: DEFAULT_GRACE_PERIOD,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }
}

impl ServerConfig {
    /// Create a config for the given bind address.
    #[must_use]
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
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

struct Running {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// A TCP server speaking the length-prefixed frame protocol.
pub struct Server<C: PayloadCodec = JsonCodec> {
    config: ServerConfig,
    ctx: ConnectionContext<C>,
    sessions: Arc<SessionRegistry>,
    active: AtomicBool,
    running: Mutex<Option<Running>>,
}

impl Server<JsonCodec> {
    /// Create a server exchanging JSON values.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the frame configuration is invalid.
    pub fn new(config: ServerConfig) -> Result<Self> {
        Self::with_codec(config, JsonCodec::new())
    }
}

impl<C: PayloadCodec> Server<C> {
    /// Create a server with a custom payload codec.
    ///
    /// # Errors
    ///
    /// Returns `Config` if the frame configuration is invalid.
    pub fn with_codec(config: ServerConfig, codec: C) -> Result<Self> {
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
            sessions: Arc::new(SessionRegistry::new()),
            active: AtomicBool::new(false),
            running: Mutex::new(None),
        })
    }

    /// Get the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the listener and start accepting clients.
    ///
    /// Returns the bound address, which differs from the configured one
    /// when port 0 was requested.
    ///
    /// # Errors
    ///
    /// - `AlreadyRunning` if the server was already started
    /// - `Io` if the address cannot be resolved or bound
    pub async fn start(&self) -> Result<SocketAddr> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(SockwireError::AlreadyRunning);
        }

        let listener =
            match Listener::bind(&self.config.host, self.config.port, self.config.backlog).await {
                Ok(listener) => listener,
                Err(e) => {
                    self.active.store(false, Ordering::Release);
                    tracing::error!(
                        host = %self.config.host,
                        port = self.config.port,
                        "Failed to bind: {}",
                        e
                    );
                    return Err(e);
                }
            };

        let local_addr = listener.local_addr();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            self.ctx.clone(),
            self.sessions.clone(),
            shutdown_rx,
        ));

        *self.running.lock() = Some(Running {
            local_addr,
            shutdown,
            accept_task,
        });

        tracing::info!(addr = %local_addr, backlog = self.config.backlog, "Server listening");
        Ok(local_addr)
    }

    /// Disconnect every client and close the listener.
    ///
    /// Each client gets the disconnect sentinel and up to the grace period
    /// to close. Calling `stop` on a server that is not running does nothing.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().take() else {
            return;
        };
        self.active.store(false, Ordering::Release);

        let _ = running.shutdown.send(true);
        if let Err(e) = running.accept_task.await {
            tracing::warn!("Accept task failed: {}", e);
        }

        let grace = self.config.grace_period;
        let mut closing = JoinSet::new();
        for connection in self.sessions.connections() {
            closing.spawn(async move { (connection.peer(), connection.close(grace).await) });
        }
        while let Some(joined) = closing.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((peer, Err(e))) => tracing::warn!(peer = %peer, "Close failed: {}", e),
                Err(e) => tracing::warn!("Close task failed: {}", e),
            }
        }

        tracing::info!(addr = %running.local_addr, "Server stopped");
    }

    /// Send a message to the given peers, or to every peer if `targets` is
    /// empty.
    ///
    /// The message is encoded once. Targets that are not connected are
    /// skipped. Returns the peers the frame was queued for.
    ///
    /// # Errors
    ///
    /// Returns codec or framing errors from encoding the message. Per-peer
    /// write failures are logged, not returned.
    pub async fn send(&self, message: &C::Value, targets: &[PeerId]) -> Result<Vec<PeerId>> {
        let frame = self.ctx.encode(message)?;

        let connections = self.sessions.select(targets);
        if connections.is_empty() {
            tracing::debug!("No connected clients, message not sent");
            return Ok(Vec::new());
        }

        let mut sent = Vec::with_capacity(connections.len());
        for connection in connections {
            match connection.send(frame.clone()).await {
                Ok(()) => sent.push(connection.peer()),
                Err(e) => tracing::warn!(peer = %connection.peer(), "Send failed: {}", e),
            }
        }

        sent.sort();
        tracing::info!(peers = ?sent, "Sent message");
        Ok(sent)
    }

    /// Ids of all connected clients.
    pub fn get_all_clients(&self) -> Vec<PeerId> {
        self.sessions.snapshot_all()
    }

    /// Check if the server is accepting clients.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Get the bound address while running.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.lock().as_ref().map(|r| r.local_addr)
    }

    /// Register a closure for incoming messages.
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

    /// Register a closure for new clients.
    pub fn on_connected<F, Fut>(&self, f: F) -> Arc<dyn PeerHandler>
    where
        F: Fn(PeerId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = peer_handler(f);
        self.register_peer(PeerEvent::Connected, handler.clone());
        handler
    }

    /// Register a closure for departed clients.
    pub fn on_disconnected<F, Fut>(&self, f: F) -> Arc<dyn PeerHandler>
    where
        F: Fn(PeerId) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let handler = peer_handler(f);
        self.register_peer(PeerEvent::Disconnected, handler.clone());
        handler
    }

    /// Register a message handler. Returns `false` if already registered.
    pub fn register_received(&self, handler: Arc<dyn MessageHandler<C::Value>>) -> bool {
        self.ctx.dispatcher.register_received(handler)
    }

    /// Register a peer event handler. Returns `false` if already registered.
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

/// Dropping a running server stops the accept loop and starts the close
/// handshake for every session on the current runtime without waiting for
/// it. Await [`Server::stop`] first to know the sessions are gone.
impl<C: PayloadCodec> Drop for Server<C> {
    fn drop(&mut self) {
        let Some(running) = self.running.get_mut().take() else {
            return;
        };
        let _ = running.shutdown.send(true);

        let connections = self.sessions.connections();
        if connections.is_empty() {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                sessions = connections.len(),
                "Server dropped outside a runtime, sessions left open"
            );
            return;
        };

        let grace = self.config.grace_period;
        for connection in connections {
            runtime.spawn(async move {
                let _ = connection.close(grace).await;
            });
        }
    }
}

async fn accept_loop<C: PayloadCodec>(
    listener: Listener,
    ctx: ConnectionContext<C>,
    sessions: Arc<SessionRegistry>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait_for(|stop| *stop) => break,
            accepted = listener.accept() => accepted,
        };

        let (stream, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("Accept failed: {}", e);
                tokio::time::sleep(ACCEPT_RETRY_DELAY).await;
                continue;
            }
        };

        let (reader, writer) = stream.into_split();
        let (connection, read_loop) = Connection::open(peer, Side::Server, reader, writer, &ctx);
        sessions.insert(peer, connection);
        tracing::info!(peer = %peer, active = sessions.len(), "Client connected");

        let registry = sessions.clone();
        read_loop
            .on_teardown(Box::new(move |peer: PeerId| {
                registry.remove(&peer);
                tracing::info!(peer = %peer, active = registry.len(), "Client disconnected");
            }))
            .spawn();
    }

    tracing::debug!(addr = %listener.local_addr(), "Accept loop stopped");
}
