//! A single peer connection and its read loop.
//!
//! Lifecycle:
//! ```text
//! Connecting ──► Open ──► Closing ──► Closed
//!      └──────────────────────┘
//! ```
//! - `Open` once the read loop is started (fires `connected`)
//! - `Closing` on local close, peer sentinel, or an unusable socket
//! - `Closed` after the read loop has shut the socket down (fires
//!   `disconnected` exactly once)
//!
//! The read loop owns the read half. The write half belongs to the
//! connection's writer task, so sends from any number of callers are
//! serialized.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::codec::PayloadCodec;
use crate::error::{Result, SockwireError};
use crate::handler::Dispatcher;
use crate::protocol::{Frame, FrameReader, Framer, OutboundFrame, DISCONNECT_SENTINEL};
use crate::transport::PeerId;
use crate::writer::{spawn_writer_task, WriterConfig, WriterHandle};

/// Default grace period for close handshakes.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(3);

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket handshake complete, read loop not started yet.
    Connecting,
    /// Read loop running.
    Open,
    /// Shutdown requested; the read loop is winding down.
    Closing,
    /// Socket closed.
    Closed,
}

/// Which facade owns the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Everything a read loop needs besides its socket.
pub(crate) struct ConnectionContext<C: PayloadCodec> {
    pub framer: Framer,
    pub writer_config: WriterConfig,
    pub grace_period: Duration,
    pub codec: Arc<C>,
    pub dispatcher: Dispatcher<C::Value>,
}

impl<C: PayloadCodec> Clone for ConnectionContext<C> {
    fn clone(&self) -> Self {
        Self {
            framer: self.framer,
            writer_config: self.writer_config.clone(),
            grace_period: self.grace_period,
            codec: self.codec.clone(),
            dispatcher: self.dispatcher.clone(),
        }
    }
}

impl<C: PayloadCodec> ConnectionContext<C> {
    /// Encode an application value into a frame.
    ///
    /// Values whose encoding equals the disconnect sentinel are refused so
    /// they cannot be mistaken for a close request.
    pub(crate) fn encode(&self, message: &C::Value) -> Result<OutboundFrame> {
        let body = self.codec.encode(message)?;
        if body.as_ref() == DISCONNECT_SENTINEL {
            return Err(SockwireError::SentinelCollision);
        }
        self.framer.encode(body)
    }
}

/// Runs after the socket is shut down and before the state becomes `Closed`.
pub(crate) type Teardown = Box<dyn FnOnce(PeerId) + Send + 'static>;

struct Inner {
    peer: PeerId,
    side: Side,
    framer: Framer,
    writer: WriterHandle,
    state: watch::Sender<ConnectionState>,
    close_requested: AtomicBool,
}

/// Handle to one live connection.
///
/// Cheaply cloneable; all clones refer to the same socket.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("peer", &self.inner.peer)
            .field("side", &self.inner.side)
            .field("state", &self.state())
            .finish()
    }
}

impl Connection {
    /// Wrap a connected stream's halves.
    ///
    /// Spawns the writer task immediately. The returned [`ReadLoop`] must
    /// be started with [`ReadLoop::spawn`] for the connection to open.
    pub(crate) fn open<R, W, C>(
        peer: PeerId,
        side: Side,
        reader: R,
        writer: W,
        ctx: &ConnectionContext<C>,
    ) -> (Connection, ReadLoop<R, C>)
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
        C: PayloadCodec,
    {
        let (writer, writer_task) = spawn_writer_task(writer, ctx.writer_config.clone());
        let (state, _) = watch::channel(ConnectionState::Connecting);

        let connection = Connection {
            inner: Arc::new(Inner {
                peer,
                side,
                framer: ctx.framer,
                writer,
                state,
                close_requested: AtomicBool::new(false),
            }),
        };

        let read_loop = ReadLoop {
            reader: FrameReader::new(reader, ctx.framer),
            connection: connection.clone(),
            writer_task,
            ctx: ctx.clone(),
            teardown: None,
        };

        (connection, read_loop)
    }

    /// Get the peer id.
    #[inline]
    pub fn peer(&self) -> PeerId {
        self.inner.peer
    }

    /// Get the owning side.
    #[inline]
    pub fn side(&self) -> Side {
        self.inner.side
    }

    /// Get the current state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    /// Check if the connection is open.
    pub fn is_open(&self) -> bool {
        self.state() == ConnectionState::Open
    }

    /// Queue an encoded frame for this peer.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionClosed` if the connection is not open or the
    /// writer has exited.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        if !self.is_open() {
            return Err(SockwireError::ConnectionClosed);
        }
        self.inner.writer.send(frame).await
    }

    /// Close the connection from this side.
    ///
    /// Sends the disconnect sentinel and waits for the writer to confirm it
    /// was flushed, then moves to `Closing` and waits for the read loop to
    /// reach `Closed`. Each wait is bounded by `grace`. Calling this more
    /// than once, or after the peer closed, is a no-op.
    pub async fn close(&self, grace: Duration) -> Result<()> {
        if self.inner.close_requested.swap(true, Ordering::AcqRel) {
            self.wait_closed(grace).await;
            return Ok(());
        }

        if matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Open
        ) {
            let sentinel = self.inner.framer.encode_sentinel()?;
            let flushed = tokio::time::timeout(grace, self.inner.writer.send_flushed(sentinel))
                .await
                .unwrap_or(Err(SockwireError::FlushTimeout));
            if let Err(e) = flushed {
                tracing::warn!(peer = %self.peer(), "Disconnect sentinel not delivered: {}", e);
            }
        }

        self.transition(ConnectionState::Closing);

        if !self.wait_closed(grace).await {
            tracing::warn!(peer = %self.peer(), "Read loop did not stop within {:?}", grace);
        }
        Ok(())
    }

    /// Wait until the connection reaches `Closed`.
    ///
    /// Returns `false` if `timeout` elapsed first.
    pub async fn wait_closed(&self, timeout: Duration) -> bool {
        let mut rx = self.inner.state.subscribe();
        tokio::time::timeout(timeout, wait_until(&mut rx, |s| s == ConnectionState::Closed))
            .await
            .is_ok()
    }

    fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    /// Move to `to` if the transition is legal. Returns whether it changed.
    fn transition(&self, to: ConnectionState) -> bool {
        use ConnectionState::*;

        self.inner.state.send_if_modified(|state| {
            let legal = matches!(
                (*state, to),
                (Connecting, Open) | (Connecting | Open, Closing) | (Connecting | Open | Closing, Closed)
            );
            if legal {
                *state = to;
            }
            legal
        })
    }
}

/// Resolve once the state satisfies `done`, or the sender is gone.
async fn wait_until(
    rx: &mut watch::Receiver<ConnectionState>,
    done: impl Fn(ConnectionState) -> bool,
) {
    let _ = rx.wait_for(|s| done(*s)).await;
}

/// The receive side of a connection, not yet running.
pub(crate) struct ReadLoop<R, C: PayloadCodec> {
    reader: FrameReader<R>,
    connection: Connection,
    writer_task: JoinHandle<Result<()>>,
    ctx: ConnectionContext<C>,
    teardown: Option<Teardown>,
}

impl<R, C> ReadLoop<R, C>
where
    R: AsyncRead + Unpin + Send + 'static,
    C: PayloadCodec,
{
    /// Set a callback to run during teardown.
    pub(crate) fn on_teardown(mut self, teardown: Teardown) -> Self {
        self.teardown = Some(teardown);
        self
    }

    /// Open the connection and start the read loop on its own task.
    ///
    /// The connection is `Open` when this returns, so it can be written to
    /// immediately. `connected` fires from the spawned task.
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        let opened = self.connection.transition(ConnectionState::Open);
        tokio::spawn(self.run(opened))
    }

    async fn run(mut self, opened: bool) {
        let peer = self.connection.peer();

        if opened {
            self.ctx.dispatcher.fire_connected(peer);
            self.receive(peer).await;
        }

        self.teardown(peer).await;
    }

    /// Decode and dispatch frames until the connection leaves `Open`.
    async fn receive(&mut self, peer: PeerId) {
        let mut state_rx = self.connection.subscribe();

        loop {
            let result = tokio::select! {
                biased;
                _ = wait_until(&mut state_rx, |s| s != ConnectionState::Open) => break,
                result = self.reader.read_frame() => result,
            };

            match result {
                Ok(Some(frame)) if frame.is_disconnect() => {
                    tracing::debug!(peer = %peer, "Received disconnect from peer");
                    self.connection.transition(ConnectionState::Closing);
                    break;
                }
                Ok(Some(frame)) => self.deliver(frame, peer),
                // Empty length field
                Ok(None) => continue,
                Err(e) if e.is_fatal_transport() => {
                    tracing::debug!(peer = %peer, "Connection lost: {}", e);
                    self.connection.transition(ConnectionState::Closing);
                    break;
                }
                Err(e) => {
                    tracing::warn!(peer = %peer, "Dropping frame: {}", e);
                }
            }
        }
    }

    fn deliver(&self, frame: Frame, peer: PeerId) {
        match self.ctx.codec.decode(frame.body()) {
            Ok(message) => {
                tracing::debug!(peer = %peer, bytes = frame.length(), "Got message");
                self.ctx.dispatcher.fire_received(message, peer);
            }
            Err(e) => {
                tracing::warn!(
                    peer = %peer,
                    body = %String::from_utf8_lossy(frame.body()),
                    "Message could not be decoded: {}",
                    e
                );
            }
        }
    }

    async fn teardown(mut self, peer: PeerId) {
        let grace = self.ctx.grace_period;

        // Let queued frames drain, then close the write half.
        let _ = tokio::time::timeout(grace, self.connection.inner.writer.shutdown()).await;
        match tokio::time::timeout(grace, &mut self.writer_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => tracing::debug!(peer = %peer, "Writer stopped with error: {}", e),
            Ok(Err(e)) => tracing::warn!(peer = %peer, "Writer task failed: {}", e),
            Err(_) => {
                tracing::warn!(peer = %peer, "Writer did not stop within {:?}, aborting", grace);
                self.writer_task.abort();
            }
        }

        if let Some(teardown) = self.teardown.take() {
            teardown(peer);
        }
        self.ctx.dispatcher.fire_disconnected(peer);
        self.connection.transition(ConnectionState::Closed);
    }
}
