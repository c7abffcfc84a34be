//! Handler registry for the three connection events.
//!
//! Each event kind keeps its handlers in registration order. Handler
//! identity is the `Arc` allocation, so the same handler registered twice
//! is stored once.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::error::Result;
use crate::transport::PeerId;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Handler for decoded messages.
pub trait MessageHandler<V>: Send + Sync + 'static {
    /// Handle a message received from `peer`.
    fn call(&self, message: V, peer: PeerId) -> BoxFuture<'static, HandlerResult>;
}

impl<V, F, Fut> MessageHandler<V> for F
where
    F: Fn(V, PeerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, message: V, peer: PeerId) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(message, peer))
    }
}

/// Handler for peer lifecycle events.
pub trait PeerHandler: Send + Sync + 'static {
    /// Handle a lifecycle event for `peer`.
    fn call(&self, peer: PeerId) -> BoxFuture<'static, HandlerResult>;
}

impl<F, Fut> PeerHandler for F
where
    F: Fn(PeerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, peer: PeerId) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(peer))
    }
}

/// Wrap an async closure as a shareable message handler.
///
/// Keep the returned `Arc` to unregister the handler later.
pub fn message_handler<V, F, Fut>(f: F) -> Arc<dyn MessageHandler<V>>
where
    V: 'static,
    F: Fn(V, PeerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

/// Wrap an async closure as a shareable lifecycle handler.
pub fn peer_handler<F, Fut>(f: F) -> Arc<dyn PeerHandler>
where
    F: Fn(PeerId) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(f)
}

/// Lifecycle events carrying only a peer id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerEvent {
    /// A connection reached the open state.
    Connected,
    /// A connection was torn down.
    Disconnected,
}

/// All event kinds, for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Received,
    Connected,
    Disconnected,
}

impl From<PeerEvent> for EventKind {
    fn from(event: PeerEvent) -> Self {
        match event {
            PeerEvent::Connected => EventKind::Connected,
            PeerEvent::Disconnected => EventKind::Disconnected,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventKind::Received => "received",
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
        })
    }
}

/// Registry of handlers, one ordered set per event kind.
pub struct HandlerRegistry<V> {
    received: Vec<Arc<dyn MessageHandler<V>>>,
    connected: Vec<Arc<dyn PeerHandler>>,
    disconnected: Vec<Arc<dyn PeerHandler>>,
}

impl<V: 'static> HandlerRegistry<V> {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            received: Vec::new(),
            connected: Vec::new(),
            disconnected: Vec::new(),
        }
    }

    /// Register a message handler.
    ///
    /// Returns `false` if this exact handler was already registered.
    pub fn register_received(&mut self, handler: Arc<dyn MessageHandler<V>>) -> bool {
        insert_unique(&mut self.received, handler)
    }

    /// Remove a message handler. Returns `false` if it was not registered.
    pub fn unregister_received(&mut self, handler: &Arc<dyn MessageHandler<V>>) -> bool {
        remove_same(&mut self.received, handler)
    }

    /// Register a lifecycle handler.
    ///
    /// Returns `false` if this exact handler was already registered for
    /// `event`.
    pub fn register_peer(&mut self, event: PeerEvent, handler: Arc<dyn PeerHandler>) -> bool {
        insert_unique(self.peer_mut(event), handler)
    }

    /// Remove a lifecycle handler. Returns `false` if it was not registered.
    pub fn unregister_peer(&mut self, event: PeerEvent, handler: &Arc<dyn PeerHandler>) -> bool {
        remove_same(self.peer_mut(event), handler)
    }

    /// Message handlers in registration order.
    pub fn received(&self) -> &[Arc<dyn MessageHandler<V>>] {
        &self.received
    }

    /// Lifecycle handlers for `event` in registration order.
    pub fn peer(&self, event: PeerEvent) -> &[Arc<dyn PeerHandler>] {
        match event {
            PeerEvent::Connected => &self.connected,
            PeerEvent::Disconnected => &self.disconnected,
        }
    }

    /// Number of handlers registered for `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        match kind {
            EventKind::Received => self.received.len(),
            EventKind::Connected => self.connected.len(),
            EventKind::Disconnected => self.disconnected.len(),
        }
    }

    fn peer_mut(&mut self, event: PeerEvent) -> &mut Vec<Arc<dyn PeerHandler>> {
        match event {
            PeerEvent::Connected => &mut self.connected,
            PeerEvent::Disconnected => &mut self.disconnected,
        }
    }
}

impl<V: 'static> Default for HandlerRegistry<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Compare handlers by allocation, ignoring vtable metadata.
fn same_handler<T: ?Sized>(a: &Arc<T>, b: &Arc<T>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn insert_unique<T: ?Sized>(set: &mut Vec<Arc<T>>, handler: Arc<T>) -> bool {
    if set.iter().any(|h| same_handler(h, &handler)) {
        return false;
    }
    set.push(handler);
    true
}

fn remove_same<T: ?Sized>(set: &mut Vec<Arc<T>>, handler: &Arc<T>) -> bool {
    let before = set.len();
    set.retain(|h| !same_handler(h, handler));
    set.len() != before
}
