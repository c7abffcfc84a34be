//! Asynchronous event dispatch.
//!
//! Firing an event never runs handler code on the caller's task. Each
//! handler invocation becomes a job on an unbounded queue; a single pump
//! task drains the queue and spawns every job under a semaphore permit, so
//! at most `max_concurrent_handlers` handlers run at once and a slow
//! handler never stalls the read loop that fired the event.
//!
//! Handler errors are logged. A panicking handler only takes down its own
//! task.

use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, Semaphore};

use super::registry::{
    BoxFuture, EventKind, HandlerRegistry, HandlerResult, MessageHandler, PeerEvent, PeerHandler,
};
use crate::transport::PeerId;

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// One handler invocation waiting to run.
struct Job {
    kind: EventKind,
    peer: PeerId,
    future: BoxFuture<'static, HandlerResult>,
}

/// Queue receiver plus concurrency limit, held until the pump starts.
struct PendingPump {
    rx: mpsc::UnboundedReceiver<Job>,
    max_concurrent: usize,
}

/// Fans events out to registered handlers.
///
/// Cheaply cloneable; every clone shares the same handlers and queue.
pub struct Dispatcher<V> {
    handlers: Arc<RwLock<HandlerRegistry<V>>>,
    queue: mpsc::UnboundedSender<Job>,
    pending: Arc<Mutex<Option<PendingPump>>>,
}

impl<V> Clone for Dispatcher<V> {
    fn clone(&self) -> Self {
        Self {
            handlers: self.handlers.clone(),
            queue: self.queue.clone(),
            pending: self.pending.clone(),
        }
    }
}

impl<V: Clone + Send + 'static> Dispatcher<V> {
    /// Create a dispatcher running at most `max_concurrent_handlers`
    /// handlers at once.
    ///
    /// The pump task is spawned on the first fired event, so a dispatcher
    /// can be built outside a tokio runtime.
    pub fn new(max_concurrent_handlers: usize) -> Self {
        let (queue, rx) = mpsc::unbounded_channel();
        Self {
            handlers: Arc::new(RwLock::new(HandlerRegistry::new())),
            queue,
            pending: Arc::new(Mutex::new(Some(PendingPump {
                rx,
                max_concurrent: max_concurrent_handlers.max(1),
            }))),
        }
    }

    /// Register a message handler. Returns `false` if already registered.
    pub fn register_received(&self, handler: Arc<dyn MessageHandler<V>>) -> bool {
        self.handlers.write().register_received(handler)
    }

    /// Remove a message handler. Returns `false` if it was not registered.
    pub fn unregister_received(&self, handler: &Arc<dyn MessageHandler<V>>) -> bool {
        self.handlers.write().unregister_received(handler)
    }

    /// Register a lifecycle handler. Returns `false` if already registered.
    pub fn register_peer(&self, event: PeerEvent, handler: Arc<dyn PeerHandler>) -> bool {
        self.handlers.write().register_peer(event, handler)
    }

    /// Remove a lifecycle handler. Returns `false` if it was not registered.
    pub fn unregister_peer(&self, event: PeerEvent, handler: &Arc<dyn PeerHandler>) -> bool {
        self.handlers.write().unregister_peer(event, handler)
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.handlers.read().count(kind)
    }

    /// Queue every `received` handler with a clone of `message`.
    pub fn fire_received(&self, message: V, peer: PeerId) {
        let handlers = self.handlers.read().received().to_vec();
        for handler in handlers {
            let message = message.clone();
            self.enqueue(
                EventKind::Received,
                peer,
                Box::pin(async move { handler.call(message, peer).await }),
            );
        }
    }

    /// Queue every `connected` handler.
    pub fn fire_connected(&self, peer: PeerId) {
        self.fire_peer(PeerEvent::Connected, peer);
    }

    /// Queue every `disconnected` handler.
    pub fn fire_disconnected(&self, peer: PeerId) {
        self.fire_peer(PeerEvent::Disconnected, peer);
    }

    fn fire_peer(&self, event: PeerEvent, peer: PeerId) {
        let handlers = self.handlers.read().peer(event).to_vec();
        for handler in handlers {
            self.enqueue(
                event.into(),
                peer,
                Box::pin(async move { handler.call(peer).await }),
            );
        }
    }

    fn enqueue(&self, kind: EventKind, peer: PeerId, future: BoxFuture<'static, HandlerResult>) {
        self.ensure_pump();
        if self.queue.send(Job { kind, peer, future }).is_err() {
            tracing::warn!(event = %kind, peer = %peer, "Dispatch queue closed, dropping event");
        }
    }

    fn ensure_pump(&self) {
        if let Some(pending) = self.pending.lock().take() {
            let semaphore = Arc::new(Semaphore::new(pending.max_concurrent));
            tokio::spawn(pump(pending.rx, semaphore));
        }
    }
}

/// Drain the job queue, running each job under a semaphore permit.
async fn pump(mut rx: mpsc::UnboundedReceiver<Job>, semaphore: Arc<Semaphore>) {
    while let Some(job) = rx.recv().await {
        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => return,
        };

        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;

            if let Err(e) = job.future.await {
                tracing::error!(event = %job.kind, peer = %job.peer, "Handler error: {}", e);
            }
        });
    }
}
