//! Handler module - event handlers and dispatch.
//!
//! Provides:
//! - [`HandlerRegistry`] - three ordered handler sets, one per event kind
//! - [`Dispatcher`] - runs handlers asynchronously with bounded concurrency
//!
//! Handlers are async closures. Registration is idempotent per `Arc`:
//! registering the same `Arc` twice is a no-op.
//!
//! # Example
//!
//! ```ignore
//! use sockwire::handler::{message_handler, peer_handler, Dispatcher, PeerEvent};
//!
//! let dispatcher = Dispatcher::<serde_json::Value>::new(256);
//!
//! let on_message = message_handler(|msg: serde_json::Value, peer| async move {
//!     println!("{peer} sent {msg}");
//!     Ok(())
//! });
//! dispatcher.register_received(on_message.clone());
//! dispatcher.register_received(on_message); // no-op
//!
//! dispatcher.register_peer(PeerEvent::Connected, peer_handler(|peer| async move {
//!     println!("{peer} has connected!");
//!     Ok(())
//! }));
//! ```

mod dispatcher;
mod registry;

pub use dispatcher::{Dispatcher, DEFAULT_MAX_CONCURRENT_HANDLERS};
pub use registry::{
    message_handler, peer_handler, BoxFuture, EventKind, HandlerRegistry, HandlerResult,
    MessageHandler, PeerEvent, PeerHandler,
};
