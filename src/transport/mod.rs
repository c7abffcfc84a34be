//! Transport module - TCP socket handling.
//!
//! Provides:
//! - [`PeerId`] - `ip:port` identity of the remote end of a connection
//! - [`Listener`] - TCP listener bound with an explicit backlog
//! - [`connect`] - outbound TCP connection

mod tcp;

pub use tcp::{connect, resolve, Listener, PeerId};
