//! Protocol module - wire format, framing, and frame types.
//!
//! This module implements the length-delimited framing:
//! - Fixed-width ASCII header encoding/parsing ([`Framer`])
//! - Two-phase decoding against a stream ([`FrameReader`])
//! - Inbound/outbound frame types

mod frame;
mod frame_reader;
mod wire_format;

pub use frame::{Frame, OutboundFrame};
pub use frame_reader::{decode_all, FrameReader};
pub use wire_format::{
    FrameConfig, Framer, DEFAULT_HEADER_WIDTH, DEFAULT_MAX_BODY_SIZE, DEFAULT_TERMINATOR,
    DISCONNECT_SENTINEL, HEADER_FILL,
};
