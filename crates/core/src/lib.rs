//! Shared signaling protocol for roomcast rooms.
//!
//! One owner shares a live media stream with any number of viewers; the
//! relay forwards opaque handshake messages between them inside a named
//! room. This crate defines the wire envelope those messages travel in and
//! nothing else — media never passes through these types.

pub mod error;
pub mod protocol;

pub use error::{Error, Result};
pub use protocol::{decode, encode, Role, SignalMessage};
