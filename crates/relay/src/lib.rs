//! Signaling relay for roomcast rooms.
//!
//! The relay never sees media. It registers participants as they connect,
//! tracks room membership (one owner slot, a set of viewers per room), and
//! forwards opaque handshake messages between an owner and each viewer.
//! Delivery is at-most-once and best-effort: anything that cannot be
//! parsed or routed is dropped where it stands, and no error ever travels
//! back to the sender.
//!
//! State lives entirely in memory and is rebuilt from scratch on restart.

pub mod error;
pub mod registry;
pub mod router;
pub mod server;

pub use error::{Error, Result};
pub use registry::{ChannelSender, ParticipantStatus, RoomRegistry};
pub use router::MessageRouter;
pub use server::{handle_connection, serve};
