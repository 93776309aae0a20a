//! Peer-side session establishment for roomcast rooms.
//!
//! An owner shares locally captured media with every viewer that offers;
//! a viewer consumes exactly one stream from the room's owner. Both roles
//! are state machines driven one inbound signaling message or one local
//! user action at a time, in arrival order, over an injected
//! media-transport engine. The engine boundary keeps descriptions and
//! candidates opaque; the bundled [`webrtc_engine`] implements it with the
//! `webrtc` crate, and tests substitute a recording mock.

pub mod engine;
pub mod error;
pub mod owner;
pub mod signaling;
pub mod viewer;
pub mod webrtc_engine;

pub use engine::{
    ConnectionState, MediaEngine, MediaSession, SessionDirection, SessionEvent, SessionEventSender,
};
pub use error::{Error, Result};
pub use owner::{OwnerCommand, OwnerPeer, OwnerState, ViewerPhase};
pub use signaling::SignalingClient;
pub use viewer::{ViewerNotice, ViewerPeer, ViewerState};
pub use webrtc_engine::{LocalMedia, RtcConfig, WebRtcEngine, WebRtcSession};
