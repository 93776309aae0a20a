//! Signaling message envelope.
//!
//! Messages are JSON text frames with an internally tagged `type` field and
//! camelCase keys on the wire. Session descriptions (`sdp`) and network
//! candidates (`candidate`) are opaque [`serde_json::Value`]s: the relay
//! forwards them untouched and only the media-transport layer on each peer
//! interprets them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

/// Participant role within a room.
///
/// At most one owner occupies a room at a time; viewers are unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The participant sharing media.
    Owner,
    /// A participant receiving media.
    Viewer,
}

/// Signaling message envelope.
///
/// Direction-dependent fields (`roomId`, `to`, `from`) are optional at the
/// type level; the relay router enforces which are required per message
/// type. Forwarded messages carry exactly the fields the receiving side
/// expects: `owner-answer` arrives at a viewer with only `sdp`, a viewer's
/// candidate arrives at the owner tagged `from`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Sent once by the relay when a channel connects; assigns the
    /// participant identifier for the lifetime of that connection.
    Hello { id: String },

    /// Peer request to enter a room under a role.
    JoinRoom {
        #[serde(rename = "roomId")]
        room_id: String,
        role: Role,
    },

    /// Relay notification that the room's owner is present.
    OwnerReady,

    /// Relay notification that the room's owner channel closed.
    OwnerLeft,

    /// Viewer's session description offer, relayed to the room owner.
    ViewerOffer {
        #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        sdp: Value,
    },

    /// Owner's session description answer, relayed to one viewer.
    OwnerAnswer {
        #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        sdp: Value,
    },

    /// Network-candidate hint, relayed in either direction.
    IceCandidate {
        #[serde(rename = "roomId", skip_serializing_if = "Option::is_none")]
        room_id: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        to: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        from: Option<String>,
        candidate: Value,
    },
}

impl SignalMessage {
    /// Message type tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::JoinRoom { .. } => "join-room",
            Self::OwnerReady => "owner-ready",
            Self::OwnerLeft => "owner-left",
            Self::ViewerOffer { .. } => "viewer-offer",
            Self::OwnerAnswer { .. } => "owner-answer",
            Self::IceCandidate { .. } => "ice-candidate",
        }
    }
}

/// Encode a message as a JSON text frame.
pub fn encode(msg: &SignalMessage) -> Result<String> {
    Ok(serde_json::to_string(msg)?)
}

/// Decode a JSON text frame into a message.
///
/// Unknown `type` tags and missing required fields are decode errors; the
/// relay and peers drop such frames silently.
pub fn decode(text: &str) -> Result<SignalMessage> {
    Ok(serde_json::from_str(text)?)
}
