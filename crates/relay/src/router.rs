//! Envelope validation and dispatch.
//!
//! The router is the only routing logic in the relay. It checks the
//! per-type required fields, then forwards through the registry; room
//! membership is only ever mutated via `join-room`. Signaling is
//! fire-and-forget: malformed and unroutable messages are dropped where
//! they stand, never buffered and never answered with an error.

use std::sync::Arc;

use roomcast_core::SignalMessage;
use serde_json::Value;
use tracing::debug;

use crate::registry::{ParticipantStatus, RoomRegistry};

/// Stateless dispatcher over the shared registry.
pub struct MessageRouter {
    registry: Arc<RoomRegistry>,
}

impl MessageRouter {
    pub fn new(registry: Arc<RoomRegistry>) -> Self {
        Self { registry }
    }

    /// Route one inbound message from the participant `sender_id`.
    pub fn route(&self, sender_id: &str, msg: SignalMessage) {
        match msg {
            SignalMessage::JoinRoom { room_id, role } => {
                self.registry.join(sender_id, &room_id, role);
            }
            SignalMessage::ViewerOffer {
                room_id: Some(room_id),
                sdp,
                ..
            } => {
                let forwarded = SignalMessage::ViewerOffer {
                    room_id: None,
                    from: Some(sender_id.to_string()),
                    sdp,
                };
                if !self.registry.send_to_owner(&room_id, &forwarded) {
                    debug!(room = %room_id, "viewer-offer dropped: no owner");
                }
            }
            SignalMessage::OwnerAnswer {
                room_id: Some(room_id),
                to: Some(to),
                sdp,
            } => {
                // The target is resolved here and stripped from the frame.
                let forwarded = SignalMessage::OwnerAnswer {
                    room_id: None,
                    to: None,
                    sdp,
                };
                if !self.registry.send_to_viewer(&room_id, &to, &forwarded) {
                    debug!(room = %room_id, viewer = %to, "owner-answer dropped: viewer not found");
                }
            }
            SignalMessage::IceCandidate {
                room_id: Some(room_id),
                to,
                candidate,
                ..
            } => {
                self.route_candidate(sender_id, &room_id, to, candidate);
            }
            other => {
                debug!(kind = other.kind(), "message dropped: not routable");
            }
        }
    }

    /// Candidate direction depends on the sender's registered role, not on
    /// anything in the frame.
    fn route_candidate(&self, sender_id: &str, room_id: &str, to: Option<String>, candidate: Value) {
        match self.registry.status_of(sender_id) {
            Some(ParticipantStatus::JoinedAsViewer(_)) => {
                let forwarded = SignalMessage::IceCandidate {
                    room_id: None,
                    to: None,
                    from: Some(sender_id.to_string()),
                    candidate,
                };
                if !self.registry.send_to_owner(room_id, &forwarded) {
                    debug!(room = %room_id, "ice-candidate dropped: no owner");
                }
            }
            Some(ParticipantStatus::JoinedAsOwner(_)) => match to {
                Some(to) => {
                    let forwarded = SignalMessage::IceCandidate {
                        room_id: None,
                        to: None,
                        from: None,
                        candidate,
                    };
                    if !self.registry.send_to_viewer(room_id, &to, &forwarded) {
                        debug!(room = %room_id, viewer = %to, "ice-candidate dropped: viewer not found");
                    }
                }
                None => debug!(room = %room_id, "ice-candidate from owner dropped: missing target"),
            },
            _ => debug!(room = %room_id, "ice-candidate dropped: sender not joined"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomcast_core::{protocol, Role};
    use serde_json::json;
    use tokio::sync::mpsc;
    use tokio_tungstenite::tungstenite::Message;

    struct Fixture {
        registry: Arc<RoomRegistry>,
        router: MessageRouter,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(RoomRegistry::new());
            let router = MessageRouter::new(Arc::clone(&registry));
            Self { registry, router }
        }

        fn connect(&self, id: &str) -> mpsc::UnboundedReceiver<Message> {
            let (tx, rx) = mpsc::unbounded_channel();
            self.registry.connect(id, tx);
            rx
        }
    }

    fn try_recv_msg(rx: &mut mpsc::UnboundedReceiver<Message>) -> Option<SignalMessage> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(protocol::decode(&text).expect("decode")),
            Ok(other) => panic!("unexpected frame: {other:?}"),
            Err(_) => None,
        }
    }

    fn offer(room_id: &str) -> SignalMessage {
        SignalMessage::ViewerOffer {
            room_id: Some(room_id.to_string()),
            from: None,
            sdp: json!({"type": "offer", "sdp": "v=0"}),
        }
    }

    #[test]
    fn test_offer_without_owner_is_dropped() {
        let f = Fixture::new();
        let _viewer_rx = f.connect("v1");
        f.router.route("v1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Viewer });

        // No owner present: the offer goes nowhere and is not queued.
        f.router.route("v1", offer("r1"));

        let mut owner_rx = f.connect("o1");
        f.router.route("o1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Owner });
        assert!(try_recv_msg(&mut owner_rx).is_none());
    }

    #[test]
    fn test_offer_forwarded_to_owner_tagged_from() {
        let f = Fixture::new();
        let mut owner_rx = f.connect("o1");
        let mut viewer_rx = f.connect("v1");
        f.router.route("o1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Owner });
        f.router.route("v1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Viewer });
        let _ = try_recv_msg(&mut viewer_rx); // owner-ready

        f.router.route("v1", offer("r1"));

        match try_recv_msg(&mut owner_rx) {
            Some(SignalMessage::ViewerOffer { room_id, from, sdp }) => {
                assert_eq!(room_id, None);
                assert_eq!(from.as_deref(), Some("v1"));
                assert_eq!(sdp["type"], "offer");
            }
            other => panic!("expected viewer-offer, got {other:?}"),
        }
    }

    #[test]
    fn test_answer_reaches_only_the_addressed_viewer() {
        let f = Fixture::new();
        let _owner_rx = f.connect("o1");
        let mut v1_rx = f.connect("v1");
        let mut v2_rx = f.connect("v2");
        f.router.route("o1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Owner });
        f.router.route("v1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Viewer });
        f.router.route("v2", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Viewer });
        let _ = try_recv_msg(&mut v1_rx);
        let _ = try_recv_msg(&mut v2_rx);

        f.router.route(
            "o1",
            SignalMessage::OwnerAnswer {
                room_id: Some("r1".into()),
                to: Some("v1".into()),
                sdp: json!({"type": "answer", "sdp": "v=0"}),
            },
        );

        match try_recv_msg(&mut v1_rx) {
            Some(SignalMessage::OwnerAnswer { room_id, to, .. }) => {
                // Forwarded with only the sdp left in the frame.
                assert_eq!(room_id, None);
                assert_eq!(to, None);
            }
            other => panic!("expected owner-answer, got {other:?}"),
        }
        assert!(try_recv_msg(&mut v2_rx).is_none());
    }

    #[test]
    fn test_answer_to_unknown_viewer_is_dropped() {
        let f = Fixture::new();
        let _owner_rx = f.connect("o1");
        f.router.route("o1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Owner });

        f.router.route(
            "o1",
            SignalMessage::OwnerAnswer {
                room_id: Some("r1".into()),
                to: Some("ghost".into()),
                sdp: json!({}),
            },
        );
        // Nothing to assert beyond "no panic, no delivery": the registry
        // has no such viewer.
        assert!(!f.registry.send_to_viewer("r1", "ghost", &SignalMessage::OwnerReady));
    }

    #[test]
    fn test_candidate_routing_by_sender_role() {
        let f = Fixture::new();
        let mut owner_rx = f.connect("o1");
        let mut v1_rx = f.connect("v1");
        let mut v2_rx = f.connect("v2");
        f.router.route("o1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Owner });
        f.router.route("v1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Viewer });
        f.router.route("v2", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Viewer });
        let _ = try_recv_msg(&mut v1_rx);
        let _ = try_recv_msg(&mut v2_rx);

        // Viewer candidate: to the owner, tagged with the sender.
        f.router.route(
            "v1",
            SignalMessage::IceCandidate {
                room_id: Some("r1".into()),
                to: None,
                from: None,
                candidate: json!({"candidate": "candidate:viewer"}),
            },
        );
        match try_recv_msg(&mut owner_rx) {
            Some(SignalMessage::IceCandidate { from, to, .. }) => {
                assert_eq!(from.as_deref(), Some("v1"));
                assert_eq!(to, None);
            }
            other => panic!("expected ice-candidate, got {other:?}"),
        }

        // Owner candidate: to the named viewer only, untagged.
        f.router.route(
            "o1",
            SignalMessage::IceCandidate {
                room_id: Some("r1".into()),
                to: Some("v2".into()),
                from: None,
                candidate: json!({"candidate": "candidate:owner"}),
            },
        );
        match try_recv_msg(&mut v2_rx) {
            Some(SignalMessage::IceCandidate { from, to, .. }) => {
                assert_eq!(from, None);
                assert_eq!(to, None);
            }
            other => panic!("expected ice-candidate, got {other:?}"),
        }
        assert!(try_recv_msg(&mut v1_rx).is_none());

        // Owner candidate without a target is dropped.
        f.router.route(
            "o1",
            SignalMessage::IceCandidate {
                room_id: Some("r1".into()),
                to: None,
                from: None,
                candidate: json!({}),
            },
        );
        assert!(try_recv_msg(&mut v1_rx).is_none());
        assert!(try_recv_msg(&mut v2_rx).is_none());
    }

    #[test]
    fn test_messages_missing_required_fields_are_dropped() {
        let f = Fixture::new();
        let mut owner_rx = f.connect("o1");
        f.router.route("o1", SignalMessage::JoinRoom { room_id: "r1".into(), role: Role::Owner });

        // Offer without a room id cannot be routed.
        f.router.route(
            "o1",
            SignalMessage::ViewerOffer { room_id: None, from: None, sdp: json!({}) },
        );
        // Relay-originated kinds from a peer are ignored outright.
        f.router.route("o1", SignalMessage::OwnerReady);
        f.router.route("o1", SignalMessage::Hello { id: "spoof".into() });

        assert!(try_recv_msg(&mut owner_rx).is_none());
    }
}
