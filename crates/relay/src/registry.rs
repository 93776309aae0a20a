//! Room and participant bookkeeping.
//!
//! One mutex guards all rooms and participants, so `join` and `leave` are
//! atomic with respect to each other across every connection. No `.await`
//! is held across the lock: outbound sends are unbounded-channel enqueues
//! and a closed channel means the recipient is already gone.

use std::collections::{HashMap, HashSet};

use parking_lot::Mutex;
use roomcast_core::{protocol, Role, SignalMessage};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Outbound channel reference for one connected participant.
///
/// The connection task on the other end writes each message to the
/// WebSocket as a text frame.
pub type ChannelSender = mpsc::UnboundedSender<Message>;

/// Where a participant currently stands.
///
/// Explicit variants instead of nullable room/role fields: a participant
/// is unjoined, or holds exactly one role in exactly one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantStatus {
    /// Connected, not yet in any room.
    Unjoined,
    /// Holding the owner slot of the named room (or displaced from it;
    /// the room's own slot is authoritative).
    JoinedAsOwner(String),
    /// Registered in the viewer set of the named room.
    JoinedAsViewer(String),
}

struct Participant {
    sender: ChannelSender,
    status: ParticipantStatus,
}

#[derive(Default)]
struct Room {
    owner: Option<String>,
    viewers: HashSet<String>,
}

impl Room {
    fn is_empty(&self) -> bool {
        self.owner.is_none() && self.viewers.is_empty()
    }
}

#[derive(Default)]
struct Inner {
    rooms: HashMap<String, Room>,
    participants: HashMap<String, Participant>,
}

/// Shared registry of rooms and connected participants.
#[derive(Default)]
pub struct RoomRegistry {
    inner: Mutex<Inner>,
}

impl RoomRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connected channel under a fresh participant id.
    pub fn connect(&self, id: &str, sender: ChannelSender) {
        let mut inner = self.inner.lock();
        inner.participants.insert(
            id.to_string(),
            Participant {
                sender,
                status: ParticipantStatus::Unjoined,
            },
        );
        info!(participant = %id, "participant connected");
    }

    /// Remove a participant entirely: leave whatever room it held, then
    /// drop the record.
    pub fn disconnect(&self, id: &str) {
        let mut inner = self.inner.lock();
        Self::leave_locked(&mut inner, id);
        inner.participants.remove(id);
        info!(participant = %id, "participant disconnected");
    }

    /// Enter `room_id` under `role`.
    ///
    /// A prior membership on the same connection is released first, so a
    /// rejoin never leaves stale bookkeeping behind. An owner join
    /// replaces a sitting owner (last writer wins, no eviction message)
    /// and fans `owner-ready` out to every registered viewer; a viewer
    /// joining an owned room is notified immediately.
    pub fn join(&self, id: &str, room_id: &str, role: Role) {
        let mut inner = self.inner.lock();
        if !inner.participants.contains_key(id) {
            return;
        }
        Self::leave_locked(&mut inner, id);

        let notify = {
            let room = inner.rooms.entry(room_id.to_string()).or_default();
            match role {
                Role::Owner => {
                    if let Some(displaced) = room.owner.replace(id.to_string()) {
                        debug!(room = %room_id, %displaced, "owner slot replaced");
                    }
                    room.viewers.iter().cloned().collect::<Vec<_>>()
                }
                Role::Viewer => {
                    room.viewers.insert(id.to_string());
                    if room.owner.is_some() {
                        vec![id.to_string()]
                    } else {
                        Vec::new()
                    }
                }
            }
        };

        if let Some(participant) = inner.participants.get_mut(id) {
            participant.status = match role {
                Role::Owner => ParticipantStatus::JoinedAsOwner(room_id.to_string()),
                Role::Viewer => ParticipantStatus::JoinedAsViewer(room_id.to_string()),
            };
        }
        for target in notify {
            Self::send_locked(&inner, &target, &SignalMessage::OwnerReady);
        }
        info!(participant = %id, room = %room_id, ?role, "joined room");
    }

    /// Remove the participant from whatever room/role it held.
    pub fn leave(&self, id: &str) {
        let mut inner = self.inner.lock();
        Self::leave_locked(&mut inner, id);
    }

    /// Forward to the current owner of `room_id`. Returns whether an owner
    /// existed to receive it.
    pub fn send_to_owner(&self, room_id: &str, msg: &SignalMessage) -> bool {
        let inner = self.inner.lock();
        match inner.rooms.get(room_id).and_then(|room| room.owner.clone()) {
            Some(owner) => {
                Self::send_locked(&inner, &owner, msg);
                true
            }
            None => false,
        }
    }

    /// Forward to one registered viewer of `room_id`. Returns whether the
    /// viewer was present.
    pub fn send_to_viewer(&self, room_id: &str, viewer_id: &str, msg: &SignalMessage) -> bool {
        let inner = self.inner.lock();
        let present = inner
            .rooms
            .get(room_id)
            .map_or(false, |room| room.viewers.contains(viewer_id));
        if present {
            Self::send_locked(&inner, viewer_id, msg);
        }
        present
    }

    /// Current status of a participant, if it is still connected.
    pub fn status_of(&self, id: &str) -> Option<ParticipantStatus> {
        let inner = self.inner.lock();
        inner.participants.get(id).map(|p| p.status.clone())
    }

    /// Owner and viewer ids currently registered for `room_id`.
    pub fn room_members(&self, room_id: &str) -> Option<(Option<String>, Vec<String>)> {
        let inner = self.inner.lock();
        inner.rooms.get(room_id).map(|room| {
            let mut viewers: Vec<String> = room.viewers.iter().cloned().collect();
            viewers.sort();
            (room.owner.clone(), viewers)
        })
    }

    /// Whether `room_id` exists at all.
    pub fn contains_room(&self, room_id: &str) -> bool {
        self.inner.lock().rooms.contains_key(room_id)
    }

    fn leave_locked(inner: &mut Inner, id: &str) {
        let status = match inner.participants.get_mut(id) {
            Some(participant) => {
                std::mem::replace(&mut participant.status, ParticipantStatus::Unjoined)
            }
            None => return,
        };
        let (room_id, was_owner) = match status {
            ParticipantStatus::Unjoined => return,
            ParticipantStatus::JoinedAsOwner(room_id) => (room_id, true),
            ParticipantStatus::JoinedAsViewer(room_id) => (room_id, false),
        };

        let (notify, now_empty) = match inner.rooms.get_mut(&room_id) {
            Some(room) => {
                let notify = if was_owner {
                    // A displaced owner no longer holds the slot; only the
                    // sitting owner's departure clears it and notifies.
                    if room.owner.as_deref() == Some(id) {
                        room.owner = None;
                        room.viewers.iter().cloned().collect::<Vec<_>>()
                    } else {
                        Vec::new()
                    }
                } else {
                    room.viewers.remove(id);
                    Vec::new()
                };
                (notify, room.is_empty())
            }
            None => return,
        };

        for viewer in notify {
            Self::send_locked(inner, &viewer, &SignalMessage::OwnerLeft);
        }
        if now_empty {
            inner.rooms.remove(&room_id);
            debug!(room = %room_id, "empty room removed");
        }
        info!(participant = %id, room = %room_id, "left room");
    }

    fn send_locked(inner: &Inner, id: &str, msg: &SignalMessage) {
        let Some(participant) = inner.participants.get(id) else {
            return;
        };
        match protocol::encode(msg) {
            // A send on a closed channel means the recipient is already
            // gone; best-effort delivery swallows it.
            Ok(text) => {
                let _ = participant.sender.send(Message::Text(text));
            }
            Err(e) => warn!(error = %e, "failed to encode outbound message"),
        }
    }
}
