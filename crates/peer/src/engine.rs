//! Media-transport engine boundary.
//!
//! The session state machines drive an injected engine through these
//! traits. Descriptions and candidates stay opaque [`serde_json::Value`]s
//! end to end, so the machines never interpret media-layer payloads; only
//! the engine implementation does. The `webrtc`-backed engine lives in
//! [`crate::webrtc_engine`]; tests substitute a recording mock.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::Result;

/// Media flow direction a session is created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionDirection {
    /// Owner side: sends captured media, receives none.
    SendOnly,
    /// Viewer side: pure consumer.
    RecvOnly,
}

/// Connectivity state reported by the media-transport layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl ConnectionState {
    /// Terminal states drive session teardown; negotiation failures only
    /// ever surface here, never as structured signaling errors.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Disconnected | Self::Failed | Self::Closed)
    }
}

/// Event emitted by a live session.
#[derive(Debug)]
pub enum SessionEvent<Stream> {
    /// Locally gathered network candidate to hand to signaling.
    LocalCandidate(Value),
    /// Connectivity transition from the media-transport layer.
    StateChanged(ConnectionState),
    /// Remote media became available (viewer side).
    RemoteStream(Stream),
}

/// Sender half an engine uses to surface session events.
pub type SessionEventSender<Stream> = mpsc::UnboundedSender<SessionEvent<Stream>>;

/// Factory for media-transport sessions.
#[async_trait]
pub trait MediaEngine: Send + Sync + 'static {
    /// Locally captured media handle attached to outgoing sessions.
    type Media: Clone + Send + Sync + 'static;
    /// Opaque inbound stream handle surfaced to the rendering collaborator.
    type Stream: Send + 'static;
    type Session: MediaSession<Media = Self::Media>;

    /// Create one session; `events` receives everything the session emits
    /// for its whole lifetime.
    async fn create_session(
        &self,
        direction: SessionDirection,
        events: SessionEventSender<Self::Stream>,
    ) -> Result<Self::Session>;
}

/// One owner↔viewer media-transport pairing.
#[async_trait]
pub trait MediaSession: Send + Sync {
    type Media;

    /// Apply the counterpart's session description.
    async fn apply_remote_description(&self, sdp: Value) -> Result<()>;

    /// Produce the local offer and store it as the local description.
    async fn create_offer(&self) -> Result<Value>;

    /// Produce the local answer and store it as the local description.
    async fn create_answer(&self) -> Result<Value>;

    /// Apply a remote network candidate. Callers must not invoke this
    /// before a remote description has been applied.
    async fn apply_candidate(&self, candidate: Value) -> Result<()>;

    /// Align outgoing tracks with `media`: tracks of a kind already sent
    /// are replaced in place, missing kinds are added, `None` removes
    /// everything. No renegotiation happens either way.
    async fn set_outgoing_media(&self, media: Option<&Self::Media>) -> Result<()>;

    /// Release the underlying media-transport handle.
    async fn close(&self);
}

#[cfg(test)]
pub(crate) mod mock {
    //! Recording engine for state-machine tests.

    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use parking_lot::Mutex;
    use serde_json::json;

    use super::*;

    /// One recorded engine operation, tagged with the session's ordinal.
    #[derive(Debug, Clone, PartialEq)]
    pub enum Op {
        Created(usize, SessionDirection),
        RemoteDescription(usize, Value),
        Offer(usize),
        Answer(usize),
        Candidate(usize, Value),
        Media(usize, bool),
        Closed(usize),
    }

    #[derive(Default)]
    pub struct MockEngine {
        next_id: AtomicUsize,
        pub ops: Arc<Mutex<Vec<Op>>>,
    }

    impl MockEngine {
        pub fn ops(&self) -> Vec<Op> {
            self.ops.lock().clone()
        }
    }

    pub struct MockSession {
        id: usize,
        ops: Arc<Mutex<Vec<Op>>>,
    }

    #[async_trait]
    impl MediaEngine for MockEngine {
        type Media = Vec<&'static str>;
        type Stream = &'static str;
        type Session = MockSession;

        async fn create_session(
            &self,
            direction: SessionDirection,
            _events: SessionEventSender<Self::Stream>,
        ) -> Result<MockSession> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst);
            self.ops.lock().push(Op::Created(id, direction));
            Ok(MockSession {
                id,
                ops: Arc::clone(&self.ops),
            })
        }
    }

    #[async_trait]
    impl MediaSession for MockSession {
        type Media = Vec<&'static str>;

        async fn apply_remote_description(&self, sdp: Value) -> Result<()> {
            self.ops.lock().push(Op::RemoteDescription(self.id, sdp));
            Ok(())
        }

        async fn create_offer(&self) -> Result<Value> {
            self.ops.lock().push(Op::Offer(self.id));
            Ok(json!({"type": "offer", "session": self.id}))
        }

        async fn create_answer(&self) -> Result<Value> {
            self.ops.lock().push(Op::Answer(self.id));
            Ok(json!({"type": "answer", "session": self.id}))
        }

        async fn apply_candidate(&self, candidate: Value) -> Result<()> {
            self.ops.lock().push(Op::Candidate(self.id, candidate));
            Ok(())
        }

        async fn set_outgoing_media(&self, media: Option<&Self::Media>) -> Result<()> {
            self.ops.lock().push(Op::Media(self.id, media.is_some()));
            Ok(())
        }

        async fn close(&self) {
            self.ops.lock().push(Op::Closed(self.id));
        }
    }
}
