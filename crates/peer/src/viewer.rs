//! Viewer session state machine.
//!
//! A viewer holds exactly one session, with the room's owner. The machine
//! is driven one message at a time in arrival order; candidates that
//! arrive before the owner's answer are buffered and flushed in order once
//! the remote description is in place, because applying a candidate first
//! fails at the media-transport layer.

use std::sync::Arc;

use roomcast_core::{Role, SignalMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{MediaEngine, MediaSession, SessionDirection, SessionEvent, SessionEventSender};

/// Machine state, advanced only by inbound signaling and session events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerState {
    /// Not joined, or torn down after the owner went away.
    Idle,
    /// Joined; no owner present yet.
    AwaitingOwner,
    /// Offer produced and handed to signaling.
    OfferSent,
    /// Offer on the wire; answer not yet applied.
    AwaitingAnswer,
    /// Remote description applied; media flows when the transport is up.
    Connected,
    /// Session ended by the media-transport layer.
    Closed,
}

/// Notification to the rendering/UI collaborator.
#[derive(Debug)]
pub enum ViewerNotice<Stream> {
    /// Remote media is ready to render.
    StreamAvailable(Stream),
    /// The owner went away; rendering surfaces should clear.
    OwnerGone,
}

pub struct ViewerPeer<E: MediaEngine> {
    engine: Arc<E>,
    room_id: String,
    participant_id: Option<String>,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    notices: mpsc::UnboundedSender<ViewerNotice<E::Stream>>,
    events_tx: mpsc::UnboundedSender<(u64, SessionEvent<E::Stream>)>,
    events_rx: Option<mpsc::UnboundedReceiver<(u64, SessionEvent<E::Stream>)>>,
    state: ViewerState,
    session: Option<E::Session>,
    session_seq: u64,
    pending_candidates: Vec<Value>,
    remote_applied: bool,
}

impl<E: MediaEngine> ViewerPeer<E> {
    pub fn new(
        engine: Arc<E>,
        room_id: impl Into<String>,
        outbound: mpsc::UnboundedSender<SignalMessage>,
        notices: mpsc::UnboundedSender<ViewerNotice<E::Stream>>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            room_id: room_id.into(),
            participant_id: None,
            outbound,
            notices,
            events_tx,
            events_rx: Some(events_rx),
            state: ViewerState::Idle,
            session: None,
            session_seq: 0,
            pending_candidates: Vec::new(),
            remote_applied: false,
        }
    }

    /// Ask the relay for a seat in the room. Joining always resets any
    /// session in flight.
    pub async fn join(&mut self) {
        self.teardown().await;
        self.send(SignalMessage::JoinRoom {
            room_id: self.room_id.clone(),
            role: Role::Viewer,
        });
        self.state = ViewerState::AwaitingOwner;
    }

    /// Route one inbound signaling message.
    pub async fn handle_signal(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::Hello { id } => {
                debug!(participant = %id, "assigned participant id");
                self.participant_id = Some(id);
            }
            SignalMessage::OwnerReady => self.handle_owner_ready().await,
            SignalMessage::OwnerAnswer { sdp, .. } => self.handle_answer(sdp).await,
            SignalMessage::IceCandidate { candidate, .. } => self.handle_candidate(candidate).await,
            SignalMessage::OwnerLeft => self.handle_owner_left().await,
            other => debug!(kind = other.kind(), "ignoring signaling message"),
        }
    }

    /// Session event from the media layer, tagged with the session
    /// generation it came from.
    pub async fn handle_session_event(&mut self, seq: u64, event: SessionEvent<E::Stream>) {
        if seq != self.session_seq || self.session.is_none() {
            debug!("stale session event dropped");
            return;
        }
        match event {
            SessionEvent::LocalCandidate(candidate) => {
                // Unaddressed: the relay resolves the room's sole owner.
                self.send(SignalMessage::IceCandidate {
                    room_id: Some(self.room_id.clone()),
                    to: None,
                    from: None,
                    candidate,
                });
            }
            SessionEvent::StateChanged(state) if state.is_terminal() => {
                info!(?state, "session ended by media transport");
                self.teardown().await;
                self.state = ViewerState::Closed;
                let _ = self.notices.send(ViewerNotice::OwnerGone);
            }
            SessionEvent::StateChanged(state) => {
                debug!(?state, "media transport state changed");
            }
            SessionEvent::RemoteStream(stream) => {
                let _ = self.notices.send(ViewerNotice::StreamAvailable(stream));
            }
        }
    }

    /// Drive the machine from the signaling client until the relay goes
    /// away. Messages and session events are applied strictly one at a
    /// time, in arrival order.
    pub async fn run(mut self, mut signals: mpsc::UnboundedReceiver<SignalMessage>) {
        let Some(mut events) = self.events_rx.take() else {
            warn!("viewer machine already running");
            return;
        };
        self.join().await;
        loop {
            tokio::select! {
                msg = signals.recv() => match msg {
                    Some(msg) => self.handle_signal(msg).await,
                    // Relay gone; nothing further can arrive.
                    None => break,
                },
                Some((seq, event)) = events.recv() => {
                    self.handle_session_event(seq, event).await;
                }
            }
        }
        self.teardown().await;
    }

    pub fn state(&self) -> ViewerState {
        self.state
    }

    /// Relay-assigned participant id, once `hello` has arrived.
    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    async fn handle_owner_ready(&mut self) {
        // Re-entry guard: a repeated owner-ready always starts over from a
        // clean slate, releasing the old handle first.
        self.teardown().await;
        self.state = ViewerState::AwaitingOwner;

        self.session_seq += 1;
        let events = self.tagged_events(self.session_seq);
        let session = match self
            .engine
            .create_session(SessionDirection::RecvOnly, events)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(error = %e, "failed to create session");
                return;
            }
        };
        let offer = match session.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                warn!(error = %e, "failed to create offer");
                session.close().await;
                return;
            }
        };
        self.session = Some(session);
        self.state = ViewerState::OfferSent;
        self.send(SignalMessage::ViewerOffer {
            room_id: Some(self.room_id.clone()),
            from: None,
            sdp: offer,
        });
        self.state = ViewerState::AwaitingAnswer;
    }

    async fn handle_answer(&mut self, sdp: Value) {
        if self.remote_applied {
            debug!("duplicate answer dropped");
            return;
        }
        let Some(session) = &self.session else {
            debug!("answer dropped: no session");
            return;
        };
        if let Err(e) = session.apply_remote_description(sdp).await {
            warn!(error = %e, "failed to apply answer");
            return;
        }
        self.remote_applied = true;
        self.state = ViewerState::Connected;

        // Flush everything that arrived early, in original order.
        let pending: Vec<Value> = self.pending_candidates.drain(..).collect();
        for candidate in pending {
            if let Err(e) = session.apply_candidate(candidate).await {
                warn!(error = %e, "buffered candidate rejected");
            }
        }
    }

    async fn handle_candidate(&mut self, candidate: Value) {
        if !self.remote_applied {
            self.pending_candidates.push(candidate);
            return;
        }
        let Some(session) = &self.session else {
            debug!("candidate dropped: no session");
            return;
        };
        if let Err(e) = session.apply_candidate(candidate).await {
            warn!(error = %e, "candidate rejected");
        }
    }

    async fn handle_owner_left(&mut self) {
        info!(room = %self.room_id, "owner left");
        self.teardown().await;
        self.state = ViewerState::Idle;
        let _ = self.notices.send(ViewerNotice::OwnerGone);
    }

    /// Release the handle and buffered candidates before any replacement
    /// session can exist; the re-entry guard depends on this completing
    /// synchronously.
    async fn teardown(&mut self) {
        if let Some(session) = self.session.take() {
            session.close().await;
            // Invalidate events still in flight from the old session.
            self.session_seq += 1;
        }
        self.pending_candidates.clear();
        self.remote_applied = false;
    }

    fn tagged_events(&self, seq: u64) -> SessionEventSender<E::Stream> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agg = self.events_tx.clone();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if agg.send((seq, event)).is_err() {
                    break;
                }
            }
        });
        tx
    }

    fn send(&self, msg: SignalMessage) {
        if self.outbound.send(msg).is_err() {
            debug!("signaling channel closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{MockEngine, Op};
    use crate::engine::ConnectionState;
    use serde_json::json;

    struct Fixture {
        engine: Arc<MockEngine>,
        viewer: ViewerPeer<MockEngine>,
        outbound: mpsc::UnboundedReceiver<SignalMessage>,
        notices: mpsc::UnboundedReceiver<ViewerNotice<&'static str>>,
    }

    fn fixture() -> Fixture {
        let engine = Arc::new(MockEngine::default());
        let (out_tx, outbound) = mpsc::unbounded_channel();
        let (notice_tx, notices) = mpsc::unbounded_channel();
        let viewer = ViewerPeer::new(Arc::clone(&engine), "r1", out_tx, notice_tx);
        Fixture {
            engine,
            viewer,
            outbound,
            notices,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<SignalMessage>) -> Vec<SignalMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    #[tokio::test]
    async fn test_owner_ready_creates_recv_only_session_and_offers() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;

        assert_eq!(f.viewer.state(), ViewerState::AwaitingAnswer);
        assert_eq!(
            f.engine.ops(),
            vec![Op::Created(0, SessionDirection::RecvOnly), Op::Offer(0)]
        );

        let sent = drain(&mut f.outbound);
        assert!(matches!(
            sent[0],
            SignalMessage::JoinRoom { role: Role::Viewer, .. }
        ));
        match &sent[1] {
            SignalMessage::ViewerOffer { room_id, from, .. } => {
                assert_eq!(room_id.as_deref(), Some("r1"));
                assert_eq!(*from, None);
            }
            other => panic!("expected viewer-offer, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_candidates_buffered_until_answer_then_flushed_in_order() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;

        let candidate = |n: u32| SignalMessage::IceCandidate {
            room_id: None,
            to: None,
            from: None,
            candidate: json!({"candidate": n}),
        };
        f.viewer.handle_signal(candidate(1)).await;
        f.viewer.handle_signal(candidate(2)).await;

        // Nothing applied before the answer.
        assert!(!f.engine.ops().iter().any(|op| matches!(op, Op::Candidate(..))));

        f.viewer
            .handle_signal(SignalMessage::OwnerAnswer {
                room_id: None,
                to: None,
                sdp: json!({"type": "answer", "sdp": "v=0"}),
            })
            .await;
        assert_eq!(f.viewer.state(), ViewerState::Connected);

        // A late candidate goes straight through.
        f.viewer.handle_signal(candidate(3)).await;

        let applied: Vec<Value> = f
            .engine
            .ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Candidate(_, value) => Some(value),
                _ => None,
            })
            .collect();
        assert_eq!(
            applied,
            vec![
                json!({"candidate": 1}),
                json!({"candidate": 2}),
                json!({"candidate": 3})
            ]
        );

        // The answer was applied before any candidate.
        let ops = f.engine.ops();
        let answer_pos = ops
            .iter()
            .position(|op| matches!(op, Op::RemoteDescription(..)))
            .unwrap();
        let first_candidate_pos = ops
            .iter()
            .position(|op| matches!(op, Op::Candidate(..)))
            .unwrap();
        assert!(answer_pos < first_candidate_pos);
    }

    #[tokio::test]
    async fn test_repeated_owner_ready_resets_the_session() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;

        let ops = f.engine.ops();
        let closed_pos = ops.iter().position(|op| *op == Op::Closed(0)).unwrap();
        let second_created_pos = ops
            .iter()
            .position(|op| matches!(op, Op::Created(1, _)))
            .unwrap();
        // Old handle released before the replacement exists.
        assert!(closed_pos < second_created_pos);
        assert_eq!(f.viewer.state(), ViewerState::AwaitingAnswer);
    }

    #[tokio::test]
    async fn test_owner_left_tears_down_and_notifies() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;
        f.viewer
            .handle_signal(SignalMessage::IceCandidate {
                room_id: None,
                to: None,
                from: None,
                candidate: json!({"candidate": 1}),
            })
            .await;

        f.viewer.handle_signal(SignalMessage::OwnerLeft).await;

        assert_eq!(f.viewer.state(), ViewerState::Idle);
        assert!(f.engine.ops().contains(&Op::Closed(0)));
        assert!(matches!(
            f.notices.try_recv(),
            Ok(ViewerNotice::OwnerGone)
        ));

        // Buffered candidates died with the session: a late answer has
        // nothing to apply to.
        f.viewer
            .handle_signal(SignalMessage::OwnerAnswer {
                room_id: None,
                to: None,
                sdp: json!({"type": "answer"}),
            })
            .await;
        assert!(!f
            .engine
            .ops()
            .iter()
            .any(|op| matches!(op, Op::RemoteDescription(..) | Op::Candidate(..))));
    }

    #[tokio::test]
    async fn test_remote_stream_surfaces_to_notices() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;

        let seq = f.viewer.session_seq;
        f.viewer
            .handle_session_event(seq, SessionEvent::RemoteStream("stream-a"))
            .await;

        assert!(matches!(
            f.notices.try_recv(),
            Ok(ViewerNotice::StreamAvailable("stream-a"))
        ));
    }

    #[tokio::test]
    async fn test_local_candidate_sent_unaddressed() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;
        drain(&mut f.outbound);

        let seq = f.viewer.session_seq;
        f.viewer
            .handle_session_event(seq, SessionEvent::LocalCandidate(json!({"candidate": "x"})))
            .await;

        match drain(&mut f.outbound).as_slice() {
            [SignalMessage::IceCandidate { room_id, to, from, .. }] => {
                assert_eq!(room_id.as_deref(), Some("r1"));
                assert_eq!(*to, None);
                assert_eq!(*from, None);
            }
            other => panic!("expected one ice-candidate, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_terminal_transport_state_closes_the_session() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;

        let seq = f.viewer.session_seq;
        f.viewer
            .handle_session_event(seq, SessionEvent::StateChanged(ConnectionState::Failed))
            .await;

        assert_eq!(f.viewer.state(), ViewerState::Closed);
        assert!(f.engine.ops().contains(&Op::Closed(0)));
        assert!(matches!(f.notices.try_recv(), Ok(ViewerNotice::OwnerGone)));
    }

    #[tokio::test]
    async fn test_run_loop_applies_signals_in_arrival_order() {
        let engine = Arc::new(MockEngine::default());
        let (out_tx, mut outbound) = mpsc::unbounded_channel();
        let (notice_tx, mut notices) = mpsc::unbounded_channel();
        let viewer = ViewerPeer::new(Arc::clone(&engine), "r1", out_tx, notice_tx);

        let (sig_tx, sig_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(viewer.run(sig_rx));
        sig_tx.send(SignalMessage::OwnerReady).unwrap();
        sig_tx.send(SignalMessage::OwnerLeft).unwrap();
        // Relay gone: the loop drains what it has and exits.
        drop(sig_tx);
        handle.await.unwrap();

        let sent = drain(&mut outbound);
        assert!(matches!(sent[0], SignalMessage::JoinRoom { .. }));
        assert!(matches!(sent[1], SignalMessage::ViewerOffer { .. }));
        assert!(matches!(notices.try_recv(), Ok(ViewerNotice::OwnerGone)));
        assert!(engine.ops().contains(&Op::Closed(0)));
    }

    #[tokio::test]
    async fn test_stale_session_events_are_ignored() {
        let mut f = fixture();
        f.viewer.join().await;
        f.viewer.handle_signal(SignalMessage::OwnerReady).await;

        // An event from a previous generation must not touch the live
        // session.
        f.viewer
            .handle_session_event(0, SessionEvent::StateChanged(ConnectionState::Failed))
            .await;

        assert_eq!(f.viewer.state(), ViewerState::AwaitingAnswer);
        assert!(!f.engine.ops().contains(&Op::Closed(0)));
    }
}
