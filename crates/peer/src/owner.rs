//! Owner session state machine.
//!
//! The owner holds one session per connected viewer, keyed by the
//! viewer's relay-assigned id. Offers arrive through signaling, answers
//! go back addressed to the offering viewer, and locally captured media
//! is attached to every live session — swapped in place when the user
//! changes what they share, so no second offer/answer round trip happens.

use std::collections::HashMap;
use std::sync::Arc;

use roomcast_core::{Role, SignalMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine::{
    ConnectionState, MediaEngine, MediaSession, SessionDirection, SessionEvent, SessionEventSender,
};

/// Machine-level state; per-viewer sessions carry their own phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerState {
    /// Not joined to any room.
    Idle,
    /// Joined; nothing captured locally yet. Viewers can still connect
    /// and will receive media once capture starts.
    AwaitingLocalMedia,
    /// Capturing and attaching media to every session.
    Sharing,
}

/// Per-viewer session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerPhase {
    /// Answer produced and handed to signaling.
    ReadyToAnswer,
    /// Media transport reports the pairing is up.
    Connected,
}

/// Local user action delivered to the run loop.
#[derive(Debug)]
pub enum OwnerCommand<M> {
    /// Capture started or the shared source changed.
    ShareMedia(M),
    /// Capture stopped; sessions stay up without outgoing media.
    StopMedia,
    /// Tear down every session and exit.
    Shutdown,
}

struct ViewerLink<S> {
    session: S,
    phase: ViewerPhase,
    seq: u64,
}

pub struct OwnerPeer<E: MediaEngine> {
    engine: Arc<E>,
    room_id: String,
    participant_id: Option<String>,
    outbound: mpsc::UnboundedSender<SignalMessage>,
    events_tx: mpsc::UnboundedSender<(String, u64, SessionEvent<E::Stream>)>,
    events_rx: Option<mpsc::UnboundedReceiver<(String, u64, SessionEvent<E::Stream>)>>,
    state: OwnerState,
    media: Option<E::Media>,
    sessions: HashMap<String, ViewerLink<E::Session>>,
    next_seq: u64,
}

impl<E: MediaEngine> OwnerPeer<E> {
    pub fn new(
        engine: Arc<E>,
        room_id: impl Into<String>,
        outbound: mpsc::UnboundedSender<SignalMessage>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            engine,
            room_id: room_id.into(),
            participant_id: None,
            outbound,
            events_tx,
            events_rx: Some(events_rx),
            state: OwnerState::Idle,
            media: None,
            sessions: HashMap::new(),
            next_seq: 0,
        }
    }

    /// Claim the room's owner slot.
    pub fn join(&mut self) {
        self.send(SignalMessage::JoinRoom {
            room_id: self.room_id.clone(),
            role: Role::Owner,
        });
        if self.state == OwnerState::Idle {
            self.state = OwnerState::AwaitingLocalMedia;
        }
    }

    /// Route one inbound signaling message.
    pub async fn handle_signal(&mut self, msg: SignalMessage) {
        match msg {
            SignalMessage::Hello { id } => {
                debug!(participant = %id, "assigned participant id");
                self.participant_id = Some(id);
            }
            SignalMessage::ViewerOffer {
                from: Some(from),
                sdp,
                ..
            } => self.handle_offer(from, sdp).await,
            SignalMessage::IceCandidate {
                from: Some(from),
                candidate,
                ..
            } => self.handle_candidate(&from, candidate).await,
            other => debug!(kind = other.kind(), "ignoring signaling message"),
        }
    }

    /// Capture started or the shared source changed: swap outgoing tracks
    /// on every live session in place.
    pub async fn set_media(&mut self, media: E::Media) {
        self.media = Some(media);
        self.state = OwnerState::Sharing;
        for (viewer_id, link) in &self.sessions {
            if let Err(e) = link.session.set_outgoing_media(self.media.as_ref()).await {
                warn!(viewer = %viewer_id, error = %e, "failed to swap outgoing tracks");
            }
        }
        info!(sessions = self.sessions.len(), "sharing local media");
    }

    /// Capture stopped: remove outgoing tracks everywhere. Sessions stay
    /// connected with no outgoing media until capture resumes or the
    /// viewer disconnects.
    pub async fn clear_media(&mut self) {
        self.media = None;
        if self.state == OwnerState::Sharing {
            self.state = OwnerState::AwaitingLocalMedia;
        }
        for (viewer_id, link) in &self.sessions {
            if let Err(e) = link.session.set_outgoing_media(None).await {
                warn!(viewer = %viewer_id, error = %e, "failed to remove outgoing tracks");
            }
        }
    }

    /// Session event from the media layer for one viewer's session.
    pub async fn handle_session_event(
        &mut self,
        viewer_id: &str,
        seq: u64,
        event: SessionEvent<E::Stream>,
    ) {
        match self.sessions.get(viewer_id) {
            Some(link) if link.seq == seq => {}
            _ => {
                debug!(viewer = %viewer_id, "stale session event dropped");
                return;
            }
        }
        match event {
            SessionEvent::LocalCandidate(candidate) => {
                self.send(SignalMessage::IceCandidate {
                    room_id: Some(self.room_id.clone()),
                    to: Some(viewer_id.to_string()),
                    from: None,
                    candidate,
                });
            }
            SessionEvent::StateChanged(state) if state.is_terminal() => {
                if let Some(link) = self.sessions.remove(viewer_id) {
                    link.session.close().await;
                    info!(viewer = %viewer_id, ?state, "viewer session closed");
                }
            }
            SessionEvent::StateChanged(state) => {
                if state == ConnectionState::Connected {
                    if let Some(link) = self.sessions.get_mut(viewer_id) {
                        link.phase = ViewerPhase::Connected;
                    }
                }
                debug!(viewer = %viewer_id, ?state, "media transport state changed");
            }
            SessionEvent::RemoteStream(_) => {
                debug!(viewer = %viewer_id, "ignoring inbound stream on send-only session");
            }
        }
    }

    /// Drive the machine from the signaling client and local user actions
    /// until shutdown. Everything is applied one at a time, in arrival
    /// order.
    pub async fn run(
        mut self,
        mut signals: mpsc::UnboundedReceiver<SignalMessage>,
        mut commands: mpsc::UnboundedReceiver<OwnerCommand<E::Media>>,
    ) {
        let Some(mut events) = self.events_rx.take() else {
            warn!("owner machine already running");
            return;
        };
        self.join();
        loop {
            tokio::select! {
                msg = signals.recv() => match msg {
                    Some(msg) => self.handle_signal(msg).await,
                    // Relay gone; nothing further can arrive.
                    None => break,
                },
                Some((viewer_id, seq, event)) = events.recv() => {
                    self.handle_session_event(&viewer_id, seq, event).await;
                }
                cmd = commands.recv() => match cmd {
                    Some(OwnerCommand::ShareMedia(media)) => self.set_media(media).await,
                    Some(OwnerCommand::StopMedia) => self.clear_media().await,
                    Some(OwnerCommand::Shutdown) | None => break,
                },
            }
        }
        self.stop().await;
    }

    /// Tear down every session and release local media.
    pub async fn stop(&mut self) {
        for (viewer_id, link) in self.sessions.drain() {
            link.session.close().await;
            debug!(viewer = %viewer_id, "session closed on stop");
        }
        self.media = None;
        self.state = OwnerState::Idle;
    }

    pub fn state(&self) -> OwnerState {
        self.state
    }

    /// Relay-assigned participant id, once `hello` has arrived.
    pub fn participant_id(&self) -> Option<&str> {
        self.participant_id.as_deref()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn phase_of(&self, viewer_id: &str) -> Option<ViewerPhase> {
        self.sessions.get(viewer_id).map(|link| link.phase)
    }

    async fn handle_offer(&mut self, viewer_id: String, sdp: Value) {
        // The same viewer renegotiating from scratch: release the old
        // session before its replacement exists.
        if let Some(link) = self.sessions.remove(&viewer_id) {
            link.session.close().await;
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let events = self.tagged_events(&viewer_id, seq);
        let session = match self
            .engine
            .create_session(SessionDirection::SendOnly, events)
            .await
        {
            Ok(session) => session,
            Err(e) => {
                warn!(viewer = %viewer_id, error = %e, "failed to create session");
                return;
            }
        };

        // Tracks first, then the offer: the answer advertises whatever is
        // being captured right now.
        if let Some(media) = &self.media {
            if let Err(e) = session.set_outgoing_media(Some(media)).await {
                warn!(viewer = %viewer_id, error = %e, "failed to attach media");
            }
        }
        if let Err(e) = session.apply_remote_description(sdp).await {
            warn!(viewer = %viewer_id, error = %e, "offer rejected");
            session.close().await;
            return;
        }
        let answer = match session.create_answer().await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(viewer = %viewer_id, error = %e, "failed to create answer");
                session.close().await;
                return;
            }
        };

        self.send(SignalMessage::OwnerAnswer {
            room_id: Some(self.room_id.clone()),
            to: Some(viewer_id.clone()),
            sdp: answer,
        });
        info!(viewer = %viewer_id, "answered viewer offer");
        self.sessions.insert(
            viewer_id,
            ViewerLink {
                session,
                phase: ViewerPhase::ReadyToAnswer,
                seq,
            },
        );
    }

    /// No owner-side buffering: by the time an answer is out, the session
    /// exists, and candidates only arrive after that point.
    async fn handle_candidate(&mut self, viewer_id: &str, candidate: Value) {
        match self.sessions.get(viewer_id) {
            Some(link) => {
                if let Err(e) = link.session.apply_candidate(candidate).await {
                    warn!(viewer = %viewer_id, error = %e, "candidate rejected");
                }
            }
            None => debug!(viewer = %viewer_id, "candidate dropped: no session"),
        }
    }

    fn tagged_events(&self, viewer_id: &str, seq: u64) -> SessionEventSender<E::Stream> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let agg = self.events_tx.clone();
        let viewer_id = viewer_id.to_string();
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if agg.send((viewer_id.clone(), seq, event)).is_err() {
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
