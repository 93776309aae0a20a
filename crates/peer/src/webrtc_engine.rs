//! `webrtc`-crate implementation of the media-transport engine.
//!
//! One [`WebRtcSession`] wraps one `RTCPeerConnection`. Candidate
//! gathering, connection-state transitions, and inbound tracks are bridged
//! onto the session event channel; opaque description/candidate values
//! convert to the webrtc types via serde, so they interoperate with any
//! counterpart speaking the standard JSON shapes.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use crate::engine::{
    ConnectionState, MediaEngine, MediaSession, SessionDirection, SessionEvent, SessionEventSender,
};
use crate::{Error, Result};

/// ICE configuration for new sessions.
#[derive(Debug, Clone)]
pub struct RtcConfig {
    /// STUN/TURN server URLs handed to the ICE agent.
    pub ice_servers: Vec<String>,
}

impl Default for RtcConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

impl RtcConfig {
    pub fn validate(&self) -> Result<()> {
        if self.ice_servers.is_empty() {
            return Err(Error::Config(
                "at least one ICE server is required".to_string(),
            ));
        }
        for url in &self.ice_servers {
            if !url.starts_with("stun:") && !url.starts_with("turn:") {
                return Err(Error::Config(format!("unsupported ICE server url: {url}")));
            }
        }
        Ok(())
    }
}

/// Locally captured media: one track per kind, produced by the capture
/// facility.
#[derive(Clone)]
pub struct LocalMedia {
    pub tracks: Vec<Arc<dyn TrackLocal + Send + Sync>>,
}

pub struct WebRtcEngine {
    config: RtcConfig,
}

impl WebRtcEngine {
    pub fn new(config: RtcConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }
}

#[async_trait]
impl MediaEngine for WebRtcEngine {
    type Media = LocalMedia;
    type Stream = Arc<TrackRemote>;
    type Session = WebRtcSession;

    async fn create_session(
        &self,
        direction: SessionDirection,
        events: SessionEventSender<Self::Stream>,
    ) -> Result<WebRtcSession> {
        let mut media = webrtc::api::media_engine::MediaEngine::default();
        media
            .register_default_codecs()
            .map_err(|e| Error::Engine(format!("failed to register codecs: {e}")))?;
        let registry = register_default_interceptors(Registry::new(), &mut media)
            .map_err(|e| Error::Engine(format!("failed to register interceptors: {e}")))?;
        let api = APIBuilder::new()
            .with_media_engine(media)
            .with_interceptor_registry(registry)
            .build();

        let config = RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.config.ice_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        };
        let pc = Arc::new(
            api.new_peer_connection(config)
                .await
                .map_err(|e| Error::Engine(format!("failed to create peer connection: {e}")))?,
        );

        // A viewer session only ever receives; declare that up front so
        // the offer comes out recvonly, like a pure consumer should.
        if direction == SessionDirection::RecvOnly {
            for kind in [RTPCodecType::Audio, RTPCodecType::Video] {
                pc.add_transceiver_from_kind(
                    kind,
                    Some(RTCRtpTransceiverInit {
                        direction: RTCRtpTransceiverDirection::Recvonly,
                        send_encodings: vec![],
                    }),
                )
                .await
                .map_err(|e| Error::Engine(format!("failed to add transceiver: {e}")))?;
            }
        }

        let candidate_events = events.clone();
        pc.on_ice_candidate(Box::new(move |candidate| {
            let events = candidate_events.clone();
            Box::pin(async move {
                let Some(candidate) = candidate else {
                    debug!("ICE gathering complete");
                    return;
                };
                match candidate.to_json() {
                    Ok(init) => match serde_json::to_value(&init) {
                        Ok(value) => {
                            let _ = events.send(SessionEvent::LocalCandidate(value));
                        }
                        Err(e) => warn!(error = %e, "failed to serialize local candidate"),
                    },
                    Err(e) => warn!(error = %e, "failed to convert local candidate"),
                }
            })
        }));

        let state_events = events.clone();
        pc.on_peer_connection_state_change(Box::new(move |state| {
            let events = state_events.clone();
            Box::pin(async move {
                if let Some(state) = map_state(state) {
                    let _ = events.send(SessionEvent::StateChanged(state));
                }
            })
        }));

        let track_events = events;
        pc.on_track(Box::new(move |track, _receiver, _transceiver| {
            let events = track_events.clone();
            Box::pin(async move {
                debug!(kind = %track.kind(), "remote track added");
                let _ = events.send(SessionEvent::RemoteStream(track));
            })
        }));

        Ok(WebRtcSession { pc })
    }
}

/// One `RTCPeerConnection` behind the session trait.
pub struct WebRtcSession {
    pc: Arc<RTCPeerConnection>,
}

#[async_trait]
impl MediaSession for WebRtcSession {
    type Media = LocalMedia;

    async fn apply_remote_description(&self, sdp: Value) -> Result<()> {
        let description: RTCSessionDescription = serde_json::from_value(sdp)
            .map_err(|e| Error::InvalidPayload(format!("not a session description: {e}")))?;
        self.pc
            .set_remote_description(description)
            .await
            .map_err(|e| Error::Engine(format!("failed to set remote description: {e}")))
    }

    async fn create_offer(&self) -> Result<Value> {
        let offer = self
            .pc
            .create_offer(None)
            .await
            .map_err(|e| Error::Engine(format!("failed to create offer: {e}")))?;
        self.pc
            .set_local_description(offer.clone())
            .await
            .map_err(|e| Error::Engine(format!("failed to set local description: {e}")))?;
        Ok(serde_json::to_value(&offer)?)
    }

    async fn create_answer(&self) -> Result<Value> {
        let answer = self
            .pc
            .create_answer(None)
            .await
            .map_err(|e| Error::Engine(format!("failed to create answer: {e}")))?;
        self.pc
            .set_local_description(answer.clone())
            .await
            .map_err(|e| Error::Engine(format!("failed to set local description: {e}")))?;
        Ok(serde_json::to_value(&answer)?)
    }

    async fn apply_candidate(&self, candidate: Value) -> Result<()> {
        let init: RTCIceCandidateInit = serde_json::from_value(candidate)
            .map_err(|e| Error::InvalidPayload(format!("not an ICE candidate: {e}")))?;
        self.pc
            .add_ice_candidate(init)
            .await
            .map_err(|e| Error::Engine(format!("failed to add ICE candidate: {e}")))
    }

    async fn set_outgoing_media(&self, media: Option<&LocalMedia>) -> Result<()> {
        match media {
            Some(media) => {
                let senders = self.pc.get_senders().await;
                for track in &media.tracks {
                    let kind = track.kind();
                    let mut replaced = false;
                    for sender in &senders {
                        let current = sender.track().await;
                        if current.as_ref().map(|t| t.kind()) == Some(kind) {
                            sender
                                .replace_track(Some(Arc::clone(track)))
                                .await
                                .map_err(|e| {
                                    Error::Engine(format!("failed to replace track: {e}"))
                                })?;
                            replaced = true;
                            break;
                        }
                    }
                    if !replaced {
                        self.pc
                            .add_track(Arc::clone(track))
                            .await
                            .map_err(|e| Error::Engine(format!("failed to add track: {e}")))?;
                    }
                }
            }
            None => {
                for sender in self.pc.get_senders().await {
                    // A sender already torn down by the transport is fine
                    // to skip.
                    if let Err(e) = self.pc.remove_track(&sender).await {
                        debug!(error = %e, "remove_track on dead sender");
                    }
                }
            }
        }
        Ok(())
    }

    async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            warn!(error = %e, "error closing peer connection");
        }
    }
}

fn map_state(state: RTCPeerConnectionState) -> Option<ConnectionState> {
    match state {
        RTCPeerConnectionState::New => Some(ConnectionState::New),
        RTCPeerConnectionState::Connecting => Some(ConnectionState::Connecting),
        RTCPeerConnectionState::Connected => Some(ConnectionState::Connected),
        RTCPeerConnectionState::Disconnected => Some(ConnectionState::Disconnected),
        RTCPeerConnectionState::Failed => Some(ConnectionState::Failed),
        RTCPeerConnectionState::Closed => Some(ConnectionState::Closed),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_default_config_is_valid() {
        assert!(RtcConfig::default().validate().is_ok());
    }

    #[test]
    fn test_config_rejects_empty_and_unknown_servers() {
        let empty = RtcConfig { ice_servers: vec![] };
        assert!(empty.validate().is_err());

        let bogus = RtcConfig {
            ice_servers: vec!["http://example.com".to_string()],
        };
        assert!(bogus.validate().is_err());
    }

    #[test]
    fn test_terminal_state_mapping() {
        assert_eq!(
            map_state(RTCPeerConnectionState::Failed),
            Some(ConnectionState::Failed)
        );
        assert!(map_state(RTCPeerConnectionState::Failed).unwrap().is_terminal());
        assert!(!map_state(RTCPeerConnectionState::Connected)
            .unwrap()
            .is_terminal());
    }

    #[tokio::test]
    async fn test_recv_only_session_builds_and_offers() {
        // No network I/O: offer creation is local to the ICE agent.
        let engine = WebRtcEngine::new(RtcConfig::default()).unwrap();
        let (events, _events_rx) = mpsc::unbounded_channel();
        let session = engine
            .create_session(SessionDirection::RecvOnly, events)
            .await
            .unwrap();

        let offer = session.create_offer().await.unwrap();
        assert_eq!(offer["type"], "offer");
        assert!(offer["sdp"].as_str().unwrap().contains("recvonly"));

        session.close().await;
    }
}
