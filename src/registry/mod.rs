//! Peer registry
//!
//! Owns every active WebRTC session and gates the shared producer on
//! aggregate connectivity.
//!
//! ```text
//!                       Arc<PeerRegistry>
//!                  ┌───────────────────────────┐
//!                  │ sessions: HashMap<peerId, │
//!                  │   PeerSession {           │
//!                  │     RTCPeerConnection,    │
//!                  │     shared track sender,  │
//!                  │   }                       │
//!                  │ >        ConnectivityGate │
//!                  └────────────┬──────────────┘
//!                               │ running iff ≥ 1 Connected
//!                               ▼
//!                         VideoProducer ──► shared track ──► every sender
//! ```
//!
//! A repeated offer for a known peer identifier replaces the old session;
//! state callbacks from the replaced connection are told apart by a
//! per-session sequence number and ignored.

pub mod error;
pub mod gate;
pub mod session;

pub use error::RegistryError;
pub use gate::{ConnectivityGate, GateAction};
pub use session::{IceCandidateWire, PeerSession, PeerState};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{mpsc, RwLock};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::{APIBuilder, API};
use webrtc::ice_transport::ice_candidate::RTCIceCandidate;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecParameters, RTPCodecType};
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

use crate::producer::VideoProducer;
use crate::track::{h264_codec_capability, H264_PAYLOAD_TYPE};

/// Thread-safe map of peer sessions plus the producer gate
pub struct PeerRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    api: API,
    stun_servers: Vec<String>,
    track: Arc<TrackLocalStaticSample>,
    producer: VideoProducer,
    sessions: RwLock<HashMap<String, Arc<PeerSession>>>,
    gate: Mutex<ConnectivityGate>,
    next_seq: AtomicU64,
}

impl PeerRegistry {
    /// Build the registry and its WebRTC API with the H.264 codec of the
    /// shared track registered.
    pub fn new(
        track: Arc<TrackLocalStaticSample>,
        producer: VideoProducer,
        stun_servers: Vec<String>,
    ) -> Result<Self, RegistryError> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_codec(
                RTCRtpCodecParameters {
                    capability: h264_codec_capability(),
                    payload_type: H264_PAYLOAD_TYPE,
                    ..Default::default()
                },
                RTPCodecType::Video,
            )
            .map_err(RegistryError::Init)?;

        let mut interceptors = Registry::new();
        interceptors = register_default_interceptors(interceptors, &mut media_engine)
            .map_err(RegistryError::Init)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .build();

        Ok(Self {
            inner: Arc::new(RegistryInner {
                api,
                stun_servers,
                track,
                producer,
                sessions: RwLock::new(HashMap::new()),
                gate: Mutex::new(ConnectivityGate::new()),
                next_seq: AtomicU64::new(1),
            }),
        })
    }

    /// Handle an SDP offer from `peer_id`, returning the answer SDP.
    ///
    /// An existing session for the same identifier is closed and replaced.
    pub async fn accept_offer(
        &self,
        peer_id: &str,
        offer_sdp: &str,
    ) -> Result<String, RegistryError> {
        let replaced = self.inner.sessions.write().await.remove(peer_id);
        if let Some(old) = replaced {
            tracing::info!(peer = %peer_id, "Replacing existing session");
            old.close().await;

            // The old connection's late state callbacks are filtered by the
            // seq check, so the gate must forget the peer here; otherwise a
            // Connected entry would outlive its session.
            let action = self.inner.gate.lock().unwrap().on_removed(peer_id);
            self.inner.apply_gate_action(action).await;
        }

        let pc = Arc::new(
            self.inner
                .api
                .new_peer_connection(self.inner.rtc_config())
                .await
                .map_err(RegistryError::Negotiation)?,
        );

        let sender = match pc
            .add_track(Arc::clone(&self.inner.track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
        {
            Ok(sender) => sender,
            Err(e) => {
                let _ = pc.close().await;
                return Err(RegistryError::TrackAttach(e));
            }
        };

        // Drain sender RTCP so the interceptor chain keeps flowing.
        {
            let sender = Arc::clone(&sender);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 1500];
                while sender.read(&mut buf).await.is_ok() {}
            });
        }

        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        let candidate_rx = install_ice_callback(&pc, peer_id);
        self.install_state_callback(&pc, peer_id, seq);

        let answer = match negotiate(&pc, offer_sdp).await {
            Ok(answer) => answer,
            Err(e) => {
                let _ = pc.close().await;
                return Err(RegistryError::Negotiation(e));
            }
        };

        let session = Arc::new(PeerSession::new(
            peer_id.to_string(),
            seq,
            Arc::clone(&pc),
            sender,
            candidate_rx,
        ));
        self.inner
            .sessions
            .write()
            .await
            .insert(peer_id.to_string(), session);

        tracing::info!(peer = %peer_id, "Session established, answer ready");
        Ok(answer.sdp)
    }

    /// Forward a remote ICE candidate. Unknown peers are a warning, not an
    /// error: candidates racing ahead of the offer are the peer's problem.
    pub async fn add_remote_ice(
        &self,
        peer_id: &str,
        candidate: IceCandidateWire,
    ) -> Result<(), RegistryError> {
        let session = self.inner.sessions.read().await.get(peer_id).cloned();

        match session {
            Some(session) => session
                .add_remote_candidate(candidate)
                .await
                .map_err(RegistryError::Candidate),
            None => {
                tracing::warn!(peer = %peer_id, "ICE candidate for unknown peer dropped");
                Ok(())
            }
        }
    }

    /// Attach the per-peer publisher for locally gathered ICE candidates.
    ///
    /// Candidates gathered before this point were buffered and flush now,
    /// so nothing is published ahead of the answer.
    pub async fn install_ice_publisher<F>(&self, peer_id: &str, publish: F)
    where
        F: Fn(IceCandidateWire) + Send + Sync + 'static,
    {
        let session = self.inner.sessions.read().await.get(peer_id).cloned();
        let Some(session) = session else {
            tracing::warn!(peer = %peer_id, "No session to publish candidates for");
            return;
        };

        let Some(mut candidates) = session.take_candidates() else {
            tracing::warn!(peer = %peer_id, "Candidate publisher already installed");
            return;
        };

        let peer_id = peer_id.to_string();
        tokio::spawn(async move {
            while let Some(candidate) = candidates.recv().await {
                tracing::debug!(peer = %peer_id, "Publishing local ICE candidate");
                publish(candidate);
            }
        });
    }

    /// Close and remove a session. Idempotent.
    pub async fn disconnect(&self, peer_id: &str) {
        let session = self.inner.sessions.write().await.remove(peer_id);
        match session {
            Some(session) => {
                session.close().await;
                tracing::info!(peer = %peer_id, "Peer disconnected");
            }
            None => {
                tracing::debug!(peer = %peer_id, "Disconnect for unknown peer");
            }
        }

        let action = self.inner.gate.lock().unwrap().on_removed(peer_id);
        self.inner.apply_gate_action(action).await;
    }

    /// Close every session and stop the producer
    pub async fn shutdown(&self) {
        let sessions: Vec<_> = self.inner.sessions.write().await.drain().collect();
        for (peer_id, session) in sessions {
            tracing::info!(peer = %peer_id, "Closing session");
            session.close().await;
        }

        self.inner.gate.lock().unwrap().clear();
        self.inner.producer.stop();
    }

    pub async fn session_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    pub async fn session_state(&self, peer_id: &str) -> Option<PeerState> {
        self.inner
            .sessions
            .read()
            .await
            .get(peer_id)
            .map(|s| s.state())
    }

    fn install_state_callback(&self, pc: &RTCPeerConnection, peer_id: &str, seq: u64) {
        let inner = Arc::clone(&self.inner);
        let peer_id = peer_id.to_string();

        pc.on_peer_connection_state_change(Box::new(move |state: RTCPeerConnectionState| {
            let inner = Arc::clone(&inner);
            let peer_id = peer_id.clone();
            Box::pin(async move {
                inner.on_state_change(&peer_id, seq, state.into()).await;
            })
        }));
    }
}

impl RegistryInner {
    fn rtc_config(&self) -> RTCConfiguration {
        if self.stun_servers.is_empty() {
            return RTCConfiguration::default();
        }
        RTCConfiguration {
            ice_servers: vec![RTCIceServer {
                urls: self.stun_servers.clone(),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    async fn on_state_change(&self, peer_id: &str, seq: u64, state: PeerState) {
        let current = self.sessions.read().await.get(peer_id).cloned();

        match current {
            Some(session) if session.seq() == seq => {
                session.set_state(state);
                tracing::info!(peer = %peer_id, state = ?state, "Peer connection state changed");

                let action = self.gate.lock().unwrap().on_state(peer_id, state);
                self.apply_gate_action(action).await;
            }
            _ => {
                tracing::debug!(peer = %peer_id, "State change from replaced session ignored");
            }
        }
    }

    async fn apply_gate_action(&self, action: Option<GateAction>) {
        match action {
            Some(GateAction::StartProducer) => self.producer.start().await,
            Some(GateAction::RearmProducer) => self.producer.rearm().await,
            Some(GateAction::StopProducer) => self.producer.stop(),
            None => {}
        }
    }
}

/// Buffer locally gathered ICE candidates into a channel the session owns
fn install_ice_callback(
    pc: &RTCPeerConnection,
    peer_id: &str,
) -> mpsc::UnboundedReceiver<IceCandidateWire> {
    let (tx, rx) = mpsc::unbounded_channel();
    let peer_id = peer_id.to_string();

    pc.on_ice_candidate(Box::new(move |candidate: Option<RTCIceCandidate>| {
        let tx = tx.clone();
        let peer_id = peer_id.clone();
        Box::pin(async move {
            let Some(candidate) = candidate else { return };
            match candidate.to_json() {
                Ok(init) => {
                    let _ = tx.send(IceCandidateWire::from(init));
                }
                Err(e) => {
                    tracing::warn!(peer = %peer_id, error = %e, "ICE candidate serialization failed");
                }
            }
        })
    }));

    rx
}

/// Apply the remote offer and produce the local answer
async fn negotiate(
    pc: &RTCPeerConnection,
    offer_sdp: &str,
) -> Result<RTCSessionDescription, webrtc::Error> {
    let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
    pc.set_remote_description(offer).await?;

    let answer = pc.create_answer(None).await?;
    pc.set_local_description(answer.clone()).await?;

    Ok(answer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{new_video_track, TrackWriter};

    /// A remote peer double: a second in-process connection that wants to
    /// receive video, used to mint real offer SDP.
    async fn browser_offer() -> (Arc<RTCPeerConnection>, String) {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let api = APIBuilder::new().with_media_engine(media_engine).build();

        let pc = Arc::new(
            api.new_peer_connection(RTCConfiguration::default())
                .await
                .unwrap(),
        );
        pc.add_transceiver_from_kind(RTPCodecType::Video, None)
            .await
            .unwrap();

        let offer = pc.create_offer(None).await.unwrap();
        let sdp = offer.sdp.clone();
        pc.set_local_description(offer).await.unwrap();

        (pc, sdp)
    }

    fn test_registry() -> PeerRegistry {
        let (writer, _rx) = TrackWriter::channel();
        let producer = VideoProducer::new(writer, 30);
        PeerRegistry::new(new_video_track(), producer, vec![]).unwrap()
    }

    #[tokio::test]
    async fn test_accept_offer_returns_answer() {
        let registry = test_registry();
        let (_pc, offer) = browser_offer().await;

        let answer = registry.accept_offer("p1", &offer).await.unwrap();

        assert!(answer.starts_with("v=0"));
        assert_eq!(registry.session_count().await, 1);
        assert!(registry.session_state("p1").await.is_some());
    }

    #[tokio::test]
    async fn test_repeat_offer_replaces_session() {
        let registry = test_registry();

        let (_pc1, offer1) = browser_offer().await;
        registry.accept_offer("p1", &offer1).await.unwrap();

        let (_pc2, offer2) = browser_offer().await;
        registry.accept_offer("p1", &offer2).await.unwrap();

        // Old session closed, new one in its place: size unchanged.
        assert_eq!(registry.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_repeat_offer_clears_gate_entry() {
        let registry = test_registry();

        let (_pc1, offer1) = browser_offer().await;
        registry.accept_offer("p1", &offer1).await.unwrap();
        registry
            .inner
            .gate
            .lock()
            .unwrap()
            .on_state("p1", PeerState::Connected);

        let (_pc2, offer2) = browser_offer().await;
        registry.accept_offer("p1", &offer2).await.unwrap();

        // The replaced session's Connected claim must not survive it; the
        // new session starts over from its own state callbacks.
        assert_eq!(registry.inner.gate.lock().unwrap().connected_count(), 0);
    }

    #[tokio::test]
    async fn test_failed_renegotiation_still_clears_gate_entry() {
        let registry = test_registry();

        let (_pc1, offer1) = browser_offer().await;
        registry.accept_offer("p1", &offer1).await.unwrap();
        registry
            .inner
            .gate
            .lock()
            .unwrap()
            .on_state("p1", PeerState::Connected);

        // The replacement offer is garbage: no new session is inserted,
        // and the gate must not keep reporting the dead one as Connected.
        let result = registry.accept_offer("p1", "not sdp").await;
        assert!(result.is_err());

        assert_eq!(registry.session_count().await, 0);
        assert_eq!(registry.inner.gate.lock().unwrap().connected_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_offer_rejected() {
        let registry = test_registry();

        let result = registry.accept_offer("p1", "this is not sdp").await;

        assert!(matches!(result, Err(RegistryError::Negotiation(_))));
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_peer_ice_is_noop() {
        let registry = test_registry();
        let candidate = IceCandidateWire {
            candidate: "candidate:1 1 UDP 1 10.0.0.1 4000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        registry.add_remote_ice("nobody", candidate).await.unwrap();
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let registry = test_registry();
        let (_pc, offer) = browser_offer().await;
        registry.accept_offer("p1", &offer).await.unwrap();

        registry.disconnect("p1").await;
        registry.disconnect("p1").await;

        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_shutdown_clears_all_sessions() {
        let registry = test_registry();

        for peer in ["p1", "p2", "p3"] {
            let (_pc, offer) = browser_offer().await;
            registry.accept_offer(peer, &offer).await.unwrap();
        }
        assert_eq!(registry.session_count().await, 3);

        registry.shutdown().await;
        assert_eq!(registry.session_count().await, 0);
    }

    #[tokio::test]
    async fn test_candidate_publisher_single_install() {
        let registry = test_registry();
        let (_pc, offer) = browser_offer().await;
        registry.accept_offer("p1", &offer).await.unwrap();

        // First install takes the buffer, the second finds it gone.
        registry.install_ice_publisher("p1", |_| {}).await;
        let session = registry.inner.sessions.read().await.get("p1").cloned().unwrap();
        assert!(session.take_candidates().is_none());
    }
}
