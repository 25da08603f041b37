//! Peer session
//!
//! One session per remote peer identifier: the peer connection, its last
//! observed state, the sender binding the shared track, and a buffer of
//! locally gathered ICE candidates. Candidates are held until the
//! signaling side installs a publisher, which it only does once the
//! answer is on the wire, so a peer never sees a candidate before the
//! answer.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;

/// Simplified peer connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    New,
    Connecting,
    Connected,
    Disconnected,
    Failed,
    Closed,
}

impl PeerState {
    /// Terminal states end the session's claim on the producer
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PeerState::Disconnected | PeerState::Failed | PeerState::Closed
        )
    }
}

impl From<RTCPeerConnectionState> for PeerState {
    fn from(state: RTCPeerConnectionState) -> Self {
        match state {
            RTCPeerConnectionState::New => PeerState::New,
            RTCPeerConnectionState::Connecting => PeerState::Connecting,
            RTCPeerConnectionState::Connected => PeerState::Connected,
            RTCPeerConnectionState::Disconnected => PeerState::Disconnected,
            RTCPeerConnectionState::Failed => PeerState::Failed,
            RTCPeerConnectionState::Closed => PeerState::Closed,
            RTCPeerConnectionState::Unspecified => PeerState::New,
        }
    }
}

/// ICE candidate as exchanged over signaling
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IceCandidateWire {
    pub candidate: String,
    #[serde(rename = "sdpMid")]
    pub sdp_mid: Option<String>,
    #[serde(rename = "sdpMLineIndex")]
    pub sdp_mline_index: Option<u16>,
}

impl From<RTCIceCandidateInit> for IceCandidateWire {
    fn from(init: RTCIceCandidateInit) -> Self {
        Self {
            candidate: init.candidate,
            sdp_mid: init.sdp_mid,
            sdp_mline_index: init.sdp_mline_index,
        }
    }
}

impl From<IceCandidateWire> for RTCIceCandidateInit {
    fn from(wire: IceCandidateWire) -> Self {
        RTCIceCandidateInit {
            candidate: wire.candidate,
            sdp_mid: wire.sdp_mid,
            sdp_mline_index: wire.sdp_mline_index,
            username_fragment: None,
        }
    }
}

/// State for one remote peer
pub struct PeerSession {
    peer_id: String,
    /// Monotonic id distinguishing this session from a replaced one with
    /// the same peer identifier
    seq: u64,
    pc: Arc<RTCPeerConnection>,
    /// Sender binding the shared video track to this connection
    #[allow(dead_code)]
    sender: Arc<RTCRtpSender>,
    state: Mutex<PeerState>,
    /// Locally gathered candidates, buffered until a publisher drains them
    candidates: Mutex<Option<mpsc::UnboundedReceiver<IceCandidateWire>>>,
}

impl PeerSession {
    pub(crate) fn new(
        peer_id: String,
        seq: u64,
        pc: Arc<RTCPeerConnection>,
        sender: Arc<RTCRtpSender>,
        candidates: mpsc::UnboundedReceiver<IceCandidateWire>,
    ) -> Self {
        Self {
            peer_id,
            seq,
            pc,
            sender,
            state: Mutex::new(PeerState::New),
            candidates: Mutex::new(Some(candidates)),
        }
    }

    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub(crate) fn seq(&self) -> u64 {
        self.seq
    }

    pub fn state(&self) -> PeerState {
        *self.state.lock().unwrap()
    }

    pub(crate) fn set_state(&self, state: PeerState) {
        *self.state.lock().unwrap() = state;
    }

    /// Forward a remote ICE candidate to the connection
    pub async fn add_remote_candidate(&self, wire: IceCandidateWire) -> Result<(), webrtc::Error> {
        self.pc.add_ice_candidate(wire.into()).await
    }

    /// Hand out the buffered local-candidate stream; `None` after the
    /// first call
    pub(crate) fn take_candidates(&self) -> Option<mpsc::UnboundedReceiver<IceCandidateWire>> {
        self.candidates.lock().unwrap().take()
    }

    /// Close the underlying peer connection
    pub async fn close(&self) {
        if let Err(e) = self.pc.close().await {
            tracing::debug!(peer = %self.peer_id, error = %e, "Peer connection close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peer_state_terminal() {
        assert!(PeerState::Disconnected.is_terminal());
        assert!(PeerState::Failed.is_terminal());
        assert!(PeerState::Closed.is_terminal());
        assert!(!PeerState::Connected.is_terminal());
        assert!(!PeerState::New.is_terminal());
    }

    #[test]
    fn test_ice_wire_field_names() {
        let wire = IceCandidateWire {
            candidate: "candidate:1 1 UDP 2122260223 192.168.1.7 5000 typ host".to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
        };

        let json = serde_json::to_string(&wire).unwrap();
        assert!(json.contains("\"sdpMid\":\"0\""));
        assert!(json.contains("\"sdpMLineIndex\":0"));
        assert!(json.contains("\"candidate\""));
    }

    #[test]
    fn test_ice_wire_round_trip() {
        let json = r#"{"candidate":"candidate:1","sdpMid":"video","sdpMLineIndex":2}"#;
        let wire: IceCandidateWire = serde_json::from_str(json).unwrap();

        assert_eq!(wire.sdp_mid.as_deref(), Some("video"));
        assert_eq!(wire.sdp_mline_index, Some(2));

        let init: RTCIceCandidateInit = wire.clone().into();
        assert_eq!(init.candidate, "candidate:1");
        assert_eq!(IceCandidateWire::from(init), wire);
    }
}
