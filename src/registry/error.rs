//! Registry error types

/// Error type for peer registry operations
#[derive(Debug)]
pub enum RegistryError {
    /// WebRTC API construction failed
    Init(webrtc::Error),
    /// Applying the remote offer or producing the answer failed
    Negotiation(webrtc::Error),
    /// The shared track could not be attached to the peer connection
    TrackAttach(webrtc::Error),
    /// Forwarding a remote ICE candidate failed
    Candidate(webrtc::Error),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::Init(e) => write!(f, "WebRTC init failed: {}", e),
            RegistryError::Negotiation(e) => write!(f, "offer negotiation failed: {}", e),
            RegistryError::TrackAttach(e) => write!(f, "failed to attach video track: {}", e),
            RegistryError::Candidate(e) => write!(f, "failed to add ICE candidate: {}", e),
        }
    }
}

impl std::error::Error for RegistryError {}
