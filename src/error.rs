//! Crate error types
//!
//! Each subsystem defines a focused error enum; `Error` aggregates them for
//! paths that cross subsystem boundaries (service wiring, the C façade).

use std::fmt;
use std::io;

use crate::registry::RegistryError;

/// Convenience result alias used throughout the crate
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type
#[derive(Debug)]
pub enum Error {
    /// I/O failure outside any specific subsystem
    Io(io::Error),
    /// Video source adapter failure
    Source(SourceError),
    /// Peer registry / session failure
    Registry(RegistryError),
    /// Signaling (MQTT) failure
    Signaling(SignalingError),
    /// WebRTC stack failure
    WebRtc(webrtc::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::Source(e) => write!(f, "source error: {}", e),
            Error::Registry(e) => write!(f, "registry error: {}", e),
            Error::Signaling(e) => write!(f, "signaling error: {}", e),
            Error::WebRtc(e) => write!(f, "WebRTC error: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            Error::Source(e) => Some(e),
            Error::Registry(e) => Some(e),
            Error::Signaling(e) => Some(e),
            Error::WebRtc(e) => Some(e),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<SourceError> for Error {
    fn from(e: SourceError) -> Self {
        Error::Source(e)
    }
}

impl From<RegistryError> for Error {
    fn from(e: RegistryError) -> Self {
        Error::Registry(e)
    }
}

impl From<SignalingError> for Error {
    fn from(e: SignalingError) -> Self {
        Error::Signaling(e)
    }
}

impl From<webrtc::Error> for Error {
    fn from(e: webrtc::Error) -> Self {
        Error::WebRtc(e)
    }
}

/// Video source adapter errors
#[derive(Debug)]
pub enum SourceError {
    /// No `*.h264` files were found in the configured directory
    NoFiles(std::path::PathBuf),
    /// Camera index outside the configured table
    UnknownCamera(i32),
    /// Encoder subprocess could not be spawned
    EncoderSpawn(io::Error),
    /// Encoder subprocess exited or its output pipe closed
    EncoderExited,
    /// Subscription transport failed
    Subscribe(String),
    /// Reading source data failed
    Read(io::Error),
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceError::NoFiles(dir) => {
                write!(f, "no .h264 files found in {}", dir.display())
            }
            SourceError::UnknownCamera(n) => write!(f, "unknown camera index {}", n),
            SourceError::EncoderSpawn(e) => write!(f, "failed to spawn encoder: {}", e),
            SourceError::EncoderExited => write!(f, "encoder process exited"),
            SourceError::Subscribe(msg) => write!(f, "subscription failed: {}", msg),
            SourceError::Read(e) => write!(f, "source read failed: {}", e),
        }
    }
}

impl std::error::Error for SourceError {}

/// Signaling channel errors
#[derive(Debug)]
pub enum SignalingError {
    /// Initial broker connection did not complete in time
    ConnectTimeout,
    /// The MQTT client rejected a request
    Client(rumqttc::ClientError),
}

impl fmt::Display for SignalingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalingError::ConnectTimeout => write!(f, "broker connection timed out"),
            SignalingError::Client(e) => write!(f, "MQTT client error: {}", e),
        }
    }
}

impl std::error::Error for SignalingError {}

impl From<rumqttc::ClientError> for SignalingError {
    fn from(e: rumqttc::ClientError) -> Self {
        SignalingError::Client(e)
    }
}
