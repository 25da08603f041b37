//! MQTT signaling
//!
//! The broker is the only signaling path between remote peers and the
//! robot. Inbound topics carry offers, remote ICE candidates, hangups and
//! camera switches; outbound topics carry answers, local ICE candidates
//! and the final disconnect announcement.
//!
//! ```text
//!   broker ──► SignalingClient (event loop) ──► SignalingBridge
//!                                                 │        │
//!                                          PeerRegistry  VideoProducer
//!                                                 │
//!   broker ◄── Publisher (answer / candidates) ◄──┘
//! ```

pub mod bridge;
pub mod client;
pub mod topics;

pub use bridge::{Publisher, SignalingBridge};
pub use client::SignalingClient;
pub use topics::{Signal, TopicSchema};
