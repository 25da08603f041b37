//! # rmcs-stream
//!
//! Robot-side video streaming backend: publishes one live H.264 feed to
//! any number of browser or mobile peers over WebRTC, with a shared MQTT
//! broker as the signaling channel.
//!
//! ```text
//!   MQTT broker ◄──────────────► SignalingClient / SignalingBridge
//!                                      │ offers, ICE, hangups, camera
//!                                      ▼
//!                                PeerRegistry ── sessions (1 per peer)
//!                                      │ running iff ≥ 1 Connected
//!                                      ▼
//!   camera ─► VideoSource ─► VideoProducer ─► shared H.264 track ─► peers
//! ```
//!
//! The crate is embedded in a host process through the C façade in
//! [`ffi`] (`Init` / `SwitchCamera` / `Stop` / `GetStatus` /
//! `SetLogFile`) or driven natively through [`StreamService`].
//!
//! ## Media path
//!
//! One of up to eight sources is active at a time: a directory of
//! pre-encoded `.h264` files, a live capture device, or a raw-image
//! subscription re-encoded on the fly. The producer paces one slice per
//! tick at the configured frame rate, injects a wall-clock SEI timestamp
//! in front of every slice, and guarantees SPS/PPS precede every IDR on
//! the wire.

pub mod config;
pub mod error;
pub mod ffi;
pub mod logging;
pub mod media;
pub mod producer;
pub mod registry;
pub mod service;
pub mod signaling;
pub mod source;
pub mod stats;
pub mod track;

pub use config::StreamConfig;
pub use error::{Error, Result};
pub use producer::{ProducerState, VideoProducer};
pub use registry::PeerRegistry;
pub use service::StreamService;
pub use source::SourceSpec;
