//! H.264 bitstream handling
//!
//! This module provides:
//! - NAL unit splitting for both Annex-B and length-prefixed framing
//! - An incremental splitter for subprocess byte streams
//! - Annex-B reassembly for the outgoing track
//! - Timestamp SEI construction with emulation prevention

pub mod nal;
pub mod sei;

pub use nal::{split_nal_units, to_annex_b, Framing, NalSplitter, NalUnitType, START_CODE};
pub use sei::{parse_timestamp_sei, timestamp_sei};
