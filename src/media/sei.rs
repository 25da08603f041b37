//! Timestamp SEI construction
//!
//! Every video slice on the track is preceded by a user-data-unregistered
//! SEI NAL carrying the robot's wall clock in microseconds, so the viewer
//! can measure glass-to-glass latency per frame.
//!
//! ```text
//! | 0x06 | 0x05 | 0x08 | 8-byte BE microseconds (EP-encoded) | 0x80 |
//!   NAL    type   size         payload                         stop
//! ```

use bytes::Bytes;

use super::nal::NalUnitType;

/// SEI payload type for user data unregistered
const PAYLOAD_TYPE_USER_DATA: u8 = 0x05;

/// Payload is exactly the 8-byte timestamp
const PAYLOAD_SIZE: u8 = 0x08;

/// RBSP stop bit
const RBSP_STOP: u8 = 0x80;

/// Insert emulation-prevention bytes.
///
/// Whenever two consecutive zero bytes are followed by a byte `<= 0x03`,
/// a `0x03` is inserted before it so the payload can never alias a start
/// code.
pub fn add_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    let mut zeros = 0u8;

    for &b in data {
        if zeros == 2 && b <= 0x03 {
            out.push(0x03);
            zeros = 0;
        }

        out.push(b);

        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }

    out
}

/// Remove emulation-prevention bytes (the inverse of
/// [`add_emulation_prevention`])
pub fn strip_emulation_prevention(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut zeros = 0u8;

    for &b in data {
        if zeros == 2 && b == 0x03 {
            zeros = 0;
            continue;
        }

        out.push(b);

        if b == 0x00 {
            zeros += 1;
        } else {
            zeros = 0;
        }
    }

    out
}

/// Build a timestamp SEI NAL body (no start code).
pub fn timestamp_sei(micros: u64) -> Bytes {
    let mut payload = Vec::with_capacity(10);
    payload.push(PAYLOAD_TYPE_USER_DATA);
    payload.push(PAYLOAD_SIZE);
    payload.extend_from_slice(&micros.to_be_bytes());

    let rbsp = add_emulation_prevention(&payload);

    let mut sei = Vec::with_capacity(rbsp.len() + 2);
    sei.push(0x06); // SEI NAL header
    sei.extend_from_slice(&rbsp);
    sei.push(RBSP_STOP);

    Bytes::from(sei)
}

/// Parse the timestamp out of a SEI NAL body produced by
/// [`timestamp_sei`]. Returns `None` for anything else.
pub fn parse_timestamp_sei(body: &[u8]) -> Option<u64> {
    if NalUnitType::of(body) != Some(NalUnitType::Sei) {
        return None;
    }

    let rbsp = strip_emulation_prevention(&body[1..]);
    if rbsp.len() < 11 || rbsp[0] != PAYLOAD_TYPE_USER_DATA || rbsp[1] != PAYLOAD_SIZE {
        return None;
    }

    let mut ts = [0u8; 8];
    ts.copy_from_slice(&rbsp[2..10]);
    Some(u64::from_be_bytes(ts))
}
