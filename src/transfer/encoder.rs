//! # SerialTransfer Packet Encoder
//!
//! Builds complete frames from a packet id and a raw payload.

use super::crc::crc8;
use super::protocol::*;
use crate::error::FrameError;

/// Encode a payload into a complete frame
///
/// # Arguments
///
/// * `id` - Packet id (callback slot on the receiving side)
/// * `payload` - Raw payload bytes (1 to 254 bytes)
///
/// # Returns
///
/// * `Result<Vec<u8>, FrameError>` - Complete frame, or error if the payload size is invalid
///
/// # Examples
///
/// ```
/// use waspi::transfer::encoder::encode_packet;
/// use waspi::transfer::protocol::{START_BYTE, STOP_BYTE};
///
/// let frame = encode_packet(0, &21.5f32.to_le_bytes()).unwrap();
/// assert_eq!(frame.len(), 10);
/// assert_eq!(frame[0], START_BYTE);
/// assert_eq!(frame[9], STOP_BYTE);
/// ```
pub fn encode_packet(id: u8, payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    if payload.is_empty() {
        return Err(FrameError::PayloadLength(0));
    }
    if payload.len() > MAX_PACKET_SIZE {
        return Err(FrameError::PayloadTooLarge(payload.len()));
    }

    let overhead = overhead_byte(payload);
    let stuffed = stuff_payload(payload);
    let crc = crc8(&stuffed);

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD_SIZE);
    frame.push(START_BYTE);
    frame.push(id);
    frame.push(overhead);
    frame.push(payload.len() as u8);
    frame.extend_from_slice(&stuffed);
    frame.push(crc);
    frame.push(STOP_BYTE);

    Ok(frame)
}

/// Index of the first start marker in the payload, or [`NO_OVERHEAD`]
pub fn overhead_byte(payload: &[u8]) -> u8 {
    payload
        .iter()
        .position(|&b| b == START_BYTE)
        .map(|i| i as u8)
        .unwrap_or(NO_OVERHEAD)
}

/// Replace every start marker with the distance to the next one
///
/// The last marker becomes 0, which terminates the chain on the receiving side.
///
/// # Algorithm
///
/// ```text
/// payload : 01 7E 02 7E 03
/// stuffed : 01 02 02 00 03      overhead = 1
/// ```
pub fn stuff_payload(payload: &[u8]) -> Vec<u8> {
    let mut stuffed = payload.to_vec();
    let mut next_marker: Option<usize> = None;

    for i in (0..stuffed.len()).rev() {
        if stuffed[i] == START_BYTE {
            stuffed[i] = next_marker.map(|next| (next - i) as u8).unwrap_or(0);
            next_marker = Some(i);
        }
    }

    stuffed
}
