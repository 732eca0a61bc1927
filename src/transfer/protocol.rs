//! # SerialTransfer Protocol Constants and Types
//!
//! Core protocol definitions shared by the encoder and the receive parser.
//!
//! Frame structure:
//!
//! ```text
//! [0x7E][packet id][overhead][len][payload (stuffed, len bytes)][crc8][0x81]
//! ```

/// Frame start marker (always 0x7E)
pub const START_BYTE: u8 = 0x7E;

/// Frame stop marker (always 0x81)
pub const STOP_BYTE: u8 = 0x81;

/// Maximum payload size in bytes
pub const MAX_PACKET_SIZE: usize = 0xFE;

/// Overhead byte value when the payload contains no start marker
pub const NO_OVERHEAD: u8 = 0xFF;

/// Bytes surrounding the payload: start + id + overhead + len + crc + stop
pub const FRAME_OVERHEAD_SIZE: usize = 6;

/// Packet id of the periodic sensor report
pub const PERIODIC_REPORT_ID: u8 = 0;

/// Coarse receive state of the link
///
/// `Idle` is both the initial state and the rest state after a frame has been
/// dispatched or the parser has been reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Nothing consumed since the last reset or dispatch
    Idle,
    /// Non-start bytes seen, still scanning for the start marker
    AwaitingStart,
    /// Reading packet id, overhead, length or payload bytes
    CollectingPayload,
    /// Reading CRC or stop marker
    Validating,
    /// Frame validated and waiting to be handed to its callback
    Dispatched,
}

/// A complete, validated packet with its payload already unstuffed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Packet id (callback slot)
    pub id: u8,

    /// Payload bytes
    pub payload: Vec<u8>,
}

impl Packet {
    /// Create a new packet
    pub fn new(id: u8, payload: Vec<u8>) -> Self {
        Self { id, payload }
    }

    /// Payload bytes
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Size of this packet once framed on the wire
    pub fn frame_len(&self) -> usize {
        self.payload.len() + FRAME_OVERHEAD_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_constants() {
        assert_eq!(START_BYTE, 0x7E);
        assert_eq!(STOP_BYTE, 0x81);
        assert_eq!(MAX_PACKET_SIZE, 254);
        assert_eq!(PERIODIC_REPORT_ID, 0);
    }

    #[test]
    fn test_packet_frame_len() {
        let packet = Packet::new(PERIODIC_REPORT_ID, vec![0u8; 8]);
        assert_eq!(packet.payload().len(), 8);
        assert_eq!(packet.frame_len(), 14);
    }
}
