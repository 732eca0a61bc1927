//! # SerialTransfer Frame Parser
//!
//! Byte-at-a-time receive state machine. The parser never blocks and never
//! fails hard: a malformed frame is reported once and the parser falls back
//! to scanning for the next start marker.

use super::crc::crc8;
use super::protocol::*;
use crate::error::FrameError;

/// Result of feeding one byte to the parser
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Progress {
    /// More bytes needed
    Pending,
    /// A validated packet is ready, see [`FrameParser::take_packet`]
    Complete,
    /// The frame in progress was discarded
    Rejected(FrameError),
}

/// Fine-grained receive stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Idle,
    AwaitingStart,
    PacketId,
    Overhead,
    PayloadLen,
    Payload,
    Crc,
    Stop,
    Dispatched,
}

/// Streaming frame parser
#[derive(Debug)]
pub struct FrameParser {
    stage: Stage,
    packet_id: u8,
    overhead: u8,
    expected_len: usize,
    buf: Vec<u8>,
    ready: Option<Packet>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameParser {
    pub fn new() -> Self {
        Self {
            stage: Stage::Idle,
            packet_id: 0,
            overhead: NO_OVERHEAD,
            expected_len: 0,
            buf: Vec::with_capacity(MAX_PACKET_SIZE),
            ready: None,
        }
    }

    /// Feed one byte into the parser
    ///
    /// # Arguments
    ///
    /// * `byte` - Next byte read from the serial link
    ///
    /// # Returns
    ///
    /// * `Progress` - Whether a packet completed or a frame was rejected
    pub fn push(&mut self, byte: u8) -> Progress {
        match self.stage {
            Stage::Idle | Stage::AwaitingStart | Stage::Dispatched => {
                // An untaken packet is dropped once new bytes arrive
                self.ready = None;
                self.stage = if byte == START_BYTE {
                    Stage::PacketId
                } else {
                    Stage::AwaitingStart
                };
                Progress::Pending
            }
            Stage::PacketId => {
                self.packet_id = byte;
                self.stage = Stage::Overhead;
                Progress::Pending
            }
            Stage::Overhead => {
                self.overhead = byte;
                self.stage = Stage::PayloadLen;
                Progress::Pending
            }
            Stage::PayloadLen => {
                if byte == 0 || byte as usize > MAX_PACKET_SIZE {
                    return self.reject(FrameError::PayloadLength(byte));
                }
                self.expected_len = byte as usize;
                self.buf.clear();
                self.stage = Stage::Payload;
                Progress::Pending
            }
            Stage::Payload => {
                self.buf.push(byte);
                if self.buf.len() == self.expected_len {
                    self.stage = Stage::Crc;
                }
                Progress::Pending
            }
            Stage::Crc => {
                let expected = crc8(&self.buf);
                if expected != byte {
                    return self.reject(FrameError::Crc {
                        expected,
                        received: byte,
                    });
                }
                self.stage = Stage::Stop;
                Progress::Pending
            }
            Stage::Stop => {
                if byte != STOP_BYTE {
                    return self.reject(FrameError::StopByte(byte));
                }
                if let Err(e) = unstuff_payload(&mut self.buf, self.overhead) {
                    return self.reject(e);
                }
                let payload = std::mem::take(&mut self.buf);
                self.ready = Some(Packet::new(self.packet_id, payload));
                self.stage = Stage::Dispatched;
                Progress::Complete
            }
        }
    }

    /// Take the validated packet, returning the parser to `Idle`
    pub fn take_packet(&mut self) -> Option<Packet> {
        let packet = self.ready.take();
        if packet.is_some() {
            self.stage = Stage::Idle;
            self.buf = Vec::with_capacity(MAX_PACKET_SIZE);
        }
        packet
    }

    /// Discard any partial frame
    pub fn reset(&mut self) {
        self.stage = Stage::Idle;
        self.buf.clear();
        self.ready = None;
    }

    /// True while a frame has started but not yet completed
    pub fn is_mid_frame(&self) -> bool {
        matches!(
            self.stage,
            Stage::PacketId
                | Stage::Overhead
                | Stage::PayloadLen
                | Stage::Payload
                | Stage::Crc
                | Stage::Stop
        )
    }

    /// Coarse link state
    pub fn state(&self) -> LinkState {
        match self.stage {
            Stage::Idle => LinkState::Idle,
            Stage::AwaitingStart => LinkState::AwaitingStart,
            Stage::PacketId | Stage::Overhead | Stage::PayloadLen | Stage::Payload => {
                LinkState::CollectingPayload
            }
            Stage::Crc | Stage::Stop => LinkState::Validating,
            Stage::Dispatched => LinkState::Dispatched,
        }
    }

    fn reject(&mut self, err: FrameError) -> Progress {
        self.reset();
        Progress::Rejected(err)
    }
}

/// Restore start markers replaced by the sender's byte stuffing
///
/// Walks the chain that begins at `overhead`; each visited byte holds the
/// distance to the next marker, 0 ends the chain.
///
/// # Errors
///
/// Returns `FrameError::Stuffing` if the chain points outside the payload
pub fn unstuff_payload(payload: &mut [u8], overhead: u8) -> Result<(), FrameError> {
    if overhead == NO_OVERHEAD {
        return Ok(());
    }

    let mut index = overhead as usize;
    loop {
        let delta = *payload.get(index).ok_or(FrameError::Stuffing(index))?;
        payload[index] = START_BYTE;
        if delta == 0 {
            return Ok(());
        }
        index += delta as usize;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transfer::encoder::encode_packet;
    use tokio_test::assert_ok;

    fn feed(parser: &mut FrameParser, bytes: &[u8]) -> Vec<Progress> {
        bytes
            .iter()
            .map(|&b| parser.push(b))
            .filter(|p| *p != Progress::Pending)
            .collect()
    }

    #[test]
    fn test_parse_valid_frame() {
        let payload = [0x00, 0x00, 0xAC, 0x41, 0x00, 0x00, 0x5C, 0x42];
        let frame = encode_packet(PERIODIC_REPORT_ID, &payload).unwrap();

        let mut parser = FrameParser::new();
        assert_eq!(feed(&mut parser, &frame), vec![Progress::Complete]);
        assert_eq!(parser.state(), LinkState::Dispatched);

        let packet = parser.take_packet().unwrap();
        assert_eq!(packet.id, PERIODIC_REPORT_ID);
        assert_eq!(packet.payload(), &payload);
        assert_eq!(parser.state(), LinkState::Idle);
    }

    #[test]
    fn test_parse_unstuffs_start_markers() {
        let payload = [START_BYTE, 0x01, START_BYTE, START_BYTE, 0x02];
        let frame = encode_packet(3, &payload).unwrap();

        let mut parser = FrameParser::new();
        assert_eq!(feed(&mut parser, &frame), vec![Progress::Complete]);
        let packet = parser.take_packet().unwrap();
        assert_eq!(packet.id, 3);
        assert_eq!(packet.payload(), &payload);
    }

    #[test]
    fn test_leading_garbage_is_skipped() {
        let mut bytes = vec![0x00, 0x13, 0x81];
        bytes.extend(encode_packet(0, &[0x10, 0x20]).unwrap());

        let mut parser = FrameParser::new();
        parser.push(0x00);
        assert_eq!(parser.state(), LinkState::AwaitingStart);
        assert_eq!(feed(&mut parser, &bytes[1..]), vec![Progress::Complete]);
    }

    #[test]
    fn test_crc_mismatch_discards_and_recovers() {
        let good = encode_packet(0, &[0x01, 0x02, 0x03, 0x04]).unwrap();
        let mut corrupted = good.clone();
        corrupted[5] ^= 0xFF;

        let mut stream = corrupted;
        stream.extend_from_slice(&good);

        let mut parser = FrameParser::new();
        let events = feed(&mut parser, &stream);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Progress::Rejected(FrameError::Crc { .. })));
        assert_eq!(events[1], Progress::Complete);
        assert_eq!(parser.take_packet().unwrap().payload(), &[0x01, 0x02, 0x03, 0x04]);
    }

    #[test]
    fn test_invalid_payload_length() {
        let mut parser = FrameParser::new();
        let events = feed(&mut parser, &[START_BYTE, 0x00, NO_OVERHEAD, 0x00]);
        assert_eq!(events, vec![Progress::Rejected(FrameError::PayloadLength(0))]);
        assert_eq!(parser.state(), LinkState::Idle);

        let events = feed(&mut parser, &[START_BYTE, 0x00, NO_OVERHEAD, 0xFF]);
        assert_eq!(events, vec![Progress::Rejected(FrameError::PayloadLength(0xFF))]);
    }

    #[test]
    fn test_bad_stop_byte() {
        let mut frame = encode_packet(0, &[0x42]).unwrap();
        let last = frame.len() - 1;
        frame[last] = 0x00;

        let mut parser = FrameParser::new();
        assert_eq!(
            feed(&mut parser, &frame),
            vec![Progress::Rejected(FrameError::StopByte(0x00))]
        );
        assert!(parser.take_packet().is_none());
    }

    #[test]
    fn test_state_progression() {
        let frame = encode_packet(0, &[0x42, 0x43]).unwrap();
        let mut parser = FrameParser::new();
        assert_eq!(parser.state(), LinkState::Idle);

        parser.push(frame[0]);
        assert_eq!(parser.state(), LinkState::CollectingPayload);
        assert!(parser.is_mid_frame());

        for &b in &frame[1..6] {
            parser.push(b);
        }
        assert_eq!(parser.state(), LinkState::Validating);

        parser.push(frame[6]);
        assert_eq!(parser.state(), LinkState::Validating);

        assert_eq!(parser.push(frame[7]), Progress::Complete);
        assert!(!parser.is_mid_frame());
    }

    #[test]
    fn test_reset_discards_partial_frame() {
        let frame = encode_packet(0, &[0x01, 0x02, 0x03]).unwrap();
        let mut parser = FrameParser::new();
        feed(&mut parser, &frame[..5]);
        assert!(parser.is_mid_frame());

        parser.reset();
        assert_eq!(parser.state(), LinkState::Idle);
        assert_eq!(feed(&mut parser, &frame), vec![Progress::Complete]);
    }

    #[test]
    fn test_unstuff_chain_out_of_bounds() {
        let mut payload = [0x05, 0x00];
        assert_eq!(unstuff_payload(&mut payload, 0), Err(FrameError::Stuffing(5)));

        let mut payload = [0x01];
        assert_eq!(unstuff_payload(&mut payload, 4), Err(FrameError::Stuffing(4)));
    }

    #[test]
    fn test_unstuff_without_overhead_is_identity() {
        let mut payload = [0x01, 0x02];
        assert_ok!(unstuff_payload(&mut payload, NO_OVERHEAD));
        assert_eq!(payload, [0x01, 0x02]);
    }
}
