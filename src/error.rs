//! # Error Types
//!
//! Custom error types for WASPI using `thiserror`.
//!
//! The serial path has its own small enums so that the receiver can hand the
//! orchestrator a discriminated result (`AcquireError`) instead of a generic
//! failure. Everything else funnels into [`WaspiError`].

use std::time::Duration;

use thiserror::Error;

/// Errors raised while framing bytes on the serial link
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Length byte was zero or above the maximum packet size
    #[error("invalid payload length {0}")]
    PayloadLength(u8),

    /// Checksum over the stuffed payload did not match
    #[error("CRC mismatch: expected 0x{expected:02X}, got 0x{received:02X}")]
    Crc { expected: u8, received: u8 },

    /// Byte after the CRC was not the stop marker
    #[error("invalid stop byte 0x{0:02X}")]
    StopByte(u8),

    /// Overhead byte or stuffing chain pointed outside the payload
    #[error("byte stuffing chain leaves payload at index {0}")]
    Stuffing(usize),

    /// Payload too large to encode
    #[error("payload of {0} bytes exceeds maximum packet size")]
    PayloadTooLarge(usize),
}

/// Errors raised by the packet transport
#[derive(Debug, Error)]
pub enum TransportError {
    /// Port could not be opened
    #[error("failed to open {port}: {reason}")]
    Open { port: String, reason: String },

    /// Operation attempted on a closed transport
    #[error("serial transport is not open")]
    NotOpen,

    /// Read from the port failed
    #[error("serial read failed: {0}")]
    Read(#[from] std::io::Error),

    /// Port reported end of stream
    #[error("serial port closed by peer")]
    Disconnected,
}

/// Errors raised while decoding a frame payload into sensor values
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Field would read past the end of the buffer
    #[error("field at offset {offset} needs {width} bytes, buffer has {len}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    /// Payload carries more bytes than the schema declares
    #[error("payload has {len} bytes, schema declares {expected}")]
    TrailingBytes { expected: usize, len: usize },

    /// Frame on the wire was rejected
    #[error("frame rejected: {0}")]
    Frame(#[from] FrameError),
}

/// Outcome of a failed acquisition window
#[derive(Debug, Error)]
pub enum AcquireError {
    /// No complete report within the window
    #[error("no report received within {0:?}")]
    Timeout(Duration),

    /// Serial link failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Report arrived but could not be decoded
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

/// Main error type for WASPI
#[derive(Debug, Error)]
pub enum WaspiError {
    /// Serial transport errors
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Report decode errors
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Acquisition window elapsed without a report
    #[error("acquisition timed out after {0:?}")]
    AcquisitionTimeout(Duration),

    /// Broker rejected or failed the publish
    #[error("publish failed: {0}")]
    Publish(String),

    /// Broker did not acknowledge in time
    #[error("publish timed out after {0:?}")]
    PublishTimeout(Duration),

    /// Advisory lock could not be acquired or observed
    #[error("lock contention: {0}")]
    LockContention(String),

    /// Secondary recording device errors
    #[error("recording failed: {0}")]
    Recording(String),

    /// Local store errors
    #[error("store error: {0}")]
    Store(String),

    /// Configuration validation errors
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration parse errors
    #[error("configuration parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<AcquireError> for WaspiError {
    fn from(err: AcquireError) -> Self {
        match err {
            AcquireError::Timeout(after) => WaspiError::AcquisitionTimeout(after),
            AcquireError::Transport(e) => WaspiError::Transport(e),
            AcquireError::Decode(e) => WaspiError::Decode(e),
        }
    }
}

/// Result type alias for WASPI
pub type Result<T> = std::result::Result<T, WaspiError>;
