//! # Serial Communication Module
//!
//! Packet transport between the host and the sensor microcontroller.
//!
//! This module handles:
//! - Opening and closing the serial port (with optional auto-detection)
//! - Reading available bytes without blocking the rest of the process
//! - Driving the SerialTransfer receive parser
//! - Dispatching validated packets to callbacks indexed by packet id
//! - Discarding frames that stall mid-way

pub mod port_trait;

use std::time::Duration;

use bytes::{Buf, BytesMut};
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

use crate::error::{FrameError, TransportError};
use crate::transfer::parser::{FrameParser, Progress};
use crate::transfer::protocol::{LinkState, Packet, MAX_PACKET_SIZE};
use port_trait::{PortConnector, SerialPortIO, TokioSerialConnector};

/// Port name that triggers auto-detection
pub const AUTO_DETECT_PORT: &str = "auto";

/// Device paths tried by auto-detection (in order of preference)
pub const DEFAULT_DEVICE_PATHS: &[&str] = &[
    "/dev/ttyACM0", // Native USB boards (most common for Arduino)
    "/dev/ttyUSB0", // USB-to-serial adapters
];

/// Default wait for bytes in a single tick (SerialTransfer library default)
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(50);

/// Default silence after which a partial frame is discarded
pub const DEFAULT_FRAME_TIMEOUT: Duration = Duration::from_millis(500);

/// Bytes requested from the port per read
const READ_CHUNK_SIZE: usize = MAX_PACKET_SIZE + 6;

/// Handler invoked with a validated packet
pub type Callback = Box<dyn FnMut(Packet) + Send>;

/// Result of one [`Transport::tick`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickStatus {
    /// Nothing arrived within the read timeout
    NoData,
    /// Bytes consumed, frame still incomplete
    Continue,
    /// A packet with this id was dispatched
    NewData(u8),
    /// A frame was discarded, the parser is scanning for the next start marker
    Rejected(FrameError),
    /// A partial frame went silent and was discarded
    StaleFrame,
}

/// SerialTransfer packet transport
///
/// Owns the port handle, the receive parser and the callback table. One
/// instance is owned by exactly one receiver; nothing here is global.
pub struct Transport {
    connector: Box<dyn PortConnector>,
    port: Option<Box<dyn SerialPortIO>>,
    device_path: Option<String>,
    parser: FrameParser,
    pending: BytesMut,
    callbacks: Vec<Callback>,
    read_timeout: Duration,
    frame_timeout: Duration,
    last_byte_at: Option<Instant>,
}

impl std::fmt::Debug for Transport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transport")
            .field("device_path", &self.device_path)
            .field("state", &self.state())
            .field("callbacks", &self.callbacks.len())
            .finish_non_exhaustive()
    }
}

impl Transport {
    /// Create a closed transport
    ///
    /// # Arguments
    ///
    /// * `connector` - Opens the underlying port on [`Transport::open`]
    /// * `read_timeout` - Maximum wait for bytes in a single tick
    /// * `frame_timeout` - Silence after which a partial frame is dropped
    pub fn new(
        connector: Box<dyn PortConnector>,
        read_timeout: Duration,
        frame_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            port: None,
            device_path: None,
            parser: FrameParser::new(),
            pending: BytesMut::with_capacity(READ_CHUNK_SIZE),
            callbacks: Vec::new(),
            read_timeout,
            frame_timeout,
            last_byte_at: None,
        }
    }

    /// Create a closed transport backed by `tokio-serial`
    pub fn with_tokio_serial(read_timeout: Duration, frame_timeout: Duration) -> Self {
        Self::new(Box::new(TokioSerialConnector), read_timeout, frame_timeout)
    }

    /// Open the serial port if it is not already open
    ///
    /// Passing [`AUTO_DETECT_PORT`] tries [`DEFAULT_DEVICE_PATHS`] in order.
    ///
    /// # Returns
    ///
    /// * `bool` - `true` if the port is open after the call, `false` on OS-level failure
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use std::time::Duration;
    /// use waspi::serial::Transport;
    ///
    /// # async fn run() {
    /// let mut transport = Transport::with_tokio_serial(
    ///     Duration::from_millis(50),
    ///     Duration::from_millis(500),
    /// );
    /// if !transport.open("/dev/ttyACM0", 115_200) {
    ///     eprintln!("microcontroller not connected");
    /// }
    /// # }
    /// ```
    pub fn open(&mut self, port: &str, baud_rate: u32) -> bool {
        if self.port.is_some() {
            return true;
        }

        let candidates: Vec<&str> = if port == AUTO_DETECT_PORT {
            DEFAULT_DEVICE_PATHS.to_vec()
        } else {
            vec![port]
        };

        for path in candidates {
            debug!("Trying to open serial port: {}", path);

            match self.connector.connect(path, baud_rate) {
                Ok(handle) => {
                    info!("Opened serial port {} at {} baud", path, baud_rate);
                    self.port = Some(handle);
                    self.device_path = Some(path.to_string());
                    self.parser.reset();
                    self.pending.clear();
                    self.last_byte_at = None;
                    return true;
                }
                Err(e) => {
                    warn!("Failed to open {}: {}", path, e);
                }
            }
        }

        false
    }

    /// Release the port handle; safe to call when already closed
    pub fn close(&mut self) {
        if self.port.take().is_some() {
            info!(
                "Closed serial port {}",
                self.device_path.as_deref().unwrap_or("<unknown>")
            );
        }
        self.device_path = None;
        self.parser.reset();
        self.pending.clear();
        self.last_byte_at = None;
    }

    /// Whether a port handle is currently held
    pub fn is_open(&self) -> bool {
        self.port.is_some()
    }

    /// Path of the open port, if any
    pub fn device_path(&self) -> Option<&str> {
        self.device_path.as_deref()
    }

    /// Current receive state
    pub fn state(&self) -> LinkState {
        self.parser.state()
    }

    /// Register packet handlers; the handler at index `n` receives packets with id `n`
    pub fn set_callbacks(&mut self, callbacks: Vec<Callback>) {
        self.callbacks = callbacks;
    }

    /// Drop all registered handlers
    pub fn clear_callbacks(&mut self) {
        self.callbacks.clear();
    }

    /// Drive the receive state machine by one step
    ///
    /// Consumes buffered bytes, or waits up to the read timeout for new ones,
    /// until a packet is dispatched, a frame is rejected, or the bytes run out.
    ///
    /// # Errors
    ///
    /// Returns error if the transport is closed or the port read fails.
    /// Frame-level problems are not errors; they show up as
    /// [`TickStatus::Rejected`] and the parser recovers on its own.
    pub async fn tick(&mut self) -> Result<TickStatus, TransportError> {
        if self.pending.is_empty() {
            let port = self.port.as_mut().ok_or(TransportError::NotOpen)?;
            let mut buf = [0u8; READ_CHUNK_SIZE];

            match timeout(self.read_timeout, port.read(&mut buf)).await {
                Err(_) => return Ok(self.expire_stale_frame()),
                Ok(Ok(0)) => return Err(TransportError::Disconnected),
                Ok(Ok(n)) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    self.last_byte_at = Some(Instant::now());
                }
                Ok(Err(e)) => return Err(TransportError::Read(e)),
            }
        }

        Ok(self.drain_pending())
    }

    fn drain_pending(&mut self) -> TickStatus {
        while self.pending.has_remaining() {
            let byte = self.pending.get_u8();

            match self.parser.push(byte) {
                Progress::Pending => {}
                Progress::Complete => {
                    if let Some(packet) = self.parser.take_packet() {
                        let id = packet.id;
                        self.dispatch(packet);
                        return TickStatus::NewData(id);
                    }
                }
                Progress::Rejected(e) => {
                    warn!("Discarded serial frame: {}", e);
                    return TickStatus::Rejected(e);
                }
            }
        }

        TickStatus::Continue
    }

    fn dispatch(&mut self, packet: Packet) {
        let id = packet.id;
        match self.callbacks.get_mut(id as usize) {
            Some(callback) => {
                debug!("Dispatching packet {} ({} bytes)", id, packet.payload.len());
                callback(packet);
            }
            None => debug!("No callback registered for packet id {}", id),
        }
    }

    fn expire_stale_frame(&mut self) -> TickStatus {
        let stale = self.parser.is_mid_frame()
            && self
                .last_byte_at
                .map(|at| at.elapsed() > self.frame_timeout)
                .unwrap_or(false);

        if stale {
            warn!("Partial frame silent for more than {:?}, discarding", self.frame_timeout);
            self.parser.reset();
            return TickStatus::StaleFrame;
        }

        TickStatus::NoData
    }
}
