//! Trait abstraction for serial port operations to enable testing

use async_trait::async_trait;
use std::io;
use tokio_serial::SerialPortBuilderExt;

/// Trait for serial port I/O operations
#[async_trait]
pub trait SerialPortIO: Send {
    /// Read whatever bytes are available, waiting until at least one arrives
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Opens serial ports on behalf of the transport
pub trait PortConnector: Send + Sync {
    /// Open `path` at `baud_rate` with 8N1 framing
    fn connect(&self, path: &str, baud_rate: u32) -> io::Result<Box<dyn SerialPortIO>>;
}

/// Wrapper around tokio_serial::SerialStream that implements SerialPortIO
pub struct TokioSerialPort {
    port: tokio_serial::SerialStream,
}

impl TokioSerialPort {
    pub fn new(port: tokio_serial::SerialStream) -> Self {
        Self { port }
    }
}

#[async_trait]
impl SerialPortIO for TokioSerialPort {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        use tokio::io::AsyncReadExt;
        self.port.read(buf).await
    }
}

/// Connector backed by `tokio-serial`
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioSerialConnector;

impl PortConnector for TokioSerialConnector {
    fn connect(&self, path: &str, baud_rate: u32) -> io::Result<Box<dyn SerialPortIO>> {
        let port = tokio_serial::new(path, baud_rate)
            .data_bits(tokio_serial::DataBits::Eight)
            .parity(tokio_serial::Parity::None)
            .stop_bits(tokio_serial::StopBits::One)
            .flow_control(tokio_serial::FlowControl::None)
            .open_native_async()
            .map_err(io::Error::from)?;

        Ok(Box::new(TokioSerialPort::new(port)))
    }
}
