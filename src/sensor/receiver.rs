//! # Serial Receiver
//!
//! Runs one bounded acquisition window over the packet transport and hands
//! back exactly one decoded report, or a typed failure.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::yield_now;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

use super::report::ReportSchema;
use crate::data::SerialOutput;
use crate::error::{AcquireError, TransportError};
use crate::serial::{Callback, TickStatus, Transport};
use crate::transfer::protocol::{Packet, PERIODIC_REPORT_ID};

// The report callback is registered in slot 0
const _: () = assert!(PERIODIC_REPORT_ID == 0);

/// Default pause between transport ticks
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(10);

/// Port settings used when the receiver opens the transport
#[derive(Debug, Clone)]
pub struct ReceiverSettings {
    pub port: String,
    pub baud_rate: u32,
    pub tick_interval: Duration,
    pub close_after_acquire: bool,
}

impl ReceiverSettings {
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            tick_interval: DEFAULT_TICK_INTERVAL,
            close_after_acquire: false,
        }
    }
}

/// Owns the transport and the report schema for the lifetime of the process
pub struct SerialReceiver {
    transport: Transport,
    schema: ReportSchema,
    settings: ReceiverSettings,
    reports_tx: mpsc::UnboundedSender<Packet>,
    reports_rx: mpsc::UnboundedReceiver<Packet>,
}

impl SerialReceiver {
    pub fn new(transport: Transport, schema: ReportSchema, settings: ReceiverSettings) -> Self {
        let (reports_tx, reports_rx) = mpsc::unbounded_channel();
        Self {
            transport,
            schema,
            settings,
            reports_tx,
            reports_rx,
        }
    }

    pub fn schema(&self) -> &ReportSchema {
        &self.schema
    }

    pub fn transport(&self) -> &Transport {
        &self.transport
    }

    /// Acquire one periodic report within `window`
    ///
    /// Opens the transport if needed and ticks it until the line goes quiet
    /// with at least one report received, then returns the newest report.
    /// Reports queued while no window was open are superseded instead of
    /// being handed out one per window. If the window closes while bytes are
    /// still streaming, the newest report seen so far is returned.
    ///
    /// Dropping the returned future (for example from an outer timeout)
    /// leaves the transport and its parser intact.
    ///
    /// # Errors
    ///
    /// - `AcquireError::Timeout` if no report arrived within `window`
    /// - `AcquireError::Transport` if the port could not be opened or read
    /// - `AcquireError::Decode` if the report did not match the schema
    pub async fn acquire(&mut self, window: Duration) -> Result<SerialOutput, AcquireError> {
        let started = Instant::now();

        if !self.transport.open(&self.settings.port, self.settings.baud_rate) {
            return Err(TransportError::Open {
                port: self.settings.port.clone(),
                reason: "device unavailable".to_string(),
            }
            .into());
        }

        // Reports left over from an abandoned window are stale
        while self.reports_rx.try_recv().is_ok() {}
        self.register_report_callback();

        let result = match timeout(window, self.poll_report()).await {
            Ok(result) => result,
            Err(_) => match self.newest_report() {
                Some(packet) => self.schema.build(packet.payload()).map_err(AcquireError::from),
                None => Err(AcquireError::Timeout(window)),
            },
        };

        match &result {
            Ok(output) => info!(
                "Acquired report {} ({} values) in {:?}",
                output.id(),
                output.content().len(),
                started.elapsed()
            ),
            Err(AcquireError::Timeout(after)) => {
                warn!("No report within {:?}", after)
            }
            Err(AcquireError::Transport(e)) => {
                warn!("Serial transport failed: {}, closing port", e);
                self.transport.close();
            }
            Err(AcquireError::Decode(e)) => warn!("Report rejected: {}", e),
        }

        if self.settings.close_after_acquire {
            self.transport.close();
        }

        result
    }

    fn register_report_callback(&mut self) {
        let tx = self.reports_tx.clone();
        let on_report: Callback = Box::new(move |packet| {
            // Receiver lives as long as the sender; a failed send means shutdown
            let _ = tx.send(packet);
        });

        // Slot index is the packet id
        self.transport.set_callbacks(vec![on_report]);
    }

    /// Last report dispatched by the transport, discarding older ones
    fn newest_report(&mut self) -> Option<Packet> {
        let mut newest = None;
        while let Ok(packet) = self.reports_rx.try_recv() {
            newest = Some(packet);
        }
        newest
    }

    async fn poll_report(&mut self) -> Result<SerialOutput, AcquireError> {
        loop {
            match self.transport.tick().await? {
                TickStatus::NewData(id) => debug!("Packet {} received", id),
                TickStatus::Rejected(e) => debug!("Frame rejected, resyncing: {}", e),
                TickStatus::Continue => {}
                TickStatus::NoData | TickStatus::StaleFrame => {
                    // Input drained: backlog has been superseded by the newest report
                    if let Some(packet) = self.newest_report() {
                        return Ok(self.schema.build(packet.payload())?);
                    }
                    sleep(self.settings.tick_interval).await;
                    continue;
                }
            }

            yield_now().await;
        }
    }
}
