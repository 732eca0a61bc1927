//! # Recorder Module
//!
//! Secondary recording device (accelerometer captured through a sound card).

pub mod arecord;

use async_trait::async_trait;

use crate::data::Recording;
use crate::error::Result;

pub use arecord::{ArecordRecorder, RecorderSettings};

/// Produces one recording file per call
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Recorder: Send + Sync {
    /// Nominal recording length in seconds
    fn duration_s(&self) -> u32;

    /// Capture one recording
    ///
    /// # Errors
    ///
    /// Returns `WaspiError::Recording` if the device fails or produces no file
    async fn record(&self) -> Result<Recording>;
}
