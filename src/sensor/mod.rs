//! # Sensor Module
//!
//! Turns periodic report packets into timestamped sensor readings.

pub mod fields;
pub mod receiver;
pub mod report;

pub use receiver::{ReceiverSettings, SerialReceiver};
pub use report::{FieldSpec, ReportSchema};
