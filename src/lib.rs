//! # WASPI Library
//!
//! Hive telemetry gateway: pulls periodic sensor reports from a
//! microcontroller over a SerialTransfer link, publishes them over MQTT,
//! keeps a durable local copy and interleaves accelerometer recordings, all
//! coordinated with an external file-sync process through an advisory lock.

pub mod config;
pub mod data;
pub mod error;
pub mod heartbeat;
pub mod lock;
pub mod messenger;
pub mod orchestrator;
pub mod recorder;
pub mod schedule;
pub mod sensor;
pub mod serial;
pub mod store;
pub mod transfer;
