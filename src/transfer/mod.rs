//! # SerialTransfer Protocol Module
//!
//! Implementation of the framed binary protocol spoken by the sensor
//! microcontroller firmware.
//!
//! This module handles:
//! - Frame layout constants and packet types
//! - CRC-8 (polynomial 0x9B) checksum calculation
//! - Byte stuffing of the start marker inside payloads
//! - Byte-at-a-time frame synchronization and validation

pub mod protocol;
pub mod encoder;
pub mod parser;
pub mod crc;
