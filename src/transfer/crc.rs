//! # CRC-8 Implementation
//!
//! CRC-8 checksum used by the SerialTransfer firmware library.
//!
//! **Polynomial**: 0x9B (x^8 + x^7 + x^4 + x^3 + x + 1)
//! **Initial Value**: 0x00
//! **Reflection / XOR-out**: none (catalogued as CRC-8/LTE)

/// CRC-8 polynomial
const CRC8_POLY: u8 = 0x9B;

/// Precomputed CRC8 lookup table for fast calculation
const CRC8_TABLE: [u8; 256] = generate_crc8_table();

/// Generate CRC8 lookup table at compile time
const fn generate_crc8_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;

    while i < 256 {
        let mut crc = i as u8;
        let mut j = 0;

        while j < 8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
            j += 1;
        }

        table[i] = crc;
        i += 1;
    }

    table
}

/// Calculate the frame checksum using the lookup table
///
/// # Arguments
///
/// * `data` - Stuffed payload bytes (the CRC never covers the header)
///
/// # Returns
///
/// * `u8` - Calculated CRC8 checksum
///
/// # Examples
///
/// ```
/// use waspi::transfer::crc::crc8;
///
/// assert_eq!(crc8(b"123456789"), 0xEA);
/// ```
pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &byte| CRC8_TABLE[(crc ^ byte) as usize])
}

/// Bitwise reference implementation, used to check the table
#[cfg(test)]
fn crc8_slow(data: &[u8]) -> u8 {
    let mut crc: u8 = 0;

    for &byte in data {
        crc ^= byte;

        for _ in 0..8 {
            if (crc & 0x80) != 0 {
                crc = (crc << 1) ^ CRC8_POLY;
            } else {
                crc <<= 1;
            }
        }
    }

    crc
}
