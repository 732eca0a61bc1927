//! # Field Decoder
//!
//! Stateless, bounds-checked extraction of fixed-width little-endian values
//! from a report payload. Every function returns the advanced offset together
//! with the value so callers can chain reads.

use serde::Deserialize;

use crate::error::DecodeError;

/// Wire type of one report field
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    #[default]
    F32,
    I16,
    U16,
    I32,
    U32,
}

impl FieldKind {
    /// Width on the wire in bytes
    pub const fn width(self) -> usize {
        match self {
            FieldKind::I16 | FieldKind::U16 => 2,
            FieldKind::F32 | FieldKind::I32 | FieldKind::U32 => 4,
        }
    }

    /// Decode one field of this kind, widened to `f64`
    pub fn decode(self, buffer: &[u8], offset: usize) -> Result<(usize, f64), DecodeError> {
        match self {
            FieldKind::F32 => decode_f32_le(buffer, offset).map(|(o, v)| (o, v as f64)),
            FieldKind::I16 => decode_i16_le(buffer, offset).map(|(o, v)| (o, v as f64)),
            FieldKind::U16 => decode_u16_le(buffer, offset).map(|(o, v)| (o, v as f64)),
            FieldKind::I32 => decode_i32_le(buffer, offset).map(|(o, v)| (o, v as f64)),
            FieldKind::U32 => decode_u32_le(buffer, offset).map(|(o, v)| (o, v as f64)),
        }
    }
}

/// Borrow exactly `N` bytes at `offset`
fn take<const N: usize>(buffer: &[u8], offset: usize) -> Result<(usize, [u8; N]), DecodeError> {
    let out_of_bounds = DecodeError::OutOfBounds {
        offset,
        width: N,
        len: buffer.len(),
    };

    let end = offset.checked_add(N).ok_or_else(|| out_of_bounds.clone())?;
    let bytes = buffer.get(offset..end).ok_or(out_of_bounds)?;

    let mut raw = [0u8; N];
    raw.copy_from_slice(bytes);
    Ok((end, raw))
}

/// Decode a little-endian IEEE-754 single-precision float
///
/// # Arguments
///
/// * `buffer` - Unstuffed report payload
/// * `offset` - Index of the first byte of the field
///
/// # Returns
///
/// * `Result<(usize, f32), DecodeError>` - Offset past the field and the value
///
/// # Errors
///
/// Returns `DecodeError::OutOfBounds` if fewer than 4 bytes remain at `offset`
///
/// # Examples
///
/// ```
/// use waspi::sensor::fields::decode_f32_le;
///
/// let buffer = 21.5f32.to_le_bytes();
/// assert_eq!(decode_f32_le(&buffer, 0), Ok((4, 21.5)));
/// assert!(decode_f32_le(&buffer, 1).is_err());
/// ```
pub fn decode_f32_le(buffer: &[u8], offset: usize) -> Result<(usize, f32), DecodeError> {
    take::<4>(buffer, offset).map(|(next, raw)| (next, f32::from_le_bytes(raw)))
}

/// Decode a little-endian signed 16-bit integer
pub fn decode_i16_le(buffer: &[u8], offset: usize) -> Result<(usize, i16), DecodeError> {
    take::<2>(buffer, offset).map(|(next, raw)| (next, i16::from_le_bytes(raw)))
}

/// Decode a little-endian unsigned 16-bit integer
pub fn decode_u16_le(buffer: &[u8], offset: usize) -> Result<(usize, u16), DecodeError> {
    take::<2>(buffer, offset).map(|(next, raw)| (next, u16::from_le_bytes(raw)))
}

/// Decode a little-endian signed 32-bit integer
pub fn decode_i32_le(buffer: &[u8], offset: usize) -> Result<(usize, i32), DecodeError> {
    take::<4>(buffer, offset).map(|(next, raw)| (next, i32::from_le_bytes(raw)))
}

/// Decode a little-endian unsigned 32-bit integer
pub fn decode_u32_le(buffer: &[u8], offset: usize) -> Result<(usize, u32), DecodeError> {
    take::<4>(buffer, offset).map(|(next, raw)| (next, u32::from_le_bytes(raw)))
}
