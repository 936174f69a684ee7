//! Checksums over self-describing frames
//!
//! A self-describing frame starts with a byte count that does not include
//! itself but does include the trailing checksum byte(s):
//!
//! ```text
//! [00] 05   number of bytes to follow
//! [01] 01   block title
//! [02] 07   data byte A
//! [03] 08   data byte B
//! [04] 00   checksum high byte
//! [05] 15   checksum low byte
//! ```
//!
//! Both variants sum bytes `[0, count - 1)`. For the 16-bit variant that is
//! everything before the checksum; the 8-bit variant leaves the last data byte
//! out of the sum, which is what the ECUs on the other end expect.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChecksumError {
    #[error("Empty frame")]
    Empty,

    #[error("Byte count {count} too small for a {width}-bit checksum")]
    CountTooSmall { count: usize, width: u8 },

    #[error("Frame of {len} bytes cannot hold byte count {count}")]
    FrameTooShort { count: usize, len: usize },
}

fn frame_count(frame: &[u8], width: u8) -> Result<usize, ChecksumError> {
    let count = *frame.first().ok_or(ChecksumError::Empty)? as usize;
    let min = if width == 8 { 1 } else { 2 };
    if count < min {
        return Err(ChecksumError::CountTooSmall { count, width });
    }
    if frame.len() <= count {
        return Err(ChecksumError::FrameTooShort {
            count,
            len: frame.len(),
        });
    }
    Ok(count)
}

fn sum16(bytes: &[u8]) -> u16 {
    bytes.iter().fold(0u16, |acc, &b| acc.wrapping_add(b as u16))
}

/// Compute the 8-bit checksum of a frame and store it at offset `count`.
pub fn add_8bit_checksum(frame: &mut [u8]) -> Result<u8, ChecksumError> {
    let count = frame_count(frame, 8)?;
    let checksum = sum16(&frame[..count - 1]) as u8;
    frame[count] = checksum;
    Ok(checksum)
}

/// Compute the 16-bit checksum of a frame and store it big-endian at
/// offsets `count - 1` and `count`.
pub fn add_16bit_checksum(frame: &mut [u8]) -> Result<u16, ChecksumError> {
    let count = frame_count(frame, 16)?;
    let checksum = sum16(&frame[..count - 1]);
    let [hi, lo] = checksum.to_be_bytes();
    frame[count - 1] = hi;
    frame[count] = lo;
    Ok(checksum)
}

/// Check a frame produced by [`add_8bit_checksum`].
pub fn verify_8bit_checksum(frame: &[u8]) -> Result<bool, ChecksumError> {
    let count = frame_count(frame, 8)?;
    Ok(frame[count] == sum16(&frame[..count - 1]) as u8)
}

/// Check a frame produced by [`add_16bit_checksum`].
pub fn verify_16bit_checksum(frame: &[u8]) -> Result<bool, ChecksumError> {
    let count = frame_count(frame, 16)?;
    let stored = u16::from_be_bytes([frame[count - 1], frame[count]]);
    Ok(stored == sum16(&frame[..count - 1]))
}

/// One's complement of the wrapping byte sum, used for file transfer chunks.
pub fn complemented_sum(bytes: &[u8]) -> u8 {
    !bytes.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
}
