//! # CRC16/Modbus Engine
//!
//! Checksum support for RTU serial frames. Two forms are provided: a
//! streaming [`Crc16`] accumulator the transmit path feeds byte-by-byte while
//! draining the serial buffer, and a one-shot [`checksum`] backed by the
//! `crc` crate's `CRC_16_MODBUS` table for whole-buffer work in the router
//! and tests. Both compute the same reflected-0xA001 value.
//!
//! On the wire the CRC travels low byte first: for a frame of length `n`,
//! `frame[n-2]` holds the low byte and `frame[n-1]` the high byte.
//! [`verify`] and [`append`] preserve that ordering.

use crc::{Crc, CRC_16_MODBUS};

/// One-shot CRC calculator shared by the router and tests.
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Streaming CRC16/Modbus accumulator.
///
/// Starts at 0xFFFF and folds one byte at a time with the reflected
/// polynomial 0xA001, so the transmit path can keep the running value while
/// it streams a frame out in pieces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    value: u16,
}

impl Crc16 {
    /// Create a fresh accumulator (initial value 0xFFFF).
    pub fn new() -> Self {
        Self { value: 0xFFFF }
    }

    /// Reset the running value to 0xFFFF.
    pub fn reset(&mut self) {
        self.value = 0xFFFF;
    }

    /// Fold one byte into the running value.
    pub fn update(&mut self, byte: u8) {
        self.value ^= byte as u16;
        for _ in 0..8 {
            if self.value & 0x0001 != 0 {
                self.value = (self.value >> 1) ^ 0xA001;
            } else {
                self.value >>= 1;
            }
        }
    }

    /// Fold a slice of bytes into the running value.
    pub fn update_slice(&mut self, data: &[u8]) {
        for &byte in data {
            self.update(byte);
        }
    }

    /// Current accumulator value.
    pub fn value(&self) -> u16 {
        self.value
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the CRC16/Modbus of a whole buffer.
pub fn checksum(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Verify the trailing CRC of a complete RTU frame.
///
/// Recomputes over `frame[..len-2]` and compares against the two trailing
/// bytes, low byte first. Frames shorter than 4 bytes (unit id + function +
/// CRC) can never verify.
pub fn verify(frame: &[u8]) -> bool {
    if frame.len() < 4 {
        return false;
    }
    let split = frame.len() - 2;
    let computed = checksum(&frame[..split]);
    frame[split] == (computed & 0x00FF) as u8 && frame[split + 1] == (computed >> 8) as u8
}

/// Append the CRC of `frame` to it, low byte first.
pub fn append(frame: &mut Vec<u8>) {
    let crc = checksum(frame);
    frame.extend_from_slice(&crc.to_le_bytes());
}
