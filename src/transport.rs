//! # Serial Transport Layer
//!
//! The seam between the poll-driven gateway core and the physical RS-485
//! line. The core never blocks, so it consumes the port through the
//! non-blocking [`SerialLine`] trait: partial writes as transmit buffer
//! space allows, reads that return zero when nothing has arrived, and a
//! drain check that tells the state machine when the last byte has actually
//! left the transmit buffer (the inter-frame delay starts only then).
//!
//! [`TtyLine`] implements the trait over `tokio_serial`; tests substitute an
//! in-memory double.

use std::io::{ErrorKind, Read, Write};

use tokio_serial::{SerialPort, SerialStream};
use tracing::info;

use crate::config::{DataBits, Parity, SerialConfig, StopBits};
use crate::error::{GatewayError, GatewayResult};

/// Non-blocking byte-level access to the half-duplex serial line.
pub trait SerialLine {
    /// Queue bytes for transmission; returns how many were accepted. Zero
    /// means the transmit buffer is full right now.
    fn write_some(&mut self, data: &[u8]) -> GatewayResult<usize>;

    /// Read whatever has arrived; returns the byte count, zero when the
    /// line is silent.
    fn read_some(&mut self, buf: &mut [u8]) -> GatewayResult<usize>;

    /// Whether all previously accepted bytes have left the transmit buffer.
    fn tx_idle(&mut self) -> GatewayResult<bool>;
}

/// Growable-by-construction, bounded-at-runtime receive buffer.
///
/// Sized once to the configured maximum frame size; `push` reports overflow
/// instead of growing, so an oversize frame keeps draining the line without
/// consuming more memory.
#[derive(Debug)]
pub struct FrameBuffer {
    data: Box<[u8]>,
    len: usize,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0u8; capacity].into_boxed_slice(),
            len: 0,
        }
    }

    /// Append one byte; `false` when the buffer is already full.
    pub fn push(&mut self, byte: u8) -> bool {
        if self.len < self.data.len() {
            self.data[self.len] = byte;
            self.len += 1;
            true
        } else {
            false
        }
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.data.len()
    }
}

fn map_data_bits(bits: DataBits) -> tokio_serial::DataBits {
    match bits {
        DataBits::Seven => tokio_serial::DataBits::Seven,
        DataBits::Eight => tokio_serial::DataBits::Eight,
    }
}

fn map_parity(parity: Parity) -> tokio_serial::Parity {
    match parity {
        Parity::None => tokio_serial::Parity::None,
        Parity::Even => tokio_serial::Parity::Even,
        Parity::Odd => tokio_serial::Parity::Odd,
    }
}

fn map_stop_bits(bits: StopBits) -> tokio_serial::StopBits {
    match bits {
        StopBits::One => tokio_serial::StopBits::One,
        StopBits::Two => tokio_serial::StopBits::Two,
    }
}

/// [`SerialLine`] over a real serial port.
pub struct TtyLine {
    port: SerialStream,
}

impl TtyLine {
    /// Open the port described by `serial` in non-blocking mode.
    pub fn open(serial: &SerialConfig) -> GatewayResult<Self> {
        let builder = tokio_serial::new(&serial.port, serial.baud_rate)
            .data_bits(map_data_bits(serial.data_bits))
            .parity(map_parity(serial.parity))
            .stop_bits(map_stop_bits(serial.stop_bits));

        let port = SerialStream::open(&builder).map_err(|e| {
            GatewayError::connection(format!("Failed to open serial port {}: {}", serial.port, e))
        })?;

        info!(
            port = %serial.port,
            baud = serial.baud_rate,
            "serial line opened"
        );
        Ok(Self { port })
    }
}

impl SerialLine for TtyLine {
    fn write_some(&mut self, data: &[u8]) -> GatewayResult<usize> {
        match self.port.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(GatewayError::io(format!("serial write failed: {}", e))),
        }
    }

    fn read_some(&mut self, buf: &mut [u8]) -> GatewayResult<usize> {
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(GatewayError::io(format!("serial read failed: {}", e))),
        }
    }

    fn tx_idle(&mut self) -> GatewayResult<bool> {
        let pending = self
            .port
            .bytes_to_write()
            .map_err(|e| GatewayError::io(format!("serial status failed: {}", e)))?;
        Ok(pending == 0)
    }
}
