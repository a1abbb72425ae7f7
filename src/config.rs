//! # Gateway Configuration
//!
//! Configuration surface consumed by the gateway core. Settings are owned by
//! an external collaborator (web UI, persistent storage) and read-only here;
//! the core only validates them and derives the Modbus serial timing from
//! the serial framing parameters.
//!
//! ## Timing derivation
//!
//! For baud rates up to 19200 the Modbus specification defines the
//! inter-character timeout as 1.5 character times and the inter-frame delay
//! as 3.5 character times, where a character occupies 1 start bit + data
//! bits + optional parity bit + stop bits. Above 19200 the fixed values of
//! 750 µs and 1750 µs apply.
//!
//! ```rust
//! use modbus_bridge::config::SerialConfig;
//!
//! let serial = SerialConfig { baud_rate: 9600, ..SerialConfig::default() };
//! // 10 bits per character at 9600 baud: T = 1041 µs
//! assert_eq!(serial.inter_frame_delay().as_micros(), 3645);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::MAX_RTU_FRAME_SIZE;

/// Wire format spoken to the network clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireMode {
    /// Plain Modbus TCP/UDP: MBAP-style header, no CRC on the network side.
    /// The gateway computes and strips the serial CRC itself.
    Tcp,
    /// RTU-over-TCP/UDP: raw RTU frames tunnelled verbatim, client-supplied
    /// CRC forwarded onto the line and response CRC forwarded back.
    Rtu,
}

/// Number of data bits per serial character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Seven,
    Eight,
}

impl DataBits {
    fn bit_count(self) -> u32 {
        match self {
            DataBits::Seven => 7,
            DataBits::Eight => 8,
        }
    }
}

/// Parity checking mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
}

impl Parity {
    fn bit_count(self) -> u32 {
        match self {
            Parity::None => 0,
            Parity::Even | Parity::Odd => 1,
        }
    }
}

/// Number of stop bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl StopBits {
    fn bit_count(self) -> u32 {
        match self {
            StopBits::One => 1,
            StopBits::Two => 2,
        }
    }
}

/// Serial line parameters and the RTU timing derived from them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SerialConfig {
    /// Serial port path, e.g. `/dev/ttyUSB0`.
    pub port: String,
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: "/dev/ttyUSB0".to_string(),
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl SerialConfig {
    /// Bits occupied by one character on the line, including the start bit.
    pub fn bits_per_character(&self) -> u32 {
        1 + self.data_bits.bit_count() + self.parity.bit_count() + self.stop_bits.bit_count()
    }

    /// Transmission time of one character.
    pub fn character_time(&self) -> Duration {
        Duration::from_micros(u64::from(self.bits_per_character()) * 1_000_000 / u64::from(self.baud_rate))
    }

    /// Maximum allowed gap between consecutive bytes within one frame
    /// (t1.5; fixed 750 µs above 19200 baud).
    pub fn inter_char_timeout(&self) -> Duration {
        if self.baud_rate > 19_200 {
            Duration::from_micros(750)
        } else {
            Duration::from_micros(u64::from(self.bits_per_character()) * 1_500_000 / u64::from(self.baud_rate))
        }
    }

    /// Minimum silence period marking a frame boundary (t3.5; fixed 1750 µs
    /// above 19200 baud).
    pub fn inter_frame_delay(&self) -> Duration {
        if self.baud_rate > 19_200 {
            Duration::from_micros(1750)
        } else {
            Duration::from_micros(u64::from(self.bits_per_character()) * 3_500_000 / u64::from(self.baud_rate))
        }
    }
}

/// Full gateway configuration.
///
/// `tcp_port` and `udp_port` are consumed by the network front-end
/// collaborators; everything else drives the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub tcp_port: u16,
    pub udp_port: u16,
    pub wire_mode: WireMode,
    pub serial: SerialConfig,
    /// Per-transaction response timeout in milliseconds.
    pub response_timeout_ms: u64,
    /// Attempts per request before a 0x0B exception is synthesized.
    pub max_retries: u8,
    /// Highest addressable slave (247 per the Modbus specification).
    pub max_unit_id: u8,
    /// Request queue entry-count cap.
    pub max_queue_entries: usize,
    /// Request queue cumulative payload-byte cap.
    pub max_queue_bytes: usize,
    /// Largest serial frame accepted or transmitted.
    pub max_frame_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            tcp_port: 502,
            udp_port: 502,
            wire_mode: WireMode::Tcp,
            serial: SerialConfig::default(),
            response_timeout_ms: 1000,
            max_retries: 3,
            max_unit_id: 247,
            max_queue_entries: 15,
            max_queue_bytes: 256,
            max_frame_size: MAX_RTU_FRAME_SIZE,
        }
    }
}

impl GatewayConfig {
    /// Parse a configuration from YAML.
    pub fn from_yaml(text: &str) -> GatewayResult<Self> {
        let config: Self = serde_yaml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a configuration from JSON.
    pub fn from_json(text: &str) -> GatewayResult<Self> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Per-transaction response timeout.
    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    /// Check the configuration for values the core cannot operate with.
    pub fn validate(&self) -> GatewayResult<()> {
        if self.serial.baud_rate == 0 {
            return Err(GatewayError::configuration("baud rate must be non-zero"));
        }
        if self.max_retries == 0 {
            return Err(GatewayError::configuration("max_retries must be at least 1"));
        }
        if self.max_unit_id == 0 || self.max_unit_id > 247 {
            return Err(GatewayError::configuration(format!(
                "max_unit_id {} outside 1..=247",
                self.max_unit_id
            )));
        }
        if self.max_queue_entries == 0 || self.max_queue_bytes == 0 {
            return Err(GatewayError::configuration("queue caps must be non-zero"));
        }
        // unit id + function + exception/data + CRC is the smallest useful frame
        if self.max_frame_size < 5 || self.max_frame_size > MAX_RTU_FRAME_SIZE {
            return Err(GatewayError::configuration(format!(
                "max_frame_size {} outside 5..={}",
                self.max_frame_size, MAX_RTU_FRAME_SIZE
            )));
        }
        if self.response_timeout_ms == 0 {
            return Err(GatewayError::configuration("response timeout must be non-zero"));
        }
        Ok(())
    }
}
