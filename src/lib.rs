//! # Modbus Bridge
//!
//! Core of a Modbus TCP/UDP to RTU gateway: network clients submit Modbus
//! requests over TCP or UDP and the gateway relays them over a half-duplex
//! serial line to RTU slaves, translating framing in both directions.
//!
//! The crate provides the protocol-side machinery; sockets and the serial
//! device are collaborators behind small traits, so the whole core can be
//! driven and tested without hardware.
//!
//! ## Architecture
//!
//! - [`gateway`] - the poll-driven dispatch queue and transport state machine
//! - [`queue`] - bounded FIFO of pending requests with client provenance
//! - [`router`] - response wire-format translation back to clients
//! - [`transport`] - the [`transport::SerialLine`] seam and tty implementation
//! - [`health`] - per-slave responding/unresponsive table
//! - [`crc`] - CRC16/Modbus, streaming and one-shot
//! - [`timer`] - non-blocking deadline primitive used by every wait
//! - [`config`] - configuration surface and RTU timing derivation
//! - [`error`] - unified error type
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_bridge::config::GatewayConfig;
//! use modbus_bridge::gateway::Gateway;
//! use modbus_bridge::router::DiscardSink;
//! use modbus_bridge::transport::TtyLine;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = GatewayConfig::default();
//!     let mut line = TtyLine::open(&config.serial)?;
//!     let mut gateway = Gateway::new(config)?;
//!
//!     gateway.enqueue_probe(0x11)?;
//!     while gateway.pending() > 0 {
//!         gateway.poll(&mut line, &mut DiscardSink)?;
//!         tokio::time::sleep(std::time::Duration::from_millis(1)).await;
//!     }
//!     println!("unit 0x11 responding: {}", gateway.health().is_responding(0x11));
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod crc;
pub mod error;
pub mod gateway;
pub mod health;
pub mod queue;
pub mod router;
pub mod timer;
pub mod transport;

pub use config::{GatewayConfig, SerialConfig, WireMode};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{BusState, Gateway, GatewayStats};
pub use health::SlaveHealth;
pub use queue::{ClientRef, QueueEntry, RequestHeader, RequestQueue};
pub use router::{DiscardSink, ResponseRouter, ResponseSink};
pub use timer::PollTimer;
pub use transport::{FrameBuffer, SerialLine, TtyLine};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Largest RTU frame: unit id + 253-byte PDU + 2-byte CRC.
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Size of the MBAP-style header on the plain TCP/UDP wire format.
pub const MBAP_HEADER_SIZE: usize = 6;

/// Broadcast unit id: no response expected, no retries.
pub const BROADCAST_UNIT_ID: u8 = 0;

/// Modbus exception code 0x0B, "Gateway Target Device Failed to Respond",
/// synthesized when a slave exhausts its retries.
pub const EXCEPTION_GATEWAY_TARGET_FAILED: u8 = 0x0B;
