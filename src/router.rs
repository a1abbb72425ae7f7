//! # Response Router
//!
//! Re-frames a resolved transaction, either a validated RTU response off
//! the serial line or an exception the gateway synthesized after exhausting
//! retries, into the wire format of the originating client and hands it to
//! the matching transport sink.
//!
//! Plain Modbus TCP/UDP clients get a 6-byte MBAP-style header (original
//! transaction id, protocol id 0, big-endian remaining length) followed by
//! the RTU bytes with the CRC stripped. RTU-over-TCP/UDP clients get the
//! raw RTU frame, CRC included, with no prefix. Internal scan probes
//! resolve into the health table only and emit nothing.

use std::net::SocketAddr;

use tracing::{debug, warn};

use crate::config::WireMode;
use crate::crc;
use crate::error::GatewayResult;
use crate::queue::{ClientRef, RequestHeader};
use crate::EXCEPTION_GATEWAY_TARGET_FAILED;

/// Destination-side transport hooks the network front-ends implement.
///
/// Delivery failures are the front-end's concern; the gateway logs them and
/// moves on, because the serial transaction is already resolved either way.
pub trait ResponseSink {
    /// Write a response frame to an open TCP connection.
    fn deliver_tcp(&mut self, connection: usize, frame: &[u8]) -> GatewayResult<()>;

    /// Send a response datagram back to a UDP requester.
    fn deliver_udp(&mut self, peer: SocketAddr, frame: &[u8]) -> GatewayResult<()>;
}

/// Sink that drops every response. Useful when the gateway is only running
/// internal scans.
pub struct DiscardSink;

impl ResponseSink for DiscardSink {
    fn deliver_tcp(&mut self, _connection: usize, _frame: &[u8]) -> GatewayResult<()> {
        Ok(())
    }

    fn deliver_udp(&mut self, _peer: SocketAddr, _frame: &[u8]) -> GatewayResult<()> {
        Ok(())
    }
}

/// Translates resolved RTU frames into client wire format.
#[derive(Debug, Clone, Copy)]
pub struct ResponseRouter {
    mode: WireMode,
}

impl ResponseRouter {
    pub fn new(mode: WireMode) -> Self {
        Self { mode }
    }

    /// Route a validated serial response (unit id + PDU + CRC) back to the
    /// client named in `header`.
    pub fn route_response(
        &self,
        header: &RequestHeader,
        rtu_frame: &[u8],
        sink: &mut dyn ResponseSink,
    ) {
        let frame = self.encapsulate(header.transaction_id, rtu_frame);
        self.deliver(header, &frame, sink);
    }

    /// Synthesize and route a "Gateway Target Device Failed to Respond"
    /// exception for a request whose retries are exhausted.
    pub fn route_target_failed(
        &self,
        header: &RequestHeader,
        function_code: u8,
        sink: &mut dyn ResponseSink,
    ) {
        // Build a wire-valid RTU exception frame, then reuse the normal
        // translation path.
        let mut rtu = vec![
            header.unit_id,
            function_code | 0x80,
            EXCEPTION_GATEWAY_TARGET_FAILED,
        ];
        crc::append(&mut rtu);

        let frame = self.encapsulate(header.transaction_id, &rtu);
        self.deliver(header, &frame, sink);
    }

    /// Build the outbound bytes for `rtu_frame` per the configured mode.
    fn encapsulate(&self, transaction_id: u16, rtu_frame: &[u8]) -> Vec<u8> {
        match self.mode {
            WireMode::Tcp => {
                // Header length field covers unit id + PDU, i.e. the RTU
                // frame minus its 2 CRC bytes.
                let body = &rtu_frame[..rtu_frame.len().saturating_sub(2)];
                let mut frame = Vec::with_capacity(6 + body.len());
                frame.extend_from_slice(&transaction_id.to_be_bytes());
                frame.extend_from_slice(&0u16.to_be_bytes());
                frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
                frame.extend_from_slice(body);
                frame
            }
            WireMode::Rtu => rtu_frame.to_vec(),
        }
    }

    fn deliver(&self, header: &RequestHeader, frame: &[u8], sink: &mut dyn ResponseSink) {
        let result = match header.client {
            ClientRef::TcpConnection(connection) => {
                debug!(connection, frame = %hex::encode_upper(frame), "response -> tcp");
                sink.deliver_tcp(connection, frame)
            }
            ClientRef::UdpReply(peer) => {
                debug!(%peer, frame = %hex::encode_upper(frame), "response -> udp");
                sink.deliver_udp(peer, frame)
            }
            ClientRef::InternalScan => {
                debug!(unit_id = header.unit_id, "scan probe resolved, no response emitted");
                Ok(())
            }
        };

        if let Err(error) = result {
            warn!(%error, "response delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordingSink {
        tcp: Vec<(usize, Vec<u8>)>,
        udp: Vec<(SocketAddr, Vec<u8>)>,
    }

    impl ResponseSink for RecordingSink {
        fn deliver_tcp(&mut self, connection: usize, frame: &[u8]) -> GatewayResult<()> {
            self.tcp.push((connection, frame.to_vec()));
            Ok(())
        }

        fn deliver_udp(&mut self, peer: SocketAddr, frame: &[u8]) -> GatewayResult<()> {
            self.udp.push((peer, frame.to_vec()));
            Ok(())
        }
    }

    fn tcp_header(transaction_id: u16, unit_id: u8) -> RequestHeader {
        RequestHeader {
            transaction_id,
            client: ClientRef::TcpConnection(3),
            unit_id,
        }
    }

    // Serial response used throughout: unit 0x11, function 0x03, two data
    // bytes 0x002A, valid CRC.
    const RTU_RESPONSE: &[u8] = &[0x11, 0x03, 0x02, 0x00, 0x2A, 0xC2, 0x6E];

    #[test]
    fn test_plain_tcp_translation() {
        let router = ResponseRouter::new(WireMode::Tcp);
        let mut sink = RecordingSink::default();

        router.route_response(&tcp_header(0x0001, 0x11), RTU_RESPONSE, &mut sink);

        let (connection, frame) = &sink.tcp[0];
        assert_eq!(*connection, 3);
        assert_eq!(
            frame,
            &vec![0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0x00, 0x2A]
        );
    }

    #[test]
    fn test_raw_mode_forwards_verbatim() {
        let router = ResponseRouter::new(WireMode::Rtu);
        let mut sink = RecordingSink::default();

        router.route_response(&tcp_header(0x0001, 0x11), RTU_RESPONSE, &mut sink);

        assert_eq!(sink.tcp[0].1, RTU_RESPONSE.to_vec());
    }

    #[test]
    fn test_udp_reply_carries_peer() {
        let router = ResponseRouter::new(WireMode::Tcp);
        let mut sink = RecordingSink::default();
        let peer: SocketAddr = "192.168.1.50:1502".parse().unwrap();
        let header = RequestHeader {
            transaction_id: 0x0203,
            client: ClientRef::UdpReply(peer),
            unit_id: 0x11,
        };

        router.route_response(&header, RTU_RESPONSE, &mut sink);

        assert!(sink.tcp.is_empty());
        assert_eq!(sink.udp[0].0, peer);
        assert_eq!(&sink.udp[0].1[..2], &[0x02, 0x03]);
    }

    #[test]
    fn test_synthesized_exception_plain_mode() {
        let router = ResponseRouter::new(WireMode::Tcp);
        let mut sink = RecordingSink::default();

        router.route_target_failed(&tcp_header(0x0042, 0x12), 0x03, &mut sink);

        let frame = &sink.tcp[0].1;
        assert_eq!(
            frame,
            &vec![0x00, 0x42, 0x00, 0x00, 0x00, 0x03, 0x12, 0x83, 0x0B]
        );
    }

    #[test]
    fn test_synthesized_exception_raw_mode_is_wire_valid() {
        let router = ResponseRouter::new(WireMode::Rtu);
        let mut sink = RecordingSink::default();

        router.route_target_failed(&tcp_header(0x0042, 0x12), 0x03, &mut sink);

        let frame = &sink.tcp[0].1;
        assert_eq!(&frame[..3], &[0x12, 0x83, 0x0B]);
        assert!(crate::crc::verify(frame));
    }

    #[test]
    fn test_scan_probe_emits_nothing() {
        let router = ResponseRouter::new(WireMode::Tcp);
        let mut sink = RecordingSink::default();
        let header = RequestHeader {
            transaction_id: 0,
            client: ClientRef::InternalScan,
            unit_id: 0x11,
        };

        router.route_response(&header, RTU_RESPONSE, &mut sink);
        router.route_target_failed(&header, 0x03, &mut sink);

        assert!(sink.tcp.is_empty());
        assert!(sink.udp.is_empty());
    }
}
