//! End-to-end gateway tests driving the poll loop against a scripted serial
//! line and a recording response sink. Real (short) delays are used for the
//! RTU timing: at 115200 baud the inter-frame silence is a fixed 1750 µs,
//! which keeps every test well under a second.

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;

use modbus_bridge::config::{GatewayConfig, SerialConfig, WireMode};
use modbus_bridge::crc;
use modbus_bridge::gateway::{BusState, Gateway};
use modbus_bridge::queue::{ClientRef, QueueEntry, RequestHeader};
use modbus_bridge::router::ResponseSink;
use modbus_bridge::transport::SerialLine;
use modbus_bridge::GatewayResult;

/// Serial double: scripted inbound bytes, captured outbound bytes, with a
/// configurable per-call write acceptance to exercise partial sends.
struct ScriptedLine {
    inbound: VecDeque<u8>,
    outbound: Vec<u8>,
    write_chunk: usize,
}

impl ScriptedLine {
    fn new() -> Self {
        Self {
            inbound: VecDeque::new(),
            outbound: Vec::new(),
            write_chunk: usize::MAX,
        }
    }

    fn feed(&mut self, data: &[u8]) {
        self.inbound.extend(data);
    }
}

impl SerialLine for ScriptedLine {
    fn write_some(&mut self, data: &[u8]) -> GatewayResult<usize> {
        let n = data.len().min(self.write_chunk);
        self.outbound.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn read_some(&mut self, buf: &mut [u8]) -> GatewayResult<usize> {
        let mut n = 0;
        while n < buf.len() {
            match self.inbound.pop_front() {
                Some(byte) => {
                    buf[n] = byte;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }

    fn tx_idle(&mut self) -> GatewayResult<bool> {
        Ok(true)
    }
}

/// Sink that records every delivered frame.
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

fn fast_config() -> GatewayConfig {
    GatewayConfig {
        serial: SerialConfig {
            baud_rate: 115_200,
            ..SerialConfig::default()
        },
        response_timeout_ms: 25,
        max_retries: 3,
        ..GatewayConfig::default()
    }
}

/// Poll at 1 ms granularity for `ms` milliseconds.
fn run_for(
    gateway: &mut Gateway,
    line: &mut ScriptedLine,
    sink: &mut RecordingSink,
    ms: u64,
) {
    let deadline = Instant::now() + Duration::from_millis(ms);
    while Instant::now() < deadline {
        gateway.poll(line, sink).unwrap();
        thread::sleep(Duration::from_millis(1));
    }
}

fn tcp_request(transaction_id: u16, connection: usize, unit_id: u8, pdu: &[u8]) -> QueueEntry {
    QueueEntry::new(
        RequestHeader {
            transaction_id,
            client: ClientRef::TcpConnection(connection),
            unit_id,
        },
        Bytes::copy_from_slice(pdu),
    )
}

#[test]
fn test_plain_mode_full_transaction() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    // Read 1 holding register at address 0 from unit 0x11.
    gateway
        .enqueue(tcp_request(0x0001, 7, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();

    // Let the frame go out and the inter-frame delay elapse.
    run_for(&mut gateway, &mut line, &mut sink, 5);
    assert_eq!(gateway.state(), BusState::Waiting);
    assert_eq!(line.outbound.len(), 8);
    assert_eq!(line.outbound[0], 0x11);
    assert!(crc::verify(&line.outbound));

    // Slave answers with register value 0x002A.
    line.feed(&[0x11, 0x03, 0x02, 0x00, 0x2A, 0xC2, 0x6E]);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    assert_eq!(gateway.state(), BusState::Idle);
    assert_eq!(gateway.pending(), 0);
    assert!(gateway.health().is_responding(0x11));

    // MBAP-style header restores the transaction id; CRC is stripped.
    assert_eq!(sink.tcp.len(), 1);
    let (connection, frame) = &sink.tcp[0];
    assert_eq!(*connection, 7);
    assert_eq!(
        frame.as_slice(),
        &[0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x11, 0x03, 0x02, 0x00, 0x2A]
    );

    let stats = gateway.stats();
    assert_eq!(stats.frames_sent, 1);
    assert_eq!(stats.responses_accepted, 1);
    assert_eq!(stats.timeouts, 0);
}

#[test]
fn test_retry_exhaustion_synthesizes_gateway_exception() {
    let mut config = fast_config();
    config.max_retries = 3;
    let mut gateway = Gateway::new(config).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0042, 3, 0x12, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();

    // Silent slave: 3 attempts at 25 ms each, plus slack.
    run_for(&mut gateway, &mut line, &mut sink, 150);

    // Exactly three identical frames went out, never a fourth.
    assert_eq!(line.outbound.len(), 3 * 8);
    assert_eq!(&line.outbound[0..8], &line.outbound[8..16]);
    assert_eq!(&line.outbound[8..16], &line.outbound[16..24]);

    // One synthesized exception: fc | 0x80, code 0x0B.
    assert_eq!(sink.tcp.len(), 1);
    let (connection, frame) = &sink.tcp[0];
    assert_eq!(*connection, 3);
    assert_eq!(
        frame.as_slice(),
        &[0x00, 0x42, 0x00, 0x00, 0x00, 0x03, 0x12, 0x83, 0x0B]
    );

    assert!(!gateway.health().is_responding(0x12));
    assert_eq!(gateway.pending(), 0);
    assert_eq!(gateway.state(), BusState::Idle);

    let stats = gateway.stats();
    assert_eq!(stats.timeouts, 3);
    assert_eq!(stats.retries_exhausted, 1);
    assert_eq!(stats.frames_sent, 3);
}

#[test]
fn test_timeout_then_success_on_retry() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0005, 1, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();

    // First attempt goes unanswered.
    run_for(&mut gateway, &mut line, &mut sink, 40);
    assert_eq!(gateway.stats().timeouts, 1);
    assert!(!gateway.health().is_responding(0x11));

    // Second attempt is answered.
    run_for(&mut gateway, &mut line, &mut sink, 5);
    assert_eq!(gateway.state(), BusState::Waiting);
    line.feed(&[0x11, 0x03, 0x02, 0x00, 0x2A, 0xC2, 0x6E]);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    assert_eq!(sink.tcp.len(), 1);
    assert!(gateway.health().is_responding(0x11));
    assert_eq!(gateway.stats().responses_accepted, 1);
    assert_eq!(gateway.stats().frames_sent, 2);
}

#[test]
fn test_broadcast_is_fire_and_forget() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    // Write single register, broadcast: every slave acts, nobody answers.
    gateway
        .enqueue(tcp_request(0x0009, 2, 0x00, &[0x06, 0x00, 0x01, 0x00, 0xFF]))
        .unwrap();

    run_for(&mut gateway, &mut line, &mut sink, 10);

    assert_eq!(gateway.state(), BusState::Idle);
    assert_eq!(gateway.pending(), 0);
    assert_eq!(line.outbound.len(), 8);
    assert_eq!(line.outbound[0], 0x00);
    assert!(sink.tcp.is_empty());

    let stats = gateway.stats();
    assert_eq!(stats.broadcasts, 1);
    assert_eq!(stats.timeouts, 0);
    assert_eq!(stats.frames_sent, 1);
}

#[test]
fn test_raw_mode_forwards_frames_verbatim() {
    let mut config = fast_config();
    config.wire_mode = WireMode::Rtu;
    let mut gateway = Gateway::new(config).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    // Client supplies PDU + CRC; CRC covers unit id + PDU.
    let mut wire = vec![0x11, 0x03, 0x00, 0x00, 0x00, 0x01];
    crc::append(&mut wire);
    let peer: SocketAddr = "10.0.0.5:5020".parse().unwrap();
    gateway
        .enqueue(QueueEntry::new(
            RequestHeader {
                transaction_id: 0,
                client: ClientRef::UdpReply(peer),
                unit_id: 0x11,
            },
            Bytes::copy_from_slice(&wire[1..]),
        ))
        .unwrap();

    run_for(&mut gateway, &mut line, &mut sink, 5);
    // The line sees exactly the client's bytes, nothing recomputed.
    assert_eq!(line.outbound, wire);

    let response = [0x11, 0x03, 0x02, 0x00, 0x2A, 0xC2, 0x6E];
    line.feed(&response);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    // Response goes back verbatim to the UDP peer, CRC included.
    assert_eq!(sink.udp.len(), 1);
    let (got_peer, frame) = &sink.udp[0];
    assert_eq!(*got_peer, peer);
    assert_eq!(frame.as_slice(), &response);
}

#[test]
fn test_corrupt_response_is_discarded() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0002, 4, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    run_for(&mut gateway, &mut line, &mut sink, 5);
    assert_eq!(gateway.state(), BusState::Waiting);

    // CRC deliberately wrong: frame must not reach the client.
    line.feed(&[0x11, 0x03, 0x02, 0x00, 0x2A, 0xFF, 0xFF]);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    assert!(sink.tcp.is_empty());
    assert!(gateway.stats().frames_discarded >= 1);
    // Still waiting: the response timeout is the only escalation.
    assert_eq!(gateway.state(), BusState::Waiting);

    // Timeout eventually fires and the retry machinery takes over.
    run_for(&mut gateway, &mut line, &mut sink, 30);
    assert!(gateway.stats().timeouts >= 1);
}

#[test]
fn test_mid_frame_gap_invalidates_response() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0006, 4, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    run_for(&mut gateway, &mut line, &mut sink, 5);
    assert_eq!(gateway.state(), BusState::Waiting);

    // A CRC-valid response, but split by a pause well beyond the 750 µs
    // inter-character timeout at 115200 baud. Only the gap can fail it.
    let response = [0x11, 0x03, 0x02, 0x00, 0x2A, 0xC2, 0x6E];
    line.feed(&response[..4]);
    gateway.poll(&mut line, &mut sink).unwrap();
    thread::sleep(Duration::from_millis(2));
    line.feed(&response[4..]);
    gateway.poll(&mut line, &mut sink).unwrap();

    // Let the frame boundary elapse and the frame be evaluated.
    run_for(&mut gateway, &mut line, &mut sink, 5);

    assert!(sink.tcp.is_empty());
    assert_eq!(gateway.stats().frames_discarded, 1);
    // Still waiting: the response timeout is the only escalation.
    assert_eq!(gateway.pending(), 1);
}

#[test]
fn test_oversize_response_keeps_draining_but_is_discarded() {
    let mut config = fast_config();
    config.max_frame_size = 8;
    let mut gateway = Gateway::new(config).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0008, 4, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x06]))
        .unwrap();
    run_for(&mut gateway, &mut line, &mut sink, 5);
    let before = gateway.stats().bytes_received;

    // A CRC-valid 12-register read response, 17 bytes: beyond the 8-byte
    // frame cap but well-formed on the wire.
    let mut oversize = vec![0x11, 0x03, 0x0C];
    oversize.extend_from_slice(&[0x00; 12]);
    crc::append(&mut oversize);
    assert_eq!(oversize.len(), 17);
    line.feed(&oversize);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    // Every byte was drained off the line even after the buffer filled.
    assert_eq!(gateway.stats().bytes_received - before, 17);
    assert!(sink.tcp.is_empty());
    assert_eq!(gateway.stats().frames_discarded, 1);
    assert_eq!(gateway.pending(), 1);
}

#[test]
fn test_response_from_wrong_unit_is_discarded() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0003, 4, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    run_for(&mut gateway, &mut line, &mut sink, 5);

    // CRC-valid frame, but from unit 0x22 instead of 0x11.
    let mut stray = vec![0x22, 0x03, 0x02, 0x00, 0x2A];
    crc::append(&mut stray);
    line.feed(&stray);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    assert!(sink.tcp.is_empty());
    assert!(gateway.stats().frames_discarded >= 1);
    assert!(!gateway.health().is_responding(0x22));
}

#[test]
fn test_collision_aborts_send_and_retries_later() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    // One byte per poll keeps the machine in Sending across several polls.
    line.write_chunk = 1;

    gateway
        .enqueue(tcp_request(0x0007, 5, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();

    // First poll writes the first byte.
    gateway.poll(&mut line, &mut sink).unwrap();
    assert_eq!(gateway.state(), BusState::Sending);
    assert_eq!(line.outbound.len(), 1);

    // Foreign traffic appears mid-send: the transmission must be abandoned.
    line.feed(&[0xAA]);
    gateway.poll(&mut line, &mut sink).unwrap();
    assert_eq!(gateway.state(), BusState::Idle);
    assert_eq!(gateway.stats().collisions, 1);

    // The request was not lost: with the bus clear again it goes out whole.
    line.write_chunk = usize::MAX;
    run_for(&mut gateway, &mut line, &mut sink, 5);
    let tail = &line.outbound[line.outbound.len() - 8..];
    assert_eq!(tail[0], 0x11);
    assert!(crc::verify(tail));
    assert_eq!(gateway.state(), BusState::Waiting);
}

#[test]
fn test_queue_caps_reject_overflow() {
    let mut config = fast_config();
    config.max_queue_entries = 2;
    let mut gateway = Gateway::new(config).unwrap();

    gateway
        .enqueue(tcp_request(1, 0, 0x01, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    gateway
        .enqueue(tcp_request(2, 0, 0x02, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    let err = gateway
        .enqueue(tcp_request(3, 0, 0x03, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap_err();
    assert!(err.to_string().contains("queue"));
    assert_eq!(gateway.pending(), 2);
}

#[test]
fn test_requests_resolve_in_fifo_order() {
    let mut gateway = Gateway::new(fast_config()).unwrap();
    let mut line = ScriptedLine::new();
    let mut sink = RecordingSink::default();

    gateway
        .enqueue(tcp_request(0x0010, 1, 0x11, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();
    gateway
        .enqueue(tcp_request(0x0011, 2, 0x22, &[0x03, 0x00, 0x00, 0x00, 0x01]))
        .unwrap();

    run_for(&mut gateway, &mut line, &mut sink, 5);
    line.feed(&[0x11, 0x03, 0x02, 0x00, 0x2A, 0xC2, 0x6E]);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    let mut second = vec![0x22, 0x03, 0x02, 0x01, 0x00];
    crc::append(&mut second);
    run_for(&mut gateway, &mut line, &mut sink, 5);
    line.feed(&second);
    run_for(&mut gateway, &mut line, &mut sink, 5);

    assert_eq!(sink.tcp.len(), 2);
    assert_eq!(sink.tcp[0].0, 1);
    assert_eq!(sink.tcp[1].0, 2);
    // Each response carries its own original transaction id.
    assert_eq!(&sink.tcp[0].1[..2], &[0x00, 0x10]);
    assert_eq!(&sink.tcp[1].1[..2], &[0x00, 0x11]);
    assert!(gateway.health().is_responding(0x11));
    assert!(gateway.health().is_responding(0x22));
}
