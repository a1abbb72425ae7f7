//! # Gateway Core
//!
//! The request-dispatch queue and the RTU transport state machine, held
//! together in one explicit context struct. A single logical thread of
//! control drives everything: each call to [`Gateway::poll`] runs the send
//! step, the receive step and timeout maintenance in that fixed order,
//! never blocking: every wait is an armed [`PollTimer`] checked on a later
//! poll. Because exactly one execution context ever touches the queue, the
//! health table and the serial line, no locking is involved anywhere;
//! correctness rests on the state machine discipline instead.
//!
//! ## Transaction cycle
//!
//! ```text
//!        queue non-empty                  tx drained
//! Idle ─────────────────► Sending ─────────────────► Delay
//!  ▲                         │                         │ t3.5 elapsed
//!  │        collision        ▼                         ▼
//!  │◄────────────────── (abort send)        broadcast? pop : arm timeout
//!  │                                                   │
//!  │   valid response / timeout+retry / exhausted      ▼
//!  └────────────────────────────────────────────── Waiting
//! ```
//!
//! The head of the queue is the only entry ever transmitted, and it is
//! removed exactly once: on a validated matching response, on retry
//! exhaustion, or (for broadcast) as soon as the post-send silence period
//! has elapsed.

use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use crate::config::{GatewayConfig, WireMode};
use crate::crc::{self, Crc16};
use crate::error::GatewayResult;
use crate::health::SlaveHealth;
use crate::queue::{ClientRef, QueueEntry, RequestHeader, RequestQueue};
use crate::router::{ResponseRouter, ResponseSink};
use crate::timer::PollTimer;
use crate::transport::{FrameBuffer, SerialLine};
use crate::BROADCAST_UNIT_ID;

/// Half-duplex serial line state. At most one transaction is in flight at
/// any time; the machine cycles continuously while the queue is non-empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    /// No transmission in progress.
    Idle,
    /// Streaming the head entry onto the line as buffer space allows.
    Sending,
    /// Frame fully drained; observing the mandatory inter-frame silence.
    Delay,
    /// Response timeout armed, listening for the slave.
    Waiting,
}

/// Receive-path fault flags. Locally absorbed: a flagged frame is silently
/// discarded at evaluation, leaving the retry/timeout policy as the only
/// escalation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RxFault {
    /// Gap between consecutive bytes exceeded the inter-character timeout.
    CharacterGap,
    /// Frame outgrew the configured maximum size.
    Oversize,
}

/// Communication counters, in the spirit of a transport statistics block.
#[derive(Debug, Clone, Default)]
pub struct GatewayStats {
    pub frames_sent: u64,
    pub responses_accepted: u64,
    pub frames_discarded: u64,
    pub timeouts: u64,
    pub retries_exhausted: u64,
    pub collisions: u64,
    pub broadcasts: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

/// Gateway context: request queue, slave health table, transport state and
/// armed timers, all passed explicitly into each poll step.
pub struct Gateway {
    config: GatewayConfig,
    queue: RequestQueue,
    health: SlaveHealth,
    router: ResponseRouter,
    state: BusState,

    // Transmit side
    tx_frame: Vec<u8>,
    tx_pos: usize,
    delay_timer: PollTimer,
    response_timer: PollTimer,

    // Receive side
    rx: FrameBuffer,
    rx_fault: Option<RxFault>,
    assembly_timer: PollTimer,
    last_rx_byte: Option<Instant>,

    stats: GatewayStats,
}

impl Gateway {
    /// Create a gateway from a validated configuration.
    pub fn new(config: GatewayConfig) -> GatewayResult<Self> {
        config.validate()?;
        let queue = RequestQueue::new(
            config.max_queue_entries,
            config.max_queue_bytes,
            config.max_unit_id,
        );
        let rx = FrameBuffer::new(config.max_frame_size);
        let router = ResponseRouter::new(config.wire_mode);
        let tx_capacity = config.max_frame_size;

        Ok(Self {
            config,
            queue,
            health: SlaveHealth::new(),
            router,
            state: BusState::Idle,
            tx_frame: Vec::with_capacity(tx_capacity),
            tx_pos: 0,
            delay_timer: PollTimer::new(),
            response_timer: PollTimer::new(),
            rx,
            rx_fault: None,
            assembly_timer: PollTimer::new(),
            last_rx_byte: None,
            stats: GatewayStats::default(),
        })
    }

    /// Append a request at the tail of the queue.
    ///
    /// Front-end collaborators call this on request arrival; rejection
    /// (queue full, invalid unit id) means the request never entered the
    /// core and the caller answers the client itself.
    pub fn enqueue(&mut self, entry: QueueEntry) -> GatewayResult<()> {
        self.queue.enqueue(entry)
    }

    /// Enqueue an internally generated scan probe for `unit_id` (read one
    /// holding register at address 0). The result only updates the health
    /// table; no response frame is emitted.
    pub fn enqueue_probe(&mut self, unit_id: u8) -> GatewayResult<()> {
        const PROBE_PDU: [u8; 5] = [0x03, 0x00, 0x00, 0x00, 0x01];

        let mut payload = PROBE_PDU.to_vec();
        if self.config.wire_mode == WireMode::Rtu {
            // Raw mode payloads carry their own CRC over unit id + PDU.
            let crc = {
                let mut engine = Crc16::new();
                engine.update(unit_id);
                engine.update_slice(&PROBE_PDU);
                engine.value()
            };
            payload.extend_from_slice(&crc.to_le_bytes());
        }

        self.enqueue(QueueEntry::new(
            RequestHeader {
                transaction_id: 0,
                client: ClientRef::InternalScan,
                unit_id,
            },
            Bytes::from(payload),
        ))
    }

    /// Run one poll cycle: send step, receive step, timeout maintenance,
    /// always in that order. Never blocks.
    ///
    /// The inter-character gap is measured between reads that return data,
    /// so time the caller spends between polls counts as line silence. A
    /// frame whose arrival straddles two polls gets flagged as gapped when
    /// the poll period exceeds [`SerialConfig::inter_char_timeout`] (750 µs
    /// above 19200 baud); callers should poll at least that often while a
    /// response is expected. A frame that arrives wholly between two polls
    /// is drained in one read and measures no gap.
    ///
    /// [`SerialConfig::inter_char_timeout`]: crate::config::SerialConfig::inter_char_timeout
    pub fn poll(
        &mut self,
        line: &mut dyn SerialLine,
        sink: &mut dyn ResponseSink,
    ) -> GatewayResult<()> {
        self.send_step(line)?;
        self.recv_step(line, sink)?;
        self.check_response_timeout(sink);
        Ok(())
    }

    pub fn state(&self) -> BusState {
        self.state
    }

    pub fn stats(&self) -> &GatewayStats {
        &self.stats
    }

    pub fn health(&self) -> &SlaveHealth {
        &self.health
    }

    /// Number of requests currently queued (including any in flight).
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    // ---- send path -------------------------------------------------------

    fn send_step(&mut self, line: &mut dyn SerialLine) -> GatewayResult<()> {
        match self.state {
            BusState::Idle => {
                if self.queue.is_empty() {
                    return Ok(());
                }
                self.begin_send();
                self.advance_send(line)
            }
            BusState::Sending => self.advance_send(line),
            BusState::Delay => {
                if self.delay_timer.elapsed() {
                    self.delay_timer.cancel();
                    self.finish_delay();
                }
                Ok(())
            }
            BusState::Waiting => Ok(()),
        }
    }

    /// Frame the head entry for transmission and enter `Sending`.
    fn begin_send(&mut self) {
        let Some(head) = self.queue.peek_head() else {
            return;
        };

        self.tx_frame.clear();
        self.tx_frame.push(head.header.unit_id);
        self.tx_frame.extend_from_slice(&head.payload);

        if self.config.wire_mode == WireMode::Tcp {
            // Plain mode: the network side had no CRC, compute it here.
            let mut engine = Crc16::new();
            engine.update_slice(&self.tx_frame);
            self.tx_frame.extend_from_slice(&engine.value().to_le_bytes());
        }

        self.tx_pos = 0;
        self.state = BusState::Sending;
        trace!(
            unit_id = head.header.unit_id,
            frame = %hex::encode_upper(&self.tx_frame),
            "begin transmit"
        );
    }

    /// Push pending bytes into the transmit buffer; once everything has
    /// drained onto the line, arm the inter-frame delay.
    fn advance_send(&mut self, line: &mut dyn SerialLine) -> GatewayResult<()> {
        if self.tx_pos < self.tx_frame.len() {
            let written = line.write_some(&self.tx_frame[self.tx_pos..])?;
            self.tx_pos += written;
        }
        if self.tx_pos == self.tx_frame.len() && line.tx_idle()? {
            self.delay_timer.arm(self.config.serial.inter_frame_delay());
            self.state = BusState::Delay;
        }
        Ok(())
    }

    /// The inter-frame silence has been observed: account for the frame,
    /// then either retire a broadcast or start awaiting a response.
    fn finish_delay(&mut self) {
        self.stats.frames_sent += 1;
        self.stats.bytes_sent += self.tx_frame.len() as u64;

        let unit_id = self.tx_frame.first().copied().unwrap_or(0);
        if unit_id == BROADCAST_UNIT_ID {
            // No response expected, no retries, no health update.
            self.stats.broadcasts += 1;
            self.queue.pop_head();
            self.state = BusState::Idle;
            debug!("broadcast sent and retired");
        } else {
            let attempt = self.queue.bump_head_retries();
            self.response_timer.arm(self.config.response_timeout());
            self.state = BusState::Waiting;
            trace!(unit_id, attempt, "awaiting response");
        }
    }

    /// Inbound traffic while we are still transmitting means the bus is not
    /// ours; abort and let the head entry go again on a later poll.
    fn abort_send_on_collision(&mut self) {
        self.stats.collisions += 1;
        self.tx_pos = 0;
        self.state = BusState::Idle;
        warn!("inbound traffic during transmit, send aborted");
    }

    // ---- receive path ----------------------------------------------------

    fn recv_step(
        &mut self,
        line: &mut dyn SerialLine,
        sink: &mut dyn ResponseSink,
    ) -> GatewayResult<()> {
        let mut chunk = [0u8; 64];
        loop {
            let n = line.read_some(&mut chunk)?;
            if n == 0 {
                break;
            }
            self.stats.bytes_received += n as u64;

            if self.state == BusState::Sending {
                self.abort_send_on_collision();
                continue;
            }
            self.absorb_bytes(&chunk[..n]);
        }

        if !self.rx.is_empty() && self.assembly_timer.elapsed() {
            self.evaluate_frame(sink);
        }
        Ok(())
    }

    /// Fold newly arrived bytes into the frame buffer, tracking the
    /// inter-character gap and overflow as local fault flags.
    fn absorb_bytes(&mut self, data: &[u8]) {
        let now = Instant::now();

        // The gap check fires only when another byte actually arrives; a
        // transmission that stalls forever is cleaned up by the response
        // timeout instead.
        if !self.rx.is_empty() && self.rx_fault.is_none() {
            if let Some(last) = self.last_rx_byte {
                if now.duration_since(last) > self.config.serial.inter_char_timeout() {
                    self.rx_fault = Some(RxFault::CharacterGap);
                }
            }
        }

        for &byte in data {
            if !self.rx.push(byte) && self.rx_fault.is_none() {
                // Keep draining the line, but the frame is already lost.
                self.rx_fault = Some(RxFault::Oversize);
            }
        }

        self.last_rx_byte = Some(now);
        self.assembly_timer.arm(self.config.serial.inter_frame_delay());
    }

    /// The inter-frame gap has elapsed with data buffered: accept the frame
    /// iff it is unflagged, CRC-clean, from the awaited unit, and we are in
    /// fact waiting. Anything else is silently discarded.
    fn evaluate_frame(&mut self, sink: &mut dyn ResponseSink) {
        let awaited_unit = self.queue.peek_head().map(|e| e.header.unit_id);
        let accepted = self.rx_fault.is_none()
            && self.state == BusState::Waiting
            && crc::verify(self.rx.as_slice())
            && self.rx.as_slice().first().copied() == awaited_unit;

        if accepted {
            if let Some(entry) = self.queue.pop_head() {
                self.health.mark_responding(entry.header.unit_id);
                self.stats.responses_accepted += 1;
                self.response_timer.cancel();
                self.state = BusState::Idle;
                debug!(
                    unit_id = entry.header.unit_id,
                    frame = %hex::encode_upper(self.rx.as_slice()),
                    "response accepted"
                );
                self.router.route_response(&entry.header, self.rx.as_slice(), sink);
            }
        } else {
            self.stats.frames_discarded += 1;
            debug!(
                state = ?self.state,
                fault = ?self.rx_fault,
                frame = %hex::encode_upper(self.rx.as_slice()),
                "frame discarded"
            );
        }

        self.rx.clear();
        self.rx_fault = None;
        self.assembly_timer.cancel();
        self.last_rx_byte = None;
    }

    // ---- maintenance -----------------------------------------------------

    /// Response timeout handling: mark the slave, then either retry (the
    /// entry stays at the head and goes out again from `Idle`) or escalate
    /// into a synthesized 0x0B exception once retries are exhausted.
    fn check_response_timeout(&mut self, sink: &mut dyn ResponseSink) {
        if self.state != BusState::Waiting || !self.response_timer.elapsed() {
            return;
        }
        self.response_timer.cancel();
        self.stats.timeouts += 1;

        let Some(unit_id) = self.queue.peek_head().map(|e| e.header.unit_id) else {
            self.state = BusState::Idle;
            return;
        };
        self.health.mark_unresponsive(unit_id);

        if self.queue.retries_of_head() >= self.config.max_retries {
            if let Some(entry) = self.queue.pop_head() {
                self.stats.retries_exhausted += 1;
                warn!(
                    unit_id,
                    attempts = entry.retries,
                    "no response, retries exhausted, synthesizing exception 0x0B"
                );
                self.router
                    .route_target_failed(&entry.header, entry.function_code(), sink);
            }
        } else {
            debug!(
                unit_id,
                attempt = self.queue.retries_of_head(),
                "response timeout, retrying"
            );
        }
        self.state = BusState::Idle;
    }
}
