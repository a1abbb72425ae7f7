//! # Request Queue
//!
//! Bounded FIFO of pending requests. Front-end collaborators (TCP/UDP
//! listeners, the internal scanner) append at the tail; the RTU transport
//! drains exclusively from the head, one transaction at a time. Both an
//! entry-count cap and a cumulative payload-byte cap bound memory use; when
//! either would be exceeded the enqueue is rejected and the request never
//! enters the core.
//!
//! The head entry's payload and retry counter stay stable and addressable
//! for the whole send/wait cycle; `pop_head` is the only way an entry leaves
//! the structure, so entries are never partially consumed or reordered.

use std::collections::VecDeque;
use std::net::SocketAddr;

use bytes::Bytes;

use crate::error::{GatewayError, GatewayResult};

/// Originating client of a request, which doubles as the reply destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRef {
    /// A specific open TCP connection, identified by the front-end's index.
    TcpConnection(usize),
    /// A UDP requester; the reply goes back to this remote address.
    UdpReply(SocketAddr),
    /// Internally generated scan probe; resolves silently into the health
    /// table, no response is emitted.
    InternalScan,
}

/// Fixed per-request metadata carried alongside the payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    /// Opaque transaction identifier echoed verbatim (big-endian) in the
    /// MBAP-style response header. Meaningless for raw RTU clients.
    pub transaction_id: u16,
    pub client: ClientRef,
    /// Target slave. 0 is broadcast: sent once, never awaited.
    pub unit_id: u8,
}

/// One pending request: header, PDU payload, and the retry counter the
/// transport advances on each attempt.
///
/// In RTU-over-TCP/UDP mode the payload already ends with the
/// client-supplied CRC16; in plain mode it is the bare PDU and the transport
/// appends a locally computed CRC at transmit time.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub header: RequestHeader,
    pub payload: Bytes,
    pub retries: u8,
}

impl QueueEntry {
    /// Create an entry with a zeroed retry counter.
    pub fn new(header: RequestHeader, payload: Bytes) -> Self {
        Self { header, payload, retries: 0 }
    }

    /// PDU function code, used when synthesizing an exception response.
    pub fn function_code(&self) -> u8 {
        self.payload.first().copied().unwrap_or(0)
    }
}

/// Bounded FIFO of [`QueueEntry`] values.
#[derive(Debug)]
pub struct RequestQueue {
    entries: VecDeque<QueueEntry>,
    queued_bytes: usize,
    max_entries: usize,
    max_bytes: usize,
    max_unit_id: u8,
}

impl RequestQueue {
    /// Create a queue bounded by `max_entries` entries and `max_bytes`
    /// cumulative payload bytes.
    pub fn new(max_entries: usize, max_bytes: usize, max_unit_id: u8) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_entries),
            queued_bytes: 0,
            max_entries,
            max_bytes,
            max_unit_id,
        }
    }

    /// Append an entry at the tail.
    ///
    /// Rejects with [`GatewayError::QueueFull`] when either cap would be
    /// exceeded and with [`GatewayError::InvalidUnitId`] for a target beyond
    /// the configured slave address range (0 stays valid as broadcast).
    pub fn enqueue(&mut self, entry: QueueEntry) -> GatewayResult<()> {
        if entry.header.unit_id > self.max_unit_id {
            return Err(GatewayError::InvalidUnitId {
                unit_id: entry.header.unit_id,
                max: self.max_unit_id,
            });
        }
        if self.entries.len() >= self.max_entries
            || self.queued_bytes + entry.payload.len() > self.max_bytes
        {
            return Err(GatewayError::QueueFull {
                entries: self.entries.len(),
                bytes: self.queued_bytes,
            });
        }
        self.queued_bytes += entry.payload.len();
        self.entries.push_back(entry);
        Ok(())
    }

    /// The entry currently eligible for transmission, if any.
    pub fn peek_head(&self) -> Option<&QueueEntry> {
        self.entries.front()
    }

    /// Remove and return the head entry. The only way an entry leaves the
    /// queue.
    pub fn pop_head(&mut self) -> Option<QueueEntry> {
        let entry = self.entries.pop_front();
        if let Some(ref entry) = entry {
            self.queued_bytes -= entry.payload.len();
        }
        entry
    }

    /// Retry counter of the head entry (0 when empty).
    pub fn retries_of_head(&self) -> u8 {
        self.entries.front().map(|e| e.retries).unwrap_or(0)
    }

    /// Increment the head entry's retry counter and return the new value.
    pub fn bump_head_retries(&mut self) -> u8 {
        match self.entries.front_mut() {
            Some(entry) => {
                entry.retries += 1;
                entry.retries
            }
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Cumulative payload bytes currently held.
    pub fn queued_bytes(&self) -> usize {
        self.queued_bytes
    }
}
