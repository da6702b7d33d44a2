//! A connected client and its keepalive state machine.

use std::time::{Duration, Instant};

use crate::client::bitrate::ClientBitrateCalculator;

/// A client owes us a pong within this long of a ping.
pub const PONG_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Quiet period between pings.
pub const PING_WAIT_INTERVAL: Duration = Duration::from_secs(2);

/// Keepalive state. Transitions are driven by the registry's ping
/// sweep and by incoming pongs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingStatus {
    /// Healthy; waiting for the next ping interval to elapse.
    WaitingToPing,
    /// The interval elapsed; the sweep should send a ping.
    RequiresPing,
    /// A ping is in flight.
    WaitingForPong,
    /// No pong within the timeout; the client is considered gone.
    PongTimeout,
}

/// One connected client.
#[derive(Debug)]
pub struct Client {
    id: u32,
    index: u64,
    ping_status: PingStatus,
    /// When the current ping state was entered.
    status_since: Instant,
    bitrate: ClientBitrateCalculator,
}

impl Client {
    pub fn new(id: u32, index: u64, now: Instant) -> Self {
        debug_assert_eq!(index.count_ones(), 1, "client index must be a single bit");
        Self {
            id,
            index,
            ping_status: PingStatus::WaitingToPing,
            status_since: now,
            bitrate: ClientBitrateCalculator::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    /// The client's single index bit within the 64-wide recipient mask.
    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn ping_status(&self) -> PingStatus {
        self.ping_status
    }

    pub fn bitrate(&mut self) -> &mut ClientBitrateCalculator {
        &mut self.bitrate
    }

    /// Advance the keepalive state machine for the current time.
    pub fn update_ping_status(&mut self, now: Instant) -> PingStatus {
        match self.ping_status {
            PingStatus::WaitingToPing
                if now.duration_since(self.status_since) >= PING_WAIT_INTERVAL =>
            {
                self.ping_status = PingStatus::RequiresPing;
            }
            PingStatus::WaitingForPong
                if now.duration_since(self.status_since) >= PONG_RESPONSE_TIMEOUT =>
            {
                self.ping_status = PingStatus::PongTimeout;
            }
            _ => {}
        }
        self.ping_status
    }

    pub fn on_ping_sent(&mut self, now: Instant) {
        self.ping_status = PingStatus::WaitingForPong;
        self.status_since = now;
    }

    /// A pong arrived echoing `send_timestamp_ms`.
    pub fn on_pong(&mut self, send_timestamp_ms: u64, now: Instant, now_ms: u64) {
        self.ping_status = PingStatus::WaitingToPing;
        self.status_since = now;
        self.bitrate.on_pong(send_timestamp_ms, now_ms);
    }

    /// A data ack arrived for `data_length` bytes sent at
    /// `send_timestamp_ms`.
    pub fn on_data_ack(&mut self, send_timestamp_ms: u64, data_length: u32, now_ms: u64) {
        self.bitrate.on_data_ack(send_timestamp_ms, data_length, now_ms);
    }
}

// ── Tests ────────────────────────────────────────────────────────
