//! Per-client latency and bitrate estimation.
//!
//! Pongs give round-trip samples; data acks give effective transfer
//! rates once the round trip is subtracted out. The ratio between the
//! group's outbound image rate and the client's measured bitrate is
//! what drives tier migration.

use std::collections::VecDeque;

/// Mbps produced by `bytes` over `ms`: 7.8125 / 1024.
const MBPS_PER_BYTE_PER_MS: f32 = 0.007_629_39;

const LATENCY_RETENTION_MS: u64 = 10_000;
const BITRATE_RETENTION_MS: u64 = 4_000;
/// Bitrate samples must span this long before the mean is trusted.
const BITRATE_VALID_SPAN_MS: u64 = 2_000;

#[derive(Debug, Clone, Copy)]
struct Sample {
    timestamp_ms: u64,
    value: f32,
}

/// Rolling latency and bitrate statistics for one client.
#[derive(Debug)]
pub struct ClientBitrateCalculator {
    latency_samples: VecDeque<Sample>,
    bitrate_samples: VecDeque<Sample>,
    /// Outbound image rate of the client's group, refreshed on each
    /// verification sweep.
    group_image_mbps: f32,
}

impl ClientBitrateCalculator {
    pub fn new() -> Self {
        Self {
            latency_samples: VecDeque::with_capacity(32),
            bitrate_samples: VecDeque::with_capacity(32),
            group_image_mbps: 0.0,
        }
    }

    /// Record a round trip from a pong echoing `send_timestamp_ms`.
    pub fn on_pong(&mut self, send_timestamp_ms: u64, now_ms: u64) {
        let rtt_ms = now_ms.saturating_sub(send_timestamp_ms) as f32;
        self.latency_samples.push_back(Sample {
            timestamp_ms: now_ms,
            value: rtt_ms,
        });
        evict(&mut self.latency_samples, now_ms, LATENCY_RETENTION_MS);
    }

    /// Record a transfer rate from a data ack echoing
    /// `send_timestamp_ms` for `data_length` bytes.
    ///
    /// The raw turnaround includes one round trip, so the mean RTT
    /// (less one standard deviation) is subtracted before dividing.
    pub fn on_data_ack(&mut self, send_timestamp_ms: u64, data_length: u32, now_ms: u64) {
        let turnaround_ms = now_ms.saturating_sub(send_timestamp_ms) as f32;
        let (mean_rtt, sd_rtt) = self.latency_stats_ms();
        let transfer_ms = turnaround_ms - (mean_rtt - sd_rtt);
        if transfer_ms <= 0.0 {
            return;
        }
        self.bitrate_samples.push_back(Sample {
            timestamp_ms: now_ms,
            value: MBPS_PER_BYTE_PER_MS * data_length as f32 / transfer_ms,
        });
        evict(&mut self.bitrate_samples, now_ms, BITRATE_RETENTION_MS);
    }

    /// Mean and standard deviation of retained round trips, in ms.
    pub fn latency_stats_ms(&self) -> (f32, f32) {
        let n = self.latency_samples.len();
        if n == 0 {
            return (0.0, 0.0);
        }
        let mean = self.latency_samples.iter().map(|s| s.value).sum::<f32>() / n as f32;
        let variance = self
            .latency_samples
            .iter()
            .map(|s| (s.value - mean) * (s.value - mean))
            .sum::<f32>()
            / n as f32;
        (mean, variance.sqrt())
    }

    /// Mean measured bitrate, once enough samples span enough time.
    pub fn mean_bitrate_mbps(&mut self, now_ms: u64) -> Option<f32> {
        evict(&mut self.bitrate_samples, now_ms, BITRATE_RETENTION_MS);
        let n = self.bitrate_samples.len();
        if n < 2 {
            return None;
        }
        let span = self.bitrate_samples.back()?.timestamp_ms
            - self.bitrate_samples.front()?.timestamp_ms;
        if span < BITRATE_VALID_SPAN_MS {
            return None;
        }
        Some(self.bitrate_samples.iter().map(|s| s.value).sum::<f32>() / n as f32)
    }

    /// Group image rate divided by the client's measured bitrate.
    /// Near or above 1.0 means the pipe is saturated.
    pub fn bitrate_ratio(&mut self, now_ms: u64) -> Option<f32> {
        let bitrate = self.mean_bitrate_mbps(now_ms)?;
        if bitrate <= 0.0 {
            return None;
        }
        Some(self.group_image_mbps / bitrate)
    }

    pub fn set_group_image_mbps(&mut self, mbps: f32) {
        self.group_image_mbps = mbps;
    }

    /// Start a fresh measurement window against a new group's rate,
    /// keeping latency history.
    pub fn reset(&mut self, group_image_mbps: f32) {
        self.bitrate_samples.clear();
        self.group_image_mbps = group_image_mbps;
    }
}

impl Default for ClientBitrateCalculator {
    fn default() -> Self {
        Self::new()
    }
}

fn evict(samples: &mut VecDeque<Sample>, now_ms: u64, retention_ms: u64) {
    while let Some(front) = samples.front() {
        if now_ms.saturating_sub(front.timestamp_ms) > retention_ms {
            samples.pop_front();
        } else {
            break;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
