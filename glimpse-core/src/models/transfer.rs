//! Transfer accounting: how much image data went out, and when.
//!
//! Rolling sample stores back both the per-window and per-group image
//! rate calculations. A rate is only trusted once samples span enough
//! wall time; before that the callers leave their tier untouched.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Mbps produced by `size_kb` kilobytes over `duration_ms` milliseconds.
/// 1 KB/ms is 8192000 bits/s, or 7.8125 Mbps with 1 Mb = 1024 × 1024 bits.
pub const MBPS_PER_KB_PER_MS: f32 = 7.8125;

/// One outbound transfer sample.
#[derive(Debug, Clone, Copy)]
pub struct TransferData {
    pub timestamp: Instant,
    pub size_kb: f32,
}

/// Rolling window of transfer samples.
#[derive(Debug)]
pub struct TransferStore {
    samples: VecDeque<TransferData>,
    retention: Duration,
}

impl TransferStore {
    pub fn new(retention: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(64),
            retention,
        }
    }

    pub fn record(&mut self, size_kb: f32) {
        self.record_at(Instant::now(), size_kb);
    }

    /// Record with an explicit timestamp (useful for testing).
    pub fn record_at(&mut self, when: Instant, size_kb: f32) {
        self.samples.push_back(TransferData {
            timestamp: when,
            size_kb,
        });
        self.evict(when);
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    /// Average rate in Mbps over the retained samples, measured from the
    /// oldest sample to `now`. `None` until the samples span at least
    /// `min_span`.
    pub fn rate_mbps_at(&mut self, now: Instant, min_span: Duration) -> Option<f32> {
        self.evict(now);
        let first = self.samples.front()?;
        let duration = now.duration_since(first.timestamp);
        if duration < min_span {
            return None;
        }
        let total_kb: f32 = self.samples.iter().map(|s| s.size_kb).sum();
        Some(MBPS_PER_KB_PER_MS * total_kb / duration.as_millis() as f32)
    }

    fn evict(&mut self, now: Instant) {
        while let Some(front) = self.samples.front() {
            if now.duration_since(front.timestamp) > self.retention {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

// ── WindowImageTransfer ──────────────────────────────────────────

/// What actually went over the wire for one window update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    /// The whole window image was sent.
    FullWindow,
    /// Only damaged sub-rectangles were sent.
    SubWindow,
    /// Content was unchanged; nothing was sent.
    Ignored,
}

/// Result of one window capture-and-publish cycle.
#[derive(Debug, Clone)]
pub struct WindowImageTransfer {
    pub window_id: u32,
    pub status: TransferStatus,
    pub size_kb: f32,
    pub rgb_checksum: Option<u32>,
    pub alpha_checksum: Option<u32>,
    pub timestamp: Instant,
}

impl WindowImageTransfer {
    pub fn ignored(window_id: u32) -> Self {
        Self {
            window_id,
            status: TransferStatus::Ignored,
            size_kb: 0.0,
            rgb_checksum: None,
            alpha_checksum: None,
            timestamp: Instant::now(),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_invalid_before_min_span() {
        let mut store = TransferStore::new(Duration::from_secs(4));
        let t0 = Instant::now();
        store.record_at(t0, 100.0);
        store.record_at(t0 + Duration::from_millis(500), 100.0);
        assert!(
            store
                .rate_mbps_at(t0 + Duration::from_millis(500), Duration::from_secs(1))
                .is_none()
        );
    }

    #[test]
    fn rate_over_two_seconds() {
        let mut store = TransferStore::new(Duration::from_secs(4));
        let t0 = Instant::now();
        store.record_at(t0, 512.0);
        store.record_at(t0 + Duration::from_secs(1), 512.0);
        let rate = store
            .rate_mbps_at(t0 + Duration::from_secs(2), Duration::from_secs(1))
            .unwrap();
        // 1024 KB over 2000 ms = 4 Mbps.
        assert!((rate - 4.0).abs() < 0.01, "rate = {rate}");
    }

    #[test]
    fn eviction_drops_old_samples() {
        let mut store = TransferStore::new(Duration::from_secs(4));
        let t0 = Instant::now();
        store.record_at(t0, 1000.0);
        store.record_at(t0 + Duration::from_secs(5), 10.0);
        // Only the recent sample survives, and alone it spans zero time.
        assert!(
            store
                .rate_mbps_at(t0 + Duration::from_secs(5), Duration::from_secs(1))
                .is_none()
        );
        assert!(!store.is_empty());
    }

    #[test]
    fn empty_store_has_no_rate() {
        let mut store = TransferStore::new(Duration::from_secs(4));
        assert!(store.rate_mbps_at(Instant::now(), Duration::ZERO).is_none());
    }
}
