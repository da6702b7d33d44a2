//! Per-window quality control.
//!
//! Each window a group streams gets its own handler that balances
//! three inputs: the group's tier (the ceiling), how covered the
//! window is, and the measured image rate it is producing. Tier moves
//! are one step at a time, except a covered window coming back into
//! full view, which snaps straight up to the group tier.

use std::time::{Duration, Instant};

use tracing::trace;

use crate::models::{Quality, TransferStatus, TransferStore, WindowCoverage, WindowImageTransfer};
use crate::settings::{CoverageQualityFunc, QualitySettings};

const DATA_RETENTION: Duration = Duration::from_secs(4);
/// With no transfers for this long, the window's rate counts as zero.
const NO_RECENT_UPDATE: Duration = Duration::from_secs(2);
/// Transfer samples must span this long before the rate is trusted.
const VALID_RATE_SPAN: Duration = Duration::from_secs(1);

/// Quality controller for one window within one client group.
#[derive(Debug)]
pub struct WindowQualityHandler {
    window_id: u32,
    /// The group tier; the handler never exceeds it.
    desired: Quality,
    current: Quality,
    coverage: WindowCoverage,
    coverage_quality: Option<Quality>,
    settings: QualitySettings,
    transfers: TransferStore,
    /// Last transfer or tier change; the quiet-window baseline.
    last_activity: Instant,
}

impl WindowQualityHandler {
    pub fn new(window_id: u32, desired: Quality, settings: QualitySettings, now: Instant) -> Self {
        Self {
            window_id,
            desired,
            current: desired,
            coverage: WindowCoverage::default(),
            coverage_quality: None,
            settings,
            transfers: TransferStore::new(DATA_RETENTION),
            last_activity: now,
        }
    }

    pub fn current_quality(&self) -> Quality {
        self.current
    }

    pub fn coverage(&self) -> WindowCoverage {
        self.coverage
    }

    /// The window's coverage changed; derive the coverage tier and
    /// snap upward if the window just became fully visible.
    pub fn set_window_coverage(&mut self, coverage: WindowCoverage, now: Instant) {
        if coverage == self.coverage {
            return;
        }
        self.coverage = coverage;

        let mut coverage_quality = match self.settings.coverage_quality_func {
            CoverageQualityFunc::Disabled => None,
            CoverageQualityFunc::Linear => Some(Quality::for_coverage_linear(coverage.coverage)),
            CoverageQualityFunc::Quadratic => {
                Some(Quality::for_coverage_quadratic(coverage.coverage))
            }
        };
        if coverage.mouse_over && self.settings.increase_quality_on_mouse_over {
            coverage_quality = Some(Quality::max());
        }
        self.coverage_quality = coverage_quality;

        // A window coming fully back into view skips the one-step climb.
        if let Some(cq) = self.coverage_quality {
            if cq.index == Quality::max().index && cq.index > self.current.index + 2 {
                self.set_current(self.desired, now);
            }
        }
    }

    /// Account one image transfer for this window.
    pub fn on_image_transfer(&mut self, transfer: &WindowImageTransfer, now: Instant) {
        if transfer.status == TransferStatus::Ignored {
            return;
        }
        self.transfers.record_at(now, transfer.size_kb);
        self.last_activity = now;
    }

    /// Re-evaluate the tier. Leaves it untouched while the measured
    /// rate is indeterminate.
    pub fn calculate_quality(&mut self, now: Instant) -> Quality {
        let Some(rate) = self.image_rate_mbps(now) else {
            return self.current;
        };

        // Coverage claims the tier only when the window is producing
        // more than its coverage tier would allow.
        let quality = match self.coverage_quality {
            Some(cq) if cq.max_mbps < rate => cq,
            _ => self.desired,
        };

        let next = if self.settings.limit_quality_by_data_rate {
            let rate_quality = Quality::for_image_mbps(rate, &quality, &self.current);
            if rate_quality.index < quality.index {
                rate_quality
            } else {
                quality
            }
        } else {
            quality
        };

        self.set_current(next, now);
        self.current
    }

    /// Measured image rate: `None` while indeterminate, zero once the
    /// window has been quiet long enough.
    fn image_rate_mbps(&mut self, now: Instant) -> Option<f32> {
        if let Some(rate) = self.transfers.rate_mbps_at(now, VALID_RATE_SPAN) {
            return Some(rate);
        }
        if self.transfers.is_empty() && now.duration_since(self.last_activity) > NO_RECENT_UPDATE {
            return Some(0.0);
        }
        None
    }

    fn set_current(&mut self, quality: Quality, now: Instant) {
        if quality.index == self.current.index {
            return;
        }
        trace!(
            window_id = self.window_id,
            from = self.current.index,
            to = quality.index,
            "window quality change"
        );
        self.current = quality;
        // A tier change invalidates the measurement window.
        self.transfers.clear();
        self.last_activity = now;
    }
}

// ── Tests ────────────────────────────────────────────────────────
