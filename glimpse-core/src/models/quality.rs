//! The fixed quality ladder.
//!
//! Ten tiers trade frame rate, encoder quality and bandwidth ceiling
//! against each other. Tier 1 is a barely-alive trickle; tier 10 is
//! full interactive quality. All adaptive logic moves along this
//! ladder one step at a time, except the coverage snap rule handled by
//! the per-window quality controller.

use std::time::Duration;

use tracing::warn;

/// Highest quality tier index.
pub const MAX_QUALITY_INDEX: u32 = 10;

/// One tier of the quality ladder.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quality {
    /// Tier index, 1..=10.
    pub index: u32,
    /// Target image updates per second for windows at this tier.
    pub image_fps: f32,
    /// RGB encoder quality, 0.0..=1.0.
    pub rgb_quality: f32,
    /// Alpha encoder quality, 0.0..=1.0.
    pub alpha_quality: f32,
    /// Bandwidth ceiling for a single window at this tier, in Mbps.
    pub max_mbps: f32,
}

const QUALITIES: [Quality; MAX_QUALITY_INDEX as usize] = [
    Quality { index: 1, image_fps: 0.5, rgb_quality: 0.4, alpha_quality: 0.5, max_mbps: 0.5 },
    Quality { index: 2, image_fps: 0.5, rgb_quality: 0.4, alpha_quality: 0.5, max_mbps: 0.75 },
    Quality { index: 3, image_fps: 1.0, rgb_quality: 0.5, alpha_quality: 0.6, max_mbps: 1.0 },
    Quality { index: 4, image_fps: 3.0, rgb_quality: 0.6, alpha_quality: 0.6, max_mbps: 2.0 },
    Quality { index: 5, image_fps: 5.0, rgb_quality: 0.6, alpha_quality: 0.7, max_mbps: 3.0 },
    Quality { index: 6, image_fps: 6.0, rgb_quality: 0.7, alpha_quality: 0.7, max_mbps: 4.0 },
    Quality { index: 7, image_fps: 8.0, rgb_quality: 0.7, alpha_quality: 0.8, max_mbps: 5.0 },
    Quality { index: 8, image_fps: 10.0, rgb_quality: 0.8, alpha_quality: 0.8, max_mbps: 6.0 },
    Quality { index: 9, image_fps: 12.0, rgb_quality: 0.9, alpha_quality: 0.9, max_mbps: 8.0 },
    Quality { index: 10, image_fps: 15.0, rgb_quality: 0.9, alpha_quality: 0.9, max_mbps: 12.0 },
];

impl Quality {
    /// Look up a tier by index. Out-of-range indices clamp to the
    /// nearest valid tier with a warning.
    pub fn for_index(index: u32) -> Quality {
        if !(1..=MAX_QUALITY_INDEX).contains(&index) {
            warn!(index, "quality index out of range, clamping");
        }
        QUALITIES[(index.clamp(1, MAX_QUALITY_INDEX) - 1) as usize]
    }

    /// The highest tier.
    pub fn max() -> Quality {
        QUALITIES[(MAX_QUALITY_INDEX - 1) as usize]
    }

    /// The lowest tier.
    pub fn min() -> Quality {
        QUALITIES[0]
    }

    /// Minimum interval between image updates at this tier.
    pub fn image_update_interval(&self) -> Duration {
        Duration::from_micros((1_000_000.0 / self.image_fps) as u64)
    }

    /// Map covered fraction to a tier: fully visible gives tier 10,
    /// fully hidden gives tier 1, linearly in between.
    pub fn for_coverage_linear(coverage: f32) -> Quality {
        Self::for_coverage_value(coverage)
    }

    /// Like [`for_coverage_linear`](Self::for_coverage_linear) but
    /// gentler on partially covered windows (quadratic falloff).
    pub fn for_coverage_quadratic(coverage: f32) -> Quality {
        Self::for_coverage_value(coverage * coverage)
    }

    fn for_coverage_value(value: f32) -> Quality {
        let max = MAX_QUALITY_INDEX as f32;
        let index = (max - (max - 0.01) * value.clamp(0.0, 1.0)).ceil() as u32;
        Quality::for_index(index)
    }

    /// One-step rate adaptation with hysteresis.
    ///
    /// Measured image rate above the desired tier's ceiling pushes the
    /// current tier down one step; rate below the previous tier's
    /// ceiling (or 80% of the ceiling at tier 1) lets it climb one
    /// step. Anywhere in between the tier holds.
    pub fn for_image_mbps(image_mbps: f32, desired: &Quality, current: &Quality) -> Quality {
        let lower_bound = if desired.index > 1 {
            QUALITIES[(desired.index - 2) as usize].max_mbps
        } else {
            0.8 * desired.max_mbps
        };

        if image_mbps > desired.max_mbps && current.index > 1 {
            Quality::for_index(current.index - 1)
        } else if image_mbps < lower_bound && current.index < MAX_QUALITY_INDEX {
            Quality::for_index(current.index + 1)
        } else {
            *current
        }
    }
}

impl PartialOrd for Quality {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.index.partial_cmp(&other.index)
    }
}

// ── Tests ────────────────────────────────────────────────────────
