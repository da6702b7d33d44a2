//! Engine tuning knobs.
//!
//! Plain structs handed down at construction time; nothing in the
//! library reads configuration globally.

use std::time::Duration;

/// How window coverage maps onto a quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CoverageQualityFunc {
    /// Coverage does not affect quality.
    Disabled,
    /// Tier drops linearly with covered fraction.
    Linear,
    /// Tier drops with the square of the covered fraction, gentler on
    /// partially covered windows.
    #[default]
    Quadratic,
}

/// Per-window quality control settings.
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    /// Snap a window to full quality while the pointer is over it.
    pub increase_quality_on_mouse_over: bool,
    /// Coverage-to-tier mapping.
    pub coverage_quality_func: CoverageQualityFunc,
    /// Let the measured image rate pull the tier down.
    pub limit_quality_by_data_rate: bool,
}

impl Default for QualitySettings {
    fn default() -> Self {
        Self {
            increase_quality_on_mouse_over: true,
            coverage_quality_func: CoverageQualityFunc::Quadratic,
            limit_quality_by_data_rate: true,
        }
    }
}

/// Controller loop settings.
#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    /// Target tick rate of the main loop.
    pub tick_rate: u32,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self { tick_rate: 60 }
    }
}

impl ControllerSettings {
    /// Interval between ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.tick_rate.max(1) as u64)
    }
}
