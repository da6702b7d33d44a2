//! One window as seen by one client group.
//!
//! Tracks the window's pending damage, when its image was last
//! refreshed, and the checksums of the last full image so unchanged
//! grabs can be suppressed.

use std::time::{Duration, Instant};

use crate::client::quality_handler::WindowQualityHandler;
use crate::models::{Quality, Size, TransferStatus, WindowDamage, WindowImageTransfer, WindowCoverage};
use crate::settings::QualitySettings;

/// Re-evaluate a window's tier when it has not refreshed for this long.
const QUALITY_REFRESH_TIME: Duration = Duration::from_millis(500);

/// Per-group streaming state for one window.
#[derive(Debug)]
pub struct ClientWindow {
    id: u32,
    size: Size,
    damage: WindowDamage,
    quality_handler: WindowQualityHandler,
    refreshed_at: Option<Instant>,
    rgb_checksum: Option<u32>,
    alpha_checksum: Option<u32>,
}

impl ClientWindow {
    pub fn new(
        id: u32,
        desired: Quality,
        size: Size,
        settings: QualitySettings,
        now: Instant,
    ) -> Self {
        Self {
            id,
            size,
            damage: WindowDamage::new(id),
            quality_handler: WindowQualityHandler::new(id, desired, settings, now),
            refreshed_at: None,
            rgb_checksum: None,
            alpha_checksum: None,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn size(&self) -> Size {
        self.size
    }

    pub fn set_size(&mut self, size: Size) {
        self.size = size;
    }

    pub fn current_quality(&self) -> Quality {
        self.quality_handler.current_quality()
    }

    pub fn damage(&self) -> &WindowDamage {
        &self.damage
    }

    pub fn rgb_checksum(&self) -> Option<u32> {
        self.rgb_checksum
    }

    pub fn alpha_checksum(&self) -> Option<u32> {
        self.alpha_checksum
    }

    pub fn add_damage(&mut self, damage: &WindowDamage) {
        self.damage.merge(damage);
    }

    pub fn reset_damage(&mut self) {
        self.damage.reset();
    }

    pub fn set_coverage(&mut self, coverage: WindowCoverage, now: Instant) {
        self.quality_handler.set_window_coverage(coverage, now);
    }

    /// Damaged, and past the refresh interval of its current tier.
    pub fn requires_refresh(&self, now: Instant) -> bool {
        if !self.damage.has_damage() {
            return false;
        }
        match self.refreshed_at {
            None => true,
            Some(at) => {
                now.duration_since(at) >= self.quality_handler.current_quality().image_update_interval()
            }
        }
    }

    /// Account the outcome of a capture-and-publish cycle.
    pub fn on_image_transfer(&mut self, transfer: &WindowImageTransfer, now: Instant) {
        match transfer.status {
            TransferStatus::FullWindow => {
                self.rgb_checksum = transfer.rgb_checksum;
                self.alpha_checksum = transfer.alpha_checksum;
                self.refreshed_at = Some(now);
            }
            TransferStatus::SubWindow => {
                self.refreshed_at = Some(now);
            }
            TransferStatus::Ignored => {}
        }
        self.quality_handler.on_image_transfer(transfer, now);
    }

    /// Periodic tier re-evaluation for windows that are not refreshing.
    pub fn update_quality(&mut self, now: Instant) {
        let stale = match self.refreshed_at {
            None => true,
            Some(at) => now.duration_since(at) > QUALITY_REFRESH_TIME,
        };
        if stale {
            self.quality_handler.calculate_quality(now);
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Rectangle;

    fn window(now: Instant) -> ClientWindow {
        ClientWindow::new(
            7,
            Quality::for_index(10),
            Size::new(800, 600),
            QualitySettings::default(),
            now,
        )
    }

    fn full_transfer(rgb: u32, alpha: Option<u32>) -> WindowImageTransfer {
        WindowImageTransfer {
            window_id: 7,
            status: TransferStatus::FullWindow,
            size_kb: 120.0,
            rgb_checksum: Some(rgb),
            alpha_checksum: alpha,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn undamaged_window_never_needs_refresh() {
        let t0 = Instant::now();
        let w = window(t0);
        assert!(!w.requires_refresh(t0));
    }

    #[test]
    fn first_damage_refreshes_immediately() {
        let t0 = Instant::now();
        let mut w = window(t0);
        let mut damage = WindowDamage::new(7);
        damage.add_rectangle(Rectangle::new(0, 0, 10, 10));
        w.add_damage(&damage);
        assert!(w.requires_refresh(t0));
    }

    #[test]
    fn refresh_is_throttled_by_tier_interval() {
        let t0 = Instant::now();
        let mut w = window(t0);
        let mut damage = WindowDamage::new(7);
        damage.add_rectangle(Rectangle::new(0, 0, 10, 10));
        w.add_damage(&damage);

        w.on_image_transfer(&full_transfer(1, None), t0);
        w.add_damage(&damage);

        // Tier 10 allows 15 updates/s: ~66.7 ms apart.
        assert!(!w.requires_refresh(t0 + Duration::from_millis(30)));
        assert!(w.requires_refresh(t0 + Duration::from_millis(70)));
    }

    #[test]
    fn full_transfer_updates_checksums_sub_does_not() {
        let t0 = Instant::now();
        let mut w = window(t0);
        w.on_image_transfer(&full_transfer(0xAB, Some(0xCD)), t0);
        assert_eq!(w.rgb_checksum(), Some(0xAB));
        assert_eq!(w.alpha_checksum(), Some(0xCD));

        let sub = WindowImageTransfer {
            window_id: 7,
            status: TransferStatus::SubWindow,
            size_kb: 10.0,
            rgb_checksum: Some(0xEE),
            alpha_checksum: None,
            timestamp: Instant::now(),
        };
        w.on_image_transfer(&sub, t0 + Duration::from_secs(1));
        assert_eq!(w.rgb_checksum(), Some(0xAB));
    }

    #[test]
    fn ignored_transfer_leaves_refresh_time() {
        let t0 = Instant::now();
        let mut w = window(t0);
        w.on_image_transfer(&WindowImageTransfer::ignored(7), t0);
        let mut damage = WindowDamage::new(7);
        damage.add_rectangle(Rectangle::new(0, 0, 10, 10));
        w.add_damage(&damage);
        // Never refreshed, so new damage refreshes immediately.
        assert!(w.requires_refresh(t0 + Duration::from_millis(1)));
    }
}
