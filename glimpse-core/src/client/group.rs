//! A group of clients sharing one quality tier.
//!
//! Clients at the same tier receive identical image streams, so the
//! engine captures each damaged window once per group and addresses
//! the frame with the group's combined index mask.

use std::time::{Duration, Instant};

use tracing::{debug, error};

use crate::capture::{WindowCapture, WindowCaptureRequest};
use crate::client::client::Client;
use crate::client::window::ClientWindow;
use crate::models::{Quality, TransferStore, WindowDamage, WindowVisibility};
use crate::settings::QualitySettings;

const TRANSFER_RETENTION: Duration = Duration::from_secs(4);
/// Group transfer samples must span this long before the rate counts.
const TRANSFER_VALID_SPAN: Duration = Duration::from_secs(2);

/// All clients pinned to one quality tier, and the windows streamed to
/// them.
#[derive(Debug)]
pub struct ClientGroup {
    quality: Quality,
    settings: QualitySettings,
    client_ids: Vec<u32>,
    index_mask: u64,
    windows: Vec<ClientWindow>,
    transfers: TransferStore,
}

impl ClientGroup {
    pub fn new(quality: Quality, settings: QualitySettings) -> Self {
        Self {
            quality,
            settings,
            client_ids: Vec::new(),
            index_mask: 0,
            windows: Vec::new(),
            transfers: TransferStore::new(TRANSFER_RETENTION),
        }
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    /// Combined index bits of all member clients.
    pub fn index_mask(&self) -> u64 {
        self.index_mask
    }

    pub fn is_empty(&self) -> bool {
        self.client_ids.is_empty()
    }

    pub fn client_ids(&self) -> &[u32] {
        &self.client_ids
    }

    pub fn contains(&self, client_id: u32) -> bool {
        self.client_ids.contains(&client_id)
    }

    /// Add a member. Its bitrate measurements restart against this
    /// group's current image rate.
    pub fn add_client(&mut self, client: &mut Client, now: Instant) {
        debug!(
            client_id = format_args!("{:#010x}", client.id()),
            quality = self.quality.index,
            "client joins group"
        );
        self.index_mask |= client.index();
        self.client_ids.push(client.id());
        let mbps = self.average_image_mbps(now);
        client.bitrate().reset(mbps);
    }

    pub fn remove_client(&mut self, client_id: u32, client_index: u64) {
        self.client_ids.retain(|&id| id != client_id);
        self.index_mask &= !client_index;
    }

    /// Reconcile the group's window set with the currently visible
    /// windows, then re-evaluate every window's tier.
    pub fn update_visible_windows(&mut self, visible: &[WindowVisibility], now: Instant) {
        self.windows
            .retain(|w| visible.iter().any(|v| v.window_id == w.id()));

        for visibility in visible {
            match self
                .windows
                .iter_mut()
                .find(|w| w.id() == visibility.window_id)
            {
                Some(window) => {
                    window.set_size(visibility.rectangle.size);
                    window.set_coverage(visibility.coverage, now);
                }
                None => {
                    let mut window = ClientWindow::new(
                        visibility.window_id,
                        self.quality,
                        visibility.rectangle.size,
                        self.settings,
                        now,
                    );
                    window.set_coverage(visibility.coverage, now);
                    self.windows.push(window);
                }
            }
        }

        for window in &mut self.windows {
            window.update_quality(now);
        }
    }

    /// Fold a damage report into the matching window, if the group
    /// streams it.
    pub fn add_window_damage(&mut self, damage: &WindowDamage) {
        if let Some(window) = self
            .windows
            .iter_mut()
            .find(|w| w.id() == damage.window_id())
        {
            window.add_damage(damage);
        }
    }

    /// Capture and publish every damaged window that is due for a
    /// refresh at its tier. Damage is consumed whether or not the
    /// capture succeeds.
    pub fn handle_window_updates(&mut self, capture: &mut dyn WindowCapture, now: Instant) {
        if self.client_ids.is_empty() {
            return;
        }

        let mut total_kb = 0.0f32;
        for window in &mut self.windows {
            if !window.requires_refresh(now) {
                continue;
            }
            let quality = window.current_quality();
            let request = WindowCaptureRequest {
                window_id: window.id(),
                window_size: window.size(),
                damage: window.damage(),
                rgb_checksum: window.rgb_checksum(),
                alpha_checksum: window.alpha_checksum(),
            };
            match capture.capture(request, &quality, self.index_mask) {
                Ok(transfer) => {
                    total_kb += transfer.size_kb;
                    window.on_image_transfer(&transfer, now);
                }
                Err(e) => {
                    error!(window_id = window.id(), error = %e, "window capture failed");
                }
            }
            window.reset_damage();
        }

        if total_kb > 0.0 {
            self.transfers.record_at(now, total_kb);
        }
    }

    /// Average outbound image rate of the whole group, or zero while
    /// unknown.
    pub fn average_image_mbps(&mut self, now: Instant) -> f32 {
        self.transfers
            .rate_mbps_at(now, TRANSFER_VALID_SPAN)
            .unwrap_or(0.0)
    }

    #[cfg(test)]
    pub(crate) fn window(&self, window_id: u32) -> Option<&ClientWindow> {
        self.windows.iter().find(|w| w.id() == window_id)
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::CaptureError;
    use crate::models::{
        Rectangle, TransferStatus, WindowCoverage, WindowImageTransfer,
    };

    struct StubCapture {
        calls: Vec<(u32, u64, bool)>,
        size_kb: f32,
        fail: bool,
    }

    impl StubCapture {
        fn new(size_kb: f32) -> Self {
            Self {
                calls: Vec::new(),
                size_kb,
                fail: false,
            }
        }
    }

    impl WindowCapture for StubCapture {
        fn capture(
            &mut self,
            request: WindowCaptureRequest<'_>,
            _quality: &Quality,
            recipient_mask: u64,
        ) -> Result<WindowImageTransfer, CaptureError> {
            let full = request.damage.is_full_window(request.window_size);
            self.calls.push((request.window_id, recipient_mask, full));
            if self.fail {
                return Err(CaptureError::WindowGone(request.window_id));
            }
            Ok(WindowImageTransfer {
                window_id: request.window_id,
                status: if full {
                    TransferStatus::FullWindow
                } else {
                    TransferStatus::SubWindow
                },
                size_kb: self.size_kb,
                rgb_checksum: Some(1),
                alpha_checksum: None,
                timestamp: Instant::now(),
            })
        }
    }

    fn visibility(window_id: u32, width: i32, height: i32) -> WindowVisibility {
        WindowVisibility::new(
            window_id,
            Rectangle::new(0, 0, width, height),
            WindowCoverage::default(),
        )
    }

    fn group_with_client(client: &mut Client, now: Instant) -> ClientGroup {
        let mut group = ClientGroup::new(Quality::for_index(10), QualitySettings::default());
        group.add_client(client, now);
        group
    }

    #[test]
    fn mask_tracks_membership() {
        let t0 = Instant::now();
        let mut a = Client::new(1, 0x1, t0);
        let mut b = Client::new(2, 0x4, t0);
        let mut group = ClientGroup::new(Quality::for_index(5), QualitySettings::default());
        group.add_client(&mut a, t0);
        group.add_client(&mut b, t0);
        assert_eq!(group.index_mask(), 0x5);

        group.remove_client(1, 0x1);
        assert_eq!(group.index_mask(), 0x4);
        assert!(!group.contains(1));
        assert!(group.contains(2));
    }

    #[test]
    fn damage_is_consumed_even_on_capture_failure() {
        let t0 = Instant::now();
        let mut client = Client::new(1, 0x1, t0);
        let mut group = group_with_client(&mut client, t0);
        group.update_visible_windows(&[visibility(10, 400, 300)], t0);

        let mut damage = WindowDamage::new(10);
        damage.add_rectangle(Rectangle::new(0, 0, 10, 10));
        group.add_window_damage(&damage);

        let mut capture = StubCapture::new(100.0);
        capture.fail = true;
        group.handle_window_updates(&mut capture, t0);
        assert_eq!(capture.calls.len(), 1);
        assert!(!group.window(10).unwrap().damage().has_damage());

        // Nothing left to do next cycle.
        group.handle_window_updates(&mut capture, t0 + Duration::from_secs(1));
        assert_eq!(capture.calls.len(), 1);
    }

    #[test]
    fn capture_carries_group_mask_and_fullness() {
        let t0 = Instant::now();
        let mut a = Client::new(1, 0x2, t0);
        let mut b = Client::new(2, 0x8, t0);
        let mut group = ClientGroup::new(Quality::for_index(10), QualitySettings::default());
        group.add_client(&mut a, t0);
        group.add_client(&mut b, t0);
        group.update_visible_windows(&[visibility(10, 400, 300)], t0);

        let mut full = WindowDamage::new(10);
        full.add_rectangle(Rectangle::new(0, 0, 400, 300));
        group.add_window_damage(&full);

        let mut capture = StubCapture::new(50.0);
        group.handle_window_updates(&mut capture, t0);
        assert_eq!(capture.calls, vec![(10, 0xA, true)]);
    }

    #[test]
    fn damage_for_unknown_window_is_dropped() {
        let t0 = Instant::now();
        let mut client = Client::new(1, 0x1, t0);
        let mut group = group_with_client(&mut client, t0);
        group.update_visible_windows(&[visibility(10, 400, 300)], t0);

        let mut damage = WindowDamage::new(99);
        damage.add_rectangle(Rectangle::new(0, 0, 5, 5));
        group.add_window_damage(&damage);

        let mut capture = StubCapture::new(10.0);
        group.handle_window_updates(&mut capture, t0);
        assert!(capture.calls.is_empty());
    }

    #[test]
    fn vanished_windows_are_dropped() {
        let t0 = Instant::now();
        let mut client = Client::new(1, 0x1, t0);
        let mut group = group_with_client(&mut client, t0);
        group.update_visible_windows(&[visibility(10, 400, 300), visibility(11, 100, 100)], t0);
        assert!(group.window(10).is_some());
        assert!(group.window(11).is_some());

        group.update_visible_windows(&[visibility(11, 120, 100)], t0 + Duration::from_secs(1));
        assert!(group.window(10).is_none());
        assert_eq!(group.window(11).unwrap().size().width, 120);
    }

    #[test]
    fn group_rate_needs_a_two_second_span() {
        let t0 = Instant::now();
        let mut client = Client::new(1, 0x1, t0);
        let mut group = group_with_client(&mut client, t0);
        group.update_visible_windows(&[visibility(10, 400, 300)], t0);

        let mut capture = StubCapture::new(512.0);
        let mut now = t0;
        for _ in 0..4 {
            let mut damage = WindowDamage::new(10);
            damage.add_rectangle(Rectangle::new(0, 0, 400, 300));
            group.add_window_damage(&damage);
            group.handle_window_updates(&mut capture, now);
            now += Duration::from_secs(1);
        }
        // 4 × 512 KB, oldest 3 s before `now`.
        let mbps = group.average_image_mbps(now);
        assert!(mbps > 0.0);
    }

    #[test]
    fn updates_skipped_for_empty_group() {
        let t0 = Instant::now();
        let mut group = ClientGroup::new(Quality::for_index(10), QualitySettings::default());
        group.update_visible_windows(&[visibility(10, 400, 300)], t0);
        let mut damage = WindowDamage::new(10);
        damage.add_rectangle(Rectangle::new(0, 0, 10, 10));
        group.add_window_damage(&damage);

        let mut capture = StubCapture::new(10.0);
        group.handle_window_updates(&mut capture, t0);
        assert!(capture.calls.is_empty());
    }
}
