//! Client registry: lifecycle, index allocation, groups and tier
//! migration.
//!
//! At most 64 clients can be connected; each holds one bit of the
//! recipient mask. New clients start in the top-tier group and drift
//! down (and back up) as their measured bitrate dictates. Quality
//! verification runs on a fixed cadence and applies migrations in a
//! second phase, so nothing here ever re-enters itself.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::capture::WindowCapture;
use crate::client::client::{Client, PingStatus};
use crate::client::group::ClientGroup;
use crate::error::EngineError;
use crate::models::{MAX_QUALITY_INDEX, Quality, WindowDamage, WindowVisibility};
use crate::settings::QualitySettings;
use crate::wire::Message;

/// How often tier migration is considered.
const QUALITY_VERIFICATION_PERIOD: Duration = Duration::from_secs(10);

/// The pipe counts as saturated at or above this send/receive ratio.
const BITRATE_RATIO_DOWN: f32 = 0.8;
/// Below this ratio there is headroom to climb a tier.
const BITRATE_RATIO_UP: f32 = 0.2;

/// Messages produced by registry operations, addressed by recipient
/// mask.
pub type MessageSender<'a> = &'a mut dyn FnMut(u64, Message);

/// Owns all connected clients and their quality groups.
pub struct ClientRegistry {
    settings: QualitySettings,
    clients: HashMap<u32, Client>,
    groups: Vec<ClientGroup>,
    /// All allocated index bits.
    index_mask: u64,
    last_verification: Instant,
}

impl ClientRegistry {
    pub fn new(settings: QualitySettings, now: Instant) -> Self {
        Self {
            settings,
            clients: HashMap::new(),
            groups: Vec::new(),
            index_mask: 0,
            last_verification: now,
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// Combined mask of all connected clients.
    pub fn index_mask(&self) -> u64 {
        self.index_mask
    }

    /// The index bit of a connected client.
    pub fn client_index(&self, client_id: u32) -> Option<u64> {
        self.clients.get(&client_id).map(Client::index)
    }

    /// The quality tier of the group a client belongs to.
    pub fn client_quality(&self, client_id: u32) -> Option<Quality> {
        self.groups
            .iter()
            .find(|g| g.contains(client_id))
            .map(ClientGroup::quality)
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Connect a new client: allocate the lowest free index bit and a
    /// unique random id, and place it in the top-tier group.
    pub fn add_client(&mut self, now: Instant) -> Result<(u32, u64), EngineError> {
        if self.index_mask == u64::MAX {
            return Err(EngineError::NoCapacity);
        }

        let mut index = 1u64;
        while index & self.index_mask != 0 {
            index <<= 1;
        }

        let mut id = rand::random::<u32>();
        while self.clients.contains_key(&id) {
            id = rand::random::<u32>();
        }

        self.index_mask |= index;
        let mut client = Client::new(id, index, now);
        self.group_for_quality(Quality::max())
            .add_client(&mut client, now);
        self.clients.insert(id, client);
        debug!(
            client_id = format_args!("{id:#010x}"),
            index = format_args!("{index:#x}"),
            "client connected"
        );
        Ok((id, index))
    }

    /// Disconnect a client, freeing its index bit. Unknown ids still
    /// get scrubbed out of every group before the error is returned.
    pub fn remove_client(&mut self, client_id: u32) -> Result<(), EngineError> {
        match self.clients.remove(&client_id) {
            Some(client) => {
                self.index_mask &= !client.index();
                for group in &mut self.groups {
                    group.remove_client(client_id, client.index());
                }
                self.drop_empty_groups();
                debug!(
                    client_id = format_args!("{client_id:#010x}"),
                    "client removed"
                );
                Ok(())
            }
            None => {
                for group in &mut self.groups {
                    group.remove_client(client_id, 0);
                }
                self.drop_empty_groups();
                Err(EngineError::UnknownClient { id: client_id })
            }
        }
    }

    /// Disconnect everyone, notifying each client first.
    pub fn disconnect_all(&mut self, sender: MessageSender<'_>) {
        for client in self.clients.values() {
            sender(client.index(), Message::Disconnect);
        }
        self.clients.clear();
        self.groups.clear();
        self.index_mask = 0;
    }

    // ── Keepalive ────────────────────────────────────────────────

    /// Sweep the keepalive state machines: ping clients that are due,
    /// drop clients whose pong never came.
    pub fn handle_client_pings(&mut self, now: Instant, sender: MessageSender<'_>) {
        let mut timed_out: Vec<u32> = Vec::new();
        for client in self.clients.values_mut() {
            match client.update_ping_status(now) {
                PingStatus::RequiresPing => {
                    sender(client.index(), Message::Ping);
                    client.on_ping_sent(now);
                }
                PingStatus::PongTimeout => {
                    sender(client.index(), Message::Disconnect);
                    timed_out.push(client.id());
                }
                _ => {}
            }
        }
        for client_id in timed_out {
            warn!(
                client_id = format_args!("{client_id:#010x}"),
                "client unresponsive, disconnecting"
            );
            let _ = self.remove_client(client_id);
        }
    }

    /// A pong arrived. Unknown clients are a logged no-op.
    pub fn on_pong(&mut self, client_id: u32, send_timestamp_ms: u64, now: Instant, now_ms: u64) {
        match self.clients.get_mut(&client_id) {
            Some(client) => client.on_pong(send_timestamp_ms, now, now_ms),
            None => debug!(
                client_id = format_args!("{client_id:#010x}"),
                "pong from unknown client"
            ),
        }
    }

    /// A data ack arrived. Unknown clients are a logged no-op.
    pub fn on_data_ack(
        &mut self,
        client_id: u32,
        send_timestamp_ms: u64,
        data_length: u32,
        now_ms: u64,
    ) {
        match self.clients.get_mut(&client_id) {
            Some(client) => client.on_data_ack(send_timestamp_ms, data_length, now_ms),
            None => debug!(
                client_id = format_args!("{client_id:#010x}"),
                "data ack from unknown client"
            ),
        }
    }

    // ── Streaming ────────────────────────────────────────────────

    /// Push the current visible window set into every group.
    pub fn update_visible_windows(&mut self, visible: &[WindowVisibility], now: Instant) {
        for group in &mut self.groups {
            group.update_visible_windows(visible, now);
        }
    }

    /// Fan a damage report out to every group.
    pub fn add_window_damage(&mut self, damage: &WindowDamage) {
        for group in &mut self.groups {
            group.add_window_damage(damage);
        }
    }

    /// Let every group capture and publish its due windows.
    pub fn handle_window_updates(&mut self, capture: &mut dyn WindowCapture, now: Instant) {
        for group in &mut self.groups {
            group.handle_window_updates(capture, now);
        }
    }

    // ── Quality migration ────────────────────────────────────────

    /// Move a client to the given tier, notifying it of its new
    /// quality parameters.
    pub fn set_client_quality(
        &mut self,
        client_id: u32,
        quality_index: u32,
        now: Instant,
        sender: MessageSender<'_>,
    ) -> Result<(), EngineError> {
        let quality = Quality::for_index(quality_index);
        let Some(current) = self.client_quality(client_id) else {
            return Err(EngineError::UnknownClient { id: client_id });
        };
        if current.index == quality.index {
            return Ok(());
        }

        let Some(mut client) = self.clients.remove(&client_id) else {
            return Err(EngineError::UnknownClient { id: client_id });
        };
        for group in &mut self.groups {
            group.remove_client(client_id, client.index());
        }
        self.group_for_quality(quality).add_client(&mut client, now);
        let index = client.index();
        self.clients.insert(client_id, client);
        self.drop_empty_groups();

        debug!(
            client_id = format_args!("{client_id:#010x}"),
            from = current.index,
            to = quality.index,
            "client quality change"
        );
        sender(index, Message::Quality { quality });
        Ok(())
    }

    /// Periodic bitrate-driven migration. Ratios at or above
    /// [`BITRATE_RATIO_DOWN`] drop the client one tier; ratios below
    /// [`BITRATE_RATIO_UP`] raise it one.
    pub fn perform_quality_verification(
        &mut self,
        now: Instant,
        now_ms: u64,
        sender: MessageSender<'_>,
    ) {
        if now.duration_since(self.last_verification) < QUALITY_VERIFICATION_PERIOD {
            return;
        }
        self.last_verification = now;

        // Phase 1: refresh each member's view of its group's rate and
        // collect migration decisions.
        let mut migrations: Vec<(u32, u32)> = Vec::new();
        for group in &mut self.groups {
            let mbps = group.average_image_mbps(now);
            let tier = group.quality().index;
            for &client_id in group.client_ids() {
                let Some(client) = self.clients.get_mut(&client_id) else {
                    continue;
                };
                client.bitrate().set_group_image_mbps(mbps);
                let Some(ratio) = client.bitrate().bitrate_ratio(now_ms) else {
                    continue;
                };
                let target = if ratio >= BITRATE_RATIO_DOWN {
                    tier.saturating_sub(1).max(1)
                } else if ratio < BITRATE_RATIO_UP {
                    (tier + 1).min(MAX_QUALITY_INDEX)
                } else {
                    tier
                };
                if target != tier {
                    migrations.push((client_id, target));
                }
            }
        }

        // Phase 2: apply.
        for (client_id, target) in migrations {
            let _ = self.set_client_quality(client_id, target, now, sender);
        }
    }

    // ── Internal ─────────────────────────────────────────────────

    fn group_for_quality(&mut self, quality: Quality) -> &mut ClientGroup {
        if let Some(position) = self
            .groups
            .iter()
            .position(|g| g.quality().index == quality.index)
        {
            return &mut self.groups[position];
        }
        self.groups.push(ClientGroup::new(quality, self.settings));
        self.groups
            .last_mut()
            .unwrap_or_else(|| unreachable!("group was just pushed"))
    }

    fn drop_empty_groups(&mut self) {
        self.groups.retain(|g| !g.is_empty());
    }
}

// ── Tests ────────────────────────────────────────────────────────
