//! The engine loop.
//!
//! Orchestrates one pipeline at a fixed tick rate:
//!
//! 1. Drain display events into damage and dirty flags.
//! 2. Drain and dispatch queued client instructions.
//! 3. Reconcile visible windows and broadcast layout changes.
//! 4. Let each quality group capture and publish its due windows.
//! 5. Poll the pointer with adaptive backoff.
//! 6. Keepalive sweep and tier verification.
//!
//! The loop runs in a Tokio task and stops via its shared `running`
//! flag. Sleep time is the tick interval minus the work time, so the
//! rate self-corrects under load.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::PoisonError;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tracing::{debug, info, trace, warn};

use crate::capture::{
    CaptureError, DisplayBackend, DisplayEvent, MouseState, WindowCapture, WindowCaptureRequest,
};
use crate::client::ClientRegistry;
use crate::error::EngineError;
use crate::gateway::EngineGateway;
use crate::models::{Quality, Rectangle, WindowImageTransfer, TransferStatus, WindowVisibility};
use crate::settings::ControllerSettings;
use crate::wire::{Instruction, InstructionKind, Message, MessageEncoder, SubImage, epoch_ms};

/// Damage covering more than this fraction of a window is promoted to
/// a full-window refresh.
const FULL_REFRESH_AREA_RATIO: f32 = 0.9;

/// Pointer poll interval bounds and growth factor while idle.
const MOUSE_POLL_MIN: Duration = Duration::from_millis(15);
const MOUSE_POLL_MAX: Duration = Duration::from_millis(500);
const MOUSE_POLL_DECAY: f32 = 0.96;

/// Rolling tick-duration window for the rate trace.
const TICK_STATS_LEN: usize = 30;

/// The fixed-rate engine loop.
pub struct Controller {
    backend: Box<dyn DisplayBackend>,
    gateway: Arc<EngineGateway>,
    encoder: Arc<MessageEncoder>,
    registry: Arc<StdMutex<ClientRegistry>>,
    settings: ControllerSettings,
    running: Arc<AtomicBool>,

    visible: Vec<WindowVisibility>,
    layout_dirty: bool,
    cursor_dirty: bool,
    mouse: MouseState,
    mouse_polled_at: Option<Instant>,
    mouse_poll_interval: Duration,
    tick_durations: Vec<Duration>,
}

impl Controller {
    pub fn new(
        backend: Box<dyn DisplayBackend>,
        gateway: Arc<EngineGateway>,
        encoder: Arc<MessageEncoder>,
        settings: ControllerSettings,
    ) -> Self {
        let registry = gateway.registry();
        Self {
            backend,
            gateway,
            encoder,
            registry,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            visible: Vec::new(),
            layout_dirty: true,
            cursor_dirty: true,
            mouse: MouseState::default(),
            mouse_polled_at: None,
            mouse_poll_interval: MOUSE_POLL_MIN,
            tick_durations: Vec::with_capacity(TICK_STATS_LEN),
        }
    }

    /// A cloneable handle that can stop the loop from another task.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run until stopped.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.running.store(true, Ordering::SeqCst);
        let interval = self.settings.tick_interval();
        info!(tick_rate = self.settings.tick_rate, "controller running");

        while self.running.load(Ordering::SeqCst) {
            let tick_start = Instant::now();
            self.tick(tick_start)?;
            self.record_tick(tick_start.elapsed());
            Self::pace(tick_start, interval).await;
        }

        info!("controller stopped");
        Ok(())
    }

    /// One full engine iteration at the given instant.
    pub fn tick(&mut self, now: Instant) -> Result<(), EngineError> {
        let encoder = Arc::clone(&self.encoder);
        let gateway = Arc::clone(&self.gateway);
        let registry = Arc::clone(&self.registry);
        let mut registry = registry.lock().unwrap_or_else(PoisonError::into_inner);

        // 1. Display events.
        for event in self.backend.poll_events() {
            match event {
                DisplayEvent::Damage(damage) => registry.add_window_damage(&damage),
                DisplayEvent::LayoutChanged => self.layout_dirty = true,
                DisplayEvent::CursorDirty => self.cursor_dirty = true,
                DisplayEvent::ClipboardChanged(content) => {
                    let mask = registry.index_mask();
                    if mask != 0 {
                        publish(&gateway, &encoder, mask, &Message::Clipboard { content })?;
                    }
                }
            }
        }

        // 2. Instructions.
        for instruction in self.gateway.drain_instructions() {
            self.dispatch(&mut registry, instruction, now)?;
        }

        // 3. Layout.
        if self.layout_dirty {
            self.layout_dirty = false;
            self.visible = self.backend.window_visibilities();
            let mask = registry.index_mask();
            if mask != 0 {
                publish(
                    &gateway,
                    &encoder,
                    mask,
                    &Message::Windows {
                        command_id: 0,
                        windows: self.backend.visible_windows(),
                    },
                )?;
            }
        }
        registry.update_visible_windows(&self.visible, now);

        // 4. Damaged windows.
        let mut capture = GroupWindowCapture {
            backend: self.backend.as_mut(),
            gateway: &gateway,
            encoder: &encoder,
        };
        registry.handle_window_updates(&mut capture, now);

        // 5. Pointer.
        self.poll_mouse(&mut registry, now)?;

        // 6. Keepalive and tier verification.
        let mut sender = |mask: u64, message: Message| {
            if let Err(e) = publish(&gateway, &encoder, mask, &message) {
                warn!(error = %e, "publish failed");
            }
        };
        registry.handle_client_pings(now, &mut sender);
        registry.perform_quality_verification(now, epoch_ms(), &mut sender);

        Ok(())
    }

    fn dispatch(
        &mut self,
        registry: &mut ClientRegistry,
        instruction: Instruction,
        now: Instant,
    ) -> Result<(), EngineError> {
        let gateway = Arc::clone(&self.gateway);
        let encoder = Arc::clone(&self.encoder);
        let client_mask = registry.client_index(instruction.client_id).unwrap_or(0);

        match instruction.kind {
            InstructionKind::Mouse { x, y, button_mask } => {
                self.backend.send_mouse(x, y, button_mask);
                self.cursor_dirty = true;
            }
            InstructionKind::Keyboard { key, pressed } => self.backend.send_keyboard(key, pressed),
            InstructionKind::Screen => {
                let size = self.backend.screen_size();
                publish(
                    &gateway,
                    &encoder,
                    client_mask,
                    &Message::Screen {
                        command_id: instruction.id,
                        width: size.width,
                        height: size.height,
                        version: crate::models::EngineVersion::current(),
                    },
                )?;
            }
            InstructionKind::Windows => {
                publish(
                    &gateway,
                    &encoder,
                    client_mask,
                    &Message::Windows {
                        command_id: instruction.id,
                        windows: self.backend.visible_windows(),
                    },
                )?;
            }
            InstructionKind::Image { window_id } => {
                let quality = registry
                    .client_quality(instruction.client_id)
                    .unwrap_or_else(Quality::max);
                match self.backend.grab_window(window_id, &quality) {
                    Ok(blob) => publish(
                        &gateway,
                        &encoder,
                        client_mask,
                        &Message::Image {
                            command_id: instruction.id,
                            window_id,
                            depth: blob.depth,
                            type_tag: blob.type_tag,
                            rgb: blob.rgb,
                            alpha: blob.alpha,
                        },
                    )?,
                    Err(e) => debug!(window_id, error = %e, "image request failed"),
                }
            }
            InstructionKind::Shape { window_id } => match self.backend.window_shape(window_id) {
                Ok(blob) => publish(
                    &gateway,
                    &encoder,
                    client_mask,
                    &Message::Image {
                        command_id: instruction.id,
                        window_id,
                        depth: blob.depth,
                        type_tag: blob.type_tag,
                        rgb: blob.rgb,
                        alpha: blob.alpha,
                    },
                )?,
                Err(e) => debug!(window_id, error = %e, "shape request failed"),
            },
            InstructionKind::Cursor { cursor_id } => {
                match self.backend.cursor_image(cursor_id.max(0) as u32) {
                    Ok(cursor) => publish(
                        &gateway,
                        &encoder,
                        client_mask,
                        &Message::CursorImage {
                            command_id: instruction.id,
                            x: self.mouse.x,
                            y: self.mouse.y,
                            xhot: cursor.xhot,
                            yhot: cursor.yhot,
                            cursor_id: cursor.cursor_id,
                            data: cursor.data,
                        },
                    )?,
                    Err(e) => debug!(cursor_id, error = %e, "cursor request failed"),
                }
            }
            InstructionKind::Quality { quality_index } => {
                let mut sender = |mask: u64, message: Message| {
                    if let Err(e) = publish(&gateway, &encoder, mask, &message) {
                        warn!(error = %e, "publish failed");
                    }
                };
                if let Err(e) = registry.set_client_quality(
                    instruction.client_id,
                    quality_index,
                    now,
                    &mut sender,
                ) {
                    debug!(error = %e, "quality request rejected");
                }
            }
            InstructionKind::Pong { send_timestamp_ms } => {
                registry.on_pong(instruction.client_id, send_timestamp_ms, now, epoch_ms());
            }
            InstructionKind::DataAck {
                send_timestamp_ms,
                data_length,
            } => {
                registry.on_data_ack(
                    instruction.client_id,
                    send_timestamp_ms,
                    data_length,
                    epoch_ms(),
                );
            }
            InstructionKind::Clipboard { content } => {
                self.backend.set_clipboard(&content);
                // Echo to everyone but the originator.
                let others = registry.index_mask() & !client_mask;
                if others != 0 {
                    publish(&gateway, &encoder, others, &Message::Clipboard { content })?;
                }
            }
            InstructionKind::ScreenResize { width, height } => {
                self.backend.resize_screen(width, height);
                self.layout_dirty = true;
            }
            InstructionKind::KeyboardLayout { layout } => self.backend.set_keyboard_layout(&layout),
        }
        Ok(())
    }

    /// Poll the pointer, backing off while it is idle.
    fn poll_mouse(
        &mut self,
        registry: &mut ClientRegistry,
        now: Instant,
    ) -> Result<(), EngineError> {
        let due = match self.mouse_polled_at {
            None => true,
            Some(at) => now.duration_since(at) >= self.mouse_poll_interval,
        };
        if !due && !self.cursor_dirty {
            return Ok(());
        }
        self.mouse_polled_at = Some(now);

        let state = self.backend.mouse_state();
        if state != self.mouse || self.cursor_dirty {
            self.mouse = state;
            self.cursor_dirty = false;
            self.mouse_poll_interval = MOUSE_POLL_MIN;
            let mask = registry.index_mask();
            if mask != 0 {
                publish(
                    &self.gateway,
                    &self.encoder,
                    mask,
                    &Message::Mouse {
                        command_id: 0,
                        x: state.x,
                        y: state.y,
                        cursor_id: state.cursor_id,
                    },
                )?;
            }
        } else {
            let grown = self.mouse_poll_interval.as_secs_f32() / MOUSE_POLL_DECAY;
            self.mouse_poll_interval = Duration::from_secs_f32(grown).min(MOUSE_POLL_MAX);
        }
        Ok(())
    }

    fn record_tick(&mut self, elapsed: Duration) {
        if self.tick_durations.len() == TICK_STATS_LEN {
            let mean =
                self.tick_durations.iter().sum::<Duration>() / self.tick_durations.len() as u32;
            trace!(mean_tick_us = mean.as_micros() as u64, "tick timing");
            self.tick_durations.clear();
        }
        self.tick_durations.push(elapsed);
    }

    /// Sleep for the remainder of the tick interval.
    async fn pace(tick_start: Instant, interval: Duration) {
        let elapsed = tick_start.elapsed();
        if elapsed < interval {
            tokio::time::sleep(interval - elapsed).await;
        } else {
            tokio::task::yield_now().await;
        }
    }
}

fn publish(
    gateway: &EngineGateway,
    encoder: &MessageEncoder,
    mask: u64,
    message: &Message,
) -> Result<(), EngineError> {
    gateway.publish(encoder.encode(mask, message))
}

// ── GroupWindowCapture ───────────────────────────────────────────

/// The [`WindowCapture`] the registry drives: grabs through the
/// display backend, suppresses unchanged content by checksum, and
/// publishes the resulting frame.
struct GroupWindowCapture<'a> {
    backend: &'a mut dyn DisplayBackend,
    gateway: &'a EngineGateway,
    encoder: &'a MessageEncoder,
}

impl WindowCapture for GroupWindowCapture<'_> {
    fn capture(
        &mut self,
        request: WindowCaptureRequest<'_>,
        quality: &Quality,
        recipient_mask: u64,
    ) -> Result<WindowImageTransfer, CaptureError> {
        let window_area = request.window_size.area();
        let full = request.damage.is_full_window(request.window_size)
            || (window_area > 0
                && request.damage.damaged_area() as f32 / window_area as f32
                    > FULL_REFRESH_AREA_RATIO);

        if full {
            let blob = self.backend.grab_window(request.window_id, quality)?;
            if request.rgb_checksum == Some(blob.rgb_checksum) {
                // Content identical to what clients already hold.
                return Ok(WindowImageTransfer::ignored(request.window_id));
            }
            // Unchanged alpha planes are not resent.
            let alpha = if blob.alpha_checksum.is_some()
                && blob.alpha_checksum == request.alpha_checksum
            {
                None
            } else {
                blob.alpha
            };
            let size_kb = (blob.rgb.len() + alpha.as_ref().map_or(0, bytes::Bytes::len)) as f32
                / 1024.0;
            let message = Message::Image {
                command_id: 0,
                window_id: request.window_id,
                depth: blob.depth,
                type_tag: blob.type_tag,
                rgb: blob.rgb,
                alpha,
            };
            self.publish(recipient_mask, &message)?;
            Ok(WindowImageTransfer {
                window_id: request.window_id,
                status: TransferStatus::FullWindow,
                size_kb,
                rgb_checksum: Some(blob.rgb_checksum),
                alpha_checksum: blob.alpha_checksum,
                timestamp: Instant::now(),
            })
        } else {
            let bounds = Rectangle::from_size(request.window_size);
            let rectangles: Vec<Rectangle> = request
                .damage
                .rectangles()
                .iter()
                .filter_map(|r| r.clipped_to(&bounds))
                .collect();
            if rectangles.is_empty() {
                return Ok(WindowImageTransfer::ignored(request.window_id));
            }
            let grabbed = self
                .backend
                .grab_sub_images(request.window_id, &rectangles, quality)?;
            let mut size_kb = 0.0f32;
            let images: Vec<SubImage> = grabbed
                .into_iter()
                .map(|(rectangle, blob)| {
                    size_kb += (blob.rgb.len()
                        + blob.alpha.as_ref().map_or(0, bytes::Bytes::len))
                        as f32
                        / 1024.0;
                    SubImage {
                        rectangle,
                        depth: blob.depth,
                        type_tag: blob.type_tag,
                        rgb: blob.rgb,
                        alpha: blob.alpha,
                    }
                })
                .collect();
            let message = Message::Subimages {
                command_id: 0,
                window_id: request.window_id,
                images,
            };
            self.publish(recipient_mask, &message)?;
            Ok(WindowImageTransfer {
                window_id: request.window_id,
                status: TransferStatus::SubWindow,
                size_kb,
                rgb_checksum: None,
                alpha_checksum: None,
                timestamp: Instant::now(),
            })
        }
    }
}

impl GroupWindowCapture<'_> {
    fn publish(&self, mask: u64, message: &Message) -> Result<(), CaptureError> {
        self.gateway
            .publish(self.encoder.encode(mask, message))
            .map_err(|_| CaptureError::Unavailable("message channel closed".into()))
    }
}

// ── Tests ────────────────────────────────────────────────────────
