//! Integration tests — full engine lifecycle through the public API:
//! client connection, instruction dispatch, damage-driven image
//! publication and the keepalive state machine.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;

use glimpse_core::{
    CaptureError, Controller, ControllerSettings, CursorBitmap, DisplayBackend, DisplayEvent,
    EngineError, EngineGateway, ImageBlob, Instruction, InstructionKind, MESSAGE_HEADER_LENGTH,
    Message, MessageEncoder, MessageHeader, MessageSink, MessageType, MouseState, Quality,
    QualitySettings, Rectangle, Size, WindowCoverage, WindowDamage, WindowProperties,
    WindowVisibility, checksum32, run_publisher,
};

const SESSION_ID: [u8; 16] = [7; 16];

// ── Helpers ──────────────────────────────────────────────────────

/// A minimal display with one 640x480 window whose content the test
/// can rewrite.
struct TestDisplay {
    frame: Arc<Mutex<Vec<u8>>>,
}

impl TestDisplay {
    fn window() -> WindowProperties {
        WindowProperties {
            id: 0x42,
            x: 10,
            y: 10,
            width: 640,
            height: 480,
        }
    }
}

impl DisplayBackend for TestDisplay {
    fn poll_events(&mut self) -> Vec<DisplayEvent> {
        Vec::new()
    }

    fn screen_size(&self) -> Size {
        Size::new(1280, 800)
    }

    fn visible_windows(&self) -> Vec<WindowProperties> {
        vec![Self::window()]
    }

    fn window_visibilities(&self) -> Vec<WindowVisibility> {
        vec![WindowVisibility::new(
            0x42,
            Self::window().rectangle(),
            WindowCoverage::default(),
        )]
    }

    fn grab_window(&mut self, window_id: u32, _quality: &Quality) -> Result<ImageBlob, CaptureError> {
        if window_id != 0x42 {
            return Err(CaptureError::WindowGone(window_id));
        }
        let frame = self.frame.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(ImageBlob {
            depth: 24,
            type_tag: *b"png\0",
            rgb: Bytes::from(frame.clone()),
            alpha: None,
            rgb_checksum: checksum32(&frame),
            alpha_checksum: None,
        })
    }

    fn grab_sub_images(
        &mut self,
        window_id: u32,
        rectangles: &[Rectangle],
        quality: &Quality,
    ) -> Result<Vec<(Rectangle, ImageBlob)>, CaptureError> {
        rectangles
            .iter()
            .map(|r| Ok((*r, self.grab_window(window_id, quality)?)))
            .collect()
    }

    fn window_shape(&mut self, window_id: u32) -> Result<ImageBlob, CaptureError> {
        self.grab_window(window_id, &Quality::max())
    }

    fn mouse_state(&self) -> MouseState {
        MouseState::default()
    }

    fn cursor_image(&mut self, cursor_id: u32) -> Result<CursorBitmap, CaptureError> {
        Ok(CursorBitmap {
            xhot: 0,
            yhot: 0,
            cursor_id,
            data: Bytes::from_static(&[1]),
        })
    }

    fn send_mouse(&mut self, _x: i32, _y: i32, _button_mask: u32) {}
    fn send_keyboard(&mut self, _key: u32, _pressed: bool) {}
    fn set_clipboard(&mut self, _content: &str) {}
    fn resize_screen(&mut self, _width: i32, _height: i32) {}
    fn set_keyboard_layout(&mut self, _layout: &str) {}
}

struct Engine {
    controller: Controller,
    gateway: Arc<EngineGateway>,
    rx: mpsc::UnboundedReceiver<Bytes>,
    frame: Arc<Mutex<Vec<u8>>>,
}

fn engine() -> Engine {
    let registry = Arc::new(Mutex::new(glimpse_core::ClientRegistry::new(
        QualitySettings::default(),
        Instant::now(),
    )));
    let (tx, rx) = mpsc::unbounded_channel();
    let gateway = Arc::new(EngineGateway::new(registry, tx));
    let frame = Arc::new(Mutex::new(vec![0u8; 256]));
    let controller = Controller::new(
        Box::new(TestDisplay {
            frame: Arc::clone(&frame),
        }),
        Arc::clone(&gateway),
        Arc::new(MessageEncoder::new(SESSION_ID)),
        ControllerSettings::default(),
    );
    Engine {
        controller,
        gateway,
        rx,
        frame,
    }
}

/// Drain and decode every frame published so far.
fn drain(rx: &mut mpsc::UnboundedReceiver<Bytes>) -> Vec<(MessageHeader, Bytes)> {
    let mut out = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        let header = MessageHeader::decode(&mut frame.clone()).expect("valid frame header");
        assert_eq!(header.buffer_length as usize, frame.len());
        assert_eq!(header.session_id, SESSION_ID);
        out.push((header, frame));
    }
    out
}

fn find(frames: &[(MessageHeader, Bytes)], message_type: MessageType) -> Option<(MessageHeader, Bytes)> {
    frames
        .iter()
        .find(|(h, _)| h.message_type == message_type as u32)
        .cloned()
}

// ── Connection and dispatch ──────────────────────────────────────

#[test]
fn connect_tick_and_query_the_screen() {
    let mut engine = engine();
    let (client_id, client_index) = engine.gateway.connect_client().unwrap();

    // The instruction arrives as raw bytes, exactly as a transport
    // would deliver it.
    let raw = Instruction {
        client_id,
        id: 31,
        synchronous: true,
        kind: InstructionKind::Screen,
    }
    .encode(SESSION_ID);
    engine.gateway.submit(Instruction::decode(raw).unwrap());

    engine.controller.tick(Instant::now()).unwrap();
    let frames = drain(&mut engine.rx);

    let (header, frame) = find(&frames, MessageType::Screen).expect("screen reply");
    assert_eq!(header.client_index_mask, client_index);
    let payload = &frame[MESSAGE_HEADER_LENGTH..];
    assert_eq!(u32::from_le_bytes(payload[0..4].try_into().unwrap()), 31);
    assert_eq!(i32::from_le_bytes(payload[4..8].try_into().unwrap()), 1280);
    assert_eq!(i32::from_le_bytes(payload[8..12].try_into().unwrap()), 800);

    // The first tick also announces the window layout.
    let (_, frame) = find(&frames, MessageType::Windows).expect("windows broadcast");
    let payload = &frame[MESSAGE_HEADER_LENGTH..];
    assert_eq!(u32::from_le_bytes(payload[4..8].try_into().unwrap()), 1);
}

#[test]
fn damage_flows_out_as_an_image_frame() {
    let mut engine = engine();
    let (_, client_index) = engine.gateway.connect_client().unwrap();
    let t0 = Instant::now();
    engine.controller.tick(t0).unwrap();
    drain(&mut engine.rx);

    let mut damage = WindowDamage::new(0x42);
    damage.add_rectangle(Rectangle::new(0, 0, 640, 480));
    engine
        .gateway
        .registry()
        .lock()
        .unwrap()
        .add_window_damage(&damage);
    engine.controller.tick(t0 + Duration::from_millis(500)).unwrap();

    let frames = drain(&mut engine.rx);
    let (header, frame) = find(&frames, MessageType::Image).expect("image frame");
    assert_eq!(header.client_index_mask, client_index);
    let payload = &frame[MESSAGE_HEADER_LENGTH..];
    assert_eq!(u32::from_le_bytes(payload[4..8].try_into().unwrap()), 0x42);

    // Unchanged content damaged again is suppressed by checksum.
    engine
        .gateway
        .registry()
        .lock()
        .unwrap()
        .add_window_damage(&damage);
    engine.controller.tick(t0 + Duration::from_secs(1)).unwrap();
    assert!(find(&drain(&mut engine.rx), MessageType::Image).is_none());

    // New content goes out again.
    engine.frame.lock().unwrap().fill(0xAB);
    engine
        .gateway
        .registry()
        .lock()
        .unwrap()
        .add_window_damage(&damage);
    engine
        .controller
        .tick(t0 + Duration::from_millis(1500))
        .unwrap();
    assert!(find(&drain(&mut engine.rx), MessageType::Image).is_some());
}

#[test]
fn quality_instruction_reassigns_the_client_tier() {
    let mut engine = engine();
    let (client_id, client_index) = engine.gateway.connect_client().unwrap();
    engine.controller.tick(Instant::now()).unwrap();
    drain(&mut engine.rx);

    engine.gateway.submit(Instruction {
        client_id,
        id: 9,
        synchronous: false,
        kind: InstructionKind::Quality { quality_index: 3 },
    });
    engine.controller.tick(Instant::now()).unwrap();

    let frames = drain(&mut engine.rx);
    let (header, frame) = find(&frames, MessageType::Quality).expect("quality notice");
    assert_eq!(header.client_index_mask, client_index);
    let payload = &frame[MESSAGE_HEADER_LENGTH..];
    assert_eq!(u32::from_le_bytes(payload[0..4].try_into().unwrap()), 3);

    let registry = engine.gateway.registry();
    let registry = registry.lock().unwrap();
    assert_eq!(registry.client_quality(client_id).unwrap().index, 3);
}

// ── Keepalive lifecycle ──────────────────────────────────────────

#[test]
fn silent_client_is_pinged_then_dropped() {
    let mut engine = engine();
    let (client_id, client_index) = engine.gateway.connect_client().unwrap();
    let t0 = Instant::now();
    engine.controller.tick(t0).unwrap();
    drain(&mut engine.rx);

    // Past the ping interval the engine probes.
    engine.controller.tick(t0 + Duration::from_secs(3)).unwrap();
    let frames = drain(&mut engine.rx);
    let (header, _) = find(&frames, MessageType::Ping).expect("ping probe");
    assert_eq!(header.client_index_mask, client_index);

    // No pong for the whole timeout: disconnected and forgotten.
    engine.controller.tick(t0 + Duration::from_secs(14)).unwrap();
    let frames = drain(&mut engine.rx);
    assert!(find(&frames, MessageType::Disconnect).is_some());
    assert_eq!(
        engine.gateway.registry().lock().unwrap().client_count(),
        0
    );
    assert!(engine.gateway.disconnect_client(client_id).is_err());
}

#[test]
fn pong_keeps_the_client_connected() {
    let mut engine = engine();
    let (client_id, _) = engine.gateway.connect_client().unwrap();
    let t0 = Instant::now();
    engine.controller.tick(t0).unwrap();

    engine.controller.tick(t0 + Duration::from_secs(3)).unwrap();
    drain(&mut engine.rx);

    engine.gateway.submit(Instruction {
        client_id,
        id: 1,
        synchronous: false,
        kind: InstructionKind::Pong {
            send_timestamp_ms: glimpse_core::epoch_ms(),
        },
    });
    engine.controller.tick(t0 + Duration::from_secs(4)).unwrap();

    engine.controller.tick(t0 + Duration::from_secs(12)).unwrap();
    assert_eq!(
        engine.gateway.registry().lock().unwrap().client_count(),
        1
    );
}

// ── Publisher pump ───────────────────────────────────────────────

#[tokio::test]
async fn publisher_delivers_engine_frames_to_the_sink() {
    struct Collect(Mutex<Vec<Bytes>>);

    #[async_trait::async_trait]
    impl MessageSink for Collect {
        async fn publish(&self, frame: Bytes) -> Result<(), EngineError> {
            self.0
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(frame);
            Ok(())
        }
    }

    let (tx, rx) = mpsc::unbounded_channel();
    let registry = Arc::new(Mutex::new(glimpse_core::ClientRegistry::new(
        QualitySettings::default(),
        Instant::now(),
    )));
    let gateway = Arc::new(EngineGateway::new(registry, tx));
    let sink = Arc::new(Collect(Mutex::new(Vec::new())));
    let pump = tokio::spawn(run_publisher(rx, Arc::clone(&sink) as Arc<dyn MessageSink>));

    let encoder = MessageEncoder::new(SESSION_ID);
    gateway.publish(encoder.encode(1, &Message::Ping)).unwrap();
    gateway
        .publish(encoder.encode(1, &Message::Disconnect))
        .unwrap();
    drop(gateway);
    pump.await.unwrap();

    let frames = sink.0.lock().unwrap();
    assert_eq!(frames.len(), 2);
    let header = MessageHeader::decode(&mut frames[0].clone()).unwrap();
    assert_eq!(header.message_type, MessageType::Ping as u32);
}
