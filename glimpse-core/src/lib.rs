//! # glimpse-core
//!
//! Core library of the glimpse remote-display engine.
//!
//! This crate contains:
//! - **Models**: `Rectangle`, `WindowDamage`, `Quality`, `WindowCoverage`,
//!   transfer and bitrate bookkeeping
//! - **Wire**: bit-exact binary messages and instructions with their
//!   headers, plus `MessageEncoder`
//! - **Capture**: the `DisplayBackend` and `WindowCapture` seams the
//!   engine drives a display server through
//! - **Client**: per-client keepalive and bandwidth state, quality
//!   groups and the `ClientRegistry`
//! - **Controller**: the fixed-rate damage-driven engine loop
//! - **Gateway**: the transport-facing entry points and publisher pump
//! - **Error**: `EngineError` — typed, `thiserror`-based error hierarchy

pub mod capture;
pub mod client;
pub mod controller;
pub mod error;
pub mod gateway;
pub mod models;
pub mod settings;
pub mod wire;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use capture::{
    CaptureError, CursorBitmap, DisplayBackend, DisplayEvent, ImageBlob, MouseState,
    WindowCapture, WindowCaptureRequest, checksum32,
};
pub use client::{Client, ClientGroup, ClientRegistry, MessageSender, PingStatus};
pub use controller::Controller;
pub use error::EngineError;
pub use gateway::{EngineGateway, MessageSink, run_publisher};
pub use models::{
    MAX_QUALITY_INDEX, Quality, Rectangle, Size, WindowCoverage, WindowDamage, WindowProperties,
    WindowVisibility,
};
pub use settings::{ControllerSettings, CoverageQualityFunc, QualitySettings};
pub use wire::{
    INSTRUCTION_HEADER_LENGTH, Instruction, InstructionHeader, InstructionKind, InstructionType,
    MESSAGE_HEADER_LENGTH, Message, MessageEncoder, MessageHeader, MessageType, SessionId,
    SubImage, epoch_ms,
};
