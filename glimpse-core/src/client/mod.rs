//! Client lifecycle, quality groups and adaptive tier control.

pub mod bitrate;
#[allow(clippy::module_inception)]
pub mod client;
pub mod group;
pub mod quality_handler;
pub mod registry;
pub mod window;

pub use bitrate::ClientBitrateCalculator;
pub use client::{Client, PING_WAIT_INTERVAL, PONG_RESPONSE_TIMEOUT, PingStatus};
pub use group::ClientGroup;
pub use quality_handler::WindowQualityHandler;
pub use registry::{ClientRegistry, MessageSender};
pub use window::ClientWindow;
