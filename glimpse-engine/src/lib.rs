//! # glimpse-engine — adaptive remote-display engine
//!
//! Binds the three TCP transports (connector, publisher, collector),
//! runs the fixed-rate controller from `glimpse-core` over a display
//! backend, and streams damage-driven image updates to subscribed
//! clients at per-group adaptive quality.
//!
//! The display is currently the built-in [`capture::SyntheticBackend`],
//! which renders a deterministic animated desktop so the full pipeline
//! runs without a display server.

pub mod capture;
pub mod config;
pub mod transport;
