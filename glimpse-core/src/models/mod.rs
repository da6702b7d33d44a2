//! Core data models: geometry, damage, quality tiers and transfer
//! accounting.

pub mod coverage;
pub mod damage;
pub mod quality;
pub mod rect;
pub mod transfer;
pub mod version;
pub mod window;

pub use coverage::WindowCoverage;
pub use damage::WindowDamage;
pub use quality::{MAX_QUALITY_INDEX, Quality};
pub use rect::{Rectangle, Size};
pub use transfer::{
    MBPS_PER_KB_PER_MS, TransferData, TransferStatus, TransferStore, WindowImageTransfer,
};
pub use version::EngineVersion;
pub use window::{WindowProperties, WindowVisibility};
