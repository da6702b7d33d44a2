//! Configuration for the glimpse engine.

use std::path::Path;

use serde::{Deserialize, Serialize};

use glimpse_core::wire::SessionId;
use glimpse_core::{ControllerSettings, CoverageQualityFunc, QualitySettings};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Transport settings.
    pub transport: TransportConfig,
    /// Quality adaptation settings.
    pub quality: QualityConfig,
    /// Engine loop settings.
    pub controller: ControllerConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Listener addresses and session identity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Address the listeners bind to.
    pub bind_address: String,
    /// Request/reply port clients negotiate on.
    pub connector_port: u16,
    /// Port clients subscribe to for messages.
    pub publisher_port: u16,
    /// Port clients push instructions to.
    pub collector_port: u16,
    /// Session id as 32 hex characters. Empty means a random one is
    /// generated at startup.
    pub session_id: String,
}

/// Quality adaptation configuration, mapped onto [`QualitySettings`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Raise a window to maximum quality while the pointer is over it.
    pub increase_quality_on_mouse_over: bool,
    /// Coverage-to-quality mapping: "disabled", "linear" or
    /// "quadratic".
    pub coverage_quality_func: String,
    /// Cap per-window quality by the observed image data rate.
    pub limit_quality_by_data_rate: bool,
}

/// Engine loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ControllerConfig {
    /// Engine iterations per second.
    pub tick_rate: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".into(),
            connector_port: 5555,
            publisher_port: 5556,
            collector_port: 5557,
            session_id: String::new(),
        }
    }
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            increase_quality_on_mouse_over: true,
            coverage_quality_func: "quadratic".into(),
            limit_quality_by_data_rate: true,
        }
    }
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self { tick_rate: 60 }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".into() }
    }
}

// ── Loading and conversion ───────────────────────────────────────

impl EngineConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }

    pub fn to_quality_settings(&self) -> QualitySettings {
        let func = match self.quality.coverage_quality_func.as_str() {
            "disabled" => CoverageQualityFunc::Disabled,
            "linear" => CoverageQualityFunc::Linear,
            "quadratic" => CoverageQualityFunc::Quadratic,
            other => {
                tracing::warn!("unknown coverage_quality_func {other:?}; using quadratic");
                CoverageQualityFunc::Quadratic
            }
        };
        QualitySettings {
            increase_quality_on_mouse_over: self.quality.increase_quality_on_mouse_over,
            coverage_quality_func: func,
            limit_quality_by_data_rate: self.quality.limit_quality_by_data_rate,
        }
    }

    pub fn to_controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            tick_rate: self.controller.tick_rate.clamp(1, 240),
        }
    }

    /// The configured session id, or a random one when unset or
    /// malformed.
    pub fn session_id(&self) -> SessionId {
        match parse_session_id(&self.transport.session_id) {
            Some(id) => id,
            None => {
                if !self.transport.session_id.is_empty() {
                    tracing::warn!(
                        "session_id is not 32 hex characters; generating a random one"
                    );
                }
                rand::random()
            }
        }
    }
}

fn parse_session_id(text: &str) -> Option<SessionId> {
    if text.len() != 32 {
        return None;
    }
    let mut id = [0u8; 16];
    for (i, byte) in id.iter_mut().enumerate() {
        *byte = u8::from_str_radix(text.get(2 * i..2 * i + 2)?, 16).ok()?;
    }
    Some(id)
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let cfg = EngineConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        assert!(text.contains("connector_port"));
        assert!(text.contains("tick_rate"));
    }

    #[test]
    fn roundtrip_config() {
        let cfg = EngineConfig::default();
        let text = toml::to_string_pretty(&cfg).unwrap();
        let parsed: EngineConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.transport.connector_port, 5555);
        assert_eq!(parsed.controller.tick_rate, 60);
    }

    #[test]
    fn session_id_parses_hex() {
        let mut cfg = EngineConfig::default();
        cfg.transport.session_id = "000102030405060708090a0b0c0d0e0f".into();
        assert_eq!(
            cfg.session_id(),
            [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15]
        );
    }

    #[test]
    fn malformed_session_id_falls_back_to_random() {
        let mut cfg = EngineConfig::default();
        cfg.transport.session_id = "not-hex".into();
        // Just has to produce something, not panic.
        let _ = cfg.session_id();
    }

    #[test]
    fn quality_func_names_map() {
        let mut cfg = EngineConfig::default();
        cfg.quality.coverage_quality_func = "linear".into();
        assert_eq!(
            cfg.to_quality_settings().coverage_quality_func,
            CoverageQualityFunc::Linear
        );
    }

    #[test]
    fn tick_rate_is_clamped() {
        let mut cfg = EngineConfig::default();
        cfg.controller.tick_rate = 0;
        assert_eq!(cfg.to_controller_settings().tick_rate, 1);
    }
}
