// Pipeline configuration files.
//
// Global config: `~/.tessera/config.toml`
// Package override: `<package>/.tessera/pipeline.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tessera_common::aspect::{EncodingKind, SlotKind, SlotTarget};

use crate::security::{ensure_owner_only_dir, ensure_owner_only_file};

const DEFAULT_LONG_EDGE: u32 = 1600;
const DEFAULT_EDIT_QUIET_MS: u64 = 2_000;
const DEFAULT_RECLAIM_DELAY_MS: u64 = 5_000;
const DEFAULT_JPEG_QUALITY: u8 = 85;

const EDIT_QUIET_RANGE_MS: (u64, u64) = (250, 10_000);
const RECLAIM_DELAY_RANGE_MS: (u64, u64) = (1_000, 60_000);

/// Root directory for Tessera global state: `~/.tessera/`.
pub fn global_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tessera"))
}

/// Path to the global config file: `~/.tessera/config.toml`.
pub fn global_config_path() -> Option<PathBuf> {
    global_dir().map(|d| d.join("config.toml"))
}

/// Path to the package override file: `<package>/.tessera/pipeline.toml`.
pub fn package_config_path(package_root: &Path) -> PathBuf {
    package_root.join(".tessera").join("pipeline.toml")
}

/// Tunables for rendering, encoding and scheduling.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Longer output edge when no pixel target is given.
    pub default_long_edge: u32,
    /// Quiet period before a pending edit is rendered and saved.
    pub edit_quiet_ms: u64,
    /// Delay after session end before orphaned assets are reclaimed.
    pub reclaim_delay_ms: u64,
    /// Quality for lossy output (1–100).
    pub jpeg_quality: u8,
    /// Encoding override for preset slots (default lossy).
    pub preset_encoding: Option<EncodingKind>,
    /// Encoding override for freeform slots (default lossless).
    pub freeform_encoding: Option<EncodingKind>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            default_long_edge: DEFAULT_LONG_EDGE,
            edit_quiet_ms: DEFAULT_EDIT_QUIET_MS,
            reclaim_delay_ms: DEFAULT_RECLAIM_DELAY_MS,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            preset_encoding: None,
            freeform_encoding: None,
        }
    }
}

impl PipelineConfig {
    /// Resolve the effective config for a package: package override, then
    /// the global file, then defaults. Unreadable files fall through.
    pub fn load(package_root: &Path) -> Self {
        Self::load_from(&package_config_path(package_root))
            .ok()
            .or_else(|| global_config_path().and_then(|p| Self::load_from(&p).ok()))
            .unwrap_or_default()
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        toml::from_str(&contents).map_err(ConfigError::Parse)
    }

    /// Save to a specific path (creates parent directories).
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigError::Io)?;
            ensure_owner_only_dir(parent)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))?;
        }
        let contents = toml::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, contents).map_err(ConfigError::Io).and_then(|_| {
            ensure_owner_only_file(path)
                .map_err(|error| ConfigError::Io(std::io::Error::other(error.to_string())))
        })
    }

    pub fn long_edge(&self) -> u32 {
        self.default_long_edge.max(1)
    }

    /// Edit quiet period, clamped to [250ms, 10s].
    pub fn edit_quiet(&self) -> Duration {
        let (lo, hi) = EDIT_QUIET_RANGE_MS;
        Duration::from_millis(self.edit_quiet_ms.clamp(lo, hi))
    }

    /// Reclamation delay, clamped to [1s, 60s].
    pub fn reclaim_delay(&self) -> Duration {
        let (lo, hi) = RECLAIM_DELAY_RANGE_MS;
        Duration::from_millis(self.reclaim_delay_ms.clamp(lo, hi))
    }

    pub fn quality(&self) -> u8 {
        self.jpeg_quality.clamp(1, 100)
    }

    /// Encoding for a slot: the configured override, else the slot default.
    pub fn encoding_for(&self, slot: &SlotKind, target: &SlotTarget) -> EncodingKind {
        let configured = match slot {
            SlotKind::Preset(_) => self.preset_encoding,
            SlotKind::Custom(_) => self.freeform_encoding,
        };
        configured.unwrap_or(target.encoding)
    }
}

// ── Errors ─────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(toml::de::Error),
    Serialize(toml::ser::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "config I/O error: {e}"),
            Self::Parse(e) => write!(f, "config parse error: {e}"),
            Self::Serialize(e) => write!(f, "config serialize error: {e}"),
        }
    }
}

impl std::error::Error for ConfigError {}
