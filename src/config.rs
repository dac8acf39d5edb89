//! Bridge settings loaded from TOML.

use crate::error::{BridgeError, BridgeResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Component name used when none is configured
pub const DEFAULT_COMPONENT: &str = "TitleManager";

/// Install-path segments between the module root and the bridge binary
/// (typically `build/Release`)
pub const DEFAULT_TRAILING_SEGMENTS: usize = 2;

/// Worker→host queue capacity.
///
/// Bounds memory while a host stops draining; the pump blocks once full.
pub const DEFAULT_EVENT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct BridgeSettings {
    /// Name used for descriptor files and in error messages
    pub component: String,
    pub trailing_segments: usize,
    pub event_queue_capacity: usize,
    /// Library name handed to the platform loader when no private
    /// resolution context is usable
    pub system_library: String,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            component: DEFAULT_COMPONENT.to_string(),
            trailing_segments: DEFAULT_TRAILING_SEGMENTS,
            event_queue_capacity: DEFAULT_EVENT_QUEUE_CAPACITY,
            system_library: libloading::library_filename(DEFAULT_COMPONENT)
                .to_string_lossy()
                .into_owned(),
        }
    }
}

impl BridgeSettings {
    /// Parse settings from TOML text. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> BridgeResult<Self> {
        let settings: Self =
            toml::from_str(text).map_err(|e| BridgeError::config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read settings from a TOML file.
    pub fn load(path: &Path) -> BridgeResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Load `path` when given, otherwise the per-user settings file if present,
    /// otherwise defaults.
    pub fn discover(path: Option<&Path>) -> BridgeResult<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        match default_settings_path() {
            Some(path) if path.is_file() => {
                log::debug!(
                    target: "title_bridge::config",
                    "Loading settings from {}",
                    path.display()
                );
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.component.trim().is_empty() {
            return Err(BridgeError::config("component must not be empty"));
        }
        if self.event_queue_capacity == 0 {
            return Err(BridgeError::config(
                "event_queue_capacity must be at least 1",
            ));
        }
        Ok(())
    }
}

/// `<config_dir>/title-bridge/config.toml`, if the platform has a config dir
pub fn default_settings_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("title-bridge").join("config.toml"))
}
