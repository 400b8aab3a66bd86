//! Display configuration store accessor
//!
//! Persistence is owned by an external store; the engine only reads and
//! writes whole [`DisplayConfig`] values through [`ConfigStore`].

use std::collections::BTreeMap;

use parking_lot::RwLock;
use tracing::debug;

use crate::config::Config;
use crate::models::{CameraRef, DisplayConfig, DisplayId, WindowInfo, MAX_WINDOWS};
use crate::{Error, Result};

#[cfg_attr(test, mockall::automock)]
pub trait ConfigStore: Send + Sync {
    fn read_display_layout(&self, display_id: DisplayId) -> Result<DisplayConfig>;

    fn write_display_layout(&self, display_id: DisplayId, config: &DisplayConfig) -> Result<()>;

    /// Factory layout used when a display has nothing stored
    fn read_default_style(&self, display_id: DisplayId) -> Result<DisplayConfig>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    layouts: RwLock<BTreeMap<DisplayId, DisplayConfig>>,
    default_style: DisplayConfig,
}

impl InMemoryConfigStore {
    #[must_use]
    pub fn new(default_style: DisplayConfig) -> Self {
        Self {
            layouts: RwLock::new(BTreeMap::new()),
            default_style,
        }
    }

    /// Default style assigns every configured camera to consecutive windows.
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        let mut style = DisplayConfig::with_layout(config.engine.default_layout);
        style.sequence_interval_secs = config.engine.default_sequence_interval_secs;

        let cameras = config
            .devices
            .iter()
            .flat_map(|device| {
                (1..=device.camera_count).map(move |channel| CameraRef::new(&device.name, channel))
            })
            .take(MAX_WINDOWS);
        for (window, camera) in style.windows.iter_mut().zip(cameras) {
            *window = WindowInfo {
                sequence_interval_secs: config.engine.default_sequence_interval_secs,
                ..WindowInfo::with_camera(camera)
            };
        }

        Self::new(style)
    }

    /// Dump every stored layout as pretty JSON
    pub fn export_json(&self) -> Result<String> {
        let layouts = self.layouts.read();
        Ok(serde_json::to_string_pretty(&*layouts)?)
    }
}

impl ConfigStore for InMemoryConfigStore {
    fn read_display_layout(&self, display_id: DisplayId) -> Result<DisplayConfig> {
        self.layouts
            .read()
            .get(&display_id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("Layout for {display_id}")))
    }

    fn write_display_layout(&self, display_id: DisplayId, config: &DisplayConfig) -> Result<()> {
        debug!(%display_id, layout = %config.layout, "Writing display layout");
        self.layouts.write().insert(display_id, config.clone());
        Ok(())
    }

    fn read_default_style(&self, _display: DisplayId) -> Result<DisplayConfig> {
        Ok(self.default_style.clone())
    }
}
