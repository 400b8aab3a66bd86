use serde::{Deserialize, Serialize};

use super::id::{CameraRef, WindowIndex};
use super::layout::{LayoutType, PageBounds, MAX_WINDOWS};

/// Number of camera slots in a window's sequencing ring
pub const RING_CAPACITY: usize = 16;

/// Default dwell time for display and window sequencing
pub const DEFAULT_SEQUENCE_INTERVAL_SECS: u32 = 10;

/// Cameras cyclically shown in one window.
///
/// When the ring holds at least one camera, `current` always points at an
/// occupied slot. An empty ring means the window is unassigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowInfo {
    pub cameras: Vec<Option<CameraRef>>,
    pub current: usize,
    pub sequence_enabled: bool,
    pub sequence_interval_secs: u32,
}

impl Default for WindowInfo {
    fn default() -> Self {
        Self {
            cameras: vec![None; RING_CAPACITY],
            current: 0,
            sequence_enabled: false,
            sequence_interval_secs: DEFAULT_SEQUENCE_INTERVAL_SECS,
        }
    }
}

impl WindowInfo {
    /// Window showing a single camera
    #[must_use]
    pub fn with_camera(camera: CameraRef) -> Self {
        let mut info = Self::default();
        info.cameras[0] = Some(camera);
        info
    }

    /// Window cycling through `cameras` in order
    #[must_use]
    pub fn with_ring(cameras: impl IntoIterator<Item = CameraRef>, interval_secs: u32) -> Self {
        let mut info = Self::default();
        for (slot, camera) in info.cameras.iter_mut().zip(cameras) {
            *slot = Some(camera);
        }
        info.sequence_enabled = true;
        info.sequence_interval_secs = interval_secs;
        info
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cameras.iter().all(Option::is_none)
    }

    #[must_use]
    pub fn assigned_count(&self) -> usize {
        self.cameras.iter().filter(|slot| slot.is_some()).count()
    }

    #[must_use]
    pub fn current_camera(&self) -> Option<&CameraRef> {
        self.cameras.get(self.current).and_then(Option::as_ref)
    }

    /// Put `camera` in the current slot
    pub fn set_current_camera(&mut self, camera: CameraRef) {
        if let Some(slot) = self.cameras.get_mut(self.current) {
            *slot = Some(camera);
        }
    }

    /// Empty the current slot and move `current` to the next occupied one.
    pub fn clear_current_slot(&mut self) {
        if let Some(slot) = self.cameras.get_mut(self.current) {
            *slot = None;
        }
        if let Some(next) = self.cameras.iter().position(Option::is_some) {
            self.current = next;
        } else {
            self.current = 0;
        }
    }

    /// Pad or truncate the ring to its fixed capacity and repair `current`.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.cameras.resize(RING_CAPACITY, None);
        if self.current >= RING_CAPACITY || self.current_camera().is_none() {
            self.current = self.cameras.iter().position(Option::is_some).unwrap_or(0);
        }
        if self.sequence_interval_secs == 0 {
            self.sequence_interval_secs = DEFAULT_SEQUENCE_INTERVAL_SECS;
        }
        self
    }
}

/// Grid configuration of one physical display
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayConfig {
    pub layout: LayoutType,
    pub current_page: usize,
    pub selected_window: WindowIndex,
    pub sequence_enabled: bool,
    pub sequence_interval_secs: u32,
    pub windows: Vec<WindowInfo>,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            layout: LayoutType::default(),
            current_page: 0,
            selected_window: 0,
            sequence_enabled: false,
            sequence_interval_secs: DEFAULT_SEQUENCE_INTERVAL_SECS,
            windows: vec![WindowInfo::default(); MAX_WINDOWS],
        }
    }
}

impl DisplayConfig {
    #[must_use]
    pub fn with_layout(layout: LayoutType) -> Self {
        Self {
            layout,
            ..Self::default()
        }
    }

    /// Window range of the current page
    #[must_use]
    pub fn current_bounds(&self) -> PageBounds {
        self.layout.page_bounds(self.current_page)
    }

    #[must_use]
    pub fn window(&self, window: WindowIndex) -> Option<&WindowInfo> {
        self.windows.get(window)
    }

    pub fn window_mut(&mut self, window: WindowIndex) -> Option<&mut WindowInfo> {
        self.windows.get_mut(window)
    }

    /// Camera currently assigned to `window`
    #[must_use]
    pub fn camera_of(&self, window: WindowIndex) -> Option<&CameraRef> {
        self.window(window).and_then(WindowInfo::current_camera)
    }

    /// Repair a configuration read from an external store.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.windows.resize_with(MAX_WINDOWS, WindowInfo::default);
        self.windows = self.windows.into_iter().map(WindowInfo::normalized).collect();
        self.current_page = self.current_page.min(self.layout.page_count() - 1);
        if self.selected_window >= MAX_WINDOWS {
            self.selected_window = 0;
        }
        if self.sequence_interval_secs == 0 {
            self.sequence_interval_secs = DEFAULT_SEQUENCE_INTERVAL_SECS;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_window_is_unassigned() {
        let info = WindowInfo::default();
        assert!(info.is_empty());
        assert_eq!(info.cameras.len(), RING_CAPACITY);
        assert!(info.current_camera().is_none());
    }

    #[test]
    fn test_clear_current_slot_moves_to_next_assigned() {
        let mut info = WindowInfo::with_ring(
            [CameraRef::new("a", 1), CameraRef::new("a", 2)],
            5,
        );
        info.clear_current_slot();
        assert_eq!(info.current, 1);
        assert_eq!(info.current_camera(), Some(&CameraRef::new("a", 2)));

        info.clear_current_slot();
        assert!(info.is_empty());
        assert_eq!(info.current, 0);
    }

    #[test]
    fn test_normalized_repairs_short_config() {
        let config = DisplayConfig {
            windows: vec![WindowInfo {
                cameras: vec![None, Some(CameraRef::new("b", 4))],
                current: 0,
                sequence_enabled: false,
                sequence_interval_secs: 0,
            }],
            current_page: 99,
            ..DisplayConfig::default()
        }
        .normalized();

        assert_eq!(config.windows.len(), MAX_WINDOWS);
        assert_eq!(config.windows[0].cameras.len(), RING_CAPACITY);
        assert_eq!(config.windows[0].current, 1);
        assert_eq!(config.windows[0].sequence_interval_secs, DEFAULT_SEQUENCE_INTERVAL_SECS);
        assert_eq!(config.current_page, config.layout.page_count() - 1);
    }
}
