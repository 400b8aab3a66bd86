//! Per-window user operations: assign, clear, move, select.

use tracing::info;

use crate::allocation;
use crate::events::{ToolbarButton, ToolbarState};
use crate::manager::DisplayManager;
use crate::models::{CameraRef, DisplayId, DisplayMode, WindowIndex, WindowInfo};
use crate::service::audio::{AudioChannel, WindowSlot};
use crate::{Error, Result};

impl DisplayManager {
    /// Show `camera` in `window`, replacing whatever the ring's current slot
    /// held.
    pub fn assign_camera(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
    ) -> Result<()> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        info!(%display_id, window, %camera, "Assigning camera");

        self.ds_mut(display_id).config.windows[window].set_current_camera(camera.clone());
        self.persist(display_id);
        self.sync_timers(display_id);
        self.events.window_changed(display_id, window);
        if self.ds(display_id).is_visible(window) {
            self.replace_live(display_id, window, Some(camera), window)?;
        }
        Ok(())
    }

    /// Unassign `window` and stop its stream.
    pub fn clear_window(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        info!(%display_id, window, "Clearing window");

        let state = self.ds_mut(display_id);
        state.config.windows[window] = WindowInfo {
            sequence_interval_secs: state.config.windows[window].sequence_interval_secs,
            ..WindowInfo::default()
        };
        self.persist(display_id);
        self.sync_timers(display_id);
        self.events.window_changed(display_id, window);
        self.replace_live(display_id, window, None, window)?;
        Ok(())
    }

    /// Drag the assignment of `from` onto the empty window `to`.
    pub fn move_camera(&mut self, display_id: DisplayId, from: WindowIndex, to: WindowIndex) -> Result<()> {
        self.check_window(display_id, from)?;
        self.check_window(display_id, to)?;
        self.ensure_idle(display_id)?;
        if from == to {
            return Ok(());
        }
        let config = &self.ds(display_id).config;
        let Some(camera) = config.camera_of(from).cloned() else {
            return Err(self.reject(Error::NotFound(format!("Camera in window {from}"))));
        };
        if !config.windows[to].is_empty() {
            return Err(self.reject(Error::Conflict(format!("Window {to} is already assigned"))));
        }
        info!(%display_id, from, to, %camera, "Moving camera");

        let config = &mut self.ds_mut(display_id).config;
        let ring = std::mem::take(&mut config.windows[from]);
        config.windows[to] = ring;
        self.persist(display_id);
        self.sync_timers(display_id);
        self.events.window_changed(display_id, from);
        self.events.window_changed(display_id, to);

        if self.ds(display_id).is_visible(to) {
            self.replace_live(display_id, from, Some(camera), to)?;
        } else {
            self.replace_live(display_id, from, None, from)?;
        }
        Ok(())
    }

    /// Put `camera` in the first free window, switching page if needed.
    pub fn start_camera_in_free_window(
        &mut self,
        display_id: DisplayId,
        camera: CameraRef,
    ) -> Result<WindowIndex> {
        self.ensure_idle(display_id)?;
        let Some(window) = allocation::find_free_window(&self.ds(display_id).config) else {
            return Err(self.reject(Error::Conflict("No free window available".into())));
        };
        info!(%display_id, window, %camera, "Starting camera in free window");

        self.ds_mut(display_id).config.windows[window] = WindowInfo::with_camera(camera.clone());
        self.persist(display_id);
        self.events.window_changed(display_id, window);

        let state = self.ds(display_id);
        if state.config.current_bounds().contains(window) {
            self.start_live(display_id, window, camera, None);
        } else {
            let page = state.config.layout.page_of(window);
            self.load_page(display_id, DisplayMode::ChangingPage, page);
        }
        self.select_window(display_id, window)?;
        Ok(window)
    }

    /// Make `window` the selected window and refresh its toolbar state.
    pub fn select_window(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.check_window(display_id, window)?;
        let state = self.ds(display_id);
        if state.mode.current.is_overlay() {
            return Err(self.reject(Error::Busy {
                display: display_id,
                mode: state.mode.current,
            }));
        }

        self.ds_mut(display_id).config.selected_window = window;
        self.persist(display_id);
        self.surface.focus_window(display_id, window);

        let slot = Some(WindowSlot { display: display_id, window });
        let sequencing = self.ds(display_id).config.windows[window].sequence_enabled;
        let audio = self.audio_owner(AudioChannel::Output) == slot;
        let mic = self.audio_owner(AudioChannel::Microphone) == slot;
        self.events
            .toolbar(ToolbarButton::WindowSequence, ToolbarState::from_active(sequencing));
        self.events.toolbar(ToolbarButton::Audio, ToolbarState::from_active(audio));
        self.events.toolbar(ToolbarButton::Microphone, ToolbarState::from_active(mic));
        self.events.window_changed(display_id, window);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LayoutType;
    use crate::test_helpers::{camera, harness, Call};

    #[test]
    fn test_assign_camera_replaces_running_stream() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();
        h.device.take_calls();

        h.manager.assign_camera(DisplayId(0), 0, camera("local", 6)).unwrap();
        h.settle();
        assert!(matches!(h.device.take_calls().as_slice(), [Call::Replace { window: 0, .. }]));
        assert_eq!(
            h.manager.display(DisplayId(0)).unwrap().config.camera_of(0),
            Some(&camera("local", 6))
        );
    }

    #[test]
    fn test_clear_window_stops_stream() {
        let mut h = harness(LayoutType::TwoByTwo, &[(3, camera("local", 4))]);
        h.start();
        h.settle();
        h.device.take_calls();

        h.manager.clear_window(DisplayId(0), 3).unwrap();
        h.settle();
        assert_eq!(h.device.take_calls(), vec![Call::Stop { window: 3 }]);
        assert!(h.manager.stream(DisplayId(0), 3).unwrap().is_idle());
        assert!(h.manager.display(DisplayId(0)).unwrap().config.windows[3].is_empty());
    }

    #[test]
    fn test_move_camera_between_visible_windows() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();
        h.device.take_calls();

        h.manager.move_camera(DisplayId(0), 0, 2).unwrap();
        h.settle();
        let calls = h.device.take_calls();
        assert!(matches!(calls.as_slice(), [Call::Stop { window: 0 }, Call::Start { window: 2, .. }]));
        assert!(h.manager.stream(DisplayId(0), 2).unwrap().is_running());
        assert!(h.manager.display(DisplayId(0)).unwrap().config.windows[0].is_empty());
    }

    #[test]
    fn test_free_window_on_next_page_switches_page() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[
                (0, camera("local", 1)),
                (1, camera("local", 2)),
                (2, camera("local", 3)),
                (3, camera("local", 4)),
            ],
        );
        h.start();
        h.settle();

        let window = h
            .manager
            .start_camera_in_free_window(DisplayId(0), camera("local", 9))
            .unwrap();
        assert_eq!(window, 4);
        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.config.current_page, 1);
        assert_eq!(state.config.selected_window, 4);
        assert!(h.manager.stream(DisplayId(0), 4).unwrap().is_running());
    }
}
