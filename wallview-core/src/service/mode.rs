//! Display mode machine
//!
//! Every display-wide maintenance operation runs as a sequence of barrier
//! phases: issue a batch of stop or start requests, wait for the display's
//! pending counter to drain, then let [`DisplayManager::advance_barrier`]
//! pick the next step. Requests arriving while a display is busy are latched
//! and replayed once it returns to [`DisplayMode::None`].

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::allocation;
use crate::device::PlaybackCommand;
use crate::events::{ToolbarButton, ToolbarState};
use crate::manager::DisplayManager;
use crate::models::{
    BarrierPhase, DisplayId, DisplayMode, ExpandRequest, PlaybackCursor, StreamKind, StyleRequest,
    WindowIndex, WindowInfo, MAX_WINDOWS,
};
use crate::{Error, Result};

/// What happened to a maintenance request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Running now
    Started,
    /// Deferred until the display is idle again
    Latched,
    /// Nothing to do
    Ignored,
}

/// Time window shared by every window of a sync playback
#[derive(Debug, Clone, PartialEq)]
pub struct SyncPlaybackPlan {
    pub cursor: PlaybackCursor,
}

impl DisplayManager {
    /// Fail with a banner unless the display rests in the plain grid.
    pub(crate) fn ensure_grid_mode(&self, display_id: DisplayId) -> Result<()> {
        self.check_display(display_id)?;
        let mode = &self.ds(display_id).mode;
        if mode.phase == BarrierPhase::Idle && mode.current.allows_sequencing() {
            Ok(())
        } else {
            Err(self.reject(Error::Busy {
                display: display_id,
                mode: mode.current,
            }))
        }
    }

    /// Fail with a banner unless the display is idle in mode `None`.
    pub(crate) fn ensure_idle(&self, display_id: DisplayId) -> Result<()> {
        self.check_display(display_id)?;
        let mode = &self.ds(display_id).mode;
        if mode.is_idle() {
            Ok(())
        } else {
            Err(self.reject(Error::Busy {
                display: display_id,
                mode: mode.current,
            }))
        }
    }

    /// Stop the visible windows, move to `page`, and start it.
    pub(crate) fn load_page(&mut self, display_id: DisplayId, mode: DisplayMode, page: usize) {
        self.enter_mode(display_id, mode);
        let state = self.ds_mut(display_id);
        state.page_target = page;
        let active = state.registry.active_in(state.config.current_bounds());
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        for window in active {
            self.stop_live(display_id, window);
        }
        self.drive(display_id);
    }

    /// Start every assigned window of the current page
    pub(crate) fn start_page(&mut self, display_id: DisplayId) {
        for window in self.ds(display_id).config.current_bounds().windows() {
            self.start_assigned(display_id, window);
        }
    }

    fn stop_all(&mut self, display_id: DisplayId) {
        for window in self.ds(display_id).registry.active() {
            self.stop_live(display_id, window);
        }
    }

    /// Move `offset` pages forward (or back when negative).
    pub fn change_page(&mut self, display_id: DisplayId, offset: i64) -> Result<Dispatch> {
        self.check_display(display_id)?;
        let state = self.ds(display_id);
        if state.mode.current.is_overlay() {
            return Err(self.reject(Error::Busy {
                display: display_id,
                mode: state.mode.current,
            }));
        }
        if offset == 0 {
            return Ok(Dispatch::Ignored);
        }
        if !state.mode.is_idle() {
            let latched = &mut self.ds_mut(display_id).mode.latched;
            latched.page_offset += offset;
            debug!(%display_id, offset, total = latched.page_offset, "Page change latched");
            return Ok(Dispatch::Latched);
        }

        let target = state.config.layout.offset_page(state.config.current_page, offset);
        if target == state.config.current_page {
            return Ok(Dispatch::Ignored);
        }
        info!(%display_id, from = state.config.current_page, to = target, "Changing page");
        self.load_page(display_id, DisplayMode::ChangingPage, target);
        Ok(Dispatch::Started)
    }

    /// Stop and restart every window of the current page.
    pub fn refresh_page(&mut self, display_id: DisplayId) -> Result<Dispatch> {
        self.check_display(display_id)?;
        if !self.ds(display_id).mode.is_idle() {
            self.ds_mut(display_id).mode.latched.refresh = true;
            return Ok(Dispatch::Latched);
        }
        let page = self.ds(display_id).config.current_page;
        self.load_page(display_id, DisplayMode::RefreshingPage, page);
        Ok(Dispatch::Started)
    }

    /// Install a new layout, optionally with new window assignments.
    pub fn apply_style(&mut self, display_id: DisplayId, style: StyleRequest) -> Result<Dispatch> {
        self.check_display(display_id)?;
        if style.selected_window.is_some_and(|window| window >= MAX_WINDOWS) {
            return Err(self.reject(Error::InvalidInput("Selected window out of range".into())));
        }
        if style.windows.as_ref().is_some_and(|windows| windows.len() > MAX_WINDOWS) {
            return Err(self.reject(Error::InvalidInput(format!(
                "A display holds at most {MAX_WINDOWS} windows"
            ))));
        }
        if !self.ds(display_id).mode.is_idle() {
            debug!(%display_id, layout = %style.layout, "Style change latched");
            self.ds_mut(display_id).mode.latched.style = Some(style);
            return Ok(Dispatch::Latched);
        }

        info!(%display_id, layout = %style.layout, "Applying style");
        self.ds_mut(display_id).pending_style = Some(style);
        self.enter_mode(display_id, DisplayMode::ApplyingNewStyle);
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        self.stop_all(display_id);
        self.drive(display_id);
        Ok(Dispatch::Started)
    }

    /// Apply the store's factory layout
    pub fn load_default_style(&mut self, display_id: DisplayId) -> Result<Dispatch> {
        self.check_display(display_id)?;
        let style = self.store.read_default_style(display_id)?.normalized();
        self.apply_style(
            display_id,
            StyleRequest {
                layout: style.layout,
                windows: Some(style.windows),
                selected_window: Some(style.selected_window),
            },
        )
    }

    fn install_style(&mut self, display_id: DisplayId) {
        let Some(style) = self.ds_mut(display_id).pending_style.take() else {
            warn!(%display_id, "Style phase without a pending style");
            return;
        };
        let config = &mut self.ds_mut(display_id).config;
        config.layout = style.layout;
        if let Some(windows) = style.windows {
            config.windows = windows;
        }
        if let Some(selected) = style.selected_window {
            config.selected_window = selected;
        }
        let page = config.layout.page_of(config.selected_window);
        *config = std::mem::take(config).normalized();
        config.current_page = page.min(config.layout.page_count() - 1);
        // Window sequencing yields to display sequencing
        if config.sequence_enabled {
            for info in &mut config.windows {
                info.sequence_enabled = false;
            }
        }
        let page = config.current_page;
        self.persist(display_id);
        self.events.page_changed(display_id, page);
    }

    /// Show `window` alone on the display.
    pub fn expand_window(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<Dispatch> {
        self.check_window(display_id, window)?;
        let state = self.ds(display_id);
        if !state.mode.is_idle() {
            self.ds_mut(display_id).mode.latched.expand = Some(ExpandRequest::Expand(window));
            return Ok(Dispatch::Latched);
        }
        if !state.config.current_bounds().contains(window) {
            return Err(self.reject(Error::InvalidInput(format!(
                "Window {window} is not on the current page"
            ))));
        }

        info!(%display_id, window, "Expanding window");
        let others: Vec<WindowIndex> = state
            .registry
            .active_in(state.config.current_bounds())
            .into_iter()
            .filter(|&other| other != window)
            .collect();
        self.ds_mut(display_id).config.selected_window = window;
        self.enter_mode(display_id, DisplayMode::ExpandingWindow);
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        for other in others {
            self.stop_live(display_id, other);
        }
        self.drive(display_id);
        Ok(Dispatch::Started)
    }

    /// Return an expanded display to its grid.
    pub fn collapse_window(&mut self, display_id: DisplayId) -> Result<Dispatch> {
        self.check_display(display_id)?;
        let mode = &self.ds(display_id).mode;
        if mode.current == DisplayMode::None && mode.phase == BarrierPhase::Idle {
            return Ok(Dispatch::Ignored);
        }
        if mode.current != DisplayMode::Expanded || mode.phase != BarrierPhase::Idle {
            self.ds_mut(display_id).mode.latched.expand = Some(ExpandRequest::Collapse);
            return Ok(Dispatch::Latched);
        }

        info!(%display_id, "Collapsing window");
        self.enter_mode(display_id, DisplayMode::Collapsing);
        self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
        self.start_page(display_id);
        self.drive(display_id);
        Ok(Dispatch::Started)
    }

    /// Expanded-mode sequencing: move the expansion to the next assigned window.
    pub(crate) fn expanded_sequence_step(&mut self, display_id: DisplayId) {
        let config = &self.ds(display_id).config;
        let current = config.selected_window;
        let Some(next) = allocation::next_assigned_window(config, current) else {
            return;
        };
        let Some(camera) = config.camera_of(next).cloned() else {
            return;
        };
        debug!(%display_id, from = current, to = next, "Expanded sequencing step");

        self.begin_phase(display_id, BarrierPhase::ProcessingReplaceRequest);
        let state = self.ds_mut(display_id);
        state.config.selected_window = next;
        let page = state.config.layout.page_of(next);
        let page_moved = page != state.config.current_page;
        state.config.current_page = page;
        if page_moved {
            self.events.page_changed(display_id, page);
        }
        if let Err(e) = self.replace_live(display_id, current, Some(camera), next) {
            warn!(%display_id, error = %e, "Expanded sequencing step failed");
        }
        self.surface.focus_window(display_id, next);
        self.persist(display_id);
        self.drive(display_id);
    }

    /// Stop the page and play every assigned window back from `start`.
    pub fn start_sync_playback(
        &mut self,
        display_id: DisplayId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<()> {
        self.ensure_idle(display_id)?;
        if end <= start {
            return Err(self.reject(Error::InvalidInput("Playback window is empty".into())));
        }
        info!(%display_id, %start, %end, "Starting sync playback");
        self.ds_mut(display_id).sync_plan = Some(SyncPlaybackPlan {
            cursor: PlaybackCursor::new(start, end),
        });
        self.enter_mode(display_id, DisplayMode::SyncPlaybackStarting);
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        self.stop_all(display_id);
        self.drive(display_id);
        Ok(())
    }

    /// Send the same transport command to every sync playback window.
    pub fn step_sync_playback(&mut self, display_id: DisplayId, command: PlaybackCommand) -> Result<()> {
        self.check_display(display_id)?;
        if self.ds(display_id).mode.current != DisplayMode::SyncPlaybackActive {
            return Err(self.reject(Error::InvalidInput("Sync playback is not running".into())));
        }
        let windows: Vec<WindowIndex> = self
            .ds(display_id)
            .registry
            .iter()
            .filter(|(_, info)| info.kind == StreamKind::SyncPlayback && info.is_running())
            .map(|(window, _)| window)
            .collect();
        // One refused window does not stop the rest of the group
        let mut first_error = None;
        for window in windows {
            if let Err(e) = self.step_playback(display_id, window, command) {
                warn!(%display_id, window, error = %e, "Sync playback step failed");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Leave sync playback and reload the live page.
    pub fn stop_sync_playback(&mut self, display_id: DisplayId) -> Result<()> {
        self.check_display(display_id)?;
        let mode = &self.ds(display_id).mode;
        if mode.current != DisplayMode::SyncPlaybackActive || mode.phase != BarrierPhase::Idle {
            return Err(self.reject(Error::Busy {
                display: display_id,
                mode: mode.current,
            }));
        }
        info!(%display_id, "Stopping sync playback");
        self.enter_mode(display_id, DisplayMode::SyncPlaybackStopping);
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        self.stop_all(display_id);
        self.drive(display_id);
        Ok(())
    }

    /// Free every device session so the display can decode locally.
    pub fn enter_local_decoding(&mut self, display_id: DisplayId) -> Result<()> {
        self.ensure_idle(display_id)?;
        info!(%display_id, "Entering local decoding");
        self.enter_mode(display_id, DisplayMode::LocalDecoding);
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        self.stop_all(display_id);
        self.drive(display_id);
        Ok(())
    }

    pub fn exit_local_decoding(&mut self, display_id: DisplayId) -> Result<()> {
        self.check_display(display_id)?;
        let mode = &self.ds(display_id).mode;
        if mode.current != DisplayMode::LocalDecoding || mode.phase != BarrierPhase::Idle {
            return Err(self.reject(Error::Busy {
                display: display_id,
                mode: mode.current,
            }));
        }
        info!(%display_id, "Leaving local decoding");
        self.reload_live(display_id);
        Ok(())
    }

    fn reload_live(&mut self, display_id: DisplayId) {
        self.enter_mode(display_id, DisplayMode::RefreshingPage);
        self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
        self.start_page(display_id);
        self.drive(display_id);
    }

    /// Next step of the display's maintenance operation, called once its
    /// pending counter has drained.
    pub(crate) fn advance_barrier(&mut self, display_id: DisplayId) {
        let mode = self.ds(display_id).mode.current;
        let phase = self.ds(display_id).mode.phase;
        debug!(%display_id, %mode, ?phase, "Barrier drained");

        match (mode, phase) {
            (DisplayMode::ChangingPage | DisplayMode::RefreshingPage, BarrierPhase::ProcessingStopRequest) => {
                let state = self.ds_mut(display_id);
                state.config.current_page = state.page_target.min(state.config.layout.page_count() - 1);
                let page = state.config.current_page;
                self.persist(display_id);
                self.events.page_changed(display_id, page);
                self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
                self.start_page(display_id);
            }
            (DisplayMode::ApplyingNewStyle, BarrierPhase::ProcessingStopRequest) => {
                self.install_style(display_id);
                self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
                self.start_page(display_id);
            }
            (
                DisplayMode::ChangingPage
                | DisplayMode::RefreshingPage
                | DisplayMode::RetryingPage
                | DisplayMode::ApplyingNewStyle,
                BarrierPhase::ProcessingStartRequest,
            ) => self.finish_mode(display_id),
            (DisplayMode::ExpandingWindow, BarrierPhase::ProcessingStopRequest) => {
                let window = self.ds(display_id).config.selected_window;
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
                self.enter_mode(display_id, DisplayMode::Expanded);
                self.start_assigned(display_id, window);
                self.surface.focus_window(display_id, window);
                self.events.toolbar(ToolbarButton::Expand, ToolbarState::Active);
                let latched = &mut self.ds_mut(display_id).mode.latched;
                if latched.expand == Some(ExpandRequest::Collapse) {
                    latched.expand = None;
                    if let Err(e) = self.collapse_window(display_id) {
                        warn!(%display_id, error = %e, "Latched collapse failed");
                    }
                }
            }
            (DisplayMode::Expanded, _) => {
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
            }
            (DisplayMode::Collapsing, _) => {
                self.events.toolbar(ToolbarButton::Expand, ToolbarState::Inactive);
                self.finish_mode(display_id);
            }
            (DisplayMode::SyncPlaybackStarting, BarrierPhase::ProcessingStopRequest) => {
                self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
                self.start_sync_windows(display_id);
            }
            (DisplayMode::SyncPlaybackStarting, _) => {
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
                self.enter_mode(display_id, DisplayMode::SyncPlaybackActive);
                self.events.toolbar(ToolbarButton::SyncPlayback, ToolbarState::Active);
            }
            (DisplayMode::SyncPlaybackStopping, _) => {
                self.ds_mut(display_id).sync_plan = None;
                self.events.toolbar(ToolbarButton::SyncPlayback, ToolbarState::Inactive);
                self.reload_live(display_id);
            }
            (DisplayMode::LocalDecoding, _) => {
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
            }
            (DisplayMode::SyncPlaybackActive, _) => {
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
            }
            (mode, _) if mode.is_overlay() => self.advance_overlay(display_id),
            (mode, phase) => {
                warn!(%display_id, %mode, ?phase, "No next step for barrier, returning to idle");
                self.finish_mode(display_id);
            }
        }
    }

    fn start_sync_windows(&mut self, display_id: DisplayId) {
        let Some(plan) = self.ds(display_id).sync_plan.clone() else {
            return;
        };
        let assigned: Vec<_> = self
            .ds(display_id)
            .config
            .current_bounds()
            .windows()
            .filter_map(|window| {
                self.ds(display_id)
                    .config
                    .camera_of(window)
                    .cloned()
                    .map(|camera| (window, camera))
            })
            .collect();
        for (window, camera) in assigned {
            self.get_playback_id(
                display_id,
                window,
                camera,
                StreamKind::SyncPlayback,
                plan.cursor.clone(),
            );
        }
    }

    /// Run at most one latched request, highest priority first.
    pub(crate) fn replay_latched(&mut self, display_id: DisplayId) {
        if !self.ds(display_id).mode.is_idle() {
            return;
        }
        let latched = &mut self.ds_mut(display_id).mode.latched;
        if latched.is_empty() {
            return;
        }

        let result = if let Some(request) = latched.popup.take() {
            self.open_overlay(display_id, request)
        } else if let Some(style) = latched.style.take() {
            self.apply_style(display_id, style)
        } else if let Some(expand) = latched.expand.take() {
            match expand {
                ExpandRequest::Expand(window) => self.expand_window(display_id, window),
                ExpandRequest::Collapse => Ok(Dispatch::Ignored),
            }
        } else if latched.page_offset != 0 {
            let offset = std::mem::take(&mut latched.page_offset);
            self.change_page(display_id, offset)
        } else {
            latched.refresh = false;
            self.refresh_page(display_id)
        };

        match result {
            Ok(dispatch) => {
                debug!(%display_id, ?dispatch, "Latched request replayed");
                if dispatch == Dispatch::Ignored {
                    self.replay_latched(display_id);
                }
            }
            Err(e) => {
                warn!(%display_id, error = %e, "Latched request failed");
                self.replay_latched(display_id);
            }
        }
    }

    /// Reassign the whole ring of one window.
    pub fn assign_ring(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        cameras: Vec<crate::models::CameraRef>,
        interval_secs: u32,
    ) -> Result<()> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        if cameras.len() > crate::models::RING_CAPACITY {
            return Err(self.reject(Error::InvalidInput(format!(
                "A window cycles through at most {} cameras",
                crate::models::RING_CAPACITY
            ))));
        }

        let state = self.ds_mut(display_id);
        let mut info = WindowInfo::with_ring(cameras, interval_secs).normalized();
        info.sequence_enabled = !state.config.sequence_enabled && allocation::is_multi_channel(&info);
        let camera = info.current_camera().cloned();
        state.config.windows[window] = info;
        self.persist(display_id);
        self.sync_timers(display_id);
        self.events.window_changed(display_id, window);

        if self.ds(display_id).is_visible(window) {
            self.replace_live(display_id, window, camera, window)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::LayoutType;
    use crate::store::ConfigStore;
    use crate::test_helpers::{camera, harness, Call};

    #[test]
    fn test_page_change_runs_stop_then_start_barrier() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[(0, camera("local", 1)), (4, camera("local", 5))],
        );
        h.start();
        h.settle();
        h.device.take_calls();

        assert_eq!(h.manager.change_page(DisplayId(0), 1).unwrap(), Dispatch::Started);
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::ChangingPage));
        assert_eq!(h.device.take_calls(), vec![Call::Stop { window: 0 }]);

        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::None));
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.config.current_page, 1);
        assert_eq!(state.pending.display(), 0);
        assert!(h.manager.stream(DisplayId(0), 4).unwrap().is_running());
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_idle());
    }

    #[test]
    fn test_page_offsets_accumulate_while_busy() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();

        h.manager.change_page(DisplayId(0), 1).unwrap();
        assert_eq!(h.manager.change_page(DisplayId(0), 1).unwrap(), Dispatch::Latched);
        assert_eq!(h.manager.change_page(DisplayId(0), 1).unwrap(), Dispatch::Latched);
        assert_eq!(
            h.manager.display(DisplayId(0)).unwrap().mode.latched.page_offset,
            2
        );

        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.config.current_page, 3);
        assert!(state.mode.is_idle());
        assert!(state.mode.latched.is_empty());
    }

    #[test]
    fn test_latched_style_is_last_wins() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.manager.apply_style(DisplayId(0), StyleRequest::layout(LayoutType::ThreeByThree)).unwrap();
        h.manager.apply_style(DisplayId(0), StyleRequest::layout(LayoutType::FourByFour)).unwrap();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::RefreshingPage));

        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.config.layout, LayoutType::FourByFour);
        assert!(state.mode.is_idle());
        assert_eq!(
            h.store.read_display_layout(DisplayId(0)).unwrap().layout,
            LayoutType::FourByFour
        );
    }

    #[test]
    fn test_overlay_mode_rejects_page_change_with_banner() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();
        h.manager
            .open_overlay(
                DisplayId(0),
                crate::models::OverlayRequest::cosec(camera("local", 9), "door-1"),
            )
            .unwrap();
        h.settle();
        h.drain_events();

        let err = h.manager.change_page(DisplayId(0), 1).unwrap_err();
        assert!(matches!(err, Error::Busy { .. }));
        assert!(h.banners().iter().any(|text| text.contains("wait")));
    }

    #[test]
    fn test_expand_and_collapse() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[(0, camera("local", 1)), (1, camera("local", 2))],
        );
        h.start();
        h.settle();
        h.device.take_calls();

        h.manager.expand_window(DisplayId(0), 1).unwrap();
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::Expanded));
        assert_eq!(h.device.take_calls(), vec![Call::Stop { window: 0 }]);
        assert!(h.manager.stream(DisplayId(0), 1).unwrap().is_running());

        h.manager.collapse_window(DisplayId(0)).unwrap();
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::None));
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_running());
    }

    #[test]
    fn test_sync_playback_lifecycle() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[(0, camera("local", 1)), (2, camera("local", 3))],
        );
        h.start();
        h.settle();
        h.device.take_calls();

        let end = Utc::now();
        let start = end - chrono::Duration::minutes(10);
        h.manager.start_sync_playback(DisplayId(0), start, end).unwrap();
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::SyncPlaybackActive));
        for window in [0, 2] {
            let info = h.manager.stream(DisplayId(0), window).unwrap();
            assert_eq!(info.kind, StreamKind::SyncPlayback);
            assert!(info.is_running());
        }

        h.manager.stop_sync_playback(DisplayId(0)).unwrap();
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::None));
        assert_eq!(
            h.manager.stream(DisplayId(0), 0).unwrap().kind,
            StreamKind::Live
        );
    }

    #[test]
    fn test_local_decoding_frees_sessions() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();

        h.manager.enter_local_decoding(DisplayId(0)).unwrap();
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::LocalDecoding));
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_idle());

        h.manager.exit_local_decoding(DisplayId(0)).unwrap();
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::None));
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_running());
    }

    #[test]
    fn test_sync_step_reaches_every_window_when_one_is_refused() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[(0, camera("local", 1)), (2, camera("local", 3))],
        );
        h.start();
        h.settle();
        let end = Utc::now();
        h.manager
            .start_sync_playback(DisplayId(0), end - chrono::Duration::minutes(5), end)
            .unwrap();
        h.settle();
        h.device.take_calls();

        h.device.reject_next(1);
        let result = h.manager.step_sync_playback(DisplayId(0), PlaybackCommand::Pause);
        assert!(matches!(result, Err(Error::Conflict(_))));
        assert_eq!(
            h.device.take_calls(),
            vec![Call::Playback {
                window: 2,
                command: PlaybackCommand::Pause
            }]
        );
        h.settle();
        assert!(h.manager.stream(DisplayId(0), 2).unwrap().is_running());
    }
}
