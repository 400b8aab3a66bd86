//! Overlay feature preemption
//!
//! Analog settings, access-control popups and event video popups borrow one
//! window of the grid. The first feature saves the layout and backs up the
//! borrowed window; a higher-priority feature arriving while another is
//! `VideoOn` hides it and inherits the borrowed window, backup and saved
//! layout. Closing walks back down: queued request, hidden feature, then the
//! original grid.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::events::{ToolbarButton, ToolbarState};
use crate::manager::DisplayManager;
use crate::models::{
    BarrierPhase, DisplayId, DisplayMode, FeatureState, LayoutType, OverlayKind, OverlayRecord,
    OverlayRequest, RequestStamp, SavedLayout, SessionId, StreamErrorKind, WindowInfo,
};
use crate::service::mode::Dispatch;
use crate::{Error, Result};

const CLOSE_RETRY_DELAY: Duration = Duration::from_secs(1);

impl DisplayManager {
    /// Highest-priority feature currently on screen
    #[must_use]
    pub fn active_overlay(&self, display_id: DisplayId) -> Option<OverlayKind> {
        let state = self.display(display_id)?;
        OverlayKind::ALL
            .into_iter()
            .rev()
            .find(|kind| {
                let record = state.overlay(*kind);
                record.is_active() && !record.hidden
            })
    }

    fn record_mut(&mut self, display_id: DisplayId, kind: OverlayKind) -> &mut OverlayRecord {
        &mut self.ds_mut(display_id).overlays[kind.index()]
    }

    /// Open an overlay feature on `display`.
    pub fn open_overlay(&mut self, display_id: DisplayId, request: OverlayRequest) -> Result<Dispatch> {
        self.check_display(display_id)?;
        let kind = request.kind;
        let Some(top) = self.active_overlay(display_id) else {
            return Ok(self.open_first(display_id, request));
        };

        let state = self.ds(display_id);
        let top_ready =
            state.overlay(top).state == FeatureState::VideoOn && state.mode.phase == BarrierPhase::Idle;
        if kind > top && top_ready && !state.overlay(kind).is_active() {
            self.preempt(display_id, top, request);
            return Ok(Dispatch::Started);
        }

        info!(%display_id, ?kind, ?top, "Overlay queued behind active feature");
        self.record_mut(display_id, kind).next_pending = Some(request);
        Ok(Dispatch::Latched)
    }

    fn open_first(&mut self, display_id: DisplayId, request: OverlayRequest) -> Dispatch {
        let state = self.ds(display_id);
        let mode = state.mode.current;
        let ready = state.mode.phase == BarrierPhase::Idle
            && matches!(mode, DisplayMode::None | DisplayMode::Expanded);
        if !ready {
            debug!(%display_id, kind = ?request.kind, %mode, "Overlay latched until display is idle");
            self.ds_mut(display_id).mode.latched.popup = Some(request);
            return Dispatch::Latched;
        }

        let config = &state.config;
        let bounds = config.current_bounds();
        let window = if bounds.contains(config.selected_window) {
            config.selected_window
        } else {
            bounds.first
        };
        let saved = SavedLayout {
            layout: config.layout,
            page: config.current_page,
            selected_window: config.selected_window,
        };
        let backup = config.windows[window].clone();
        let kind = request.kind;
        info!(%display_id, ?kind, window, camera = %request.camera, "Opening overlay");

        if mode == DisplayMode::Expanded {
            self.events.toolbar(ToolbarButton::Expand, ToolbarState::Inactive);
        }
        let record = self.record_mut(display_id, kind);
        let next_pending = record.next_pending.take();
        *record = OverlayRecord {
            request: Some(request),
            window: Some(window),
            backup: Some(backup),
            saved: Some(saved),
            state: FeatureState::StopOldWindow,
            next_pending,
            ..OverlayRecord::default()
        };
        self.enter_mode(display_id, kind.mode());
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        for active in self.ds(display_id).registry.active() {
            self.stop_live(display_id, active);
        }
        self.drive(display_id);
        Dispatch::Started
    }

    /// Hide `top` and start `request` in its borrowed window.
    fn preempt(&mut self, display_id: DisplayId, top: OverlayKind, request: OverlayRequest) {
        let kind = request.kind;
        let hidden = self.record_mut(display_id, top);
        hidden.hidden = true;
        hidden.close_at = None;
        let window = hidden.window;
        let backup = hidden.backup.clone();
        let saved = hidden.saved;
        info!(%display_id, ?kind, hidden = ?top, ?window, "Overlay preempting active feature");

        let record = self.record_mut(display_id, kind);
        let next_pending = record.next_pending.take();
        *record = OverlayRecord {
            request: Some(request),
            window,
            backup,
            saved,
            state: FeatureState::StopOldWindow,
            next_pending,
            ..OverlayRecord::default()
        };
        self.enter_mode(display_id, kind.mode());
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        if let Some(window) = window {
            self.stop_live(display_id, window);
        }
        self.drive(display_id);
    }

    /// Put `kind`'s camera into the borrowed window and start it.
    fn start_feature_video(&mut self, display_id: DisplayId, kind: OverlayKind) {
        let record = self.record_mut(display_id, kind);
        record.state = FeatureState::StartVideo;
        let (Some(window), Some(camera)) = (
            record.window,
            record.request.as_ref().map(|request| request.camera.clone()),
        ) else {
            warn!(%display_id, ?kind, "Overlay record without window, closing");
            self.record_mut(display_id, kind).state = FeatureState::StartOldWindow;
            self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
            return;
        };

        let config = &mut self.ds_mut(display_id).config;
        config.layout = LayoutType::OneByOne;
        config.current_page = window;
        config.selected_window = window;
        config.windows[window] = WindowInfo::with_camera(camera.clone());
        self.events.page_changed(display_id, window);

        self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
        self.start_live(display_id, window, camera, None);
    }

    /// Next overlay step once the display's barrier has drained.
    pub(crate) fn advance_overlay(&mut self, display_id: DisplayId) {
        let Some(kind) = self.active_overlay(display_id) else {
            warn!(%display_id, "Overlay mode without an active feature");
            self.finish_mode(display_id);
            return;
        };
        let state = self.ds(display_id).overlay(kind).state;
        debug!(%display_id, ?kind, ?state, "Advancing overlay");

        match state {
            FeatureState::StopOldWindow => self.start_feature_video(display_id, kind),
            FeatureState::StartVideo => {
                let close_at = kind
                    .auto_closes()
                    .then(|| self.now + self.settings.popup_duration());
                let record = self.record_mut(display_id, kind);
                record.state = FeatureState::VideoOn;
                record.close_at = close_at;
                let window = record.window;
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
                if let Some(window) = window {
                    self.surface.focus_window(display_id, window);
                    self.events.window_changed(display_id, window);
                }
                info!(%display_id, ?kind, "Overlay video on");
                self.check_overlay_queue(display_id, kind);
            }
            FeatureState::StopVideo => self.after_feature_stopped(display_id, kind),
            FeatureState::StartOldWindow => {
                self.record_mut(display_id, kind).reset();
                info!(%display_id, ?kind, "Overlay closed, grid restored");
                let queued = OverlayKind::ALL
                    .into_iter()
                    .rev()
                    .find_map(|queued| self.record_mut(display_id, queued).next_pending.take());
                if let Some(request) = queued {
                    let latched = &mut self.ds_mut(display_id).mode.latched;
                    latched.popup.get_or_insert(request);
                }
                self.finish_mode(display_id);
            }
            FeatureState::VideoOn | FeatureState::None => {
                self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
            }
        }
    }

    /// Start a higher-priority request that queued while `top` was starting.
    fn check_overlay_queue(&mut self, display_id: DisplayId, top: OverlayKind) {
        for kind in OverlayKind::ALL.into_iter().rev() {
            if kind <= top || self.ds(display_id).overlay(kind).is_active() {
                continue;
            }
            if let Some(request) = self.record_mut(display_id, kind).next_pending.take() {
                self.preempt(display_id, top, request);
                return;
            }
        }
    }

    /// The closing feature's video is stopped: hand the window on or restore
    /// the grid.
    fn after_feature_stopped(&mut self, display_id: DisplayId, closing: OverlayKind) {
        // Same kind queued: reuse the record
        if let Some(request) = self.record_mut(display_id, closing).next_pending.take() {
            info!(%display_id, kind = ?closing, "Starting queued overlay request");
            self.record_mut(display_id, closing).request = Some(request);
            self.start_feature_video(display_id, closing);
            return;
        }

        let record = self.ds(display_id).overlay(closing).clone();

        // Another kind queued with nothing active for it
        let mut queued = None;
        for kind in OverlayKind::ALL.into_iter().rev() {
            if kind == closing || self.ds(display_id).overlay(kind).is_active() {
                continue;
            }
            queued = self.record_mut(display_id, kind).next_pending.take();
            if queued.is_some() {
                break;
            }
        }
        if let Some(request) = queued {
            let kind = request.kind;
            self.record_mut(display_id, closing).reset();
            let next = self.record_mut(display_id, kind);
            *next = OverlayRecord {
                request: Some(request),
                window: record.window,
                backup: record.backup,
                saved: record.saved,
                ..OverlayRecord::default()
            };
            self.enter_mode(display_id, kind.mode());
            self.start_feature_video(display_id, kind);
            return;
        }

        // Resume the highest hidden feature
        let hidden = OverlayKind::ALL.into_iter().rev().find(|kind| {
            let other = self.ds(display_id).overlay(*kind);
            *kind != closing && other.is_active() && other.hidden
        });
        if let Some(kind) = hidden {
            info!(%display_id, ?kind, "Resuming hidden overlay");
            self.record_mut(display_id, closing).reset();
            self.record_mut(display_id, kind).hidden = false;
            self.enter_mode(display_id, kind.mode());
            self.start_feature_video(display_id, kind);
            return;
        }

        // Last feature: put the grid back
        let record = self.record_mut(display_id, closing);
        record.state = FeatureState::StartOldWindow;
        let (window, backup, saved) = (record.window, record.backup.take(), record.saved);
        let config = &mut self.ds_mut(display_id).config;
        if let (Some(window), Some(backup)) = (window, backup) {
            config.windows[window] = backup;
        }
        if let Some(saved) = saved {
            config.layout = saved.layout;
            config.current_page = saved.page;
            config.selected_window = saved.selected_window;
        }
        let page = config.current_page;
        self.events.page_changed(display_id, page);
        self.begin_phase(display_id, BarrierPhase::ProcessingStartRequest);
        self.start_page(display_id);
    }

    /// Close the feature of `kind`.
    pub fn close_overlay(&mut self, display_id: DisplayId, kind: OverlayKind) -> Result<()> {
        self.check_display(display_id)?;
        let state = self.ds(display_id);
        let record = state.overlay(kind);
        if !record.is_active() {
            if self.record_mut(display_id, kind).next_pending.take().is_some() {
                debug!(%display_id, ?kind, "Dropped queued overlay request");
                return Ok(());
            }
            return Err(self.reject(Error::NotFound(format!("{kind:?} feature"))));
        }
        if record.hidden {
            info!(%display_id, ?kind, "Closing hidden overlay");
            self.record_mut(display_id, kind).reset();
            return Ok(());
        }
        if record.state != FeatureState::VideoOn || state.mode.phase != BarrierPhase::Idle {
            return Err(self.reject(Error::Busy {
                display: display_id,
                mode: state.mode.current,
            }));
        }

        info!(%display_id, ?kind, "Closing overlay");
        let record = self.record_mut(display_id, kind);
        record.state = FeatureState::StopVideo;
        record.close_at = None;
        let window = record.window;
        self.begin_phase(display_id, BarrierPhase::ProcessingStopRequest);
        if let Some(window) = window {
            self.stop_live(display_id, window);
        }
        self.drive(display_id);
        Ok(())
    }

    /// Close popups whose countdown has run out.
    pub(crate) fn expire_overlays(&mut self, now: Instant) {
        for index in 0..self.displays.len() {
            let display_id = DisplayId(index);
            let expired = OverlayKind::ALL.into_iter().find(|kind| {
                let record = self.ds(display_id).overlay(*kind);
                record.state == FeatureState::VideoOn
                    && !record.hidden
                    && record.close_at.is_some_and(|at| at <= now)
            });
            let Some(kind) = expired else {
                continue;
            };
            if self.ds(display_id).mode.phase != BarrierPhase::Idle {
                // Retried shortly so the loop deadline never stays in the past
                self.record_mut(display_id, kind).close_at = Some(now + CLOSE_RETRY_DELAY);
                continue;
            }
            info!(%display_id, ?kind, "Overlay countdown elapsed");
            if let Err(e) = self.close_overlay(display_id, kind) {
                warn!(%display_id, ?kind, error = %e, "Overlay auto-close failed");
                self.record_mut(display_id, kind).close_at = Some(now + CLOSE_RETRY_DELAY);
            }
        }
    }

    /// Send an analog-camera setting to the device while the feature is on.
    pub fn send_feature_command(
        &mut self,
        display_id: DisplayId,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.check_display(display_id)?;
        let record = self.ds(display_id).overlay(OverlayKind::Analog);
        let ready = record.state == FeatureState::VideoOn && !record.hidden;
        let (Some(window), Some(request)) = (record.window, record.request.clone()) else {
            return Err(self.reject(Error::InvalidInput("Analog feature is not open".into())));
        };
        let Some(action) = request.analog_action.filter(|_| ready) else {
            return Err(self.reject(Error::InvalidInput("Analog feature is not ready".into())));
        };
        if record.command_stamp.is_some() {
            return Err(self.reject(Error::Conflict("Device command in progress".into())));
        }

        let camera = request.camera;
        let stamp = self.send(display_id, window, |dev, target| {
            dev.send_device_command(target, camera, action, payload)
        });
        let Some(stamp) = stamp else {
            return Err(self.reject(Error::Conflict("Device command rejected".into())));
        };
        self.record_mut(display_id, OverlayKind::Analog).command_stamp = Some(stamp);
        Ok(())
    }

    pub(crate) fn on_command_reply(
        &mut self,
        display_id: DisplayId,
        stamp: RequestStamp,
        result: std::result::Result<Option<SessionId>, StreamErrorKind>,
    ) {
        let record = self.record_mut(display_id, OverlayKind::Analog);
        if record.command_stamp != Some(stamp) {
            debug!(%display_id, %stamp, "Stale device command reply dropped");
            return;
        }
        record.command_stamp = None;
        if let Err(error) = result {
            warn!(%display_id, ?error, "Device command failed");
            self.events.banner(error.message());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AnalogAction, StreamStatus};
    use crate::test_helpers::{camera, harness, Call};

    fn open_analog(h: &mut crate::test_helpers::Harness) {
        h.manager
            .open_overlay(
                DisplayId(0),
                OverlayRequest::analog(camera("local", 8), AnalogAction::Zoom),
            )
            .unwrap();
        h.settle();
    }

    #[test]
    fn test_overlay_borrows_selected_window_and_restores_grid() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[(0, camera("local", 1)), (1, camera("local", 2))],
        );
        h.start();
        h.settle();
        h.manager.select_window(DisplayId(0), 1).unwrap();

        open_analog(&mut h);
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.mode.current, DisplayMode::AnalogFeature);
        assert_eq!(state.config.layout, LayoutType::OneByOne);
        assert_eq!(state.overlay(OverlayKind::Analog).window, Some(1));
        assert_eq!(state.overlay(OverlayKind::Analog).state, FeatureState::VideoOn);
        assert_eq!(state.config.camera_of(1), Some(&camera("local", 8)));
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_idle());

        h.manager.close_overlay(DisplayId(0), OverlayKind::Analog).unwrap();
        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.mode.current, DisplayMode::None);
        assert_eq!(state.config.layout, LayoutType::TwoByTwo);
        assert_eq!(state.config.camera_of(1), Some(&camera("local", 2)));
        assert!(!state.overlay(OverlayKind::Analog).is_active());
        assert_eq!(
            h.manager.stream(DisplayId(0), 1).unwrap().camera,
            Some(camera("local", 2))
        );
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_running());
    }

    #[test]
    fn test_cosec_preempts_analog_video_on() {
        let mut h = harness(
            LayoutType::TwoByTwo,
            &[(0, camera("local", 1)), (1, camera("local", 2))],
        );
        h.start();
        h.settle();
        h.manager.select_window(DisplayId(0), 1).unwrap();
        open_analog(&mut h);
        h.device.take_calls();

        let dispatch = h
            .manager
            .open_overlay(DisplayId(0), OverlayRequest::cosec(camera("local", 9), "door-7"))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Started);

        let state = h.manager.display(DisplayId(0)).unwrap();
        let analog = state.overlay(OverlayKind::Analog);
        let cosec = state.overlay(OverlayKind::Cosec);
        assert!(analog.is_active());
        assert!(analog.hidden);
        assert_eq!(cosec.state, FeatureState::StopOldWindow);
        assert_eq!(cosec.window, Some(1));
        assert_eq!(cosec.saved, analog.saved);
        assert_eq!(cosec.backup, analog.backup);
        assert_eq!(state.mode.current, DisplayMode::CosecFeature);
        // Stop issued without any further user action
        assert_eq!(h.device.take_calls(), vec![Call::Stop { window: 1 }]);

        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.overlay(OverlayKind::Cosec).state, FeatureState::VideoOn);
        assert_eq!(state.config.camera_of(1), Some(&camera("local", 9)));

        // Closing cosec resumes the hidden analog feature
        h.manager.close_overlay(DisplayId(0), OverlayKind::Cosec).unwrap();
        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.mode.current, DisplayMode::AnalogFeature);
        assert!(!state.overlay(OverlayKind::Analog).hidden);
        assert_eq!(state.overlay(OverlayKind::Analog).state, FeatureState::VideoOn);
        assert_eq!(
            h.manager.stream(DisplayId(0), 1).unwrap().camera,
            Some(camera("local", 8))
        );
    }

    #[test]
    fn test_lower_priority_request_is_queued() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();
        h.manager
            .open_overlay(DisplayId(0), OverlayRequest::video_popup(camera("local", 3), "evt-1"))
            .unwrap();
        h.settle();

        let dispatch = h
            .manager
            .open_overlay(DisplayId(0), OverlayRequest::cosec(camera("local", 4), "door-2"))
            .unwrap();
        assert_eq!(dispatch, Dispatch::Latched);
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert!(state.overlay(OverlayKind::Cosec).next_pending.is_some());
        assert!(!state.overlay(OverlayKind::Cosec).is_active());

        h.manager.close_overlay(DisplayId(0), OverlayKind::VideoPopup).unwrap();
        h.settle();
        let state = h.manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.mode.current, DisplayMode::CosecFeature);
        assert_eq!(state.overlay(OverlayKind::Cosec).state, FeatureState::VideoOn);
    }

    #[test]
    fn test_popup_closes_after_countdown() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();
        h.manager
            .open_overlay(DisplayId(0), OverlayRequest::video_popup(camera("local", 3), "evt-1"))
            .unwrap();
        h.settle();
        let close_at = h
            .manager
            .display(DisplayId(0))
            .unwrap()
            .overlay(OverlayKind::VideoPopup)
            .close_at
            .unwrap();
        assert!(h.manager.next_deadline().unwrap() <= close_at);

        h.manager.on_tick(close_at);
        h.settle();
        assert_eq!(h.manager.mode(DisplayId(0)), Some(DisplayMode::None));
        assert!(h.manager.stream(DisplayId(0), 0).unwrap().is_running());
    }

    #[test]
    fn test_feature_command_requires_video_on() {
        let mut h = harness(LayoutType::TwoByTwo, &[(0, camera("local", 1))]);
        h.start();
        h.settle();
        assert!(h
            .manager
            .send_feature_command(DisplayId(0), serde_json::json!({"zoom": 2}))
            .is_err());

        open_analog(&mut h);
        h.device.take_calls();
        h.manager
            .send_feature_command(DisplayId(0), serde_json::json!({"zoom": 2}))
            .unwrap();
        assert!(matches!(
            h.device.take_calls().as_slice(),
            [Call::Command { action: AnalogAction::Zoom, .. }]
        ));
        h.settle();
        assert!(h
            .manager
            .display(DisplayId(0))
            .unwrap()
            .overlay(OverlayKind::Analog)
            .command_stamp
            .is_none());
        assert_eq!(
            h.manager.stream(DisplayId(0), 0).unwrap().status,
            StreamStatus::Running
        );
    }
}
