//! Stream session gateway
//!
//! Issues start/stop/replace/playback requests for one window's session and
//! folds the device replies back into the window registry. Replies are only
//! accepted when their stamp matches the one recorded on the window; anything
//! else belongs to a superseded request and is dropped after its pending
//! count has been released.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::device::{DeviceEvent, PlaybackCommand, StreamEvent, StreamEventKind};
use crate::manager::DisplayManager;
use crate::models::{
    CameraRef, DisplayId, FollowUp, PendingOp, PlaybackCursor, RequestStamp, SessionId,
    StreamErrorKind, StreamInfo, StreamKind, StreamStatus, StreamVariant, WindowIndex,
};
use crate::{Error, Result};

/// Result of a live start request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// Request accepted by the device layer
    Requested,
    /// Device unreachable, window parked until it reconnects
    AwaitingDevice,
    /// Channel does not exist on the device, window and ring slot cleared
    Cleared,
    /// Another window is already requesting the same camera
    WaitingOnPeer,
    /// Device layer refused the request synchronously
    Rejected,
    /// Window still holds a session
    Ignored,
}

/// How a replace request is carried out.
///
/// Determined by whether the source window holds a session (`old_empty`),
/// whether a new camera was supplied (`new_empty`), and whether source and
/// destination are the same window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceOutcome {
    NoOp,
    StartOnly,
    StopOnly,
    StopThenStart,
    AtomicReplace,
}

#[must_use]
pub const fn classify_replace(old_empty: bool, new_empty: bool, same_window: bool) -> ReplaceOutcome {
    match (old_empty, new_empty, same_window) {
        (true, true, _) => ReplaceOutcome::NoOp,
        (true, false, _) => ReplaceOutcome::StartOnly,
        (false, true, _) => ReplaceOutcome::StopOnly,
        (false, false, true) => ReplaceOutcome::AtomicReplace,
        (false, false, false) => ReplaceOutcome::StopThenStart,
    }
}

/// Where a camera stands on its device
enum CameraCheck {
    Valid,
    Unreachable,
    InvalidChannel,
}

impl DisplayManager {
    fn check_camera(&self, camera: &CameraRef) -> CameraCheck {
        match self.device.device_info(&camera.device) {
            Some(info) if !info.reachable => CameraCheck::Unreachable,
            None => CameraCheck::Unreachable,
            Some(info) if camera.channel == 0 || camera.channel > info.camera_count => {
                CameraCheck::InvalidChannel
            }
            Some(_) => CameraCheck::Valid,
        }
    }

    /// Drop an invalid camera from the window and its ring
    fn clear_invalid(&mut self, display_id: DisplayId, window: WindowIndex) {
        let state = self.ds_mut(display_id);
        state.registry.clear(window);
        if let Some(info) = state.config.window_mut(window) {
            info.clear_current_slot();
        }
        self.persist(display_id);
        self.events.window_changed(display_id, window);
    }

    /// Start `camera` in `window` on behalf of a user.
    ///
    /// Unlike the internal start, a window that already holds a session is
    /// reported as a conflict.
    pub fn open_live(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
        variant: Option<StreamVariant>,
    ) -> Result<StartOutcome> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        match self.start_live(display_id, window, camera, variant) {
            StartOutcome::Ignored => Err(self.reject(Error::Conflict(format!(
                "Window {window} is already streaming"
            )))),
            outcome => Ok(outcome),
        }
    }

    /// Stop `window` on behalf of a user.
    pub fn close_live(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        self.stop_live(display_id, window);
        Ok(())
    }

    /// Request a live session for `camera` in `window`.
    pub(crate) fn start_live(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
        variant: Option<StreamVariant>,
    ) -> StartOutcome {
        let previous = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
        if previous.holds_device_session() {
            warn!(%display_id, window, %camera, "Window already holds a session, start ignored");
            return StartOutcome::Ignored;
        }

        match self.check_camera(&camera) {
            CameraCheck::Unreachable => {
                debug!(%display_id, window, %camera, "Device unreachable, awaiting reconnect");
                *self.stream_mut(display_id, window) = StreamInfo {
                    kind: StreamKind::LiveAwaiting,
                    status: StreamStatus::EventWait,
                    error: Some(StreamErrorKind::DeviceUnreachable),
                    camera: Some(camera),
                    variant: previous.variant,
                    ..StreamInfo::default()
                };
                self.events.window_changed(display_id, window);
                return StartOutcome::AwaitingDevice;
            }
            CameraCheck::InvalidChannel => {
                info!(%display_id, window, %camera, "Camera not present on device, clearing window");
                self.clear_invalid(display_id, window);
                return StartOutcome::Cleared;
            }
            CameraCheck::Valid => {}
        }

        if let Some(peer) = self.ds(display_id).registry.recovering_peer(&camera, window) {
            debug!(%display_id, window, peer, %camera, "Camera already requested, waiting on peer");
            *self.stream_mut(display_id, window) = StreamInfo {
                kind: StreamKind::Live,
                status: StreamStatus::Connecting,
                camera: Some(camera),
                waiting_on: Some(peer),
                ..StreamInfo::default()
            };
            self.events.window_changed(display_id, window);
            return StartOutcome::WaitingOnPeer;
        }

        let variant = variant.unwrap_or_else(|| {
            let keep_sub = previous.variant == StreamVariant::Sub
                && previous.camera.as_ref() == Some(&camera);
            if previous.downgrade_on_retry || keep_sub {
                StreamVariant::Sub
            } else {
                StreamVariant::Main
            }
        });
        let geometry = self.surface.window_geometry(display_id, window);
        let request_camera = camera.clone();
        let stamp = self.send(display_id, window, |dev, target| {
            dev.start_stream(target, request_camera, variant, geometry)
        });

        let info = self.stream_mut(display_id, window);
        *info = StreamInfo {
            kind: StreamKind::Live,
            status: StreamStatus::Connecting,
            camera: Some(camera),
            variant,
            ..StreamInfo::default()
        };
        let outcome = if let Some(stamp) = stamp {
            info.stamp = Some(stamp);
            info.pending = Some(PendingOp::Start);
            StartOutcome::Requested
        } else {
            info.fail(StreamErrorKind::Rejected);
            StartOutcome::Rejected
        };
        self.events.window_changed(display_id, window);
        outcome
    }

    /// Start whatever `window` is configured to show, live or playback.
    pub(crate) fn restart_window(&mut self, display_id: DisplayId, window: WindowIndex) -> bool {
        let Some(info) = self.ds(display_id).registry.get(window).cloned() else {
            return false;
        };
        if info.kind.is_playback() {
            if let (Some(camera), Some(cursor)) = (info.camera, info.playback) {
                self.stream_mut(display_id, window).error = None;
                return self.get_playback_id(display_id, window, camera, info.kind, cursor);
            }
            return false;
        }
        let camera = info
            .camera
            .or_else(|| self.ds(display_id).config.camera_of(window).cloned());
        match camera {
            Some(camera) => {
                self.stream_mut(display_id, window).waiting_on = None;
                self.start_live(display_id, window, camera, None) == StartOutcome::Requested
            }
            None => false,
        }
    }

    /// Start the configured camera of an idle window
    pub(crate) fn start_assigned(&mut self, display_id: DisplayId, window: WindowIndex) {
        let state = self.ds(display_id);
        if !state.registry.get(window).is_some_and(StreamInfo::is_idle) {
            return;
        }
        if let Some(camera) = state.config.camera_of(window).cloned() {
            self.start_live(display_id, window, camera, None);
        }
    }

    /// Stop the session of `window`.
    ///
    /// Returns true when a stop is in flight, false when the window was
    /// cleared locally because the device holds nothing for it.
    pub(crate) fn stop_live(&mut self, display_id: DisplayId, window: WindowIndex) -> bool {
        self.release_audio(display_id, window);

        for waiter in self.ds(display_id).registry.waiters_of(window) {
            let info = self.stream_mut(display_id, waiter);
            info.waiting_on = None;
            info.status = StreamStatus::Retry;
            self.events.window_changed(display_id, waiter);
        }

        let info = self.stream_mut(display_id, window);
        if info.is_stopping() {
            info.follow_up = None;
            return true;
        }
        if !info.holds_device_session() {
            if !info.is_idle() {
                self.ds_mut(display_id).registry.clear(window);
                self.events.window_changed(display_id, window);
            }
            return false;
        }

        let session = info.session;
        let camera = info.camera.clone();
        let stamp = self.send(display_id, window, |dev, target| {
            dev.stop_stream(target, session, camera)
        });
        let sent = if let Some(stamp) = stamp {
            let info = self.stream_mut(display_id, window);
            info.stamp = Some(stamp);
            info.pending = Some(PendingOp::Stop);
            info.follow_up = None;
            info.audio = false;
            info.mic = false;
            true
        } else {
            warn!(%display_id, window, "Stop rejected synchronously, treating window as stopped");
            self.ds_mut(display_id).registry.clear(window);
            false
        };
        self.events.window_changed(display_id, window);
        sent
    }

    /// Stop `window` and run `follow_up` once the stop completes.
    pub(crate) fn stop_then(&mut self, display_id: DisplayId, window: WindowIndex, follow_up: FollowUp) {
        if self.stop_live(display_id, window) {
            self.stream_mut(display_id, window).follow_up = Some(follow_up);
        } else {
            self.run_follow_up(display_id, follow_up);
        }
    }

    fn run_follow_up(&mut self, display_id: DisplayId, follow_up: FollowUp) {
        match follow_up {
            FollowUp::StartLive { window, camera } => {
                if self.ds(display_id).registry.get(window).is_some_and(StreamInfo::holds_device_session) {
                    warn!(%display_id, window, "Follow-up start skipped, window busy");
                    return;
                }
                self.start_live(display_id, window, camera, None);
            }
            FollowUp::FetchPlayback {
                window,
                camera,
                kind,
                cursor,
            } => {
                self.get_playback_id(display_id, window, camera, kind, cursor);
            }
        }
    }

    /// Swap the camera shown by `window` into `dest` with as few requests as
    /// possible.
    pub fn replace_live(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        camera: Option<CameraRef>,
        dest: WindowIndex,
    ) -> Result<ReplaceOutcome> {
        self.check_window(display_id, window)?;
        self.check_window(display_id, dest)?;

        let source = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
        let outcome = classify_replace(
            !source.holds_device_session(),
            camera.is_none(),
            window == dest,
        );
        debug!(%display_id, window, dest, ?outcome, "Replace classified");

        match (outcome, camera) {
            (ReplaceOutcome::NoOp, _) => {
                if window == dest && !source.is_idle() && !source.is_stopping() {
                    self.stop_live(display_id, window);
                }
            }
            (ReplaceOutcome::StartOnly, Some(camera)) => {
                if window != dest && !source.is_idle() && !source.is_stopping() {
                    self.stop_live(display_id, window);
                }
                if self.ds(display_id).registry.get(dest).is_some_and(StreamInfo::holds_device_session) {
                    return Err(self.reject(Error::Conflict(format!("Window {dest} is busy"))));
                }
                self.start_live(display_id, dest, camera, None);
            }
            (ReplaceOutcome::StopOnly, _) => {
                self.stop_live(display_id, window);
            }
            (ReplaceOutcome::StopThenStart, Some(camera)) => {
                if self.ds(display_id).registry.get(dest).is_some_and(StreamInfo::holds_device_session) {
                    return Err(self.reject(Error::Conflict(format!("Window {dest} is busy"))));
                }
                *self.stream_mut(display_id, dest) = StreamInfo {
                    kind: StreamKind::Live,
                    status: StreamStatus::Connecting,
                    camera: Some(camera.clone()),
                    ..StreamInfo::default()
                };
                self.events.window_changed(display_id, dest);
                self.stop_then(display_id, window, FollowUp::StartLive { window: dest, camera });
            }
            (ReplaceOutcome::AtomicReplace, Some(camera)) => {
                self.replace_in_place(display_id, window, camera, &source);
            }
            (
                ReplaceOutcome::StartOnly
                | ReplaceOutcome::StopThenStart
                | ReplaceOutcome::AtomicReplace,
                None,
            ) => {}
        }
        Ok(outcome)
    }

    fn replace_in_place(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
        source: &StreamInfo,
    ) {
        let fallback = FollowUp::StartLive {
            window,
            camera: camera.clone(),
        };
        let session = match (source.session, self.check_camera(&camera)) {
            (Some(session), CameraCheck::Valid) if !source.is_stopping() && source.pending.is_none() => {
                session
            }
            _ => {
                self.stop_then(display_id, window, fallback);
                return;
            }
        };

        self.release_audio(display_id, window);
        let variant = if source.camera.as_ref() == Some(&camera) {
            source.variant
        } else {
            StreamVariant::Main
        };
        let geometry = self.surface.window_geometry(display_id, window);
        let request_camera = camera.clone();
        let stamp = self.send(display_id, window, |dev, target| {
            dev.replace_stream(target, session, request_camera, variant, geometry)
        });
        let Some(stamp) = stamp else {
            debug!(%display_id, window, "Replace rejected, falling back to stop then start");
            self.stop_then(display_id, window, fallback);
            return;
        };

        let info = self.stream_mut(display_id, window);
        info.kind = StreamKind::Live;
        info.status = StreamStatus::Connecting;
        info.error = None;
        info.camera = Some(camera);
        info.variant = variant;
        info.stamp = Some(stamp);
        info.pending = Some(PendingOp::Replace);
        info.audio = false;
        info.mic = false;
        info.playback = None;
        self.events.window_changed(display_id, window);
    }

    /// Request a server-side playback handle for `window`.
    pub(crate) fn get_playback_id(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
        kind: StreamKind,
        cursor: PlaybackCursor,
    ) -> bool {
        let request_camera = camera.clone();
        let request_cursor = cursor.clone();
        let stamp = self.send(display_id, window, |dev, target| {
            dev.get_playback_handle(target, request_camera, kind, request_cursor)
        });

        let info = self.stream_mut(display_id, window);
        *info = StreamInfo {
            kind,
            status: StreamStatus::Connecting,
            camera: Some(camera),
            playback: Some(cursor),
            ..StreamInfo::default()
        };
        let sent = if let Some(stamp) = stamp {
            info.stamp = Some(stamp);
            info.pending = Some(PendingOp::PlaybackHandle);
            true
        } else {
            info.fail(StreamErrorKind::Rejected);
            false
        };
        self.events.window_changed(display_id, window);
        sent
    }

    fn send_playback_command(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        session: SessionId,
        command: PlaybackCommand,
    ) -> Option<RequestStamp> {
        let stamp = self.send(display_id, window, |dev, target| {
            dev.step_playback(target, session, command)
        });
        if let Some(stamp) = stamp {
            let info = self.stream_mut(display_id, window);
            info.stamp = Some(stamp);
            info.pending = Some(PendingOp::PlaybackControl);
        }
        stamp
    }

    /// Issue a transport command to a running playback window.
    pub fn step_playback(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        command: PlaybackCommand,
    ) -> Result<()> {
        self.check_window(display_id, window)?;
        let info = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
        let Some(session) = info.session.filter(|_| info.kind.is_playback()) else {
            return Err(self.reject(Error::InvalidInput(format!(
                "Window {window} is not playing back"
            ))));
        };
        if info.pending.is_some() {
            return Err(self.reject(Error::Conflict("Playback request in progress".into())));
        }

        if self.send_playback_command(display_id, window, session, command).is_none() {
            return Err(self.reject(Error::Conflict("Playback command rejected".into())));
        }
        if let Some(cursor) = self.stream_mut(display_id, window).playback.as_mut() {
            match command {
                PlaybackCommand::Play { direction, speed } => {
                    cursor.direction = direction;
                    cursor.speed = speed;
                    cursor.paused = false;
                }
                PlaybackCommand::Pause
                | PlaybackCommand::StepForward
                | PlaybackCommand::StepBackward => cursor.paused = true,
            }
        }
        Ok(())
    }

    /// Move a playback window to `position`, clamped to its time window.
    pub fn seek_instant_playback(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        position: DateTime<Utc>,
    ) -> Result<()> {
        self.check_window(display_id, window)?;
        let info = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
        let (Some(session), Some(cursor)) = (info.session, info.playback.as_ref()) else {
            return Err(self.reject(Error::InvalidInput(format!(
                "Window {window} is not playing back"
            ))));
        };
        if info.pending.is_some() {
            return Err(self.reject(Error::Conflict("Playback request in progress".into())));
        }

        let position = cursor.clamp(position);
        let stamp = self.send(display_id, window, |dev, target| {
            dev.seek_playback(target, session, position)
        });
        let Some(stamp) = stamp else {
            return Err(self.reject(Error::Conflict("Seek rejected".into())));
        };
        let info = self.stream_mut(display_id, window);
        info.stamp = Some(stamp);
        info.pending = Some(PendingOp::Seek);
        if let Some(cursor) = info.playback.as_mut() {
            cursor.position = position;
        }
        Ok(())
    }

    /// Replace the live feed of `window` with a recording ending now.
    pub fn start_instant_playback(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        rewind: chrono::Duration,
    ) -> Result<()> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        let info = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
        let live = info.kind == StreamKind::Live && info.is_running();
        let Some(camera) = info.camera.filter(|_| live) else {
            return Err(self.reject(Error::InvalidInput(format!(
                "Window {window} has no running live stream"
            ))));
        };

        let end = Utc::now();
        let cursor = PlaybackCursor::new(end - rewind, end);
        info!(%display_id, window, %camera, start = %cursor.start, "Starting instant playback");
        self.stop_then(
            display_id,
            window,
            FollowUp::FetchPlayback {
                window,
                camera,
                kind: StreamKind::InstantPlayback,
                cursor,
            },
        );
        self.events.toolbar(
            crate::events::ToolbarButton::InstantPlayback,
            crate::events::ToolbarState::Active,
        );
        Ok(())
    }

    /// Return an instant-playback window to its live camera.
    pub fn stop_instant_playback(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.check_window(display_id, window)?;
        let info = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
        if info.kind != StreamKind::InstantPlayback {
            return Err(self.reject(Error::InvalidInput(format!(
                "Window {window} is not in instant playback"
            ))));
        }

        match self.ds(display_id).config.camera_of(window).cloned() {
            Some(camera) => self.stop_then(display_id, window, FollowUp::StartLive { window, camera }),
            None => {
                self.stop_live(display_id, window);
            }
        }
        self.events.toolbar(
            crate::events::ToolbarButton::InstantPlayback,
            crate::events::ToolbarState::Inactive,
        );
        Ok(())
    }

    pub(crate) fn on_stream_reply(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        stamp: RequestStamp,
        result: std::result::Result<Option<SessionId>, StreamErrorKind>,
    ) {
        if !self.ds(display_id).registry.expects(window, stamp) {
            debug!(%display_id, window, %stamp, "Stale start reply dropped");
            return;
        }

        match result {
            Ok(session) => {
                let info = self.stream_mut(display_id, window);
                info.session = session;
                info.status = StreamStatus::Running;
                info.error = None;
                info.stamp = None;
                info.pending = None;
                info.downgrade_on_retry = false;
                let camera = info.camera.clone();
                debug!(%display_id, window, ?session, "Stream running");
                self.events.window_changed(display_id, window);
                self.restore_audio(display_id, window);

                if let Some(camera) = camera {
                    for waiter in self.ds(display_id).registry.waiters_of(window) {
                        self.stream_mut(display_id, waiter).waiting_on = None;
                        self.start_live(display_id, waiter, camera.clone(), None);
                    }
                }
            }
            Err(error) => self.fail_window(display_id, window, error),
        }
    }

    /// Record `error` on `window` and on every window waiting for it.
    pub(crate) fn fail_window(&mut self, display_id: DisplayId, window: WindowIndex, error: StreamErrorKind) {
        self.release_audio(display_id, window);
        let status = self.stream_mut(display_id, window).fail(error);
        info!(%display_id, window, ?error, ?status, "Stream request failed");
        if error == StreamErrorKind::InvalidChannel {
            self.clear_invalid(display_id, window);
        } else {
            self.events.window_changed(display_id, window);
        }

        for waiter in self.ds(display_id).registry.waiters_of(window) {
            let info = self.stream_mut(display_id, waiter);
            info.waiting_on = None;
            info.status = status;
            info.error = Some(error);
            self.events.window_changed(display_id, waiter);
        }
    }

    pub(crate) fn on_stop_reply(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        stamp: RequestStamp,
        result: std::result::Result<Option<SessionId>, StreamErrorKind>,
    ) {
        if !self.ds(display_id).registry.expects(window, stamp) {
            debug!(%display_id, window, %stamp, "Stale stop reply dropped");
            return;
        }
        if let Err(error) = result {
            warn!(%display_id, window, ?error, "Stop failed, treating window as stopped");
        }

        let follow_up = self.stream_mut(display_id, window).follow_up.take();
        self.ds_mut(display_id).registry.clear(window);
        self.events.window_changed(display_id, window);
        if let Some(follow_up) = follow_up {
            self.run_follow_up(display_id, follow_up);
        }
    }

    pub(crate) fn on_playback_handle_reply(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        stamp: RequestStamp,
        result: std::result::Result<Option<SessionId>, StreamErrorKind>,
    ) {
        if !self.ds(display_id).registry.expects(window, stamp) {
            debug!(%display_id, window, %stamp, "Stale playback handle reply dropped");
            return;
        }
        let session = match result {
            Ok(Some(session)) => session,
            Ok(None) => {
                warn!(%display_id, window, "Playback handle reply without session");
                self.fail_window(display_id, window, StreamErrorKind::InternalResourceLimit);
                return;
            }
            Err(error) => {
                self.fail_window(display_id, window, error);
                return;
            }
        };

        let info = self.stream_mut(display_id, window);
        info.session = Some(session);
        info.pending = None;
        info.stamp = None;
        let command = info.playback.as_ref().map_or(
            PlaybackCommand::Play {
                direction: Default::default(),
                speed: 1.0,
            },
            |cursor| PlaybackCommand::Play {
                direction: cursor.direction,
                speed: cursor.speed,
            },
        );
        if self.send_playback_command(display_id, window, session, command).is_none() {
            self.fail_window(display_id, window, StreamErrorKind::Rejected);
        }
    }

    pub(crate) fn on_playback_control_reply(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        stamp: RequestStamp,
        result: std::result::Result<Option<SessionId>, StreamErrorKind>,
    ) {
        if !self.ds(display_id).registry.expects(window, stamp) {
            debug!(%display_id, window, %stamp, "Stale playback reply dropped");
            return;
        }
        match result {
            Ok(_) => {
                let info = self.stream_mut(display_id, window);
                info.status = StreamStatus::Running;
                info.error = None;
                info.pending = None;
                info.stamp = None;
                self.events.window_changed(display_id, window);
            }
            Err(error) => self.fail_window(display_id, window, error),
        }
    }

    pub(crate) fn apply_device_event(&mut self, display_id: DisplayId, event: &DeviceEvent) {
        let affected: Vec<WindowIndex> = self
            .ds(display_id)
            .registry
            .iter()
            .filter(|(_, info)| !info.is_idle() && !info.is_stopping())
            .filter(|(_, info)| {
                info.camera.as_ref().is_some_and(|camera| match event {
                    DeviceEvent::Connected { device, .. } | DeviceEvent::Disconnected { device } => {
                        camera.device == *device
                    }
                    DeviceEvent::CameraStateChanged { camera: changed, .. } => camera == changed,
                })
            })
            .map(|(window, _)| window)
            .collect();

        let lost = match event {
            DeviceEvent::Disconnected { .. } => Some(StreamErrorKind::DeviceUnreachable),
            DeviceEvent::CameraStateChanged {
                connected: false, ..
            } => Some(StreamErrorKind::CamDisconnected),
            _ => None,
        };

        for window in affected {
            if let Some(error) = lost {
                self.fail_window(display_id, window, error);
                continue;
            }
            let info = self.ds(display_id).registry.get(window).cloned().unwrap_or_default();
            let waiting = info.status == StreamStatus::EventWait || info.kind == StreamKind::LiveAwaiting;
            if !waiting || info.pending.is_some() {
                continue;
            }
            let state = self.ds(display_id);
            if state.mode.phase != crate::models::BarrierPhase::Idle || !state.is_visible(window) {
                debug!(%display_id, window, "Device back, restart deferred to next page load");
                continue;
            }
            if info.kind == StreamKind::LiveAwaiting {
                self.stream_mut(display_id, window).kind = StreamKind::Live;
            }
            self.restart_window(display_id, window);
        }
    }

    pub(crate) fn apply_stream_event(&mut self, event: StreamEvent) {
        let StreamEvent {
            display: display_id,
            window,
            session,
            kind,
        } = event;
        let info = self.stream_mut(display_id, window);
        if info.session != Some(session) {
            debug!(%display_id, window, %session, "Stream event for stale session dropped");
            return;
        }
        match kind {
            StreamEventKind::VideoLoss if info.status == StreamStatus::Running => {
                info.status = StreamStatus::VideoLoss;
            }
            StreamEventKind::VideoRestored if info.status == StreamStatus::VideoLoss => {
                info.status = StreamStatus::Running;
            }
            StreamEventKind::SessionClosed(error) => {
                self.fail_window(display_id, window, error);
                return;
            }
            _ => return,
        }
        self.events.window_changed(display_id, window);
    }

    /// Re-issue requests for every visible window left in `retry`.
    pub(crate) fn retry_sweep(&mut self) {
        for index in 0..self.displays.len() {
            let display_id = DisplayId(index);
            let state = self.ds(display_id);
            if state.mode.phase != crate::models::BarrierPhase::Idle || !state.mode.current.is_steady() {
                continue;
            }
            let windows: Vec<WindowIndex> = state
                .registry
                .iter()
                .filter(|(window, info)| {
                    info.status == StreamStatus::Retry
                        && info.pending.is_none()
                        && state.pending.window(*window) == 0
                        && state.is_visible(*window)
                })
                .map(|(window, _)| window)
                .collect();
            if windows.is_empty() {
                continue;
            }

            info!(%display_id, count = windows.len(), "Retrying failed windows");
            let grid = self.ds(display_id).mode.current == crate::models::DisplayMode::None;
            if grid {
                self.enter_mode(display_id, crate::models::DisplayMode::RetryingPage);
                self.begin_phase(display_id, crate::models::BarrierPhase::ProcessingStartRequest);
            }
            for window in windows {
                self.restart_window(display_id, window);
            }
            if grid {
                self.drive(display_id);
            }
        }
    }

    /// Write the display's configuration back to the store.
    pub(crate) fn persist(&self, display_id: DisplayId) {
        let state = self.ds(display_id);
        if state.mode.current.is_overlay() {
            return;
        }
        if let Err(e) = self.store.write_display_layout(display_id, &state.config) {
            tracing::error!(%display_id, error = %e, "Failed to persist display layout");
        }
    }
}
