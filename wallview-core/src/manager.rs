//! Display manager
//!
//! The single owner of every per-display array (configuration, window
//! registry, pending counters, mode state, overlay records) and of the
//! collaborators the engine talks to. All mutation happens through `&mut self`
//! on the event-loop task, so no locking is involved; the only exclusion
//! discipline is the mode flag and the pending-counter barrier, both checked
//! synchronously before any request is issued.
//!
//! Initialization order:
//! 1. every display's layout is read from the [`ConfigStore`], falling back to
//!    (and persisting) the default style;
//! 2. registries, counters, and timers are created empty;
//! 3. [`DisplayManager::start`] loads each display's current page and arms
//!    the sequencing and retry timers.

use std::sync::Arc;
use std::time::Instant;

use tracing::{debug, info, trace, warn};

use crate::config::EngineConfig;
use crate::device::{
    DeviceEvent, DeviceLayer, DeviceReply, ReplyKind, RequestTarget, StreamEvent,
};
use crate::events::{EventHub, RenderSurface};
use crate::models::{
    BarrierPhase, DisplayConfig, DisplayId, DisplayMode, ModeState, OverlayKind, OverlayRecord,
    RequestStamp, StampSource, StreamInfo, StyleRequest, WindowIndex, MAX_WINDOWS,
};
use crate::registry::{PendingCounters, WindowRegistry};
use crate::service::audio::AudioArbiter;
use crate::service::mode::SyncPlaybackPlan;
use crate::service::sequencing::Scheduler;
use crate::store::ConfigStore;
use crate::{Error, Result};

/// Everything the engine tracks for one physical display
#[derive(Debug)]
pub struct DisplayState {
    pub id: DisplayId,
    pub config: DisplayConfig,
    pub registry: WindowRegistry,
    pub pending: PendingCounters,
    pub mode: ModeState,
    pub overlays: [OverlayRecord; 3],
    pub(crate) page_target: usize,
    pub(crate) pending_style: Option<StyleRequest>,
    pub(crate) sync_plan: Option<SyncPlaybackPlan>,
}

impl DisplayState {
    fn new(id: DisplayId, config: DisplayConfig) -> Self {
        Self {
            id,
            page_target: config.current_page,
            config,
            registry: WindowRegistry::default(),
            pending: PendingCounters::default(),
            mode: ModeState::default(),
            overlays: Default::default(),
            pending_style: None,
            sync_plan: None,
        }
    }

    #[must_use]
    pub fn overlay(&self, kind: OverlayKind) -> &OverlayRecord {
        &self.overlays[kind.index()]
    }

    /// Whether `window` is currently on screen
    #[must_use]
    pub fn is_visible(&self, window: WindowIndex) -> bool {
        match self.mode.current {
            DisplayMode::Expanded => window == self.config.selected_window,
            mode if mode.is_overlay() => self
                .overlays
                .iter()
                .any(|record| record.is_active() && record.window == Some(window)),
            _ => self.config.current_bounds().contains(window),
        }
    }
}

pub struct DisplayManager {
    pub(crate) displays: Vec<DisplayState>,
    pub(crate) device: Box<dyn DeviceLayer>,
    pub(crate) store: Arc<dyn ConfigStore>,
    pub(crate) surface: Box<dyn RenderSurface>,
    pub(crate) events: EventHub,
    pub(crate) scheduler: Scheduler,
    pub(crate) audio: AudioArbiter,
    pub(crate) stamps: StampSource,
    pub(crate) settings: EngineConfig,
    pub(crate) now: Instant,
}

impl std::fmt::Debug for DisplayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DisplayManager")
            .field("displays", &self.displays.len())
            .finish_non_exhaustive()
    }
}

impl DisplayManager {
    /// Build the manager and read every display's layout from `store`.
    pub fn new(
        settings: EngineConfig,
        device: Box<dyn DeviceLayer>,
        store: Arc<dyn ConfigStore>,
        surface: Box<dyn RenderSurface>,
        events: EventHub,
        now: Instant,
    ) -> Result<Self> {
        let mut displays = Vec::with_capacity(settings.display_count);
        for index in 0..settings.display_count {
            let id = DisplayId(index);
            let config = match store.read_display_layout(id) {
                Ok(config) => config,
                Err(Error::NotFound(_)) => {
                    info!(display_id = %id, "No stored layout, applying default style");
                    let config = store.read_default_style(id)?;
                    store.write_display_layout(id, &config)?;
                    config
                }
                Err(e) => return Err(e),
            };
            displays.push(DisplayState::new(id, config.normalized()));
        }

        Ok(Self {
            scheduler: Scheduler::new(settings.display_count, settings.retry_interval()),
            displays,
            device,
            store,
            surface,
            events,
            audio: AudioArbiter::default(),
            stamps: StampSource::default(),
            settings,
            now,
        })
    }

    /// Load every display's current page and arm the timers.
    pub fn start(&mut self) {
        self.scheduler.arm_retry(self.now);
        for index in 0..self.displays.len() {
            let display_id = DisplayId(index);
            let page = self.displays[index].config.current_page;
            info!(%display_id, page, "Loading initial page");
            self.load_page(display_id, DisplayMode::RefreshingPage, page);
        }
    }

    #[must_use]
    pub fn display_count(&self) -> usize {
        self.displays.len()
    }

    #[must_use]
    pub fn display(&self, display_id: DisplayId) -> Option<&DisplayState> {
        self.displays.get(display_id.index())
    }

    #[must_use]
    pub fn stream(&self, display_id: DisplayId, window: WindowIndex) -> Option<&StreamInfo> {
        self.display(display_id).and_then(|state| state.registry.get(window))
    }

    #[must_use]
    pub fn mode(&self, display_id: DisplayId) -> Option<DisplayMode> {
        self.display(display_id).map(|state| state.mode.current)
    }

    #[must_use]
    pub fn events(&self) -> &EventHub {
        &self.events
    }

    #[must_use]
    pub const fn now(&self) -> Instant {
        self.now
    }

    /// Move the engine clock forward without firing timers
    pub fn set_now(&mut self, now: Instant) {
        if now > self.now {
            self.now = now;
        }
    }

    pub(crate) fn check_display(&self, display_id: DisplayId) -> Result<()> {
        if display_id.index() < self.displays.len() {
            Ok(())
        } else {
            Err(Error::NotFound(format!("Display {}", display_id.index())))
        }
    }

    pub(crate) fn check_window(&self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.check_display(display_id)?;
        if window < MAX_WINDOWS {
            Ok(())
        } else {
            Err(Error::InvalidInput(format!(
                "Window {window} out of range (max {})",
                MAX_WINDOWS - 1
            )))
        }
    }

    pub(crate) fn ds(&self, display_id: DisplayId) -> &DisplayState {
        &self.displays[display_id.index()]
    }

    pub(crate) fn ds_mut(&mut self, display_id: DisplayId) -> &mut DisplayState {
        &mut self.displays[display_id.index()]
    }

    pub(crate) fn stream_mut(&mut self, display_id: DisplayId, window: WindowIndex) -> &mut StreamInfo {
        self.displays[display_id.index()].registry.slot_mut(window)
    }

    /// Issue one device request for `window`.
    ///
    /// Counts the accepted replies into the pending counters and returns the
    /// request's stamp, or `None` when the device layer refused it outright.
    pub(crate) fn send(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        request: impl FnOnce(&mut dyn DeviceLayer, RequestTarget) -> u32,
    ) -> Option<RequestStamp> {
        let stamp = self.stamps.next();
        let target = RequestTarget {
            display: display_id,
            window,
            stamp,
        };
        let accepted = request(self.device.as_mut(), target);
        if accepted == 0 {
            debug!(%display_id, window, %stamp, "Request rejected synchronously");
            return None;
        }
        self.displays[display_id.index()].pending.add(window, accepted);
        trace!(
            %display_id,
            window,
            %stamp,
            pending = self.displays[display_id.index()].pending.display(),
            "Request issued"
        );
        Some(stamp)
    }

    /// Report a user-visible failure
    pub(crate) fn reject(&self, error: Error) -> Error {
        self.events.banner(error.banner_text());
        error
    }

    /// Enter `mode`, pausing the sequencing timers when it does not allow them.
    pub(crate) fn enter_mode(&mut self, display_id: DisplayId, mode: DisplayMode) {
        let state = self.ds_mut(display_id);
        if state.mode.transition(mode) {
            let previous = state.mode.previous;
            info!(%display_id, %previous, %mode, "Display mode changed");
            self.events.mode_changed(display_id, mode);
        }
        if mode.allows_sequencing() {
            let now = self.now;
            let config = &self.displays[display_id.index()].config;
            self.scheduler.resume(display_id, config, now);
        } else {
            self.scheduler.pause(display_id, self.now);
        }
    }

    /// Return to `None`, resume timers, and replay one latched request.
    pub(crate) fn finish_mode(&mut self, display_id: DisplayId) {
        self.ds_mut(display_id).mode.phase = BarrierPhase::Idle;
        self.enter_mode(display_id, DisplayMode::None);
        self.replay_latched(display_id);
    }

    pub(crate) fn begin_phase(&mut self, display_id: DisplayId, phase: BarrierPhase) {
        let state = self.ds_mut(display_id);
        state.mode.phase = phase;
        debug!(
            %display_id,
            mode = %state.mode.current,
            ?phase,
            pending = state.pending.display(),
            "Barrier phase started"
        );
    }

    /// Advance the display's maintenance operation while its barrier is drained.
    pub(crate) fn drive(&mut self, display_id: DisplayId) {
        loop {
            let state = self.ds(display_id);
            if state.mode.phase == BarrierPhase::Idle || state.pending.display() != 0 {
                break;
            }
            self.advance_barrier(display_id);
        }
    }

    /// Feed one device reply into the engine.
    pub fn handle_reply(&mut self, reply: DeviceReply) {
        let RequestTarget {
            display: display_id,
            window,
            stamp,
        } = reply.target;
        if self.check_window(display_id, window).is_err() {
            warn!(%display_id, window, "Reply for unknown window");
            return;
        }
        self.ds_mut(display_id).pending.complete(window);
        trace!(%display_id, window, %stamp, kind = ?reply.kind, "Reply received");

        match reply.kind {
            ReplyKind::Start | ReplyKind::Replace => {
                self.on_stream_reply(display_id, window, stamp, reply.result);
            }
            ReplyKind::Stop => self.on_stop_reply(display_id, window, stamp, reply.result),
            ReplyKind::PlaybackHandle => {
                self.on_playback_handle_reply(display_id, window, stamp, reply.result);
            }
            ReplyKind::PlaybackControl | ReplyKind::Seek => {
                self.on_playback_control_reply(display_id, window, stamp, reply.result);
            }
            ReplyKind::IncludeAudio
            | ReplyKind::ExcludeAudio
            | ReplyKind::IncludeMic
            | ReplyKind::ExcludeMic => {
                self.on_audio_reply(display_id, window, stamp, reply.kind, reply.result);
            }
            ReplyKind::Command => self.on_command_reply(display_id, stamp, reply.result),
        }

        self.drive(display_id);
    }

    /// Feed one unsolicited device-state notification into the engine.
    pub fn handle_device_event(&mut self, event: DeviceEvent) {
        info!(?event, "Device state changed");
        for index in 0..self.displays.len() {
            let display_id = DisplayId(index);
            self.apply_device_event(display_id, &event);
            self.drive(display_id);
        }
    }

    /// Feed one unsolicited session notification into the engine.
    pub fn handle_stream_event(&mut self, event: StreamEvent) {
        if self.check_window(event.display, event.window).is_err() {
            warn!(?event, "Stream event for unknown window");
            return;
        }
        self.apply_stream_event(event);
    }

    /// Fire every timer due at `now`.
    pub fn on_tick(&mut self, now: Instant) {
        self.set_now(now);
        for fire in self.scheduler.take_due(now) {
            self.on_timer(fire);
        }
        self.expire_overlays(now);
    }

    /// Earliest instant at which [`on_tick`](Self::on_tick) has work to do
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let overlays = self
            .displays
            .iter()
            .flat_map(|state| state.overlays.iter())
            .filter(|record| !record.hidden)
            .filter_map(|record| record.close_at);
        self.scheduler.next_deadline().into_iter().chain(overlays).min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceReply;
    use crate::events::NullSurface;
    use crate::models::{CameraRef, LayoutType, WindowInfo};
    use crate::store::MockConfigStore;
    use crate::test_helpers::RecordingDevice;

    fn manager_with(store: MockConfigStore) -> Result<DisplayManager> {
        DisplayManager::new(
            EngineConfig::default(),
            Box::new(RecordingDevice::default()),
            Arc::new(store),
            Box::new(NullSurface),
            EventHub::new(),
            Instant::now(),
        )
    }

    #[test]
    fn test_missing_layout_falls_back_to_default_style() {
        let mut store = MockConfigStore::new();
        store
            .expect_read_display_layout()
            .returning(|_| Err(Error::NotFound("layout".to_string())));
        store.expect_read_default_style().returning(|_| {
            let mut style = DisplayConfig::with_layout(LayoutType::ThreeByThree);
            style.windows[0] = WindowInfo::with_camera(CameraRef::new("local", 1));
            Ok(style)
        });
        store
            .expect_write_display_layout()
            .withf(|display_id, config| {
                *display_id == DisplayId(0) && config.layout == LayoutType::ThreeByThree
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let manager = manager_with(store).unwrap();
        let state = manager.display(DisplayId(0)).unwrap();
        assert_eq!(state.config.layout, LayoutType::ThreeByThree);
        assert_eq!(state.mode.current, DisplayMode::None);
    }

    #[test]
    fn test_store_failure_aborts_construction() {
        let mut store = MockConfigStore::new();
        store
            .expect_read_display_layout()
            .returning(|_| Err(Error::Store("disk unavailable".to_string())));
        store.expect_write_display_layout().never();

        let err = manager_with(store).unwrap_err();
        assert!(matches!(err, Error::Store(_)));
    }

    #[test]
    fn test_reply_for_unknown_window_is_ignored() {
        let mut store = MockConfigStore::new();
        store
            .expect_read_display_layout()
            .returning(|_| Ok(DisplayConfig::default()));
        let mut manager = manager_with(store).unwrap();

        manager.handle_reply(DeviceReply::ok(
            ReplyKind::Start,
            RequestTarget {
                display: DisplayId(3),
                window: 0,
                stamp: RequestStamp(1),
            },
            None,
        ));
        assert_eq!(manager.display(DisplayId(0)).unwrap().pending.display(), 0);
    }
}
