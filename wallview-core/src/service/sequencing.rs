//! Sequencing scheduler
//!
//! Deadline bookkeeping for the display-level page timer, the per-window
//! ring timers and the global retry sweep. The scheduler never sleeps itself:
//! the runtime asks for [`Scheduler::next_deadline`] and hands the clock back
//! through [`DisplayManager::on_tick`].

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::allocation;
use crate::events::{ToolbarButton, ToolbarState};
use crate::manager::DisplayManager;
use crate::models::{BarrierPhase, DisplayConfig, DisplayId, DisplayMode, WindowIndex, MAX_WINDOWS};
use crate::{Error, Result};

/// A timer that came due
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerFire {
    Retry,
    Page(DisplayId),
    Window(DisplayId, WindowIndex),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Periodic {
    due: Instant,
    interval: Duration,
}

impl Periodic {
    fn new(now: Instant, interval: Duration) -> Self {
        Self {
            due: now + interval,
            interval,
        }
    }
}

#[derive(Debug, Clone)]
struct DisplayTimers {
    page: Option<Periodic>,
    windows: Vec<Option<Periodic>>,
    /// Set while the display is in a maintenance mode
    paused_at: Option<Instant>,
}

impl Default for DisplayTimers {
    fn default() -> Self {
        Self {
            page: None,
            windows: vec![None; MAX_WINDOWS],
            paused_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Scheduler {
    retry: Option<Periodic>,
    retry_interval: Duration,
    displays: Vec<DisplayTimers>,
}

fn secs(value: u32) -> Duration {
    Duration::from_secs(u64::from(value.max(1)))
}

impl Scheduler {
    #[must_use]
    pub fn new(display_count: usize, retry_interval: Duration) -> Self {
        Self {
            retry: None,
            retry_interval,
            displays: vec![DisplayTimers::default(); display_count],
        }
    }

    pub fn arm_retry(&mut self, now: Instant) {
        self.retry = Some(Periodic::new(now, self.retry_interval));
    }

    /// Hold every sequencing timer of `display_id` until resumed.
    pub fn pause(&mut self, display_id: DisplayId, now: Instant) {
        if let Some(timers) = self.displays.get_mut(display_id.index()) {
            if timers.paused_at.is_none() {
                debug!(%display_id, "Sequencing paused");
                timers.paused_at = Some(now);
            }
        }
    }

    /// Release held timers with the time they had left when paused, then
    /// apply `config`.
    pub fn resume(&mut self, display_id: DisplayId, config: &DisplayConfig, now: Instant) {
        if let Some(timers) = self.displays.get_mut(display_id.index()) {
            if let Some(paused_at) = timers.paused_at.take() {
                let held = now.saturating_duration_since(paused_at);
                for timer in timers.page.iter_mut().chain(timers.windows.iter_mut().flatten()) {
                    timer.due += held;
                }
                debug!(%display_id, held_ms = held.as_millis(), "Sequencing resumed");
            }
        }
        self.sync(display_id, config, now);
    }

    #[must_use]
    pub fn is_paused(&self, display_id: DisplayId) -> bool {
        self.displays
            .get(display_id.index())
            .is_some_and(|timers| timers.paused_at.is_some())
    }

    /// Arm newly enabled timers and drop disabled ones, keeping the
    /// deadlines of timers whose settings did not change.
    pub fn sync(&mut self, display_id: DisplayId, config: &DisplayConfig, now: Instant) {
        let Some(timers) = self.displays.get_mut(display_id.index()) else {
            return;
        };
        if timers.paused_at.is_some() {
            return;
        }

        let page_interval = secs(config.sequence_interval_secs);
        timers.page = match (config.sequence_enabled, timers.page) {
            (true, Some(timer)) if timer.interval == page_interval => Some(timer),
            (true, _) => Some(Periodic::new(now, page_interval)),
            (false, _) => None,
        };

        for (slot, info) in timers.windows.iter_mut().zip(&config.windows) {
            let wanted = !config.sequence_enabled
                && info.sequence_enabled
                && allocation::is_multi_channel(info);
            let interval = secs(info.sequence_interval_secs);
            *slot = match (wanted, *slot) {
                (true, Some(timer)) if timer.interval == interval => Some(timer),
                (true, _) => Some(Periodic::new(now, interval)),
                (false, _) => None,
            };
        }
    }

    #[must_use]
    pub fn page_armed(&self, display_id: DisplayId) -> bool {
        self.displays
            .get(display_id.index())
            .is_some_and(|timers| timers.page.is_some())
    }

    #[must_use]
    pub fn window_armed(&self, display_id: DisplayId, window: WindowIndex) -> bool {
        self.displays
            .get(display_id.index())
            .and_then(|timers| timers.windows.get(window))
            .is_some_and(Option::is_some)
    }

    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        let sequencing = self
            .displays
            .iter()
            .filter(|timers| timers.paused_at.is_none())
            .flat_map(|timers| {
                timers
                    .page
                    .iter()
                    .chain(timers.windows.iter().flatten())
                    .map(|timer| timer.due)
            });
        self.retry.map(|timer| timer.due).into_iter().chain(sequencing).min()
    }

    /// Every timer due at `now`, re-armed one interval later.
    ///
    /// The retry sweep comes last so a sequencing step due at the same
    /// instant runs before the sweep makes the display busy.
    pub fn take_due(&mut self, now: Instant) -> Vec<TimerFire> {
        let mut fired = Vec::new();
        for (index, timers) in self.displays.iter_mut().enumerate() {
            if timers.paused_at.is_some() {
                continue;
            }
            let display_id = DisplayId(index);
            if let Some(timer) = timers.page.as_mut().filter(|timer| timer.due <= now) {
                timer.due = now + timer.interval;
                fired.push(TimerFire::Page(display_id));
            }
            for (window, slot) in timers.windows.iter_mut().enumerate() {
                if let Some(timer) = slot.as_mut().filter(|timer| timer.due <= now) {
                    timer.due = now + timer.interval;
                    fired.push(TimerFire::Window(display_id, window));
                }
            }
        }
        if let Some(timer) = self.retry.as_mut().filter(|timer| timer.due <= now) {
            timer.due = now + timer.interval;
            fired.push(TimerFire::Retry);
        }
        fired
    }
}

impl DisplayManager {
    pub(crate) fn sync_timers(&mut self, display_id: DisplayId) {
        let now = self.now;
        let config = &self.displays[display_id.index()].config;
        self.scheduler.sync(display_id, config, now);
    }

    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn on_timer(&mut self, fire: TimerFire) {
        match fire {
            TimerFire::Retry => self.retry_sweep(),
            TimerFire::Page(display_id) => self.display_sequence_tick(display_id),
            TimerFire::Window(display_id, window) => self.window_sequence_tick(display_id, window),
        }
    }

    fn display_sequence_tick(&mut self, display_id: DisplayId) {
        let state = self.ds(display_id);
        if state.mode.phase != BarrierPhase::Idle {
            return;
        }
        match state.mode.current {
            DisplayMode::None => {
                let Some(page) = allocation::next_non_empty_page(&state.config, state.config.current_page)
                else {
                    debug!(%display_id, "No other page to sequence to");
                    return;
                };
                debug!(%display_id, page, "Display sequencing tick");
                self.load_page(display_id, DisplayMode::ChangingPage, page);
            }
            DisplayMode::Expanded => self.expanded_sequence_step(display_id),
            _ => {}
        }
    }

    fn window_sequence_tick(&mut self, display_id: DisplayId, window: WindowIndex) {
        let state = self.ds(display_id);
        if state.mode.phase != BarrierPhase::Idle || !state.mode.current.allows_sequencing() {
            return;
        }
        if state.pending.window(window) != 0 {
            debug!(%display_id, window, "Window busy, skipping sequencing tick");
            return;
        }
        let info = &state.config.windows[window];
        let Some(slot) = allocation::next_ring_slot(info) else {
            return;
        };
        let Some(camera) = info.cameras[slot].clone() else {
            return;
        };
        debug!(%display_id, window, slot, %camera, "Window sequencing tick");

        self.ds_mut(display_id).config.windows[window].current = slot;
        self.persist(display_id);
        self.events.window_changed(display_id, window);
        if self.ds(display_id).is_visible(window) {
            if let Err(e) = self.replace_live(display_id, window, Some(camera), window) {
                warn!(%display_id, window, error = %e, "Window sequencing replace failed");
            }
        }
    }

    /// Turn display-level page sequencing on or off.
    pub fn set_display_sequencing(&mut self, display_id: DisplayId, enabled: bool) -> Result<()> {
        self.ensure_grid_mode(display_id)?;
        let config = &self.ds(display_id).config;
        let window_sequencing = config
            .windows
            .iter()
            .any(|info| info.sequence_enabled && allocation::is_multi_channel(info));
        if enabled && window_sequencing {
            return Err(self.reject(Error::Conflict(
                "Stop window sequencing before starting display sequencing".into(),
            )));
        }

        info!(%display_id, enabled, "Display sequencing changed");
        self.ds_mut(display_id).config.sequence_enabled = enabled;
        self.persist(display_id);
        self.sync_timers(display_id);
        self.events
            .toolbar(ToolbarButton::DisplaySequence, ToolbarState::from_active(enabled));
        Ok(())
    }

    /// Turn ring sequencing of one window on or off.
    pub fn set_window_sequencing(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        enabled: bool,
        interval_secs: Option<u32>,
    ) -> Result<()> {
        self.check_window(display_id, window)?;
        self.ensure_grid_mode(display_id)?;
        let config = &self.ds(display_id).config;
        if enabled && config.sequence_enabled {
            return Err(self.reject(Error::Conflict(
                "Stop display sequencing before starting window sequencing".into(),
            )));
        }
        if enabled && !allocation::is_multi_channel(&config.windows[window]) {
            return Err(self.reject(Error::InvalidInput(
                "Window sequencing needs at least two cameras".into(),
            )));
        }

        info!(%display_id, window, enabled, "Window sequencing changed");
        let info = &mut self.ds_mut(display_id).config.windows[window];
        info.sequence_enabled = enabled;
        if let Some(interval) = interval_secs.filter(|secs| *secs > 0) {
            info.sequence_interval_secs = interval;
        }
        self.persist(display_id);
        self.sync_timers(display_id);
        self.events
            .toolbar(ToolbarButton::WindowSequence, ToolbarState::from_active(enabled));
        Ok(())
    }

    /// Dwell time of display-level sequencing
    pub fn set_display_sequence_interval(&mut self, display_id: DisplayId, secs: u32) -> Result<()> {
        self.ensure_grid_mode(display_id)?;
        if secs == 0 {
            return Err(self.reject(Error::InvalidInput("Interval must be positive".into())));
        }
        self.ds_mut(display_id).config.sequence_interval_secs = secs;
        self.persist(display_id);
        self.sync_timers(display_id);
        Ok(())
    }
}
