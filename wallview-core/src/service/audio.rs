//! Audio output and microphone arbitration
//!
//! At most one window across all displays plays audio, and at most one window
//! owns the microphone. Switching owners always excludes the old window first
//! and only sends the include once the exclude has been answered.

use tracing::{debug, info, warn};

use crate::device::ReplyKind;
use crate::events::{ToolbarButton, ToolbarState};
use crate::manager::DisplayManager;
use crate::models::{
    CameraRef, DisplayId, RequestStamp, SessionId, StreamErrorKind, StreamKind, WindowIndex,
};
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AudioChannel {
    /// Audio from the camera to the speakers
    Output,
    /// Audio from the operator's microphone to the camera
    Microphone,
}

impl AudioChannel {
    const fn button(self) -> ToolbarButton {
        match self {
            Self::Output => ToolbarButton::Audio,
            Self::Microphone => ToolbarButton::Microphone,
        }
    }
}

/// A window anywhere on the wall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowSlot {
    pub display: DisplayId,
    pub window: WindowIndex,
}

/// Ownership and in-flight requests of one channel
#[derive(Debug, Clone, Default)]
pub struct ChannelState {
    pub owner: Option<WindowSlot>,
    /// Window that owned the channel before its stream went away
    pub last: Option<(WindowSlot, CameraRef)>,
    excluding: Option<(WindowSlot, RequestStamp)>,
    including: Option<(WindowSlot, RequestStamp)>,
    queued_include: Option<WindowSlot>,
}

impl ChannelState {
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.excluding.is_some() || self.including.is_some()
    }
}

#[derive(Debug, Clone, Default)]
pub struct AudioArbiter {
    output: ChannelState,
    mic: ChannelState,
}

impl AudioArbiter {
    #[must_use]
    pub const fn channel(&self, channel: AudioChannel) -> &ChannelState {
        match channel {
            AudioChannel::Output => &self.output,
            AudioChannel::Microphone => &self.mic,
        }
    }

    fn channel_mut(&mut self, channel: AudioChannel) -> &mut ChannelState {
        match channel {
            AudioChannel::Output => &mut self.output,
            AudioChannel::Microphone => &mut self.mic,
        }
    }
}

impl DisplayManager {
    #[must_use]
    pub fn audio_owner(&self, channel: AudioChannel) -> Option<WindowSlot> {
        self.audio.channel(channel).owner
    }

    /// Turn audio output on for `window`, or off if it already has it.
    pub fn toggle_audio(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.toggle_channel(AudioChannel::Output, display_id, window)
    }

    /// Turn the microphone on for `window`, or off if it already has it.
    pub fn toggle_mic(&mut self, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.toggle_channel(AudioChannel::Microphone, display_id, window)
    }

    fn toggle_channel(&mut self, channel: AudioChannel, display_id: DisplayId, window: WindowIndex) -> Result<()> {
        self.check_window(display_id, window)?;
        let slot = WindowSlot { display: display_id, window };
        let state = self.audio.channel(channel);
        if state.is_busy() {
            return Err(self.reject(Error::Conflict("Audio request in progress".into())));
        }
        let owner = state.owner;

        if owner == Some(slot) {
            info!(%display_id, window, ?channel, "Disabling audio channel");
            self.audio.channel_mut(channel).last = None;
            if !self.send_exclude(channel, slot) {
                self.clear_owner(channel, slot);
            }
            return Ok(());
        }

        self.eligible_session(channel, slot)?;
        info!(%display_id, window, ?channel, "Enabling audio channel");
        match owner {
            Some(old) => {
                self.audio.channel_mut(channel).queued_include = Some(slot);
                if !self.send_exclude(channel, old) {
                    self.clear_owner(channel, old);
                    self.audio.channel_mut(channel).queued_include = None;
                    self.send_include(channel, slot);
                }
            }
            None => {
                self.send_include(channel, slot);
            }
        }
        Ok(())
    }

    /// Session of `slot` if it may take `channel`
    fn eligible_session(&self, channel: AudioChannel, slot: WindowSlot) -> Result<SessionId> {
        let info = self
            .ds(slot.display)
            .registry
            .get(slot.window)
            .cloned()
            .unwrap_or_default();
        let eligible = match channel {
            AudioChannel::Output => info.session.is_some() && info.pending.is_none(),
            AudioChannel::Microphone => info.kind == StreamKind::Live && info.is_running(),
        };
        match info.session.filter(|_| eligible) {
            Some(session) => Ok(session),
            None => Err(self.reject(Error::InvalidInput(match channel {
                AudioChannel::Output => "No stream to play audio from".to_string(),
                AudioChannel::Microphone => "Microphone needs a running live stream".to_string(),
            }))),
        }
    }

    fn send_exclude(&mut self, channel: AudioChannel, slot: WindowSlot) -> bool {
        let Some(session) = self.stream(slot.display, slot.window).and_then(|info| info.session) else {
            return false;
        };
        let stamp = self.send(slot.display, slot.window, |dev, target| match channel {
            AudioChannel::Output => dev.exclude_audio(target, session),
            AudioChannel::Microphone => dev.exclude_mic(target, session),
        });
        match stamp {
            Some(stamp) => {
                self.audio.channel_mut(channel).excluding = Some((slot, stamp));
                true
            }
            None => false,
        }
    }

    fn send_include(&mut self, channel: AudioChannel, slot: WindowSlot) -> bool {
        let Ok(session) = self.eligible_session(channel, slot) else {
            return false;
        };
        let stamp = self.send(slot.display, slot.window, |dev, target| match channel {
            AudioChannel::Output => dev.include_audio(target, session),
            AudioChannel::Microphone => dev.include_mic(target, session),
        });
        match stamp {
            Some(stamp) => {
                self.audio.channel_mut(channel).including = Some((slot, stamp));
                true
            }
            None => {
                self.events.banner("Audio request rejected");
                false
            }
        }
    }

    fn set_flag(&mut self, channel: AudioChannel, slot: WindowSlot, on: bool) {
        let info = self.stream_mut(slot.display, slot.window);
        match channel {
            AudioChannel::Output => info.audio = on,
            AudioChannel::Microphone => info.mic = on,
        }
    }

    fn clear_owner(&mut self, channel: AudioChannel, slot: WindowSlot) {
        let state = self.audio.channel_mut(channel);
        if state.owner == Some(slot) {
            state.owner = None;
            self.set_flag(channel, slot, false);
            self.events.toolbar(channel.button(), ToolbarState::Inactive);
        }
    }

    /// Forget channel ownership of a window whose stream is going away,
    /// remembering it for automatic restore.
    pub(crate) fn release_audio(&mut self, display_id: DisplayId, window: WindowIndex) {
        let slot = WindowSlot { display: display_id, window };
        let camera = self.stream(display_id, window).and_then(|info| info.camera.clone());
        for channel in [AudioChannel::Output, AudioChannel::Microphone] {
            let state = self.audio.channel_mut(channel);
            if state.queued_include == Some(slot) {
                state.queued_include = None;
            }
            // An include still in flight would hand the channel to a dead stream
            if state.including.is_some_and(|(including, _)| including == slot) {
                state.including = None;
                state.last = camera.clone().map(|camera| (slot, camera));
                debug!(%display_id, window, ?channel, "Pending audio include dropped");
                continue;
            }
            if state.owner != Some(slot) {
                continue;
            }
            state.owner = None;
            state.last = camera.clone().map(|camera| (slot, camera));
            debug!(%display_id, window, ?channel, "Audio channel released");
            self.set_flag(channel, slot, false);
            self.events.toolbar(channel.button(), ToolbarState::Inactive);
        }
    }

    /// Give audio back to a window that owned it before its stream restarted.
    pub(crate) fn restore_audio(&mut self, display_id: DisplayId, window: WindowIndex) {
        let slot = WindowSlot { display: display_id, window };
        let state = self.audio.channel(AudioChannel::Output);
        let Some((last, camera)) = &state.last else {
            return;
        };
        let camera_matches = self
            .stream(display_id, window)
            .and_then(|info| info.camera.as_ref())
            == Some(camera);
        if *last != slot || !camera_matches || state.owner.is_some() || state.is_busy() {
            return;
        }
        info!(%display_id, window, "Restoring audio");
        self.send_include(AudioChannel::Output, slot);
    }

    pub(crate) fn on_audio_reply(
        &mut self,
        display_id: DisplayId,
        window: WindowIndex,
        stamp: RequestStamp,
        kind: ReplyKind,
        result: std::result::Result<Option<SessionId>, StreamErrorKind>,
    ) {
        let slot = WindowSlot { display: display_id, window };
        let (channel, include) = match kind {
            ReplyKind::IncludeAudio => (AudioChannel::Output, true),
            ReplyKind::ExcludeAudio => (AudioChannel::Output, false),
            ReplyKind::IncludeMic => (AudioChannel::Microphone, true),
            _ => (AudioChannel::Microphone, false),
        };
        let state = self.audio.channel_mut(channel);

        if include {
            if state.including != Some((slot, stamp)) {
                debug!(%display_id, window, %stamp, "Stale include reply dropped");
                return;
            }
            state.including = None;
            let running = self
                .stream(display_id, window)
                .is_some_and(|info| info.session.is_some() && info.pending.is_none());
            match result {
                Ok(_) if running => {
                    let camera = self.stream(display_id, window).and_then(|info| info.camera.clone());
                    let state = self.audio.channel_mut(channel);
                    state.owner = Some(slot);
                    state.last = camera.map(|camera| (slot, camera));
                    self.set_flag(channel, slot, true);
                    self.events.toolbar(channel.button(), ToolbarState::Active);
                }
                Ok(_) => debug!(%display_id, window, "Include answered after stream went away"),
                Err(error) => {
                    warn!(%display_id, window, ?error, "Include failed");
                    self.events.banner(error.message());
                }
            }
            return;
        }

        if state.excluding != Some((slot, stamp)) {
            debug!(%display_id, window, %stamp, "Stale exclude reply dropped");
            return;
        }
        state.excluding = None;
        let queued = state.queued_include.take();
        if let Err(error) = result {
            warn!(%display_id, window, ?error, "Exclude failed, releasing channel anyway");
        }
        self.clear_owner(channel, slot);
        if let Some(next) = queued {
            self.send_include(channel, next);
        }
    }
}
