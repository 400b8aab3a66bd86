use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::{CameraRef, RequestStamp, SessionId, WindowIndex};

/// What kind of session a window is showing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamKind {
    #[default]
    None,
    Live,
    /// Live request parked until the device becomes reachable
    LiveAwaiting,
    Playback,
    InstantPlayback,
    SyncPlayback,
}

impl StreamKind {
    #[must_use]
    pub const fn is_playback(self) -> bool {
        matches!(self, Self::Playback | Self::InstantPlayback | Self::SyncPlayback)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    None,
    Connecting,
    Running,
    VideoLoss,
    Retry,
    EventWait,
    Error,
}

/// Failure reported by the device layer for a session request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamErrorKind {
    NoPrivilege,
    MaxStreamLimit,
    InternalResourceLimit,
    DecoderCapacity,
    DecoderError,
    CamDisconnected,
    ChannelDisabled,
    DeviceUnreachable,
    InvalidChannel,
    /// The device layer refused the request without queuing it
    Rejected,
}

/// Where a failed window goes next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Terminal until the user acts
    Error,
    /// Re-attempted by the periodic retry sweep
    Retry,
    /// Recovered by a device-state notification
    EventWait,
}

impl StreamErrorKind {
    #[must_use]
    pub const fn disposition(self) -> FailureDisposition {
        match self {
            Self::NoPrivilege | Self::InvalidChannel | Self::Rejected => FailureDisposition::Error,
            Self::MaxStreamLimit
            | Self::InternalResourceLimit
            | Self::DecoderCapacity
            | Self::DecoderError => FailureDisposition::Retry,
            Self::CamDisconnected | Self::ChannelDisabled | Self::DeviceUnreachable => {
                FailureDisposition::EventWait
            }
        }
    }

    /// Whether the next retry should fall back to the sub stream
    #[must_use]
    pub const fn downgrades_variant(self) -> bool {
        matches!(self, Self::DecoderCapacity)
    }

    #[must_use]
    pub const fn status(self) -> StreamStatus {
        match self.disposition() {
            FailureDisposition::Error => StreamStatus::Error,
            FailureDisposition::Retry => StreamStatus::Retry,
            FailureDisposition::EventWait => StreamStatus::EventWait,
        }
    }

    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NoPrivilege => "No privilege to view this camera",
            Self::MaxStreamLimit => "Maximum stream limit reached",
            Self::InternalResourceLimit => "Device resources exhausted",
            Self::DecoderCapacity => "Decoding capacity exceeded",
            Self::DecoderError => "Decoder error",
            Self::CamDisconnected => "Camera disconnected",
            Self::ChannelDisabled => "Camera disabled",
            Self::DeviceUnreachable => "Device unreachable",
            Self::InvalidChannel => "Camera does not exist on device",
            Self::Rejected => "Request rejected",
        }
    }
}

/// Resolution variant requested from the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamVariant {
    #[default]
    Main,
    Sub,
}

/// Request currently outstanding for a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingOp {
    Start,
    Stop,
    Replace,
    PlaybackHandle,
    PlaybackControl,
    Seek,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackDirection {
    #[default]
    Forward,
    Backward,
}

/// Playback position and transport state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackCursor {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub position: DateTime<Utc>,
    pub direction: PlaybackDirection,
    pub speed: f64,
    pub paused: bool,
}

impl PlaybackCursor {
    #[must_use]
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            start,
            end,
            position: start,
            direction: PlaybackDirection::Forward,
            speed: 1.0,
            paused: false,
        }
    }

    /// Clamp `position` into the cursor's time window
    #[must_use]
    pub fn clamp(&self, position: DateTime<Utc>) -> DateTime<Utc> {
        position.clamp(self.start, self.end)
    }
}

/// Work to perform once a window's stop reply lands
#[derive(Debug, Clone, PartialEq)]
pub enum FollowUp {
    StartLive {
        window: WindowIndex,
        camera: CameraRef,
    },
    FetchPlayback {
        window: WindowIndex,
        camera: CameraRef,
        kind: StreamKind,
        cursor: PlaybackCursor,
    },
}

/// Runtime stream state of one window
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamInfo {
    pub kind: StreamKind,
    pub status: StreamStatus,
    pub error: Option<StreamErrorKind>,
    pub camera: Option<CameraRef>,
    pub session: Option<SessionId>,
    /// Stamp of the outstanding request, matched against replies
    pub stamp: Option<RequestStamp>,
    pub pending: Option<PendingOp>,
    pub variant: StreamVariant,
    pub downgrade_on_retry: bool,
    pub audio: bool,
    pub mic: bool,
    pub playback: Option<PlaybackCursor>,
    /// Window already requesting the same camera whose outcome this one waits for
    pub waiting_on: Option<WindowIndex>,
    pub follow_up: Option<FollowUp>,
}

impl StreamInfo {
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.kind, StreamKind::None)
    }

    #[must_use]
    pub const fn is_running(&self) -> bool {
        matches!(self.status, StreamStatus::Running)
    }

    /// Whether the device currently holds, or is about to hold, a session
    /// for this window.
    #[must_use]
    pub const fn holds_device_session(&self) -> bool {
        self.session.is_some()
            || matches!(
                self.pending,
                Some(PendingOp::Start | PendingOp::Replace | PendingOp::PlaybackHandle)
            )
    }

    /// Whether a stop request is already in flight
    #[must_use]
    pub const fn is_stopping(&self) -> bool {
        matches!(self.pending, Some(PendingOp::Stop))
    }

    /// Record a failure and return the status it maps to
    pub fn fail(&mut self, error: StreamErrorKind) -> StreamStatus {
        self.status = error.status();
        self.error = Some(error);
        self.session = None;
        self.stamp = None;
        self.pending = None;
        self.audio = false;
        self.mic = false;
        if error.downgrades_variant() && self.variant == StreamVariant::Main {
            self.downgrade_on_retry = true;
        }
        self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_taxonomy() {
        use StreamErrorKind::*;
        for kind in [NoPrivilege, InvalidChannel, Rejected] {
            assert_eq!(kind.status(), StreamStatus::Error);
        }
        for kind in [MaxStreamLimit, InternalResourceLimit, DecoderCapacity, DecoderError] {
            assert_eq!(kind.status(), StreamStatus::Retry);
        }
        for kind in [CamDisconnected, ChannelDisabled, DeviceUnreachable] {
            assert_eq!(kind.status(), StreamStatus::EventWait);
        }
    }

    #[test]
    fn test_decoder_capacity_marks_downgrade_once() {
        let mut info = StreamInfo {
            kind: StreamKind::Live,
            status: StreamStatus::Connecting,
            ..StreamInfo::default()
        };
        assert_eq!(info.fail(StreamErrorKind::DecoderCapacity), StreamStatus::Retry);
        assert!(info.downgrade_on_retry);

        info.downgrade_on_retry = false;
        info.variant = StreamVariant::Sub;
        info.fail(StreamErrorKind::DecoderCapacity);
        assert!(!info.downgrade_on_retry);
    }

    #[test]
    fn test_holds_device_session() {
        let mut info = StreamInfo::default();
        assert!(!info.holds_device_session());
        info.pending = Some(PendingOp::Start);
        assert!(info.holds_device_session());
        info.pending = Some(PendingOp::Stop);
        assert!(!info.holds_device_session());
        info.session = Some(SessionId(4));
        assert!(info.holds_device_session());
    }
}
