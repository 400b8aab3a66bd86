//! Device/session layer abstraction
//!
//! The engine never talks to a recording device directly. It hands typed
//! requests to a [`DeviceLayer`], which answers synchronously with the number
//! of requests it accepted (0 means rejected on the spot) and later delivers
//! exactly one [`DeviceReply`] per accepted request back into the event loop.

pub mod loopback;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::events::WindowRect;
use crate::models::{
    AnalogAction, CameraRef, DeviceName, DisplayId, PlaybackCursor, PlaybackDirection,
    RequestStamp, SessionId, StreamErrorKind, StreamKind, StreamVariant, WindowIndex,
};

pub use loopback::LoopbackDevice;

/// Reachability and size of a recording device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub reachable: bool,
    pub camera_count: u16,
}

/// Identifies the window and request a reply belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestTarget {
    pub display: DisplayId,
    pub window: WindowIndex,
    pub stamp: RequestStamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackCommand {
    Play {
        direction: PlaybackDirection,
        speed: f64,
    },
    Pause,
    StepForward,
    StepBackward,
}

/// Every request the engine may issue
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceRequest {
    StartStream {
        target: RequestTarget,
        camera: CameraRef,
        variant: StreamVariant,
        geometry: Option<WindowRect>,
    },
    StopStream {
        target: RequestTarget,
        session: Option<SessionId>,
        camera: Option<CameraRef>,
    },
    ReplaceStream {
        target: RequestTarget,
        session: SessionId,
        camera: CameraRef,
        variant: StreamVariant,
        geometry: Option<WindowRect>,
    },
    GetPlaybackHandle {
        target: RequestTarget,
        camera: CameraRef,
        kind: StreamKind,
        cursor: PlaybackCursor,
    },
    StepPlayback {
        target: RequestTarget,
        session: SessionId,
        command: PlaybackCommand,
    },
    SeekPlayback {
        target: RequestTarget,
        session: SessionId,
        position: DateTime<Utc>,
    },
    IncludeAudio {
        target: RequestTarget,
        session: SessionId,
    },
    ExcludeAudio {
        target: RequestTarget,
        session: SessionId,
    },
    IncludeMic {
        target: RequestTarget,
        session: SessionId,
    },
    ExcludeMic {
        target: RequestTarget,
        session: SessionId,
    },
    DeviceCommand {
        target: RequestTarget,
        camera: CameraRef,
        action: AnalogAction,
        payload: serde_json::Value,
    },
}

impl DeviceRequest {
    #[must_use]
    pub const fn target(&self) -> RequestTarget {
        match self {
            Self::StartStream { target, .. }
            | Self::StopStream { target, .. }
            | Self::ReplaceStream { target, .. }
            | Self::GetPlaybackHandle { target, .. }
            | Self::StepPlayback { target, .. }
            | Self::SeekPlayback { target, .. }
            | Self::IncludeAudio { target, .. }
            | Self::ExcludeAudio { target, .. }
            | Self::IncludeMic { target, .. }
            | Self::ExcludeMic { target, .. }
            | Self::DeviceCommand { target, .. } => *target,
        }
    }

    /// Kind of reply the device layer answers this request with
    #[must_use]
    pub const fn reply_kind(&self) -> ReplyKind {
        match self {
            Self::StartStream { .. } => ReplyKind::Start,
            Self::StopStream { .. } => ReplyKind::Stop,
            Self::ReplaceStream { .. } => ReplyKind::Replace,
            Self::GetPlaybackHandle { .. } => ReplyKind::PlaybackHandle,
            Self::StepPlayback { .. } => ReplyKind::PlaybackControl,
            Self::SeekPlayback { .. } => ReplyKind::Seek,
            Self::IncludeAudio { .. } => ReplyKind::IncludeAudio,
            Self::ExcludeAudio { .. } => ReplyKind::ExcludeAudio,
            Self::IncludeMic { .. } => ReplyKind::IncludeMic,
            Self::ExcludeMic { .. } => ReplyKind::ExcludeMic,
            Self::DeviceCommand { .. } => ReplyKind::Command,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyKind {
    Start,
    Stop,
    Replace,
    PlaybackHandle,
    PlaybackControl,
    Seek,
    IncludeAudio,
    ExcludeAudio,
    IncludeMic,
    ExcludeMic,
    Command,
}

/// Completion of one accepted request
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceReply {
    pub kind: ReplyKind,
    pub target: RequestTarget,
    /// Session granted by start, replace, and playback-handle requests
    pub result: Result<Option<SessionId>, StreamErrorKind>,
}

impl DeviceReply {
    #[must_use]
    pub const fn ok(kind: ReplyKind, target: RequestTarget, session: Option<SessionId>) -> Self {
        Self {
            kind,
            target,
            result: Ok(session),
        }
    }

    #[must_use]
    pub const fn failed(kind: ReplyKind, target: RequestTarget, error: StreamErrorKind) -> Self {
        Self {
            kind,
            target,
            result: Err(error),
        }
    }
}

/// Unsolicited device-state notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    Connected { device: DeviceName, camera_count: u16 },
    Disconnected { device: DeviceName },
    CameraStateChanged { camera: CameraRef, connected: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEventKind {
    VideoLoss,
    VideoRestored,
    SessionClosed(StreamErrorKind),
}

/// Unsolicited notification about a running session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamEvent {
    pub display: DisplayId,
    pub window: WindowIndex,
    pub session: SessionId,
    pub kind: StreamEventKind,
}

/// Remote device/session layer.
///
/// Implementations must be non-blocking: `submit` only queues the request.
/// The return value is the number of replies the caller will receive, 0 when
/// the request was refused without being queued.
pub trait DeviceLayer: Send {
    fn device_info(&self, device: &DeviceName) -> Option<DeviceInfo>;

    fn submit(&mut self, request: DeviceRequest) -> u32;

    fn start_stream(
        &mut self,
        target: RequestTarget,
        camera: CameraRef,
        variant: StreamVariant,
        geometry: Option<WindowRect>,
    ) -> u32 {
        self.submit(DeviceRequest::StartStream {
            target,
            camera,
            variant,
            geometry,
        })
    }

    fn stop_stream(
        &mut self,
        target: RequestTarget,
        session: Option<SessionId>,
        camera: Option<CameraRef>,
    ) -> u32 {
        self.submit(DeviceRequest::StopStream {
            target,
            session,
            camera,
        })
    }

    fn replace_stream(
        &mut self,
        target: RequestTarget,
        session: SessionId,
        camera: CameraRef,
        variant: StreamVariant,
        geometry: Option<WindowRect>,
    ) -> u32 {
        self.submit(DeviceRequest::ReplaceStream {
            target,
            session,
            camera,
            variant,
            geometry,
        })
    }

    fn get_playback_handle(
        &mut self,
        target: RequestTarget,
        camera: CameraRef,
        kind: StreamKind,
        cursor: PlaybackCursor,
    ) -> u32 {
        self.submit(DeviceRequest::GetPlaybackHandle {
            target,
            camera,
            kind,
            cursor,
        })
    }

    fn step_playback(
        &mut self,
        target: RequestTarget,
        session: SessionId,
        command: PlaybackCommand,
    ) -> u32 {
        self.submit(DeviceRequest::StepPlayback {
            target,
            session,
            command,
        })
    }

    fn seek_playback(
        &mut self,
        target: RequestTarget,
        session: SessionId,
        position: DateTime<Utc>,
    ) -> u32 {
        self.submit(DeviceRequest::SeekPlayback {
            target,
            session,
            position,
        })
    }

    fn include_audio(&mut self, target: RequestTarget, session: SessionId) -> u32 {
        self.submit(DeviceRequest::IncludeAudio { target, session })
    }

    fn exclude_audio(&mut self, target: RequestTarget, session: SessionId) -> u32 {
        self.submit(DeviceRequest::ExcludeAudio { target, session })
    }

    fn include_mic(&mut self, target: RequestTarget, session: SessionId) -> u32 {
        self.submit(DeviceRequest::IncludeMic { target, session })
    }

    fn exclude_mic(&mut self, target: RequestTarget, session: SessionId) -> u32 {
        self.submit(DeviceRequest::ExcludeMic { target, session })
    }

    fn send_device_command(
        &mut self,
        target: RequestTarget,
        camera: CameraRef,
        action: AnalogAction,
        payload: serde_json::Value,
    ) -> u32 {
        self.submit(DeviceRequest::DeviceCommand {
            target,
            camera,
            action,
            payload,
        })
    }
}
