//! Scripted device layer and harness shared by the unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::EngineConfig;
use crate::device::{
    DeviceInfo, DeviceLayer, DeviceReply, DeviceRequest, PlaybackCommand, ReplyKind,
};
use crate::events::{EventHub, NullSurface, ViewEvent};
use crate::manager::DisplayManager;
use crate::models::{
    AnalogAction, CameraRef, DeviceName, DisplayConfig, DisplayId, LayoutType, SessionId,
    StreamErrorKind, StreamKind, StreamVariant, WindowIndex, WindowInfo,
};
use crate::store::{ConfigStore, InMemoryConfigStore};

/// Request as observed by the scripted device, stripped to what tests assert on
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Start {
        window: WindowIndex,
        camera: CameraRef,
        variant: StreamVariant,
    },
    Stop {
        window: WindowIndex,
    },
    Replace {
        window: WindowIndex,
        camera: CameraRef,
        variant: StreamVariant,
    },
    PlaybackHandle {
        window: WindowIndex,
        kind: StreamKind,
    },
    Playback {
        window: WindowIndex,
        command: PlaybackCommand,
    },
    Seek {
        window: WindowIndex,
    },
    IncludeAudio {
        window: WindowIndex,
    },
    ExcludeAudio {
        window: WindowIndex,
    },
    IncludeMic {
        window: WindowIndex,
    },
    ExcludeMic {
        window: WindowIndex,
    },
    Command {
        window: WindowIndex,
        action: AnalogAction,
    },
}

impl Call {
    fn from_request(request: &DeviceRequest) -> Self {
        let window = request.target().window;
        match request {
            DeviceRequest::StartStream {
                camera, variant, ..
            } => Self::Start {
                window,
                camera: camera.clone(),
                variant: *variant,
            },
            DeviceRequest::StopStream { .. } => Self::Stop { window },
            DeviceRequest::ReplaceStream {
                camera, variant, ..
            } => Self::Replace {
                window,
                camera: camera.clone(),
                variant: *variant,
            },
            DeviceRequest::GetPlaybackHandle { kind, .. } => Self::PlaybackHandle {
                window,
                kind: *kind,
            },
            DeviceRequest::StepPlayback { command, .. } => Self::Playback {
                window,
                command: *command,
            },
            DeviceRequest::SeekPlayback { .. } => Self::Seek { window },
            DeviceRequest::IncludeAudio { .. } => Self::IncludeAudio { window },
            DeviceRequest::ExcludeAudio { .. } => Self::ExcludeAudio { window },
            DeviceRequest::IncludeMic { .. } => Self::IncludeMic { window },
            DeviceRequest::ExcludeMic { .. } => Self::ExcludeMic { window },
            DeviceRequest::DeviceCommand { action, .. } => Self::Command {
                window,
                action: *action,
            },
        }
    }
}

#[derive(Debug, Default)]
struct Script {
    devices: HashMap<DeviceName, DeviceInfo>,
    calls: Vec<Call>,
    replies: VecDeque<DeviceReply>,
    start_failures: VecDeque<StreamErrorKind>,
    rejections: u32,
    next_session: u64,
}

/// Device layer that records every request and queues a reply for the test
/// to deliver.
#[derive(Debug, Clone, Default)]
pub struct RecordingDevice {
    script: Arc<Mutex<Script>>,
}

impl RecordingDevice {
    pub fn set_device(&self, name: &str, reachable: bool, camera_count: u16) {
        self.script.lock().devices.insert(
            DeviceName::new(name),
            DeviceInfo {
                reachable,
                camera_count,
            },
        );
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut self.script.lock().calls)
    }

    /// The next start request is answered with `error`
    pub fn fail_next_start(&self, error: StreamErrorKind) {
        self.script.lock().start_failures.push_back(error);
    }

    /// Refuse the next `count` submissions synchronously
    pub fn reject_next(&self, count: u32) {
        self.script.lock().rejections = count;
    }

    /// Remove queued replies without delivering them
    pub fn pending_replies(&self) -> Vec<DeviceReply> {
        self.script.lock().replies.drain(..).collect()
    }

    fn pop_reply(&self) -> Option<DeviceReply> {
        self.script.lock().replies.pop_front()
    }
}

impl DeviceLayer for RecordingDevice {
    fn device_info(&self, device: &DeviceName) -> Option<DeviceInfo> {
        self.script.lock().devices.get(device).copied()
    }

    fn submit(&mut self, request: DeviceRequest) -> u32 {
        let mut script = self.script.lock();
        if script.rejections > 0 {
            script.rejections -= 1;
            return 0;
        }
        script.calls.push(Call::from_request(&request));

        let kind = request.reply_kind();
        let target = request.target();
        let reply = match kind {
            ReplyKind::Start => match script.start_failures.pop_front() {
                Some(error) => DeviceReply::failed(kind, target, error),
                None => {
                    script.next_session += 1;
                    DeviceReply::ok(kind, target, Some(SessionId(script.next_session)))
                }
            },
            ReplyKind::Replace | ReplyKind::PlaybackHandle => {
                script.next_session += 1;
                DeviceReply::ok(kind, target, Some(SessionId(script.next_session)))
            }
            _ => DeviceReply::ok(kind, target, None),
        };
        script.replies.push_back(reply);
        1
    }
}

pub fn camera(device: &str, channel: u16) -> CameraRef {
    CameraRef::new(device, channel)
}

pub struct Harness {
    pub manager: DisplayManager,
    pub device: RecordingDevice,
    pub store: Arc<InMemoryConfigStore>,
    events: mpsc::UnboundedReceiver<ViewEvent>,
}

/// One display with `layout` and the given window assignments, talking to a
/// reachable device "local" with 16 cameras. Nothing is loaded until
/// [`Harness::start`].
pub fn harness(layout: LayoutType, assignments: &[(WindowIndex, CameraRef)]) -> Harness {
    let mut config = DisplayConfig::with_layout(layout);
    for (window, camera) in assignments {
        config.windows[*window] = WindowInfo::with_camera(camera.clone());
    }
    let store = Arc::new(InMemoryConfigStore::new(DisplayConfig::default()));
    store.write_display_layout(DisplayId(0), &config).unwrap();

    let device = RecordingDevice::default();
    device.set_device("local", true, 16);

    let events = EventHub::new();
    let receiver = events.subscribe();
    let manager = DisplayManager::new(
        EngineConfig::default(),
        Box::new(device.clone()),
        store.clone(),
        Box::new(NullSurface),
        events,
        Instant::now(),
    )
    .unwrap();

    Harness {
        manager,
        device,
        store,
        events: receiver,
    }
}

impl Harness {
    pub fn start(&mut self) {
        self.manager.start();
    }

    /// Deliver queued replies, including those issued while handling them,
    /// until the device is quiet.
    pub fn settle(&mut self) {
        while let Some(reply) = self.device.pop_reply() {
            self.manager.handle_reply(reply);
        }
    }

    pub fn advance(&mut self, by: Duration) {
        let now = self.manager.now() + by;
        self.manager.on_tick(now);
    }

    /// Overwrite a window's ring before the page is loaded
    pub fn set_window(&mut self, window: WindowIndex, info: WindowInfo) {
        self.manager.displays[0].config.windows[window] = info;
    }

    pub fn drain_events(&mut self) -> Vec<ViewEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Banner texts emitted since the last drain
    pub fn banners(&mut self) -> Vec<String> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                ViewEvent::BannerMessage { text } => Some(text),
                _ => None,
            })
            .collect()
    }
}
