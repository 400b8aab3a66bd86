//! In-process device layer
//!
//! Answers every request after a fixed latency by posting the reply back into
//! the engine channel. Device reachability lives in a shared [`DeviceTable`]
//! so a supervisor (or a test) can take devices down and bring them back,
//! which is announced to the engine as a device event.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use super::{DeviceEvent, DeviceInfo, DeviceLayer, DeviceReply, DeviceRequest};
use crate::config::DeviceConfig;
use crate::models::{CameraRef, DeviceName, SessionId, StreamErrorKind};
use crate::runtime::EngineHandle;

#[derive(Debug, Default)]
struct TableInner {
    devices: HashMap<DeviceName, DeviceInfo>,
    next_session: u64,
}

/// Shared view of the simulated devices
#[derive(Debug, Clone)]
pub struct DeviceTable {
    inner: Arc<RwLock<TableInner>>,
    handle: EngineHandle,
}

impl DeviceTable {
    #[must_use]
    pub fn get(&self, device: &DeviceName) -> Option<DeviceInfo> {
        self.inner.read().devices.get(device).copied()
    }

    /// Flip reachability of `device` and notify the engine on change.
    pub fn set_reachable(&self, device: &str, reachable: bool) {
        let name = DeviceName::new(device);
        let camera_count = {
            let mut inner = self.inner.write();
            let Some(info) = inner.devices.get_mut(&name) else {
                warn!(device, "Unknown device");
                return;
            };
            if info.reachable == reachable {
                return;
            }
            info.reachable = reachable;
            info.camera_count
        };

        info!(device, reachable, "Device reachability changed");
        let event = if reachable {
            DeviceEvent::Connected {
                device: name,
                camera_count,
            }
        } else {
            DeviceEvent::Disconnected { device: name }
        };
        if let Err(e) = self.handle.device_event(event) {
            debug!(error = %e, "Device event not delivered");
        }
    }

    /// Validate `camera` and grant a session for it.
    fn open_session(&self, camera: &CameraRef) -> Result<Option<SessionId>, StreamErrorKind> {
        let mut inner = self.inner.write();
        match inner.devices.get(&camera.device) {
            Some(info) if !info.reachable => return Err(StreamErrorKind::DeviceUnreachable),
            None => return Err(StreamErrorKind::DeviceUnreachable),
            Some(info) if camera.channel == 0 || camera.channel > info.camera_count => {
                return Err(StreamErrorKind::InvalidChannel);
            }
            Some(_) => {}
        }
        inner.next_session += 1;
        Ok(Some(SessionId(inner.next_session)))
    }
}

/// Device layer that replies through the engine after `latency`
#[derive(Debug)]
pub struct LoopbackDevice {
    table: DeviceTable,
    latency: Duration,
    handle: EngineHandle,
}

impl LoopbackDevice {
    #[must_use]
    pub fn new(devices: &[DeviceConfig], latency: Duration, handle: EngineHandle) -> Self {
        let devices = devices
            .iter()
            .map(|device| {
                (
                    DeviceName::new(&device.name),
                    DeviceInfo {
                        reachable: device.reachable,
                        camera_count: device.camera_count,
                    },
                )
            })
            .collect();
        let table = DeviceTable {
            inner: Arc::new(RwLock::new(TableInner {
                devices,
                next_session: 0,
            })),
            handle: handle.clone(),
        };
        Self {
            table,
            latency,
            handle,
        }
    }

    /// Handle for changing device reachability at runtime
    #[must_use]
    pub fn table(&self) -> DeviceTable {
        self.table.clone()
    }

    fn answer(&self, request: &DeviceRequest) -> DeviceReply {
        let kind = request.reply_kind();
        let target = request.target();
        let result = match request {
            DeviceRequest::StartStream { camera, .. }
            | DeviceRequest::ReplaceStream { camera, .. }
            | DeviceRequest::GetPlaybackHandle { camera, .. } => self.table.open_session(camera),
            _ => Ok(None),
        };
        DeviceReply {
            kind,
            target,
            result,
        }
    }
}

impl DeviceLayer for LoopbackDevice {
    fn device_info(&self, device: &DeviceName) -> Option<DeviceInfo> {
        self.table.get(device)
    }

    fn submit(&mut self, request: DeviceRequest) -> u32 {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!("No runtime available, request refused");
            return 0;
        };
        let reply = self.answer(&request);
        debug!(request = ?reply.target, kind = ?reply.kind, "Loopback request accepted");

        let handle = self.handle.clone();
        let latency = self.latency;
        runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            if let Err(e) = handle.reply(reply) {
                debug!(error = %e, "Reply not delivered");
            }
        });
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ReplyKind, RequestTarget};
    use crate::models::{DisplayId, RequestStamp, StreamVariant};
    use crate::runtime::{Engine, EngineInput};

    fn target() -> RequestTarget {
        RequestTarget {
            display: DisplayId(0),
            window: 0,
            stamp: RequestStamp(1),
        }
    }

    fn start(camera: CameraRef) -> DeviceRequest {
        DeviceRequest::StartStream {
            target: target(),
            camera,
            variant: StreamVariant::Main,
            geometry: None,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_arrives_after_latency() {
        let (handle, mut rx) = Engine::channel();
        let mut device = LoopbackDevice::new(
            &[DeviceConfig::default()],
            Duration::from_millis(40),
            handle,
        );

        assert_eq!(device.submit(start(CameraRef::new("local", 3))), 1);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(30)).await;
        match rx.try_recv().unwrap() {
            EngineInput::Reply(reply) => {
                assert_eq!(reply.kind, ReplyKind::Start);
                assert_eq!(reply.result, Ok(Some(SessionId(1))));
            }
            other => panic!("unexpected input {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_channel_and_unreachable_device() {
        let (handle, mut rx) = Engine::channel();
        let mut device = LoopbackDevice::new(
            &[DeviceConfig {
                name: "nvr".to_string(),
                camera_count: 4,
                reachable: true,
            }],
            Duration::from_millis(1),
            handle,
        );
        let table = device.table();

        device.submit(start(CameraRef::new("nvr", 9)));
        table.set_reachable("nvr", false);
        device.submit(start(CameraRef::new("nvr", 1)));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let mut results = Vec::new();
        let mut disconnected = false;
        while let Ok(input) = rx.try_recv() {
            match input {
                EngineInput::Reply(reply) => results.push(reply.result),
                EngineInput::Device(DeviceEvent::Disconnected { device }) => {
                    disconnected = device == DeviceName::new("nvr");
                }
                other => panic!("unexpected input {other:?}"),
            }
        }
        assert!(disconnected);
        assert_eq!(results.len(), 2);
        assert!(results.contains(&Err(StreamErrorKind::InvalidChannel)));
        assert!(results.contains(&Err(StreamErrorKind::DeviceUnreachable)));
    }

    #[test]
    fn test_submit_without_runtime_is_refused() {
        let (handle, _rx) = Engine::channel();
        let mut device =
            LoopbackDevice::new(&[DeviceConfig::default()], Duration::from_millis(1), handle);
        assert_eq!(device.submit(start(CameraRef::new("local", 1))), 0);
    }
}
