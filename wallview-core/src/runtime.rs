//! Single-task event loop around the [`DisplayManager`]
//!
//! Everything that can change engine state (user commands, device replies,
//! device and stream notifications, timer expiry) is funneled through one
//! unbounded channel and handled to completion before the next input is
//! taken. The loop sleeps until whichever comes first: the next input or the
//! earliest timer deadline the manager reports.

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{DeviceEvent, DeviceReply, PlaybackCommand, StreamEvent};
use crate::manager::DisplayManager;
use crate::models::{
    CameraRef, DisplayId, OverlayKind, OverlayRequest, StyleRequest, StreamVariant, WindowIndex,
};
use crate::{Error, Result};

/// User-facing operations accepted by the engine
#[derive(Debug, Clone)]
pub enum Command {
    StartLive {
        display: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
        variant: Option<StreamVariant>,
    },
    StopLive {
        display: DisplayId,
        window: WindowIndex,
    },
    ChangePage {
        display: DisplayId,
        offset: i64,
    },
    RefreshPage {
        display: DisplayId,
    },
    ApplyStyle {
        display: DisplayId,
        style: StyleRequest,
    },
    LoadDefaultStyle {
        display: DisplayId,
    },
    ExpandWindow {
        display: DisplayId,
        window: WindowIndex,
    },
    CollapseWindow {
        display: DisplayId,
    },
    SelectWindow {
        display: DisplayId,
        window: WindowIndex,
    },
    AssignCamera {
        display: DisplayId,
        window: WindowIndex,
        camera: CameraRef,
    },
    AssignRing {
        display: DisplayId,
        window: WindowIndex,
        cameras: Vec<CameraRef>,
        interval_secs: u32,
    },
    ClearWindow {
        display: DisplayId,
        window: WindowIndex,
    },
    MoveCamera {
        display: DisplayId,
        from: WindowIndex,
        to: WindowIndex,
    },
    StartInFreeWindow {
        display: DisplayId,
        camera: CameraRef,
    },
    SetDisplaySequencing {
        display: DisplayId,
        enabled: bool,
    },
    SetDisplaySequenceInterval {
        display: DisplayId,
        secs: u32,
    },
    SetWindowSequencing {
        display: DisplayId,
        window: WindowIndex,
        enabled: bool,
        interval_secs: Option<u32>,
    },
    ToggleAudio {
        display: DisplayId,
        window: WindowIndex,
    },
    ToggleMic {
        display: DisplayId,
        window: WindowIndex,
    },
    OpenOverlay {
        display: DisplayId,
        request: OverlayRequest,
    },
    CloseOverlay {
        display: DisplayId,
        kind: OverlayKind,
    },
    FeatureCommand {
        display: DisplayId,
        payload: serde_json::Value,
    },
    StartInstantPlayback {
        display: DisplayId,
        window: WindowIndex,
        rewind: chrono::Duration,
    },
    SeekInstantPlayback {
        display: DisplayId,
        window: WindowIndex,
        position: DateTime<Utc>,
    },
    StepPlayback {
        display: DisplayId,
        window: WindowIndex,
        command: PlaybackCommand,
    },
    StopInstantPlayback {
        display: DisplayId,
        window: WindowIndex,
    },
    StartSyncPlayback {
        display: DisplayId,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    StepSyncPlayback {
        display: DisplayId,
        command: PlaybackCommand,
    },
    StopSyncPlayback {
        display: DisplayId,
    },
    EnterLocalDecoding {
        display: DisplayId,
    },
    ExitLocalDecoding {
        display: DisplayId,
    },
}

impl Command {
    /// Run the command against `manager`.
    pub fn apply(self, manager: &mut DisplayManager) -> Result<()> {
        match self {
            Self::StartLive {
                display: display_id,
                window,
                camera,
                variant,
            } => {
                manager.open_live(display_id, window, camera, variant)?;
            }
            Self::StopLive { display: display_id, window } => manager.close_live(display_id, window)?,
            Self::ChangePage { display: display_id, offset } => {
                manager.change_page(display_id, offset)?;
            }
            Self::RefreshPage { display: display_id } => {
                manager.refresh_page(display_id)?;
            }
            Self::ApplyStyle { display: display_id, style } => {
                manager.apply_style(display_id, style)?;
            }
            Self::LoadDefaultStyle { display: display_id } => {
                manager.load_default_style(display_id)?;
            }
            Self::ExpandWindow { display: display_id, window } => {
                manager.expand_window(display_id, window)?;
            }
            Self::CollapseWindow { display: display_id } => {
                manager.collapse_window(display_id)?;
            }
            Self::SelectWindow { display: display_id, window } => manager.select_window(display_id, window)?,
            Self::AssignCamera {
                display: display_id,
                window,
                camera,
            } => manager.assign_camera(display_id, window, camera)?,
            Self::AssignRing {
                display: display_id,
                window,
                cameras,
                interval_secs,
            } => manager.assign_ring(display_id, window, cameras, interval_secs)?,
            Self::ClearWindow { display: display_id, window } => manager.clear_window(display_id, window)?,
            Self::MoveCamera { display: display_id, from, to } => manager.move_camera(display_id, from, to)?,
            Self::StartInFreeWindow { display: display_id, camera } => {
                manager.start_camera_in_free_window(display_id, camera)?;
            }
            Self::SetDisplaySequencing { display: display_id, enabled } => {
                manager.set_display_sequencing(display_id, enabled)?;
            }
            Self::SetDisplaySequenceInterval { display: display_id, secs } => {
                manager.set_display_sequence_interval(display_id, secs)?;
            }
            Self::SetWindowSequencing {
                display: display_id,
                window,
                enabled,
                interval_secs,
            } => manager.set_window_sequencing(display_id, window, enabled, interval_secs)?,
            Self::ToggleAudio { display: display_id, window } => manager.toggle_audio(display_id, window)?,
            Self::ToggleMic { display: display_id, window } => manager.toggle_mic(display_id, window)?,
            Self::OpenOverlay { display: display_id, request } => {
                manager.open_overlay(display_id, request)?;
            }
            Self::CloseOverlay { display: display_id, kind } => manager.close_overlay(display_id, kind)?,
            Self::FeatureCommand { display: display_id, payload } => {
                manager.send_feature_command(display_id, payload)?;
            }
            Self::StartInstantPlayback {
                display: display_id,
                window,
                rewind,
            } => manager.start_instant_playback(display_id, window, rewind)?,
            Self::SeekInstantPlayback {
                display: display_id,
                window,
                position,
            } => manager.seek_instant_playback(display_id, window, position)?,
            Self::StepPlayback {
                display: display_id,
                window,
                command,
            } => manager.step_playback(display_id, window, command)?,
            Self::StopInstantPlayback { display: display_id, window } => {
                manager.stop_instant_playback(display_id, window)?;
            }
            Self::StartSyncPlayback {
                display: display_id,
                start,
                end,
            } => manager.start_sync_playback(display_id, start, end)?,
            Self::StepSyncPlayback { display: display_id, command } => {
                manager.step_sync_playback(display_id, command)?;
            }
            Self::StopSyncPlayback { display: display_id } => manager.stop_sync_playback(display_id)?,
            Self::EnterLocalDecoding { display: display_id } => manager.enter_local_decoding(display_id)?,
            Self::ExitLocalDecoding { display: display_id } => manager.exit_local_decoding(display_id)?,
        }
        Ok(())
    }
}

/// Everything the event loop reacts to
#[derive(Debug)]
pub enum EngineInput {
    Command {
        command: Command,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
    Reply(DeviceReply),
    Device(DeviceEvent),
    Stream(StreamEvent),
    Shutdown,
}

/// Cloneable sender used by collaborators to feed the event loop
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::UnboundedSender<EngineInput>,
}

impl EngineHandle {
    fn send(&self, input: EngineInput) -> Result<()> {
        self.tx
            .send(input)
            .map_err(|_| Error::Internal("Engine is not running".to_string()))
    }

    /// Run `command` and wait for its result.
    pub async fn execute(&self, command: Command) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.send(EngineInput::Command {
            command,
            reply: Some(reply),
        })?;
        rx.await
            .map_err(|_| Error::Internal("Engine dropped the command".to_string()))?
    }

    /// Queue `command` without waiting for it
    pub fn submit(&self, command: Command) -> Result<()> {
        self.send(EngineInput::Command {
            command,
            reply: None,
        })
    }

    pub fn reply(&self, reply: DeviceReply) -> Result<()> {
        self.send(EngineInput::Reply(reply))
    }

    pub fn device_event(&self, event: DeviceEvent) -> Result<()> {
        self.send(EngineInput::Device(event))
    }

    pub fn stream_event(&self, event: StreamEvent) -> Result<()> {
        self.send(EngineInput::Stream(event))
    }

    pub fn shutdown(&self) -> Result<()> {
        self.send(EngineInput::Shutdown)
    }
}

pub struct Engine {
    manager: DisplayManager,
    inputs: mpsc::UnboundedReceiver<EngineInput>,
}

impl Engine {
    /// Create the input channel. The handle must exist before the manager so
    /// the device layer can deliver replies through it.
    #[must_use]
    pub fn channel() -> (EngineHandle, mpsc::UnboundedReceiver<EngineInput>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EngineHandle { tx }, rx)
    }

    #[must_use]
    pub const fn new(manager: DisplayManager, inputs: mpsc::UnboundedReceiver<EngineInput>) -> Self {
        Self { manager, inputs }
    }

    /// Load every display and process inputs until shutdown or until every
    /// handle is dropped. Returns the manager for inspection.
    pub async fn run(mut self) -> DisplayManager {
        self.manager.set_now(Instant::now().into_std());
        self.manager.start();
        info!(displays = self.manager.display_count(), "Engine started");

        loop {
            let deadline = self.manager.next_deadline().map(Instant::from_std);
            let input = tokio::select! {
                input = self.inputs.recv() => input,
                () = wait_until(deadline) => {
                    self.manager.on_tick(Instant::now().into_std());
                    continue;
                }
            };

            self.manager.set_now(Instant::now().into_std());
            match input {
                Some(EngineInput::Command { command, reply }) => {
                    debug!(?command, "Executing command");
                    let result = command.apply(&mut self.manager);
                    if let Err(e) = &result {
                        debug!(error = %e, "Command rejected");
                    }
                    if let Some(reply) = reply {
                        let _ = reply.send(result);
                    }
                }
                Some(EngineInput::Reply(reply)) => self.manager.handle_reply(reply),
                Some(EngineInput::Device(event)) => self.manager.handle_device_event(event),
                Some(EngineInput::Stream(event)) => self.manager.handle_stream_event(event),
                Some(EngineInput::Shutdown) => {
                    info!("Engine shutting down");
                    break;
                }
                None => {
                    warn!("All engine handles dropped, stopping");
                    break;
                }
            }
        }
        self.manager
    }
}

async fn wait_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
