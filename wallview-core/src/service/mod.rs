//! Engine services
//!
//! Each submodule adds one concern's operations to
//! [`DisplayManager`](crate::manager::DisplayManager):
//! - `gateway`: live/playback session requests and their replies
//! - `mode`: page, style, expand, sync playback and local decoding flows
//! - `overlay`: analog, cosec and video-popup features
//! - `sequencing`: display/window sequencing timers and the retry sweep
//! - `audio`: audio output and microphone ownership
//! - `window`: per-window user operations

pub mod audio;
pub mod gateway;
pub mod mode;
pub mod overlay;
pub mod sequencing;
pub mod window;

pub use audio::{AudioChannel, ChannelState, WindowSlot};
pub use gateway::{classify_replace, ReplaceOutcome, StartOutcome};
pub use mode::Dispatch;
pub use sequencing::{Scheduler, TimerFire};
