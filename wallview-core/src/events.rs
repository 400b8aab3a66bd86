//! Notifications to rendering collaborators
//!
//! The engine emits [`ViewEvent`]s through an [`EventHub`]; every subscriber
//! receives its own copy on an unbounded channel. Dispatch happens
//! synchronously inside the event-loop tick that caused the change.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::models::{DisplayId, DisplayMode, WindowIndex};

/// Pixel geometry of a window as laid out by the renderer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowRect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// What the engine needs from the rendering side
pub trait RenderSurface: Send {
    fn window_geometry(&self, display_id: DisplayId, window: WindowIndex) -> Option<WindowRect>;

    fn focus_window(&mut self, display_id: DisplayId, window: WindowIndex);
}

/// Surface for headless runs
#[derive(Debug, Default)]
pub struct NullSurface;

impl RenderSurface for NullSurface {
    fn window_geometry(&self, _display: DisplayId, _window: WindowIndex) -> Option<WindowRect> {
        None
    }

    fn focus_window(&mut self, _display: DisplayId, _window: WindowIndex) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolbarButton {
    DisplaySequence,
    WindowSequence,
    Audio,
    Microphone,
    Expand,
    InstantPlayback,
    SyncPlayback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolbarState {
    Inactive,
    Active,
    Disabled,
}

impl ToolbarState {
    #[must_use]
    pub const fn from_active(active: bool) -> Self {
        if active {
            Self::Active
        } else {
            Self::Inactive
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewEvent {
    WindowChanged {
        display: DisplayId,
        window: WindowIndex,
    },
    PageChanged {
        display: DisplayId,
        page: usize,
    },
    ModeChanged {
        display: DisplayId,
        mode: DisplayMode,
    },
    ToolbarStateChanged {
        button: ToolbarButton,
        state: ToolbarState,
    },
    BannerMessage {
        text: String,
    },
}

/// Fan-out of view events to subscribers
#[derive(Clone, Default)]
pub struct EventHub {
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<ViewEvent>>>>,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("subscribers", &self.subscribers.lock().len())
            .finish()
    }
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ViewEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// Send `event` to every live subscriber, dropping closed ones.
    ///
    /// Returns the number of subscribers reached.
    pub fn emit(&self, event: ViewEvent) -> usize {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        debug!(?event, subscribers = subscribers.len(), "View event emitted");
        subscribers.len()
    }

    pub fn window_changed(&self, display_id: DisplayId, window: WindowIndex) {
        self.emit(ViewEvent::WindowChanged { display: display_id, window });
    }

    pub fn page_changed(&self, display_id: DisplayId, page: usize) {
        self.emit(ViewEvent::PageChanged { display: display_id, page });
    }

    pub fn mode_changed(&self, display_id: DisplayId, mode: DisplayMode) {
        self.emit(ViewEvent::ModeChanged { display: display_id, mode });
    }

    pub fn toolbar(&self, button: ToolbarButton, state: ToolbarState) {
        self.emit(ViewEvent::ToolbarStateChanged { button, state });
    }

    pub fn banner(&self, text: impl Into<String>) {
        self.emit(ViewEvent::BannerMessage { text: text.into() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_reaches_every_subscriber() {
        let hub = EventHub::new();
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        assert_eq!(hub.emit(ViewEvent::BannerMessage { text: "hi".into() }), 2);
        assert_eq!(
            first.try_recv().unwrap(),
            ViewEvent::BannerMessage { text: "hi".into() }
        );
        assert!(second.try_recv().is_ok());
    }

    #[test]
    fn test_closed_subscribers_are_dropped() {
        let hub = EventHub::new();
        let kept = hub.subscribe();
        drop(hub.subscribe());

        assert_eq!(hub.emit(ViewEvent::PageChanged { display: DisplayId(0), page: 1 }), 1);
        drop(kept);
        assert_eq!(hub.emit(ViewEvent::PageChanged { display: DisplayId(0), page: 2 }), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = ViewEvent::ModeChanged {
            display: DisplayId(0),
            mode: DisplayMode::ChangingPage,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "mode_changed");
        assert_eq!(json["mode"], "changing_page");
    }
}
