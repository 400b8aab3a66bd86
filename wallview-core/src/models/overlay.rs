use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::display::WindowInfo;
use super::id::{CameraRef, RequestStamp, WindowIndex};
use super::layout::LayoutType;
use super::mode::DisplayMode;

/// Window-borrowing features, in ascending priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayKind {
    /// Analog camera zoom / privacy mask / motion settings
    Analog,
    /// Access-control event popup
    Cosec,
    /// Event-triggered video popup
    VideoPopup,
}

impl OverlayKind {
    pub const ALL: [Self; 3] = [Self::Analog, Self::Cosec, Self::VideoPopup];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Self::Analog => 0,
            Self::Cosec => 1,
            Self::VideoPopup => 2,
        }
    }

    #[must_use]
    pub const fn mode(self) -> DisplayMode {
        match self {
            Self::Analog => DisplayMode::AnalogFeature,
            Self::Cosec => DisplayMode::CosecFeature,
            Self::VideoPopup => DisplayMode::VideoPopupFeature,
        }
    }

    /// Popups close themselves after the configured countdown
    #[must_use]
    pub const fn auto_closes(self) -> bool {
        matches!(self, Self::Cosec | Self::VideoPopup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalogAction {
    Zoom,
    PrivacyMask,
    MotionDetection,
}

/// Step of the preemption protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureState {
    #[default]
    None,
    StopOldWindow,
    StartVideo,
    VideoOn,
    StopVideo,
    StartOldWindow,
}

/// Request to open an overlay feature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayRequest {
    pub kind: OverlayKind,
    pub camera: CameraRef,
    pub analog_action: Option<AnalogAction>,
    /// Originating event for popups
    pub event_id: Option<String>,
}

impl OverlayRequest {
    #[must_use]
    pub const fn analog(camera: CameraRef, action: AnalogAction) -> Self {
        Self {
            kind: OverlayKind::Analog,
            camera,
            analog_action: Some(action),
            event_id: None,
        }
    }

    #[must_use]
    pub fn cosec(camera: CameraRef, event_id: impl Into<String>) -> Self {
        Self {
            kind: OverlayKind::Cosec,
            camera,
            analog_action: None,
            event_id: Some(event_id.into()),
        }
    }

    #[must_use]
    pub fn video_popup(camera: CameraRef, event_id: impl Into<String>) -> Self {
        Self {
            kind: OverlayKind::VideoPopup,
            camera,
            analog_action: None,
            event_id: Some(event_id.into()),
        }
    }
}

/// Grid state to return to once the last overlay closes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SavedLayout {
    pub layout: LayoutType,
    pub page: usize,
    pub selected_window: WindowIndex,
}

/// Runtime record of one overlay feature on one display.
///
/// Holds indices into the grid, never references.
#[derive(Debug, Clone, Default)]
pub struct OverlayRecord {
    pub request: Option<OverlayRequest>,
    pub window: Option<WindowIndex>,
    /// WindowInfo evicted from the borrowed window
    pub backup: Option<WindowInfo>,
    pub saved: Option<SavedLayout>,
    pub state: FeatureState,
    /// Preempted by a higher-priority feature, resumed when it closes
    pub hidden: bool,
    /// Request queued behind an equal or higher priority feature
    pub next_pending: Option<OverlayRequest>,
    pub close_at: Option<Instant>,
    /// Outstanding feature command sent to the device
    pub command_stamp: Option<RequestStamp>,
}

impl OverlayRecord {
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self.state, FeatureState::None)
    }

    /// Forget the active feature, keeping any queued request
    pub fn reset(&mut self) {
        let next_pending = self.next_pending.take();
        *self = Self {
            next_pending,
            ..Self::default()
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_order() {
        assert!(OverlayKind::Analog < OverlayKind::Cosec);
        assert!(OverlayKind::Cosec < OverlayKind::VideoPopup);
        for kind in OverlayKind::ALL {
            assert_eq!(OverlayKind::ALL[kind.index()], kind);
        }
    }

    #[test]
    fn test_reset_keeps_queued_request() {
        let queued = OverlayRequest::video_popup(CameraRef::new("d", 1), "evt-2");
        let mut record = OverlayRecord {
            state: FeatureState::VideoOn,
            window: Some(3),
            hidden: true,
            next_pending: Some(queued.clone()),
            ..OverlayRecord::default()
        };
        record.reset();
        assert!(!record.is_active());
        assert_eq!(record.window, None);
        assert!(!record.hidden);
        assert_eq!(record.next_pending, Some(queued));
    }
}
