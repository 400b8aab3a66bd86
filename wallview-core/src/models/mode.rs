use serde::{Deserialize, Serialize};

use super::display::WindowInfo;
use super::id::WindowIndex;
use super::layout::LayoutType;
use super::overlay::OverlayRequest;

/// Exclusive maintenance mode of one display
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    None,
    ChangingPage,
    RefreshingPage,
    RetryingPage,
    ApplyingNewStyle,
    ExpandingWindow,
    Expanded,
    Collapsing,
    SyncPlaybackStarting,
    SyncPlaybackActive,
    SyncPlaybackStopping,
    AnalogFeature,
    CosecFeature,
    VideoPopupFeature,
    LocalDecoding,
}

impl DisplayMode {
    /// Modes a display may rest in without a barrier draining
    #[must_use]
    pub const fn is_steady(self) -> bool {
        matches!(
            self,
            Self::None
                | Self::Expanded
                | Self::SyncPlaybackActive
                | Self::AnalogFeature
                | Self::CosecFeature
                | Self::VideoPopupFeature
                | Self::LocalDecoding
        )
    }

    /// Modes in which the sequencing timers keep running
    #[must_use]
    pub const fn allows_sequencing(self) -> bool {
        matches!(self, Self::None | Self::Expanded)
    }

    #[must_use]
    pub const fn is_overlay(self) -> bool {
        matches!(self, Self::AnalogFeature | Self::CosecFeature | Self::VideoPopupFeature)
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Which batch of requests a maintenance operation is waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BarrierPhase {
    #[default]
    Idle,
    ProcessingStopRequest,
    ProcessingStartRequest,
    ProcessingReplaceRequest,
}

/// New layout requested for a display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRequest {
    pub layout: LayoutType,
    /// Replacement window assignments; `None` keeps the current ones
    pub windows: Option<Vec<WindowInfo>>,
    pub selected_window: Option<WindowIndex>,
}

impl StyleRequest {
    #[must_use]
    pub const fn layout(layout: LayoutType) -> Self {
        Self {
            layout,
            windows: None,
            selected_window: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandRequest {
    Expand(WindowIndex),
    Collapse,
}

/// Maintenance requests deferred while a display is busy.
///
/// One slot per category. Later requests overwrite earlier ones, except page
/// offsets which add up.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatchedActions {
    pub page_offset: i64,
    pub style: Option<StyleRequest>,
    pub refresh: bool,
    pub expand: Option<ExpandRequest>,
    pub popup: Option<OverlayRequest>,
}

impl LatchedActions {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.page_offset == 0
            && self.style.is_none()
            && !self.refresh
            && self.expand.is_none()
            && self.popup.is_none()
    }
}

/// Current mode of a display plus the one it came from
#[derive(Debug, Clone, Default)]
pub struct ModeState {
    pub current: DisplayMode,
    pub previous: DisplayMode,
    pub phase: BarrierPhase,
    pub latched: LatchedActions,
}

impl ModeState {
    /// Switch modes, remembering the mode being left.
    ///
    /// Returns false when the display already is in `mode`.
    pub fn transition(&mut self, mode: DisplayMode) -> bool {
        if self.current == mode {
            return false;
        }
        self.previous = self.current;
        self.current = mode;
        true
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self.current, DisplayMode::None) && matches!(self.phase, BarrierPhase::Idle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_records_previous() {
        let mut state = ModeState::default();
        assert!(state.transition(DisplayMode::ChangingPage));
        assert_eq!(state.previous, DisplayMode::None);
        assert!(state.transition(DisplayMode::None));
        assert_eq!(state.previous, DisplayMode::ChangingPage);
        assert!(!state.transition(DisplayMode::None));
        assert_eq!(state.previous, DisplayMode::ChangingPage);
    }

    #[test]
    fn test_steady_modes() {
        assert!(DisplayMode::None.is_steady());
        assert!(DisplayMode::Expanded.is_steady());
        assert!(!DisplayMode::ChangingPage.is_steady());
        assert!(!DisplayMode::Collapsing.is_steady());
        assert!(DisplayMode::Expanded.allows_sequencing());
        assert!(!DisplayMode::CosecFeature.allows_sequencing());
    }
}
