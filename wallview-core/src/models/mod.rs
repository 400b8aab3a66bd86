pub mod display;
pub mod id;
pub mod layout;
pub mod mode;
pub mod overlay;
pub mod stream;

pub use display::{DisplayConfig, WindowInfo, DEFAULT_SEQUENCE_INTERVAL_SECS, RING_CAPACITY};
pub use id::{CameraRef, DeviceName, DisplayId, RequestStamp, SessionId, StampSource, WindowIndex};
pub use layout::{LayoutType, PageBounds, MAX_WINDOWS};
pub use mode::{
    BarrierPhase, DisplayMode, ExpandRequest, LatchedActions, ModeState, StyleRequest,
};
pub use overlay::{
    AnalogAction, FeatureState, OverlayKind, OverlayRecord, OverlayRequest, SavedLayout,
};
pub use stream::{
    FailureDisposition, FollowUp, PendingOp, PlaybackCursor, PlaybackDirection, StreamErrorKind,
    StreamInfo, StreamKind, StreamStatus, StreamVariant,
};
