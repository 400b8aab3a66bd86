use serde::{Deserialize, Serialize};

/// Index of a window inside a display grid.
pub type WindowIndex = usize;

/// Physical display index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DisplayId(pub usize);

impl DisplayId {
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl std::fmt::Display for DisplayId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "display-{}", self.0)
    }
}

/// Name of a recording device as known by the device layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceName(pub String);

impl DeviceName {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for DeviceName {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// A camera on a device. Channels are 1-based.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraRef {
    pub device: DeviceName,
    pub channel: u16,
}

impl CameraRef {
    #[must_use]
    pub fn new(device: impl Into<String>, channel: u16) -> Self {
        Self {
            device: DeviceName::new(device),
            channel,
        }
    }
}

impl std::fmt::Display for CameraRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/ch{}", self.device, self.channel)
    }
}

/// Server-side session handle for a live or playback feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Monotonic request stamp.
///
/// Every request sent to the device layer carries a fresh stamp and the reply
/// echoes it back. A reply whose stamp no longer matches the one recorded on
/// the window belongs to a superseded request and is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestStamp(pub u64);

impl std::fmt::Display for RequestStamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source of fresh request stamps
#[derive(Debug, Default)]
pub struct StampSource {
    last: u64,
}

impl StampSource {
    pub fn next(&mut self) -> RequestStamp {
        self.last += 1;
        RequestStamp(self.last)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stamps_are_monotonic() {
        let mut source = StampSource::default();
        let a = source.next();
        let b = source.next();
        assert!(b > a);
        assert_ne!(a, b);
    }

    #[test]
    fn test_camera_display() {
        let camera = CameraRef::new("nvr-1", 3);
        assert_eq!(camera.to_string(), "nvr-1/ch3");
    }
}
