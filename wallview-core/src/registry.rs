//! Window registry and pending-request counters
//!
//! Both are fixed-size arrays indexed by window. Overlay records and follow-up
//! actions refer to windows by index only.

use tracing::warn;

use crate::models::{CameraRef, PageBounds, RequestStamp, StreamInfo, WindowIndex, MAX_WINDOWS};

/// Runtime stream state of every window of one display
#[derive(Debug, Clone)]
pub struct WindowRegistry {
    streams: Vec<StreamInfo>,
}

impl Default for WindowRegistry {
    fn default() -> Self {
        Self {
            streams: vec![StreamInfo::default(); MAX_WINDOWS],
        }
    }
}

impl WindowRegistry {
    #[must_use]
    pub fn get(&self, window: WindowIndex) -> Option<&StreamInfo> {
        self.streams.get(window)
    }

    pub fn get_mut(&mut self, window: WindowIndex) -> Option<&mut StreamInfo> {
        self.streams.get_mut(window)
    }

    /// Entry for a window index already validated against [`MAX_WINDOWS`]
    pub(crate) fn slot_mut(&mut self, window: WindowIndex) -> &mut StreamInfo {
        &mut self.streams[window]
    }

    pub fn iter(&self) -> impl Iterator<Item = (WindowIndex, &StreamInfo)> {
        self.streams.iter().enumerate()
    }

    /// Forget everything about `window`
    pub fn clear(&mut self, window: WindowIndex) {
        if let Some(info) = self.streams.get_mut(window) {
            *info = StreamInfo::default();
        }
    }

    /// Whether a reply stamped `stamp` is still wanted by `window`
    #[must_use]
    pub fn expects(&self, window: WindowIndex, stamp: RequestStamp) -> bool {
        self.get(window).and_then(|info| info.stamp) == Some(stamp)
    }

    /// Another window currently requesting or recovering `camera`
    #[must_use]
    pub fn recovering_peer(&self, camera: &CameraRef, except: WindowIndex) -> Option<WindowIndex> {
        use crate::models::StreamStatus;
        self.iter().find_map(|(window, info)| {
            let recovering = matches!(info.status, StreamStatus::Connecting | StreamStatus::Retry)
                && info.waiting_on.is_none()
                && !info.is_stopping();
            (window != except && recovering && info.camera.as_ref() == Some(camera))
                .then_some(window)
        })
    }

    /// Windows parked behind `peer`
    #[must_use]
    pub fn waiters_of(&self, peer: WindowIndex) -> Vec<WindowIndex> {
        self.iter()
            .filter(|(_, info)| info.waiting_on == Some(peer))
            .map(|(window, _)| window)
            .collect()
    }

    /// Windows in `bounds` that hold or are acquiring a device session
    #[must_use]
    pub fn active_in(&self, bounds: PageBounds) -> Vec<WindowIndex> {
        bounds
            .windows()
            .filter(|&window| !self.streams[window].is_idle())
            .collect()
    }

    /// Every non-idle window of the display
    #[must_use]
    pub fn active(&self) -> Vec<WindowIndex> {
        self.iter()
            .filter(|(_, info)| !info.is_idle())
            .map(|(window, _)| window)
            .collect()
    }
}

/// Outstanding request counts of one display and its windows.
///
/// Counters never go negative. A maintenance operation completes only once
/// the display counter is back at zero.
#[derive(Debug, Clone)]
pub struct PendingCounters {
    display: u32,
    windows: Vec<u32>,
}

impl Default for PendingCounters {
    fn default() -> Self {
        Self {
            display: 0,
            windows: vec![0; MAX_WINDOWS],
        }
    }
}

impl PendingCounters {
    #[must_use]
    pub const fn display(&self) -> u32 {
        self.display
    }

    #[must_use]
    pub fn window(&self, window: WindowIndex) -> u32 {
        self.windows.get(window).copied().unwrap_or(0)
    }

    pub fn add(&mut self, window: WindowIndex, count: u32) {
        self.display += count;
        if let Some(slot) = self.windows.get_mut(window) {
            *slot += count;
        }
    }

    /// Count one reply; returns true when the display counter reached zero.
    pub fn complete(&mut self, window: WindowIndex) -> bool {
        if self.display == 0 {
            warn!(window, "Attempted to decrement display pending counter below zero");
        } else {
            self.display -= 1;
        }
        if let Some(slot) = self.windows.get_mut(window) {
            if *slot == 0 {
                warn!(window, "Attempted to decrement window pending counter below zero");
            } else {
                *slot -= 1;
            }
        }
        self.display == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{StreamKind, StreamStatus};

    #[test]
    fn test_counters_never_go_negative() {
        let mut counters = PendingCounters::default();
        counters.add(3, 2);
        assert_eq!(counters.display(), 2);
        assert_eq!(counters.window(3), 2);

        assert!(!counters.complete(3));
        assert!(counters.complete(3));
        assert!(counters.complete(3));
        assert_eq!(counters.display(), 0);
        assert_eq!(counters.window(3), 0);
    }

    #[test]
    fn test_expects_matches_stamp_only() {
        let mut registry = WindowRegistry::default();
        registry.get_mut(1).unwrap().stamp = Some(RequestStamp(7));
        assert!(registry.expects(1, RequestStamp(7)));
        assert!(!registry.expects(1, RequestStamp(6)));
        assert!(!registry.expects(2, RequestStamp(7)));
    }

    #[test]
    fn test_recovering_peer() {
        let camera = CameraRef::new("d", 1);
        let mut registry = WindowRegistry::default();
        *registry.get_mut(0).unwrap() = StreamInfo {
            kind: StreamKind::Live,
            status: StreamStatus::Retry,
            camera: Some(camera.clone()),
            ..StreamInfo::default()
        };
        assert_eq!(registry.recovering_peer(&camera, 2), Some(0));
        assert_eq!(registry.recovering_peer(&camera, 0), None);

        registry.get_mut(0).unwrap().status = StreamStatus::Running;
        assert_eq!(registry.recovering_peer(&camera, 2), None);
    }
}
