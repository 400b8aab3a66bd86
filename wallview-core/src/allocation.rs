//! Window and channel allocation
//!
//! Pure functions over a [`DisplayConfig`]: page occupancy, free-window
//! search, and camera-ring advancement.

use crate::models::{DisplayConfig, WindowIndex, WindowInfo, MAX_WINDOWS};

/// Whether any window of `page` has a camera assigned
#[must_use]
pub fn page_has_assignment(config: &DisplayConfig, page: usize) -> bool {
    config
        .layout
        .page_bounds(page)
        .windows()
        .any(|window| !config.windows[window].is_empty())
}

/// Next page after `from` with at least one assigned window.
///
/// Walks forward at most one full lap, so it terminates even when every
/// page is empty. Returns `None` when no other page has an assignment.
#[must_use]
pub fn next_non_empty_page(config: &DisplayConfig, from: usize) -> Option<usize> {
    let count = config.layout.page_count();
    (1..count)
        .map(|step| (from + step) % count)
        .find(|&page| page_has_assignment(config, page))
}

/// Free window for a new camera: the current page first, then the whole grid.
#[must_use]
pub fn find_free_window(config: &DisplayConfig) -> Option<WindowIndex> {
    let bounds = config.current_bounds();
    bounds
        .windows()
        .find(|&window| config.windows[window].is_empty())
        .or_else(|| (0..MAX_WINDOWS).find(|&window| config.windows[window].is_empty()))
}

/// Ring slot that follows the current one.
///
/// Wraps modulo the ring capacity and gives up once it is back at the
/// starting slot, i.e. when no other camera is eligible.
#[must_use]
pub fn next_ring_slot(info: &WindowInfo) -> Option<usize> {
    let capacity = info.cameras.len();
    if capacity == 0 {
        return None;
    }
    let start = info.current % capacity;
    let mut slot = start;
    loop {
        slot = (slot + 1) % capacity;
        if slot == start {
            return None;
        }
        if info.cameras[slot].is_some() {
            return Some(slot);
        }
    }
}

/// Window sequencing only makes sense with at least two cameras in the ring
#[must_use]
pub fn is_multi_channel(info: &WindowInfo) -> bool {
    info.assigned_count() >= 2
}

/// Next assigned window after `from` across the whole grid, wrapping.
#[must_use]
pub fn next_assigned_window(config: &DisplayConfig, from: WindowIndex) -> Option<WindowIndex> {
    (1..MAX_WINDOWS)
        .map(|step| (from + step) % MAX_WINDOWS)
        .find(|&window| !config.windows[window].is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CameraRef, LayoutType};

    fn config_with(layout: LayoutType, assigned: &[WindowIndex]) -> DisplayConfig {
        let mut config = DisplayConfig::with_layout(layout);
        for &window in assigned {
            config.windows[window] = WindowInfo::with_camera(CameraRef::new("d", window as u16 + 1));
        }
        config
    }

    #[test]
    fn test_next_non_empty_page_skips_empty_pages() {
        // 2x2: pages 0 and 5 are assigned
        let config = config_with(LayoutType::TwoByTwo, &[1, 21]);
        assert_eq!(next_non_empty_page(&config, 0), Some(5));
        assert_eq!(next_non_empty_page(&config, 5), Some(0));
        assert_eq!(next_non_empty_page(&config, 7), Some(0));
    }

    #[test]
    fn test_next_non_empty_page_terminates_on_empty_grid() {
        for layout in LayoutType::ALL {
            let config = DisplayConfig::with_layout(layout);
            assert_eq!(next_non_empty_page(&config, 0), None);
        }
    }

    #[test]
    fn test_next_non_empty_page_single_assigned_page() {
        let config = config_with(LayoutType::TwoByTwo, &[2]);
        assert_eq!(next_non_empty_page(&config, 0), None);
        assert_eq!(next_non_empty_page(&config, 3), Some(0));
    }

    #[test]
    fn test_find_free_window_prefers_current_page() {
        let mut config = config_with(LayoutType::TwoByTwo, &[0, 1, 4]);
        config.current_page = 1;
        assert_eq!(find_free_window(&config), Some(5));

        config.current_page = 0;
        assert_eq!(find_free_window(&config), Some(2));
    }

    #[test]
    fn test_find_free_window_falls_back_to_grid() {
        let mut config = config_with(LayoutType::TwoByTwo, &[0, 1, 2, 3]);
        config.current_page = 0;
        assert_eq!(find_free_window(&config), Some(4));

        let full: Vec<_> = (0..MAX_WINDOWS).collect();
        let config = config_with(LayoutType::TwoByTwo, &full);
        assert_eq!(find_free_window(&config), None);
    }

    #[test]
    fn test_next_ring_slot_wraps_and_stops() {
        let mut info = WindowInfo::default();
        info.cameras[2] = Some(CameraRef::new("d", 1));
        info.cameras[9] = Some(CameraRef::new("d", 2));
        info.current = 2;
        assert_eq!(next_ring_slot(&info), Some(9));
        info.current = 9;
        assert_eq!(next_ring_slot(&info), Some(2));

        info.cameras[9] = None;
        info.current = 2;
        assert_eq!(next_ring_slot(&info), None);
    }

    #[test]
    fn test_multi_channel_detection() {
        let single = WindowInfo::with_camera(CameraRef::new("d", 1));
        assert!(!is_multi_channel(&single));
        let ring = WindowInfo::with_ring([CameraRef::new("d", 1), CameraRef::new("d", 2)], 5);
        assert!(is_multi_channel(&ring));
    }

    #[test]
    fn test_next_assigned_window_wraps() {
        let config = config_with(LayoutType::TwoByTwo, &[3, 40]);
        assert_eq!(next_assigned_window(&config, 3), Some(40));
        assert_eq!(next_assigned_window(&config, 40), Some(3));
        let config = config_with(LayoutType::TwoByTwo, &[3]);
        assert_eq!(next_assigned_window(&config, 3), None);
    }
}
