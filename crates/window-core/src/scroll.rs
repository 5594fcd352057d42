use tracing::{debug, trace};

use crate::types::ScrollAction;

/// Narrow view of the UI list used for anchor preservation.
///
/// Implemented by the UI layer (or a fake in tests).
pub trait ViewportObserver {
    /// Total scrollable content height in pixels, measured now.
    fn measure_content_height(&self) -> f64;
}

/// Page fetch requested by a boundary sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollTrigger {
    LoadOlder,
    LoadNewer,
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct RestoreAnchor {
    height_before: f64,
    resolved: bool,
}

/// Tracks whether the list follows the live edge and keeps the top row fixed
/// across backward pagination.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScrollAnchorCoordinator {
    scroll_locked: bool,
    pending_restore: Option<RestoreAnchor>,
}

impl ScrollAnchorCoordinator {
    pub fn scroll_locked(&self) -> bool {
        self.scroll_locked
    }

    /// A backward fetch is in flight or waiting for layout.
    pub fn pending_restore(&self) -> bool {
        self.pending_restore.is_some()
    }

    /// Bottom sentinel intersection changed.
    ///
    /// Fully hidden (`0.0`) locks, fully visible (`>= 1.0`) unlocks; partial
    /// ratios keep the current state. Reaching the bottom with more rows past
    /// the tail asks for the next page.
    pub fn on_bottom_visibility_change(
        &mut self,
        intersection_ratio: f32,
        has_more_newer: bool,
    ) -> Option<ScrollTrigger> {
        if intersection_ratio <= 0.0 {
            if !self.scroll_locked {
                debug!("bottom sentinel left viewport; scroll locked");
            }
            self.scroll_locked = true;
            return None;
        }

        if intersection_ratio < 1.0 {
            return None;
        }

        if self.scroll_locked {
            debug!("bottom sentinel fully visible; scroll unlocked");
        }
        self.scroll_locked = false;
        has_more_newer.then_some(ScrollTrigger::LoadNewer)
    }

    /// Top sentinel visibility changed.
    pub fn on_top_visibility_change(
        &mut self,
        visible: bool,
        has_older: bool,
    ) -> Option<ScrollTrigger> {
        (visible && has_older && self.pending_restore.is_none()).then_some(ScrollTrigger::LoadOlder)
    }

    /// Record the content extent before a backward fetch mutates the list.
    pub fn begin_restore(&mut self, viewport: &dyn ViewportObserver) {
        let height_before = viewport.measure_content_height();
        trace!(height_before, "recorded pre-pagination content height");
        self.pending_restore = Some(RestoreAnchor {
            height_before,
            resolved: false,
        });
    }

    /// The backward fetch was applied; the next layout pass re-anchors.
    pub fn resolve_restore(&mut self) {
        if let Some(anchor) = self.pending_restore.as_mut() {
            anchor.resolved = true;
        }
    }

    /// The backward fetch failed or was dropped.
    pub fn cancel_restore(&mut self) {
        self.pending_restore = None;
    }

    /// Layout finished. Returns the offset shift keeping the previously
    /// visible top row in place, computed from content extents rather than
    /// row counts.
    pub fn on_layout_settled(&mut self, viewport: &dyn ViewportObserver) -> Option<ScrollAction> {
        let anchor = self.pending_restore.filter(|anchor| anchor.resolved)?;
        self.pending_restore = None;

        let delta_px = viewport.measure_content_height() - anchor.height_before;
        trace!(delta_px, "re-anchoring after backward pagination");
        (delta_px != 0.0).then_some(ScrollAction::AdjustScrollBy { delta_px })
    }

    /// Scroll instruction for tail growth. Never moves a locked viewport.
    pub fn follow_tail(&self, auto_follow: bool) -> Option<ScrollAction> {
        (auto_follow && !self.scroll_locked).then_some(ScrollAction::ScrollToBottom)
    }

    /// Explicit "jump to latest".
    pub fn jump_to_latest(&mut self) -> ScrollAction {
        self.scroll_locked = false;
        ScrollAction::ScrollToBottom
    }
}
