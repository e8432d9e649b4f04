//! Viewport tracking.
//!
//! The tracker owns the inflated viewport rectangle and the last window
//! snapshot. Every other component reads them through [`ViewportTracker::snapshot`]
//! and [`ViewportTracker::rectangle`]; only the coordinator's resize handler
//! calls [`ViewportTracker::update_viewport`].

use crate::types::Rect;
use std::cell::RefCell;
use std::rc::Rc;

/// Window dimensions as reported by the host.
pub trait WindowMetrics {
    fn inner_width(&self) -> f64;
    fn inner_height(&self) -> f64;
    fn device_pixel_ratio(&self) -> f64 {
        1.0
    }
}

/// Immutable view of the window at one resize tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowSnapshot {
    pub width: f64,
    pub height: f64,
    pub device_pixel_ratio: f64,
    /// The offset-inflated viewport rectangle.
    pub viewport: Rect,
    pub mobile_first: bool,
}

/// What a visibility test looks at.
#[derive(Debug, Clone, Copy)]
pub enum VisibilityInput {
    /// Native/polling strategy: compare geometry ourselves.
    Bounds(Rect),
    /// Observer strategy: trust what the observer reported.
    Entry {
        is_intersecting: bool,
        intersection_ratio: f64,
    },
    /// The node has no measurable geometry (detached, not rendered).
    Detached,
}

#[derive(Debug)]
struct TrackerState {
    snapshot: WindowSnapshot,
}

pub struct ViewportTracker {
    metrics: Rc<dyn WindowMetrics>,
    mobile_first: bool,
    state: RefCell<TrackerState>,
}

impl ViewportTracker {
    /// Build a tracker and compute the initial rectangle with `offset`.
    pub fn new(metrics: Rc<dyn WindowMetrics>, offset: f64, mobile_first: bool) -> Self {
        let snapshot = compute_snapshot(metrics.as_ref(), offset, mobile_first);
        Self {
            metrics,
            mobile_first,
            state: RefCell::new(TrackerState { snapshot }),
        }
    }

    /// The inflated rectangle for the current window, without storing it.
    pub fn init_viewport(&self, offset: f64) -> Rect {
        window_rect(self.metrics.as_ref()).inflate(offset)
    }

    /// Recompute bounds from the current window and store the new snapshot.
    pub fn update_viewport(&self, offset: f64) -> WindowSnapshot {
        let snapshot = compute_snapshot(self.metrics.as_ref(), offset, self.mobile_first);
        self.state.borrow_mut().snapshot = snapshot;
        log::debug!(
            "viewport updated: {}x{} @{}x",
            snapshot.width,
            snapshot.height,
            snapshot.device_pixel_ratio
        );
        snapshot
    }

    pub fn snapshot(&self) -> WindowSnapshot {
        self.state.borrow().snapshot
    }

    pub fn rectangle(&self) -> Rect {
        self.state.borrow().snapshot.viewport
    }

    /// Visibility against `rectangle`, see [`is_visible`].
    pub fn is_visible(&self, input: VisibilityInput, rectangle: &Rect) -> bool {
        is_visible(input, rectangle)
    }
}

/// Whether a target counts as visible.
///
/// Geometry is tested with inclusive edges: a box touching the rectangle's
/// border is visible. Observer entries are trusted as reported.
pub fn is_visible(input: VisibilityInput, rectangle: &Rect) -> bool {
    match input {
        VisibilityInput::Bounds(bounds) => bounds.overlaps(rectangle),
        VisibilityInput::Entry {
            is_intersecting,
            intersection_ratio,
        } => is_intersecting || intersection_ratio > 0.0,
        VisibilityInput::Detached => false,
    }
}

fn window_rect(metrics: &dyn WindowMetrics) -> Rect {
    Rect::new(0.0, 0.0, metrics.inner_height(), metrics.inner_width())
}

fn compute_snapshot(metrics: &dyn WindowMetrics, offset: f64, mobile_first: bool) -> WindowSnapshot {
    WindowSnapshot {
        width: metrics.inner_width(),
        height: metrics.inner_height(),
        device_pixel_ratio: metrics.device_pixel_ratio(),
        viewport: window_rect(metrics).inflate(offset),
        mobile_first,
    }
}
