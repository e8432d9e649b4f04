//! Shared value types used across all engine components.
//!
//! These are plain data: rectangles, identities, lifecycle states and the
//! loaded notification. None of them hold references to host objects, so
//! they can be copied freely between the tracker, resolver, executor and
//! coordinator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable identity token for one element, supplied by the host handle.
///
/// The engine keys every per-element set and map by this id instead of
/// writing marker attributes onto the element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Axis-aligned rectangle in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub top: f64,
    pub left: f64,
    pub bottom: f64,
    pub right: f64,
}

impl Rect {
    pub fn new(top: f64, left: f64, bottom: f64, right: f64) -> Self {
        Self {
            top,
            left,
            bottom,
            right,
        }
    }

    /// Build from an origin and a size, the way layout reports boxes.
    pub fn from_xywh(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self::new(y, x, y + height, x + width)
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    /// A box with no area. Layout reports this for `display: none` content.
    pub fn is_empty(&self) -> bool {
        self.width() <= 0.0 && self.height() <= 0.0
    }

    /// Grow every edge outward by `by` pixels.
    pub fn inflate(&self, by: f64) -> Self {
        Self::new(
            self.top - by,
            self.left - by,
            self.bottom + by,
            self.right + by,
        )
    }

    /// Grow each edge by its own margin (top, right, bottom, left).
    pub fn inflate_by(&self, margins: [f64; 4]) -> Self {
        Self::new(
            self.top - margins[0],
            self.left - margins[3],
            self.bottom + margins[2],
            self.right + margins[1],
        )
    }

    /// Shift vertically, as scrolling the document does to client rects.
    pub fn translate_y(&self, dy: f64) -> Self {
        Self::new(self.top + dy, self.left, self.bottom + dy, self.right)
    }

    /// Inclusive-edge overlap: touching edges count as overlapping.
    pub fn overlaps(&self, other: &Rect) -> bool {
        self.right >= other.left
            && self.bottom >= other.top
            && self.left <= other.right
            && self.top <= other.bottom
    }

    /// Fraction of this rect's area covered by `other`, in `0.0..=1.0`.
    pub fn coverage_by(&self, other: &Rect) -> f64 {
        let area = self.width() * self.height();
        if area <= 0.0 {
            return 0.0;
        }
        let w = (self.right.min(other.right) - self.left.max(other.left)).max(0.0);
        let h = (self.bottom.min(other.bottom) - self.top.max(other.top)).max(0.0);
        (w * h / area).clamp(0.0, 1.0)
    }
}

/// The kind of media an element represents, derived from its tag name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Iframe,
    Video,
    /// Any other element: the resource becomes its CSS background.
    Background,
}

impl MediaKind {
    pub fn from_tag(tag: &str) -> Self {
        match tag.to_ascii_lowercase().as_str() {
            "img" => MediaKind::Image,
            "iframe" => MediaKind::Iframe,
            "video" | "audio" => MediaKind::Video,
            _ => MediaKind::Background,
        }
    }
}

/// Resource lifecycle of one media record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    Pending,
    Loading,
    Loaded,
    Errored,
}

/// Observation lifecycle of one registered element.
///
/// ```text
/// Unobserved → Observed → Intersecting → Settled
///      ↑                                   │
///      └──────── unobserve / detach ───────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservationState {
    Unobserved,
    Observed,
    Intersecting,
    Settled,
}

/// Terminal status of a load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoadStatus {
    Success,
    Error,
}

impl fmt::Display for LoadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadStatus::Success => f.write_str("success"),
            LoadStatus::Error => f.write_str("error"),
        }
    }
}

/// Fire-and-forget notification sent to the host once per settled element.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedEvent {
    pub element: ElementId,
    /// The logical parent that received the container state class.
    pub parent: ElementId,
    pub status: LoadStatus,
    /// The resource URL that was attempted, if one was resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
