//! Capability detection and loading strategy selection.
//!
//! Runs once per page. Absence of a capability is a valid answer, never an
//! error: the engine degrades from IntersectionObserver to native lazy
//! loading to polling on scroll and resize.

use serde::{Deserialize, Serialize};

/// Global feature flags as the host platform reports them.
pub trait FeatureProbe {
    fn has_intersection_observer(&self) -> bool;
    fn has_resize_observer(&self) -> bool;
    fn has_native_lazy_loading(&self) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Capabilities {
    pub has_intersection_observer: bool,
    pub has_resize_observer: bool,
    pub has_native_lazy_loading: bool,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            has_intersection_observer: true,
            has_resize_observer: true,
            has_native_lazy_loading: true,
        }
    }
}

/// How elements get noticed as they approach the viewport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Strategy {
    /// IntersectionObserver entries drive loads.
    Observer,
    /// The browser defers loading itself; the engine swaps immediately.
    Native,
    /// Bounding rects are polled against the viewport on scroll/resize.
    Polling,
}

impl Capabilities {
    pub fn strategy(&self) -> Strategy {
        if self.has_intersection_observer {
            Strategy::Observer
        } else if self.has_native_lazy_loading {
            Strategy::Native
        } else {
            Strategy::Polling
        }
    }
}

impl FeatureProbe for Capabilities {
    fn has_intersection_observer(&self) -> bool {
        self.has_intersection_observer
    }

    fn has_resize_observer(&self) -> bool {
        self.has_resize_observer
    }

    fn has_native_lazy_loading(&self) -> bool {
        self.has_native_lazy_loading
    }
}

/// Read the platform's feature flags once.
pub fn detect(probe: &dyn FeatureProbe) -> Capabilities {
    let caps = Capabilities {
        has_intersection_observer: probe.has_intersection_observer(),
        has_resize_observer: probe.has_resize_observer(),
        has_native_lazy_loading: probe.has_native_lazy_loading(),
    };
    log::debug!("capabilities detected: {:?} → {:?}", caps, caps.strategy());
    caps
}
