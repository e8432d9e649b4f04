//! The injectable engine context.
//!
//! Configuration, detected capabilities and the viewport tracker live in one
//! explicitly constructed value shared by `Rc` with every component. Two
//! contexts never share state, so independent engines (and tests) can run
//! side by side in one process.

use crate::capability::{self, Capabilities, FeatureProbe, Strategy};
use crate::config::EngineConfig;
use crate::viewport::{ViewportTracker, WindowMetrics};
use std::rc::Rc;

pub struct EngineContext {
    pub config: EngineConfig,
    pub capabilities: Capabilities,
    pub tracker: ViewportTracker,
}

impl EngineContext {
    /// Detect capabilities and compute the initial viewport.
    pub fn new(
        config: EngineConfig,
        probe: &dyn FeatureProbe,
        metrics: Rc<dyn WindowMetrics>,
    ) -> Rc<Self> {
        let capabilities = capability::detect(probe);
        let tracker = ViewportTracker::new(metrics, config.offset as f64, config.mobile_first);
        Rc::new(Self {
            config,
            capabilities,
            tracker,
        })
    }

    pub fn strategy(&self) -> Strategy {
        self.capabilities.strategy()
    }

    /// The offset as the tracker consumes it.
    pub fn offset(&self) -> f64 {
        self.config.offset as f64
    }
}
