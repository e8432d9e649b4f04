//! Simulated window, frame scheduler and resource fetcher.

use crate::coordinator::{FrameId, FrameScheduler};
use crate::effects::ResourceFetcher;
use crate::element::LoadFailure;
use crate::viewport::WindowMetrics;
use futures::future::{self, FutureExt, LocalBoxFuture};
use std::cell::{Cell, RefCell};
use std::collections::HashMap;

#[derive(Debug)]
pub struct SimWindow {
    width: Cell<f64>,
    height: Cell<f64>,
    device_pixel_ratio: Cell<f64>,
}

impl SimWindow {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: Cell::new(width),
            height: Cell::new(height),
            device_pixel_ratio: Cell::new(1.0),
        }
    }

    pub fn with_device_pixel_ratio(self, ratio: f64) -> Self {
        self.device_pixel_ratio.set(ratio);
        self
    }

    pub fn resize(&self, width: f64, height: f64) {
        self.width.set(width);
        self.height.set(height);
    }
}

impl WindowMetrics for SimWindow {
    fn inner_width(&self) -> f64 {
        self.width.get()
    }

    fn inner_height(&self) -> f64 {
        self.height.get()
    }

    fn device_pixel_ratio(&self) -> f64 {
        self.device_pixel_ratio.get()
    }
}

/// Frames fire only when the test (or the page runner) says so.
#[derive(Debug, Default)]
pub struct SimScheduler {
    next: Cell<u64>,
    requested: Cell<usize>,
    pending: RefCell<Vec<FrameId>>,
    cancelled: RefCell<Vec<FrameId>>,
}

impl SimScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total frames ever requested.
    pub fn requested(&self) -> usize {
        self.requested.get()
    }

    pub fn pending(&self) -> Vec<FrameId> {
        self.pending.borrow().clone()
    }

    pub fn cancelled(&self) -> Vec<FrameId> {
        self.cancelled.borrow().clone()
    }

    /// Take every pending frame, as if the next tick fired them.
    pub fn take_due(&self) -> Vec<FrameId> {
        std::mem::take(&mut *self.pending.borrow_mut())
    }
}

impl FrameScheduler for SimScheduler {
    fn request_frame(&self) -> FrameId {
        let id = FrameId(self.next.get() + 1);
        self.next.set(id.0);
        self.requested.set(self.requested.get() + 1);
        self.pending.borrow_mut().push(id);
        id
    }

    fn cancel_frame(&self, id: FrameId) {
        self.pending.borrow_mut().retain(|f| *f != id);
        self.cancelled.borrow_mut().push(id);
    }
}

/// Serves bytes from an in-memory table; unknown URLs fail.
#[derive(Debug, Default)]
pub struct SimFetcher {
    resources: HashMap<String, Vec<u8>>,
    fetches: Cell<usize>,
}

impl SimFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resource(mut self, url: &str, bytes: Vec<u8>) -> Self {
        self.resources.insert(url.to_string(), bytes);
        self
    }

    pub fn fetches(&self) -> usize {
        self.fetches.get()
    }
}

impl ResourceFetcher for SimFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadFailure>> {
        self.fetches.set(self.fetches.get() + 1);
        let result = self
            .resources
            .get(url)
            .cloned()
            .ok_or_else(|| LoadFailure::Resource(format!("{url}: not found")));
        future::ready(result).boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_ids_are_unique_and_cancellable() {
        let s = SimScheduler::new();
        let a = s.request_frame();
        let b = s.request_frame();
        assert_ne!(a, b);
        s.cancel_frame(a);
        assert_eq!(s.pending(), vec![b]);
        assert_eq!(s.cancelled(), vec![a]);
        assert_eq!(s.take_due(), vec![b]);
        assert!(s.pending().is_empty());
        assert_eq!(s.requested(), 2);
    }

    #[test]
    fn fetcher_serves_known_urls() {
        let f = SimFetcher::new().with_resource("a.png", vec![1, 2, 3]);
        assert_eq!(
            futures::executor::block_on(f.fetch("a.png")),
            Ok(vec![1, 2, 3])
        );
        assert!(futures::executor::block_on(f.fetch("b.png")).is_err());
        assert_eq!(f.fetches(), 2);
    }
}
