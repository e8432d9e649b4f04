//! Shared test utilities for the lazymedia test suite.
//!
//! Provides engine contexts over a simulated window, ready-made lazy
//! elements and small binary fixtures.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let ctx = test_context(EngineConfig::default());
//! let img = visible_img(1, "photo.jpg").with_outcome(Ok(()));
//! assert!(img.has_class("b-lazy"));
//! ```

use std::io::Cursor;
use std::rc::Rc;

use crate::capability::Capabilities;
use crate::config::EngineConfig;
use crate::context::EngineContext;
use crate::sim::{SimElement, SimWindow};
use crate::types::Rect;

pub use crate::element::MediaElementHandle;

// =========================================================================
// Contexts
// =========================================================================

/// A context over a 400×800 window with every capability present.
pub fn test_context(config: EngineConfig) -> Rc<EngineContext> {
    EngineContext::new(
        config,
        &Capabilities::default(),
        Rc::new(SimWindow::new(400.0, 800.0)),
    )
}

// =========================================================================
// Elements
// =========================================================================

/// `<img class="b-lazy" src="placeholder.gif" data-src=...>` with no geometry.
pub fn lazy_img(id: u64, data_src: &str) -> Rc<SimElement> {
    SimElement::new(id, "img")
        .with_class("b-lazy")
        .with_attr("src", "placeholder.gif")
        .with_attr("data-src", data_src)
}

/// A lazy image laid out at the top of the page.
pub fn visible_img(id: u64, data_src: &str) -> Rc<SimElement> {
    lazy_img(id, data_src).with_rect(Rect::from_xywh(0.0, 0.0, 100.0, 100.0))
}

// =========================================================================
// Binary fixtures
// =========================================================================

/// A 2×2 PNG.
pub fn tiny_png() -> Vec<u8> {
    let img = image::RgbImage::from_pixel(2, 2, image::Rgb([200, 120, 40]));
    let mut bytes = Vec::new();
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .unwrap();
    bytes
}
