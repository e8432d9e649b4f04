//! The element handle trait and the media record built from it.
//!
//! The engine never touches a DOM directly. Everything it needs from an
//! element (geometry, attributes, classes, inline styles, tree queries and
//! the completion futures) goes through [`MediaElementHandle`], which a
//! host implements over its real document and tests implement over the
//! simulated one in [`crate::sim`].

use crate::breakpoint::ResourceDescriptor;
use crate::config::EngineConfig;
use crate::types::{ElementId, MediaKind, RecordState, Rect};
use futures::future::LocalBoxFuture;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// Shared, reference-counted handle. The engine never owns the node.
pub type ElementRef = Rc<dyn MediaElementHandle>;

/// Why a resource did not load.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadFailure {
    #[error("resource failed to load: {0}")]
    Resource(String),
    #[error("element was detached before the load completed")]
    Detached,
}

/// The operations the engine needs from one host element.
///
/// Selectors passed to [`find_all`](Self::find_all) and
/// [`closest`](Self::closest) are simple selector lists: `.class`, `tag`,
/// `[attr]`, comma separated.
pub trait MediaElementHandle {
    fn id(&self) -> ElementId;

    /// Lowercase tag name (`img`, `iframe`, `video`, `source`, `div`, ...).
    fn tag_name(&self) -> String;

    /// Whether the node is still attached to the document.
    fn is_connected(&self) -> bool;

    /// Client rect, or `None` when the node has no measurable geometry.
    fn bounding_rect(&self) -> Option<Rect>;

    fn attr(&self, name: &str) -> Option<String>;
    fn set_attr(&self, name: &str, value: &str);
    fn remove_attr(&self, name: &str);

    fn has_class(&self, class: &str) -> bool;
    fn add_class(&self, class: &str);
    fn remove_class(&self, class: &str);

    /// Set (`Some`) or clear (`None`) one inline style property.
    fn set_style(&self, property: &str, value: Option<&str>);

    /// Descendants matching `selector`, in document order.
    fn find_all(&self, selector: &str) -> Vec<ElementRef>;

    /// This element or its nearest ancestor matching `selector`.
    fn closest(&self, selector: &str) -> Option<ElementRef>;

    /// The direct parent, if any.
    fn parent(&self) -> Option<ElementRef>;

    /// A decode future when the platform supports `decode()` for this
    /// element, `None` otherwise.
    fn decode(&self) -> Option<LocalBoxFuture<'static, Result<(), LoadFailure>>>;

    /// Resolves on the element's `load` or `error` event. For iframes this
    /// is the nested document reaching "complete".
    fn load_complete(&self) -> LocalBoxFuture<'static, Result<(), LoadFailure>>;

    /// Ask a media element to (re)load its sources.
    fn media_load(&self);

    /// Resolves when the `animationend` event for `name` fires.
    fn animation_end(&self, name: &str) -> LocalBoxFuture<'static, ()>;
}

impl fmt::Debug for dyn MediaElementHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} {}>", self.tag_name(), self.id())
    }
}

/// Which attribute the real resource gets written to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LazyAttribute {
    Src,
    Srcset,
}

/// One trackable element and everything the engine parsed from it.
#[derive(Debug, Clone)]
pub struct MediaRecord {
    pub element: ElementRef,
    pub kind: MediaKind,
    pub state: RecordState,
    pub descriptor: ResourceDescriptor,
    /// The element's current source, used when the descriptor yields nothing.
    pub fallback: Option<String>,
    pub lazy_attribute: LazyAttribute,
    /// The owning container allows one retry after a failure.
    pub revalidate: bool,
    /// First item of a slider-like sequence: loaded eagerly.
    pub is_initial: bool,
}

impl MediaRecord {
    /// Build a record from markup. Malformed descriptor data is logged and
    /// becomes an empty breakpoint map.
    pub fn from_element(element: ElementRef, config: &EngineConfig) -> Self {
        let attrs = &config.attributes;
        let kind = MediaKind::from_tag(&element.tag_name());
        let descriptor = match element.attr(&attrs.src) {
            Some(raw) => ResourceDescriptor::parse(&raw).unwrap_or_else(|e| {
                log::warn!(
                    "{:?}: ignoring malformed {} data: {}",
                    element,
                    attrs.src,
                    e
                );
                ResourceDescriptor::empty()
            }),
            None => ResourceDescriptor::empty(),
        };
        let has_srcset = element.attr(&attrs.srcset).is_some()
            || element
                .parent()
                .filter(|p| p.tag_name() == "picture")
                .is_some_and(|p| !p.find_all(&format!("[{}]", attrs.srcset)).is_empty());
        let fallback = match kind {
            MediaKind::Background => None,
            _ => element.attr("src"),
        };
        let revalidate = element.closest(&config.classes.revalidate).is_some();
        let is_initial = element.attr(&attrs.initial).is_some();

        Self {
            element,
            kind,
            state: RecordState::Pending,
            descriptor,
            fallback,
            lazy_attribute: if has_srcset {
                LazyAttribute::Srcset
            } else {
                LazyAttribute::Src
            },
            revalidate,
            is_initial,
        }
    }

    pub fn id(&self) -> ElementId {
        self.element.id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimElement;

    #[test]
    fn record_from_static_image() {
        let img = SimElement::new(1, "img")
            .with_class("b-lazy")
            .with_attr("src", "placeholder.gif")
            .with_attr("data-src", "real.jpg");
        let record = MediaRecord::from_element(img, &EngineConfig::default());
        assert_eq!(record.kind, MediaKind::Image);
        assert_eq!(record.state, RecordState::Pending);
        assert_eq!(
            record.descriptor,
            ResourceDescriptor::Static("real.jpg".into())
        );
        assert_eq!(record.fallback.as_deref(), Some("placeholder.gif"));
        assert_eq!(record.lazy_attribute, LazyAttribute::Src);
        assert!(!record.revalidate);
        assert!(!record.is_initial);
    }

    #[test]
    fn malformed_breakpoints_become_empty_map() {
        let img = SimElement::new(1, "img").with_attr("data-src", "{not json");
        let record = MediaRecord::from_element(img, &EngineConfig::default());
        assert!(record.descriptor.is_empty());
    }

    #[test]
    fn record_flags_from_markup() {
        let container = SimElement::new(1, "div").with_class("b-revalidate");
        let img = SimElement::new(2, "img")
            .with_attr("data-srcset", "a.jpg 1x, b.jpg 2x")
            .with_attr("data-b-initial", "");
        SimElement::append(&container, &img);

        let record = MediaRecord::from_element(img, &EngineConfig::default());
        assert!(record.revalidate);
        assert!(record.is_initial);
        assert_eq!(record.lazy_attribute, LazyAttribute::Srcset);
    }

    #[test]
    fn picture_sources_activate_srcset() {
        let picture = SimElement::new(1, "picture");
        let source = SimElement::new(2, "source").with_attr("data-srcset", "a.webp");
        let img = SimElement::new(3, "img").with_attr("data-src", "a.jpg");
        SimElement::append(&picture, &source);
        SimElement::append(&picture, &img);

        let record = MediaRecord::from_element(img, &EngineConfig::default());
        assert_eq!(record.lazy_attribute, LazyAttribute::Srcset);
    }

    #[test]
    fn background_has_no_fallback() {
        let div = SimElement::new(1, "div")
            .with_attr("src", "ignored")
            .with_attr("data-src", "bg.jpg");
        let record = MediaRecord::from_element(div, &EngineConfig::default());
        assert_eq!(record.kind, MediaKind::Background);
        assert_eq!(record.fallback, None);
    }
}
