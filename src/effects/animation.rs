//! CSS animation trigger.
//!
//! Adds the animation classes, mirrors the timing data attributes onto
//! inline styles, waits for `animationend`, then removes everything it
//! injected and leaves the "animated" marker class behind.

use crate::context::EngineContext;
use crate::element::ElementRef;
use crate::types::ElementId;
use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

/// Data attribute suffix → inline style property.
const TIMING: [(&str, &str); 3] = [
    ("duration", "animation-duration"),
    ("delay", "animation-delay"),
    ("iteration-count", "animation-iteration-count"),
];

pub struct Animator {
    ctx: Rc<EngineContext>,
    animated: RefCell<HashSet<(ElementId, String)>>,
}

impl Animator {
    pub fn new(ctx: Rc<EngineContext>) -> Self {
        Self {
            ctx,
            animated: RefCell::new(HashSet::new()),
        }
    }

    /// Run the element's animation once. `name` overrides the animation
    /// attribute. Returns whether an animation ran.
    pub async fn animate(&self, element: &ElementRef, name: Option<&str>) -> bool {
        let classes = &self.ctx.config.classes;
        let prefix = &self.ctx.config.attributes.animation;

        let Some(name) = name
            .map(str::to_string)
            .or_else(|| element.attr(prefix))
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
        else {
            return false;
        };
        if !self.animated.borrow_mut().insert((element.id(), name.clone())) {
            log::debug!("{:?}: {} already applied", element, name);
            return false;
        }

        element.add_class(&classes.animated);
        element.add_class(&name);
        for (suffix, property) in TIMING {
            if let Some(value) = element.attr(&format!("{prefix}-{suffix}")) {
                element.set_style(property, Some(&value));
            }
        }

        element.animation_end(&name).await;

        element.remove_class(&classes.animated);
        element.remove_class(&name);
        for (suffix, property) in TIMING {
            element.set_style(property, None);
            element.remove_attr(&format!("{prefix}-{suffix}"));
        }
        element.remove_attr(prefix);
        element.add_class(&classes.animated_marker);
        log::debug!("{:?}: animation {} finished", element, name);
        true
    }

    pub fn forget(&self, ids: &HashSet<ElementId>) {
        self.animated.borrow_mut().retain(|(id, _)| !ids.contains(id));
    }
}
