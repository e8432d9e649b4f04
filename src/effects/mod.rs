//! Post-load effects.
//!
//! After an element loads successfully the pipeline looks at its markup for
//! effect descriptors and runs them:
//!
//! | Descriptor | Source | Effect |
//! |---|---|---|
//! | Animation | `data-animation` on the element | [`Animator`] |
//! | Blur | `data-b-blur` on `.b-blur` placeholders in the container | [`BlurEffect`] |
//!
//! Descriptors are consumed: each effect clears the data it acted on, so a
//! second run over the same markup finds nothing to do.

pub mod animation;
pub mod blur;
pub mod store;

pub use animation::Animator;
pub use blur::{BlurEffect, ResourceFetcher};
pub use store::{BlurCache, KeyValueStore, MemoryStore, StoreError};

use crate::context::EngineContext;
use crate::element::ElementRef;
use crate::executor::logical_parent;
use crate::types::{ElementId, LoadStatus};
use std::collections::HashSet;
use std::rc::Rc;

/// One effect found in an element's markup.
#[derive(Debug, Clone)]
pub enum EffectDescriptor {
    Animation { name: String },
    Blur { target: ElementRef, url: String },
}

impl EffectDescriptor {
    /// Effects declared for `element` and its container.
    pub fn read(ctx: &EngineContext, element: &ElementRef) -> Vec<EffectDescriptor> {
        let config = &ctx.config;
        let mut found = Vec::new();

        let parent = logical_parent(ctx, element);
        let mut targets = parent.find_all(&format!(".{}", config.classes.blur));
        if parent.has_class(&config.classes.blur) {
            targets.insert(0, Rc::clone(&parent));
        }
        for target in targets {
            if let Some(url) = target.attr(&config.attributes.blur).filter(|u| !u.is_empty()) {
                found.push(EffectDescriptor::Blur { target, url });
            }
        }

        if let Some(name) = element
            .attr(&config.attributes.animation)
            .filter(|n| !n.trim().is_empty())
        {
            found.push(EffectDescriptor::Animation { name });
        }
        found
    }
}

pub struct EffectsPipeline {
    ctx: Rc<EngineContext>,
    animator: Animator,
    blur: Option<BlurEffect>,
}

impl EffectsPipeline {
    /// Animations only. Add blur support with [`with_blur`](Self::with_blur).
    pub fn new(ctx: Rc<EngineContext>) -> Self {
        Self {
            animator: Animator::new(Rc::clone(&ctx)),
            ctx,
            blur: None,
        }
    }

    pub fn with_blur(mut self, blur: BlurEffect) -> Self {
        self.blur = Some(blur);
        self
    }

    /// Run every declared effect for a settled element. Failed loads get
    /// no effects.
    pub async fn run(&self, element: &ElementRef, status: LoadStatus) -> usize {
        if status != LoadStatus::Success {
            return 0;
        }
        let mut applied = 0;
        for descriptor in EffectDescriptor::read(&self.ctx, element) {
            let ran = match &descriptor {
                EffectDescriptor::Blur { target, .. } => match &self.blur {
                    Some(blur) => blur.blur(target).await.is_some(),
                    None => false,
                },
                EffectDescriptor::Animation { name } => {
                    self.animator.animate(element, Some(name)).await
                }
            };
            if ran {
                applied += 1;
            }
        }
        applied
    }

    /// Drop per-element bookkeeping for elements that left the page.
    pub fn forget(&self, ids: &HashSet<ElementId>) {
        self.animator.forget(ids);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::sim::{SimElement, SimFetcher};
    use crate::test_helpers::*;
    use futures::executor::block_on;

    fn blurred_media() -> (Rc<SimElement>, Rc<SimElement>, Rc<SimElement>) {
        let media = SimElement::new(1, "div").with_class("media");
        let placeholder = SimElement::new(2, "img")
            .with_class("b-blur")
            .with_attr("data-b-blur", "thumb.png");
        let img = SimElement::new(3, "img").with_attr("data-animation", "fadeIn");
        SimElement::append(&media, &placeholder);
        SimElement::append(&media, &img);
        (media, placeholder, img)
    }

    #[test]
    fn read_finds_blur_and_animation() {
        let (_media, placeholder, img) = blurred_media();
        let ctx = test_context(EngineConfig::default());
        let found = EffectDescriptor::read(&ctx, &(img as ElementRef));
        assert_eq!(found.len(), 2);
        assert!(matches!(
            &found[0],
            EffectDescriptor::Blur { target, url } if target.id() == placeholder.id() && url == "thumb.png"
        ));
        assert!(matches!(&found[1], EffectDescriptor::Animation { name } if name == "fadeIn"));
    }

    #[test]
    fn run_applies_everything_once() {
        let (_media, placeholder, img) = blurred_media();
        let ctx = test_context(EngineConfig::default());
        let fetcher = Rc::new(SimFetcher::new().with_resource("thumb.png", tiny_png()));
        let pipeline = EffectsPipeline::new(ctx.clone())
            .with_blur(BlurEffect::new(ctx, fetcher, Some(Rc::new(MemoryStore::new()))));
        let handle: ElementRef = img.clone();

        assert_eq!(block_on(pipeline.run(&handle, LoadStatus::Success)), 2);
        assert!(placeholder.attr("src").unwrap().starts_with("data:image/png"));
        assert!(img.has_class("is-b-animated"));

        // Descriptors were consumed
        assert_eq!(block_on(pipeline.run(&handle, LoadStatus::Success)), 0);
    }

    #[test]
    fn errors_get_no_effects() {
        let (_media, placeholder, img) = blurred_media();
        let pipeline = EffectsPipeline::new(test_context(EngineConfig::default()));
        let handle: ElementRef = img.clone();
        assert_eq!(block_on(pipeline.run(&handle, LoadStatus::Error)), 0);
        assert!(placeholder.attr("data-b-blur").is_some());
        assert!(!img.has_class("is-b-animated"));
    }

    #[test]
    fn blur_skipped_without_blur_effect() {
        let (_media, placeholder, img) = blurred_media();
        let pipeline = EffectsPipeline::new(test_context(EngineConfig::default()));
        let handle: ElementRef = img.clone();
        assert_eq!(block_on(pipeline.run(&handle, LoadStatus::Success)), 1);
        assert!(placeholder.attr("src").is_none());
    }
}
