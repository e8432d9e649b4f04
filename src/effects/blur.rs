//! Blur placeholders.
//!
//! A placeholder element names a tiny preview image in its blur attribute.
//! The preview is fetched, decoded and re-encoded as a PNG data URI, which
//! is cached under the placeholder id so later page views skip the fetch.
//! If anything goes wrong the original URL is applied as-is and nothing is
//! cached.
//!
//! Placeholder ids come from the id attribute when present, otherwise from
//! the first 16 hex digits of the URL's SHA-256.

use super::store::{BlurCache, KeyValueStore};
use crate::context::EngineContext;
use crate::element::{ElementRef, LoadFailure};
use crate::types::MediaKind;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use futures::future::LocalBoxFuture;
use sha2::{Digest, Sha256};
use std::io::Cursor;
use std::rc::Rc;
use thiserror::Error;

/// Fetches raw bytes for a URL.
pub trait ResourceFetcher {
    fn fetch(&self, url: &str) -> LocalBoxFuture<'static, Result<Vec<u8>, LoadFailure>>;
}

#[derive(Error, Debug)]
pub enum BlurError {
    #[error("fetch failed: {0}")]
    Fetch(#[from] LoadFailure),
    #[error("decode failed: {0}")]
    Image(#[from] image::ImageError),
}

pub struct BlurEffect {
    ctx: Rc<EngineContext>,
    fetcher: Rc<dyn ResourceFetcher>,
    cache: Option<BlurCache>,
}

impl BlurEffect {
    /// A cache is only kept when the config enables it and a store exists.
    pub fn new(
        ctx: Rc<EngineContext>,
        fetcher: Rc<dyn ResourceFetcher>,
        store: Option<Rc<dyn KeyValueStore>>,
    ) -> Self {
        let blur = &ctx.config.blur;
        let cache = store
            .filter(|_| blur.enabled)
            .map(|s| BlurCache::new(s, blur.store_key.clone(), blur.restore));
        Self {
            ctx,
            fetcher,
            cache,
        }
    }

    /// Apply the element's blur placeholder. Returns the applied source, or
    /// `None` when the element has no (or no longer has) blur data.
    pub async fn blur(&self, element: &ElementRef) -> Option<String> {
        let attrs = &self.ctx.config.attributes;
        let url = element.attr(&attrs.blur).filter(|u| !u.is_empty())?;
        let id = element
            .attr(&attrs.blur_id)
            .unwrap_or_else(|| blur_id(&url));

        let cached = self.cache.as_ref().and_then(|c| c.get(&id));
        let src = match cached {
            Some(uri) => {
                log::debug!("{:?}: blur {} from cache", element, id);
                uri
            }
            None => match self.render(&url).await {
                Ok(uri) => {
                    if let Some(cache) = &self.cache {
                        cache.put(&id, &uri);
                    }
                    uri
                }
                Err(e) => {
                    log::warn!("{:?}: blur {} unavailable, using original: {}", element, url, e);
                    url.clone()
                }
            },
        };

        match MediaKind::from_tag(&element.tag_name()) {
            MediaKind::Background => {
                element.set_style("background-image", Some(&format!("url(\"{}\")", src)));
            }
            _ => element.set_attr("src", &src),
        }
        element.remove_attr(&attrs.blur);
        Some(src)
    }

    async fn render(&self, url: &str) -> Result<String, BlurError> {
        let bytes = self.fetcher.fetch(url).await?;
        Ok(to_data_uri(&bytes)?)
    }
}

/// Placeholder id derived from the URL.
pub fn blur_id(url: &str) -> String {
    let digest = Sha256::digest(url.as_bytes());
    format!("{:x}", digest)[..16].to_string()
}

/// Decode any supported image and re-encode it as a PNG data URI.
pub fn to_data_uri(bytes: &[u8]) -> Result<String, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let mut png = Vec::new();
    img.write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)?;
    Ok(format!("data:image/png;base64,{}", STANDARD.encode(&png)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::effects::store::MemoryStore;
    use crate::sim::{SimElement, SimFetcher};
    use crate::test_helpers::*;
    use futures::executor::block_on;

    fn effect(fetcher: &Rc<SimFetcher>, store: &Rc<MemoryStore>) -> BlurEffect {
        BlurEffect::new(
            test_context(EngineConfig::default()),
            fetcher.clone(),
            Some(store.clone()),
        )
    }

    #[test]
    fn id_is_stable_sha_prefix() {
        let id = blur_id("thumb.jpg");
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(id, blur_id("thumb.jpg"));
        assert_ne!(id, blur_id("other.jpg"));
    }

    #[test]
    fn data_uri_from_png() {
        let uri = to_data_uri(&tiny_png()).unwrap();
        assert!(uri.starts_with("data:image/png;base64,"));
    }

    #[test]
    fn data_uri_rejects_garbage() {
        assert!(to_data_uri(b"definitely not an image").is_err());
    }

    #[test]
    fn blur_fetches_encodes_and_caches() {
        let fetcher = Rc::new(SimFetcher::new().with_resource("thumb.png", tiny_png()));
        let store = Rc::new(MemoryStore::new());
        let fx = effect(&fetcher, &store);
        let el = SimElement::new(1, "img").with_attr("data-b-blur", "thumb.png");

        let applied = block_on(fx.blur(&(el.clone() as ElementRef))).unwrap();
        assert!(applied.starts_with("data:image/png;base64,"));
        assert_eq!(el.attr("src"), Some(applied.clone()));
        assert!(el.attr("data-b-blur").is_none(), "blur data is consumed");

        let cache = BlurCache::new(store.clone(), "lazymedia.blur", true);
        assert_eq!(cache.get(&blur_id("thumb.png")), Some(applied));
    }

    #[test]
    fn cached_entry_skips_fetch() {
        let fetcher = Rc::new(SimFetcher::new());
        let store = Rc::new(MemoryStore::new());
        BlurCache::new(store.clone(), "lazymedia.blur", true).put("hero", "data:cached");
        let fx = effect(&fetcher, &store);
        let el = SimElement::new(1, "img")
            .with_attr("data-b-blur", "thumb.png")
            .with_attr("data-b-id", "hero");

        let applied = block_on(fx.blur(&(el.clone() as ElementRef)));
        assert_eq!(applied.as_deref(), Some("data:cached"));
        assert_eq!(fetcher.fetches(), 0);
    }

    #[test]
    fn failure_falls_back_to_original_url_uncached() {
        let fetcher = Rc::new(SimFetcher::new());
        let store = Rc::new(MemoryStore::new());
        let fx = effect(&fetcher, &store);
        let el = SimElement::new(1, "div").with_attr("data-b-blur", "missing.png");

        let applied = block_on(fx.blur(&(el.clone() as ElementRef)));
        assert_eq!(applied.as_deref(), Some("missing.png"));
        assert_eq!(
            el.style("background-image").as_deref(),
            Some("url(\"missing.png\")")
        );
        assert!(store.get_item("lazymedia.blur").is_none());
    }

    #[test]
    fn no_blur_data_is_a_no_op() {
        let fx = effect(&Rc::new(SimFetcher::new()), &Rc::new(MemoryStore::new()));
        let el = SimElement::new(1, "img");
        assert!(block_on(fx.blur(&(el.clone() as ElementRef))).is_none());
        assert!(el.attr("src").is_none());
    }
}
