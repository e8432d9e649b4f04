//! Load execution: swapping placeholders for real resources.
//!
//! The executor performs the swap for one record, waits for the platform
//! to report completion, applies the state classes and emits exactly one
//! [`LoadedEvent`] per call.
//!
//! ## Per-kind behavior
//!
//! | Kind | Swap | Completion |
//! |---|---|---|
//! | Image | `src` (+ `srcset` activation) | `decode()`, else load/error event |
//! | Iframe | `src` from the data attribute | nested document "complete" |
//! | Video | `<source data-src>` → `src`, then `load()` | immediately |
//! | Background | `background-image: url(...)` | load/error of the resource |
//!
//! ## Retry
//!
//! A failed load is retried once when the record's container opted into
//! revalidation. The element's id goes into a checked set before the retry,
//! so a second failure is terminal no matter how often `load` is called.

use crate::context::EngineContext;
use crate::element::{ElementRef, LazyAttribute, LoadFailure, MediaElementHandle, MediaRecord};
use crate::resolver::ResourceSelection;
use crate::types::{ElementId, LoadStatus, LoadedEvent, MediaKind};
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Outcome of one [`LoadExecutor::load`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadResult {
    pub status: LoadStatus,
    pub element: ElementId,
    /// The logical parent (nearest container, or the element itself).
    pub parent: ElementId,
    pub url: Option<String>,
    /// 1, or 2 when the single retry ran.
    pub attempts: u32,
}

/// Aggregate counters a host may poll.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadStats {
    pub loaded: u32,
    pub errored: u32,
    pub retried: u32,
}

impl LoadStats {
    pub fn total(&self) -> u32 {
        self.loaded + self.errored
    }
}

impl fmt::Display for LoadStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.total() == 0 {
            return write!(f, "nothing loaded");
        }
        write!(f, "{} loaded, {} failed", self.loaded, self.errored)?;
        if self.retried > 0 {
            write!(f, " ({} retried)", self.retried)?;
        }
        Ok(())
    }
}

pub struct LoadExecutor {
    ctx: Rc<EngineContext>,
    checked: RefCell<HashSet<ElementId>>,
    stats: Cell<LoadStats>,
    listeners: RefCell<Vec<UnboundedSender<LoadedEvent>>>,
}

impl LoadExecutor {
    pub fn new(ctx: Rc<EngineContext>) -> Self {
        Self {
            ctx,
            checked: RefCell::new(HashSet::new()),
            stats: Cell::new(LoadStats::default()),
            listeners: RefCell::new(Vec::new()),
        }
    }

    /// Receive a [`LoadedEvent`] for every element that settles from now on.
    pub fn subscribe(&self) -> UnboundedReceiver<LoadedEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.borrow_mut().push(tx);
        rx
    }

    pub fn stats(&self) -> LoadStats {
        self.stats.get()
    }

    /// Drop the retry bookkeeping for elements that left the page.
    pub fn forget(&self, ids: &HashSet<ElementId>) {
        self.checked.borrow_mut().retain(|id| !ids.contains(id));
    }

    /// Swap the record's placeholder and wait for the outcome.
    ///
    /// Returns `None` when the element is (or becomes) detached: nothing is
    /// marked and nothing is reported for it.
    pub async fn load(
        &self,
        record: &MediaRecord,
        selection: Option<&ResourceSelection>,
    ) -> Option<LoadResult> {
        let element = &record.element;
        if !element.is_connected() {
            log::debug!("{:?}: detached before load, skipping", element);
            return None;
        }

        let mut attempts = 1;
        let mut outcome = self.attempt(record, selection).await;
        let failure = outcome.as_ref().err().cloned();
        if let Some(err) = failure
            && self.may_retry(record, &err)
        {
            log::warn!("{:?}: {}, revalidating once", element, err);
            self.bump(|s| s.retried += 1);
            attempts += 1;
            outcome = self.attempt(record, selection).await;
        }

        if matches!(outcome, Err(LoadFailure::Detached)) || !element.is_connected() {
            log::debug!("{:?}: detached during load, abandoning", element);
            return None;
        }

        let status = match &outcome {
            Ok(()) => LoadStatus::Success,
            Err(err) => {
                log::warn!("{:?}: {}", element, err);
                LoadStatus::Error
            }
        };
        let parent = logical_parent(&self.ctx, element);
        self.mark(record, &parent, status, selection);

        let result = LoadResult {
            status,
            element: element.id(),
            parent: parent.id(),
            url: selection.map(|s| s.url.clone()),
            attempts,
        };
        self.notify(LoadedEvent {
            element: result.element,
            parent: result.parent,
            status,
            url: result.url.clone(),
        });
        Some(result)
    }

    async fn attempt(
        &self,
        record: &MediaRecord,
        selection: Option<&ResourceSelection>,
    ) -> Result<(), LoadFailure> {
        let element = &record.element;
        let Some(selection) = selection else {
            return Err(LoadFailure::Resource("no resource to load".into()));
        };
        log::debug!("{:?}: loading {}", element, selection.url);

        match record.kind {
            MediaKind::Image => {
                if record.lazy_attribute == LazyAttribute::Srcset {
                    self.activate_srcset(element);
                }
                element.set_attr("src", &selection.url);
                match element.decode() {
                    Some(decoding) => decoding.await,
                    None => element.load_complete().await,
                }
            }
            MediaKind::Iframe => {
                element.set_attr("src", &selection.url);
                element.load_complete().await
            }
            MediaKind::Video => {
                let attr = &self.ctx.config.attributes.src;
                let sources = element.find_all("source");
                if sources.is_empty() {
                    element.set_attr("src", &selection.url);
                }
                for source in &sources {
                    if let Some(url) = source.attr(attr) {
                        source.set_attr("src", &url);
                        source.remove_attr(attr);
                    }
                }
                element.media_load();
                Ok(())
            }
            MediaKind::Background => {
                element.set_style("background-image", Some(&format!("url(\"{}\")", selection.url)));
                element.load_complete().await
            }
        }
    }

    /// Move `data-srcset` into `srcset` on the element and on the
    /// `<source>` siblings of a `<picture>` parent.
    fn activate_srcset(&self, element: &ElementRef) {
        let attr = &self.ctx.config.attributes.srcset;
        let mut targets = vec![Rc::clone(element)];
        if let Some(picture) = element.parent().filter(|p| p.tag_name() == "picture") {
            targets.extend(picture.find_all("source"));
        }
        for target in targets {
            if let Some(srcset) = target.attr(attr) {
                target.set_attr("srcset", &srcset);
                target.remove_attr(attr);
            }
        }
    }

    fn may_retry(&self, record: &MediaRecord, err: &LoadFailure) -> bool {
        record.revalidate
            && *err != LoadFailure::Detached
            && self.checked.borrow_mut().insert(record.id())
    }

    fn mark(
        &self,
        record: &MediaRecord,
        parent: &ElementRef,
        status: LoadStatus,
        selection: Option<&ResourceSelection>,
    ) {
        let classes = &self.ctx.config.classes;
        let attrs = &self.ctx.config.attributes;
        let element = &record.element;
        match status {
            LoadStatus::Success => {
                element.add_class(&classes.success);
                parent.add_class(&classes.parent_success);
                element.remove_attr(&attrs.src);
                element.remove_attr(&attrs.srcset);
                element.remove_class(&classes.lazy);
                if let Some(ratio) = selection.and_then(|s| s.ratio) {
                    apply_ratio(parent.as_ref(), ratio);
                }
                self.bump(|s| s.loaded += 1);
            }
            LoadStatus::Error => {
                element.add_class(&classes.error);
                parent.add_class(&classes.parent_error);
                self.bump(|s| s.errored += 1);
            }
        }
    }

    fn bump(&self, f: impl FnOnce(&mut LoadStats)) {
        let mut stats = self.stats.get();
        f(&mut stats);
        self.stats.set(stats);
    }

    fn notify(&self, event: LoadedEvent) {
        self.listeners
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}

/// The nearest container matching the parent selector, or the element.
pub fn logical_parent(ctx: &EngineContext, element: &ElementRef) -> ElementRef {
    element
        .closest(&ctx.config.classes.parent)
        .unwrap_or_else(|| Rc::clone(element))
}

/// Fluid aspect ratio: the container's bottom padding as a percentage.
pub fn apply_ratio(container: &dyn MediaElementHandle, ratio: f64) {
    container.set_style("padding-bottom", Some(&format!("{}%", ratio)));
}
