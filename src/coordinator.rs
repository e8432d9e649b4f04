//! Observation coordination.
//!
//! The coordinator owns the registry of tracked elements and decides when
//! each one loads:
//!
//! ```text
//! scan(root) ──► registry (Observed)
//!                   │
//!   observe(entries) / poll()
//!                   │  queue, one frame request per batch
//!                   ▼
//!              on_frame(id) ──► resolve ──► LoadExecutor::load ──► settle
//!                                                       │
//!                                                       └─► EffectsPipeline
//! ```
//!
//! Everything runs on one thread. Loads are spawned onto a [`LocalPool`]
//! the host drives with [`ObservationCoordinator::run_until_stalled`], each
//! wrapped in an abort handle so [`teardown`](ObservationCoordinator::teardown)
//! can abandon them. Timers are host-driven too: resize notifications arm
//! debouncers and [`advance`](ObservationCoordinator::advance) fires them.
//!
//! ## Invariants
//!
//! - An element is registered at most once until it is torn down.
//! - Only elements in the `Observed` state start a load, so a load starts
//!   at most once per registration.
//! - At most one frame request is pending; a batch flushes in delivery order.

use crate::capability::Strategy;
use crate::context::EngineContext;
use crate::effects::EffectsPipeline;
use crate::element::{ElementRef, MediaElementHandle, MediaRecord};
use crate::executor::{self, LoadExecutor, LoadStats};
use crate::resolver::{ElementResolver, ResourceSelection};
use crate::types::{ElementId, LoadStatus, LoadedEvent, MediaKind, ObservationState, RecordState};
use crate::viewport::VisibilityInput;
use futures::channel::mpsc::UnboundedReceiver;
use futures::executor::LocalPool;
use futures::future::{AbortHandle, abortable};
use futures::task::LocalSpawnExt;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::rc::{Rc, Weak};

/// Token for one requested animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

/// The host's `requestAnimationFrame`. The host calls
/// [`ObservationCoordinator::on_frame`] with the id when the frame fires.
pub trait FrameScheduler {
    fn request_frame(&self) -> FrameId;
    fn cancel_frame(&self, id: FrameId);
}

/// One observer notification.
#[derive(Debug, Clone, PartialEq)]
pub struct IntersectionEntry {
    pub target: ElementId,
    pub is_intersecting: bool,
    pub intersection_ratio: f64,
}

/// What the host should pass to its IntersectionObserver.
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    /// Top, right, bottom, left, in pixels.
    pub root_margin: [f64; 4],
    pub thresholds: Vec<f64>,
    /// Scroll container selector, `None` for the viewport.
    pub root: Option<String>,
}

/// Trailing-edge debounce over host-supplied millisecond timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Debounce {
    delay: u64,
    deadline: Option<u64>,
}

impl Debounce {
    pub fn new(delay: u64) -> Self {
        Self {
            delay,
            deadline: None,
        }
    }

    /// (Re)arm: the deadline moves to `now + delay`.
    pub fn trigger(&mut self, now: u64) {
        self.deadline = Some(now + self.delay);
    }

    /// Disarm and report whether the deadline has passed.
    pub fn fire(&mut self, now: u64) -> bool {
        match self.deadline {
            Some(deadline) if now >= deadline => {
                self.deadline = None;
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.deadline.is_some()
    }

    pub fn cancel(&mut self) {
        self.deadline = None;
    }
}

struct Registration {
    record: MediaRecord,
    state: ObservationState,
    /// The root whose scan registered this element.
    scope: ElementId,
    selection: Option<ResourceSelection>,
    abort: Option<AbortHandle>,
}

/// A settled element that is no longer observed.
struct Finished {
    state: RecordState,
    element: Weak<dyn MediaElementHandle>,
}

#[derive(Default)]
struct Registry {
    active: BTreeMap<ElementId, Registration>,
    /// Terminal record states, kept after unregistration.
    finished: HashMap<ElementId, Finished>,
    /// Torn down; reported as `Unobserved` until registered again.
    released: HashSet<ElementId>,
}

pub struct ObservationCoordinator {
    ctx: Rc<EngineContext>,
    resolver: ElementResolver,
    executor: Rc<LoadExecutor>,
    effects: Rc<EffectsPipeline>,
    scheduler: Rc<dyn FrameScheduler>,
    registry: Rc<RefCell<Registry>>,
    seen: HashSet<ElementId>,
    queue: Vec<IntersectionEntry>,
    pending_frame: Option<FrameId>,
    viewport_debounce: Debounce,
    validate_debounce: Debounce,
    pool: LocalPool,
}

impl ObservationCoordinator {
    pub fn new(
        ctx: Rc<EngineContext>,
        resolver: ElementResolver,
        executor: Rc<LoadExecutor>,
        effects: Rc<EffectsPipeline>,
        scheduler: Rc<dyn FrameScheduler>,
    ) -> Self {
        let viewport_debounce = Debounce::new(ctx.config.save_viewport_offset_delay);
        let validate_debounce = Debounce::new(ctx.config.validate_delay);
        log::debug!("coordinator using {:?} strategy", ctx.strategy());
        Self {
            ctx,
            resolver,
            executor,
            effects,
            scheduler,
            registry: Rc::new(RefCell::new(Registry::default())),
            seen: HashSet::new(),
            queue: Vec::new(),
            pending_frame: None,
            viewport_debounce,
            validate_debounce,
            pool: LocalPool::new(),
        }
    }

    /// Default executor and an animation-only effects pipeline.
    pub fn standard(ctx: Rc<EngineContext>, scheduler: Rc<dyn FrameScheduler>) -> Self {
        let executor = Rc::new(LoadExecutor::new(Rc::clone(&ctx)));
        let effects = Rc::new(EffectsPipeline::new(Rc::clone(&ctx)));
        Self::new(ctx, ElementResolver::new(), executor, effects, scheduler)
    }

    pub fn strategy(&self) -> Strategy {
        self.ctx.strategy()
    }

    pub fn observer_options(&self) -> ObserverOptions {
        let config = &self.ctx.config;
        ObserverOptions {
            root_margin: config.root_margin_px(),
            thresholds: config.threshold.values(),
            root: config.container.clone(),
        }
    }

    pub fn subscribe(&self) -> UnboundedReceiver<LoadedEvent> {
        self.executor.subscribe()
    }

    pub fn stats(&self) -> LoadStats {
        self.executor.stats()
    }

    /// `None` for elements never registered. Elements that settled and
    /// were unobserved, or were torn down, are `Unobserved`.
    pub fn observation_state(&self, id: ElementId) -> Option<ObservationState> {
        let registry = self.registry.borrow();
        match registry.active.get(&id) {
            Some(reg) => Some(reg.state),
            None if self.seen.contains(&id)
                || registry.finished.contains_key(&id)
                || registry.released.contains(&id) =>
            {
                Some(ObservationState::Unobserved)
            }
            None => None,
        }
    }

    /// The record state while registered, or the terminal state of a
    /// settled element until it is torn down.
    pub fn record_state(&self, id: ElementId) -> Option<RecordState> {
        let registry = self.registry.borrow();
        registry
            .active
            .get(&id)
            .map(|reg| reg.record.state)
            .or_else(|| registry.finished.get(&id).map(|f| f.state))
    }

    /// The last resolved selection for a registered element.
    pub fn selection(&self, id: ElementId) -> Option<ResourceSelection> {
        self.registry
            .borrow()
            .active
            .get(&id)
            .and_then(|reg| reg.selection.clone())
    }

    /// Number of currently registered elements.
    pub fn registered(&self) -> usize {
        self.registry.borrow().active.len()
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register every unseen element under `root` (and `root` itself) that
    /// matches the selector. Returns how many were registered.
    pub fn scan(&mut self, root: &ElementRef) -> usize {
        let config = &self.ctx.config;
        let strategy = self.ctx.strategy();

        let mut candidates = Vec::new();
        if root
            .closest(&config.selector)
            .is_some_and(|el| el.id() == root.id())
        {
            candidates.push(Rc::clone(root));
        }
        candidates.extend(root.find_all(&config.selector));

        let mut registered = 0;
        let mut eager = Vec::new();
        for element in candidates {
            let id = element.id();
            if !self.seen.insert(id) {
                continue;
            }
            let record = MediaRecord::from_element(element, config);
            let native = strategy == Strategy::Native
                && matches!(record.kind, MediaKind::Image | MediaKind::Iframe);
            if native {
                record.element.set_attr("loading", "lazy");
            }
            if native || record.is_initial {
                eager.push(id);
            }
            let mut registry = self.registry.borrow_mut();
            registry.released.remove(&id);
            registry.active.insert(
                id,
                Registration {
                    record,
                    state: ObservationState::Observed,
                    scope: root.id(),
                    selection: None,
                    abort: None,
                },
            );
            drop(registry);
            registered += 1;
        }
        log::debug!("scan {:?}: {} registered, {} eager", root, registered, eager.len());

        for id in eager {
            self.begin_load(id);
        }
        if self.polls() {
            self.poll();
        }
        self.run_until_stalled();
        registered
    }

    /// Polling drives everything under `Polling`, and under `Native` the
    /// kinds the platform cannot defer (backgrounds, videos).
    fn polls(&self) -> bool {
        matches!(self.ctx.strategy(), Strategy::Polling | Strategy::Native)
    }

    /// Unregister every element inside `root` (or scanned from it), abandon
    /// in-flight loads and drop their queued entries. Returns how many
    /// registrations were removed.
    ///
    /// Membership follows the parent chain, not the selector: settled
    /// elements have already lost the lazy class.
    pub fn teardown(&mut self, root: &ElementRef) -> usize {
        let root_id = root.id();
        let mut inside: HashSet<ElementId> = root
            .find_all(&self.ctx.config.selector)
            .iter()
            .map(|el| el.id())
            .collect();
        inside.insert(root_id);

        let doomed: Vec<ElementId> = {
            let mut registry = self.registry.borrow_mut();
            let doomed: Vec<ElementId> = registry
                .active
                .iter()
                .filter(|(_, reg)| {
                    reg.scope == root_id || is_within(&reg.record.element, root_id)
                })
                .map(|(id, _)| *id)
                .collect();
            for id in &doomed {
                if let Some(abort) = registry.active.remove(id).and_then(|reg| reg.abort) {
                    abort.abort();
                }
            }
            let gone: Vec<ElementId> = registry
                .finished
                .iter()
                .filter(|(_, f)| f.element.upgrade().is_none_or(|el| is_within(&el, root_id)))
                .map(|(id, _)| *id)
                .collect();
            for id in &gone {
                registry.finished.remove(id);
            }
            inside.extend(gone);
            inside.extend(doomed.iter().copied());
            for id in &inside {
                if self.seen.remove(id) {
                    registry.released.insert(*id);
                }
            }
            doomed
        };
        self.executor.forget(&inside);
        self.effects.forget(&inside);

        self.queue.retain(|entry| !doomed.contains(&entry.target));
        if self.queue.is_empty()
            && let Some(frame) = self.pending_frame.take()
        {
            self.scheduler.cancel_frame(frame);
        }
        self.run_until_stalled();
        log::debug!("teardown {:?}: {} unregistered", root, doomed.len());
        doomed.len()
    }

    /// Page unload: abandon everything, forget every element and cancel
    /// the pending frame.
    pub fn unload(&mut self) {
        let removed = std::mem::take(&mut *self.registry.borrow_mut());
        for reg in removed.active.into_values() {
            if let Some(abort) = reg.abort {
                abort.abort();
            }
        }
        let forgotten: HashSet<ElementId> = self.seen.drain().collect();
        self.executor.forget(&forgotten);
        self.effects.forget(&forgotten);
        self.queue.clear();
        if let Some(frame) = self.pending_frame.take() {
            self.scheduler.cancel_frame(frame);
        }
        self.viewport_debounce.cancel();
        self.validate_debounce.cancel();
        self.run_until_stalled();
        log::debug!("unloaded");
    }

    // =========================================================================
    // Visibility
    // =========================================================================

    /// Queue observer entries. The first entry of a batch requests a frame.
    pub fn observe(&mut self, entries: Vec<IntersectionEntry>) {
        if entries.is_empty() {
            return;
        }
        log::trace!("queued {} intersection entries", entries.len());
        self.queue.extend(entries);
        if self.pending_frame.is_none() {
            self.pending_frame = Some(self.scheduler.request_frame());
        }
    }

    /// Flush the batch for `frame`. Stale frame ids are ignored. Returns the
    /// number of loads started.
    pub fn on_frame(&mut self, frame: FrameId) -> usize {
        if self.pending_frame != Some(frame) {
            log::trace!("ignoring stale frame {:?}", frame);
            return 0;
        }
        self.pending_frame = None;

        let batch = std::mem::take(&mut self.queue);
        let mut started = 0;
        for entry in batch {
            if self.should_load(&entry) {
                self.begin_load(entry.target);
                started += 1;
            }
        }
        self.run_until_stalled();
        started
    }

    /// Polling fallback: compare every observed element's bounds against
    /// the viewport rectangle and queue the visible ones.
    pub fn poll(&mut self) {
        let rectangle = self.ctx.tracker.rectangle();
        let container = self.ctx.config.container.as_deref();

        let entries: Vec<IntersectionEntry> = {
            let registry = self.registry.borrow();
            registry
                .active
                .iter()
                .filter(|(_, reg)| reg.state == ObservationState::Observed)
                .filter_map(|(id, reg)| {
                    let element = &reg.record.element;
                    let bounds = element.bounding_rect().filter(|_| element.is_connected())?;
                    if !self.ctx.tracker.is_visible(VisibilityInput::Bounds(bounds), &rectangle) {
                        return None;
                    }
                    // Inside a scroll container the box must also overlap it
                    if let Some(selector) = container
                        && let Some(scroller) = element.parent().and_then(|p| p.closest(selector))
                        && let Some(scroll_rect) = scroller.bounding_rect()
                        && !bounds.overlaps(&scroll_rect)
                    {
                        return None;
                    }
                    Some(IntersectionEntry {
                        target: *id,
                        is_intersecting: true,
                        intersection_ratio: bounds.coverage_by(&rectangle),
                    })
                })
                .collect()
        };
        self.observe(entries);
    }

    // =========================================================================
    // Resize
    // =========================================================================

    /// A window resize at `now` (milliseconds). Arms both debouncers.
    pub fn on_resize(&mut self, now: u64) {
        self.viewport_debounce.trigger(now);
        self.validate_debounce.trigger(now);
    }

    /// Fire whichever debouncers are due at `now`.
    pub fn advance(&mut self, now: u64) {
        let revalidate = self.validate_debounce.fire(now);
        let mut refresh = self.viewport_debounce.fire(now);
        // Revalidation always sees the current window
        if revalidate && self.viewport_debounce.is_armed() {
            self.viewport_debounce.cancel();
            refresh = true;
        }
        if refresh {
            self.ctx.tracker.update_viewport(self.ctx.offset());
        }
        if revalidate {
            self.revalidate();
        }
    }

    /// Re-resolve every registered element against the current snapshot.
    /// Settled elements kept under observation get their ratio refreshed.
    pub fn revalidate(&mut self) {
        let snapshot = self.ctx.tracker.snapshot();
        let mut refreshed = 0;
        {
            let mut registry = self.registry.borrow_mut();
            for reg in registry.active.values_mut() {
                match reg.state {
                    ObservationState::Observed => {
                        reg.selection = self.resolver.resolve(&reg.record, &snapshot);
                    }
                    ObservationState::Settled => {
                        let selection = self.resolver.resolve(&reg.record, &snapshot);
                        if selection != reg.selection
                            && let Some(ratio) = selection.as_ref().and_then(|s| s.ratio)
                        {
                            let parent = executor::logical_parent(&self.ctx, &reg.record.element);
                            executor::apply_ratio(parent.as_ref(), ratio);
                            refreshed += 1;
                        }
                        reg.selection = selection;
                    }
                    ObservationState::Intersecting | ObservationState::Unobserved => {}
                }
            }
        }
        log::debug!("revalidated, {} ratios refreshed", refreshed);
        if self.polls() {
            self.poll();
        }
    }

    /// Drive spawned loads until none can make progress.
    pub fn run_until_stalled(&mut self) {
        self.pool.run_until_stalled();
    }

    // =========================================================================
    // Loading
    // =========================================================================

    fn should_load(&self, entry: &IntersectionEntry) -> bool {
        let registry = self.registry.borrow();
        let Some(reg) = registry.active.get(&entry.target) else {
            return false;
        };
        if reg.state != ObservationState::Observed {
            return false;
        }
        let element = &reg.record.element;
        if !element.is_connected() {
            log::debug!("{:?}: detached, skipping", element);
            return false;
        }
        let input = VisibilityInput::Entry {
            is_intersecting: entry.is_intersecting,
            intersection_ratio: entry.intersection_ratio,
        };
        if !self.ctx.tracker.is_visible(input, &self.ctx.tracker.rectangle()) {
            return false;
        }
        let hidden = element.bounding_rect().is_none_or(|r| r.is_empty());
        if hidden && !self.ctx.config.load_invisible {
            log::debug!("{:?}: hidden, skipping", element);
            return false;
        }
        true
    }

    fn begin_load(&mut self, id: ElementId) {
        let (record, selection) = {
            let mut registry = self.registry.borrow_mut();
            let Some(reg) = registry.active.get_mut(&id) else {
                return;
            };
            if reg.state != ObservationState::Observed {
                return;
            }
            reg.state = ObservationState::Intersecting;
            reg.record.state = RecordState::Loading;
            reg.selection = self.resolver.resolve(&reg.record, &self.ctx.tracker.snapshot());
            (reg.record.clone(), reg.selection.clone())
        };

        let executor = Rc::clone(&self.executor);
        let effects = Rc::clone(&self.effects);
        let registry = Rc::clone(&self.registry);
        let disconnect = self.ctx.config.disconnect;
        let task = async move {
            let Some(result) = executor.load(&record, selection.as_ref()).await else {
                registry.borrow_mut().active.remove(&id);
                return;
            };
            settle(&registry, &record.element, result.status, disconnect);
            effects.run(&record.element, result.status).await;
        };

        let (task, abort) = abortable(task);
        if let Some(reg) = self.registry.borrow_mut().active.get_mut(&id) {
            reg.abort = Some(abort);
        }
        if let Err(e) = self.pool.spawner().spawn_local(async move {
            if task.await.is_err() {
                log::debug!("load for {} abandoned", id);
            }
        }) {
            log::warn!("could not schedule load for {}: {}", id, e);
        }
    }
}

fn settle(
    registry: &RefCell<Registry>,
    element: &ElementRef,
    status: LoadStatus,
    disconnect: bool,
) {
    let id = element.id();
    let state = match status {
        LoadStatus::Success => RecordState::Loaded,
        LoadStatus::Error => RecordState::Errored,
    };
    let mut registry = registry.borrow_mut();
    if disconnect {
        registry.active.remove(&id);
        registry.finished.insert(
            id,
            Finished {
                state,
                element: Rc::downgrade(element),
            },
        );
        log::debug!("{} settled ({}), unobserved", id, status);
    } else if let Some(reg) = registry.active.get_mut(&id) {
        reg.state = ObservationState::Settled;
        reg.record.state = state;
        reg.abort = None;
        log::debug!("{} settled ({})", id, status);
    }
}

/// Whether `element` is `root` or one of its descendants.
fn is_within(element: &ElementRef, root: ElementId) -> bool {
    let mut current = Some(Rc::clone(element));
    while let Some(el) = current {
        if el.id() == root {
            return true;
        }
        current = el.parent();
    }
    false
}
