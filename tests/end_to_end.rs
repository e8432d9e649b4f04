//! End-to-end scenarios through the public API and the simulated host.
//!
//! Each test builds a full engine (context, coordinator, executor, effects)
//! over `lazymedia::sim` and drives it the way a host page would: scan,
//! observer entries, animation frames, resize ticks and teardown.

use futures::executor::block_on;
use lazymedia::capability::Capabilities;
use lazymedia::config::{self, EngineConfig};
use lazymedia::context::EngineContext;
use lazymedia::coordinator::{IntersectionEntry, ObservationCoordinator};
use lazymedia::effects::{Animator, BlurCache, KeyValueStore, StoreError};
use lazymedia::element::{ElementRef, LoadFailure, MediaElementHandle};
use lazymedia::sim::{Mutation, SimElement, SimPage, SimScheduler, SimWindow};
use lazymedia::types::{ElementId, LoadStatus, ObservationState, Rect, RecordState};
use std::cell::Cell;
use std::rc::Rc;

struct Page {
    coordinator: ObservationCoordinator,
    scheduler: Rc<SimScheduler>,
    body: Rc<SimElement>,
}

fn page(config: EngineConfig, width: f64) -> Page {
    let window = Rc::new(SimWindow::new(width, 800.0));
    let ctx = EngineContext::new(config, &Capabilities::default(), window);
    let scheduler = Rc::new(SimScheduler::new());
    Page {
        coordinator: ObservationCoordinator::standard(ctx, scheduler.clone()),
        scheduler,
        body: SimElement::new(0, "body"),
    }
}

impl Page {
    fn root(&self) -> ElementRef {
        self.body.clone()
    }

    fn scan(&mut self) -> usize {
        let root = self.root();
        self.coordinator.scan(&root)
    }

    fn intersect(&mut self, targets: &[&Rc<SimElement>]) {
        let entries = targets
            .iter()
            .map(|t| IntersectionEntry {
                target: t.id(),
                is_intersecting: true,
                intersection_ratio: 1.0,
            })
            .collect();
        self.coordinator.observe(entries);
    }

    fn tick(&mut self) -> usize {
        self.scheduler
            .take_due()
            .into_iter()
            .map(|frame| self.coordinator.on_frame(frame))
            .sum()
    }
}

fn in_view() -> Rect {
    Rect::from_xywh(0.0, 0.0, 400.0, 300.0)
}

// =========================================================================
// Full lifecycle
// =========================================================================

#[test]
fn breakpoint_image_loads_end_to_end() {
    let config = EngineConfig {
        disconnect: false,
        ..EngineConfig::default()
    };
    let mut p = page(config, 400.0);
    let img = SimElement::new(1, "img")
        .with_class("b-lazy")
        .with_attr("src", "placeholder.gif")
        .with_attr("data-src", r#"{"320":{"url":"a.jpg"},"768":{"url":"b.jpg"}}"#)
        .with_rect(in_view())
        .with_outcome(Ok(()));
    SimElement::append(&p.body, &img);
    let mut events = p.coordinator.subscribe();

    assert_eq!(p.scan(), 1);
    p.intersect(&[&img]);
    assert_eq!(p.tick(), 1);

    assert_eq!(img.attr("src").as_deref(), Some("b.jpg"));
    assert!(img.has_class("b-loaded"));
    assert!(img.attr("data-src").is_none());
    assert_eq!(
        p.coordinator.observation_state(img.id()),
        Some(ObservationState::Settled)
    );
    assert_eq!(p.coordinator.record_state(img.id()), Some(RecordState::Loaded));

    let event = events.try_recv().unwrap();
    assert_eq!(event.element, img.id());
    assert_eq!(event.status, LoadStatus::Success);
    assert!(events.try_recv().is_err(), "exactly one loaded event");
}

#[test]
fn picture_in_media_container() {
    let mut p = page(EngineConfig::default(), 1024.0);
    let media = SimElement::new(1, "div").with_class("media");
    let picture = SimElement::new(2, "picture");
    let source = SimElement::new(3, "source").with_attr("data-srcset", "hero.webp");
    let img = SimElement::new(4, "img")
        .with_class("b-lazy")
        .with_attr("data-src", "hero.jpg")
        .with_rect(in_view())
        .with_decode()
        .with_outcome(Ok(()));
    SimElement::append(&p.body, &media);
    SimElement::append(&media, &picture);
    SimElement::append(&picture, &source);
    SimElement::append(&picture, &img);

    p.scan();
    p.intersect(&[&img]);
    p.tick();

    assert_eq!(source.attr("srcset").as_deref(), Some("hero.webp"));
    assert_eq!(img.attr("src").as_deref(), Some("hero.jpg"));
    assert!(media.has_class("is-b-loaded"));
    assert_eq!(img.decode_calls(), 1);
}

// =========================================================================
// Retry
// =========================================================================

#[test]
fn revalidating_container_retries_once_then_errors() {
    let mut p = page(EngineConfig::default(), 400.0);
    let slider = SimElement::new(1, "div").with_class("b-revalidate");
    let img = SimElement::new(2, "img")
        .with_class("b-lazy")
        .with_attr("data-src", "flaky.jpg")
        .with_rect(in_view())
        .with_outcome(Err(LoadFailure::Resource("reset".into())))
        .with_outcome(Err(LoadFailure::Resource("reset".into())))
        .with_outcome(Ok(()));
    SimElement::append(&p.body, &slider);
    SimElement::append(&slider, &img);
    let mut events = p.coordinator.subscribe();

    p.scan();
    p.intersect(&[&img]);
    p.tick();
    // Further entries for the same element change nothing
    p.intersect(&[&img]);
    p.tick();

    assert_eq!(img.load_calls(), 2);
    assert!(img.has_class("b-error"));
    assert_eq!(p.coordinator.stats().retried, 1);
    assert_eq!(p.coordinator.stats().errored, 1);
    assert_eq!(events.try_recv().unwrap().status, LoadStatus::Error);
    assert!(events.try_recv().is_err());
}

// =========================================================================
// Teardown
// =========================================================================

#[test]
fn batch_then_teardown_delivers_nothing() {
    let mut p = page(EngineConfig::default(), 400.0);
    let imgs: Vec<Rc<SimElement>> = (1..=5)
        .map(|i| {
            let img = SimElement::new(i, "img")
                .with_class("b-lazy")
                .with_attr("data-src", &format!("{i}.jpg"))
                .with_rect(in_view())
                .with_outcome(Ok(()));
            SimElement::append(&p.body, &img);
            img
        })
        .collect();
    let mut events = p.coordinator.subscribe();

    p.scan();
    let targets: Vec<&Rc<SimElement>> = imgs.iter().collect();
    p.intersect(&targets);
    let root = p.root();
    p.coordinator.teardown(&root);

    assert_eq!(p.tick(), 0);
    assert!(p.scheduler.pending().is_empty());
    assert!(events.try_recv().is_err());
    for img in &imgs {
        assert!(img.attr("src").is_none());
        assert!(!img.has_class("b-loaded"));
    }
}

#[test]
fn detached_element_is_skipped_silently() {
    let mut p = page(EngineConfig::default(), 400.0);
    let img = SimElement::new(1, "img")
        .with_class("b-lazy")
        .with_attr("data-src", "gone.jpg")
        .with_rect(in_view());
    SimElement::append(&p.body, &img);
    p.scan();
    p.intersect(&[&img]);
    img.detach();

    assert_eq!(p.tick(), 0);
    assert!(img.mutations().is_empty());
}

// =========================================================================
// Effects
// =========================================================================

#[test]
fn animation_applies_once() {
    let ctx = EngineContext::new(
        EngineConfig::default(),
        &Capabilities::default(),
        Rc::new(SimWindow::new(400.0, 800.0)),
    );
    let animator = Animator::new(ctx);
    let el = SimElement::new(1, "img").with_attr("data-animation", "fadeIn");
    let handle: ElementRef = el.clone();

    assert!(block_on(animator.animate(&handle, None)));
    assert!(!block_on(animator.animate(&handle, None)));

    let added = el
        .mutations()
        .into_iter()
        .filter(|m| *m == Mutation::AddClass("fadeIn".into()))
        .count();
    assert_eq!(added, 1);
    assert!(el.has_class("is-b-animated"));
}

/// A store whose every write exceeds the quota.
#[derive(Default)]
struct FullStore {
    writes: Cell<u32>,
    removes: Cell<u32>,
}

impl KeyValueStore for FullStore {
    fn get_item(&self, _key: &str) -> Option<String> {
        None
    }

    fn set_item(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        self.writes.set(self.writes.get() + 1);
        Err(StoreError::QuotaExceeded)
    }

    fn remove_item(&self, _key: &str) {
        self.removes.set(self.removes.get() + 1);
    }
}

#[test]
fn quota_failure_retries_once_and_is_swallowed() {
    let store = Rc::new(FullStore::default());
    BlurCache::new(store.clone(), "blur", true).put("id", "data:x");
    assert_eq!(store.removes.get(), 1);
    assert_eq!(store.writes.get(), 2);

    let store = Rc::new(FullStore::default());
    BlurCache::new(store.clone(), "blur", false).put("id", "data:x");
    assert_eq!(store.removes.get(), 1);
    assert_eq!(store.writes.get(), 1);
}

// =========================================================================
// Page fixtures
// =========================================================================

#[test]
fn fixture_with_directory_config() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::write(
        dir.path().join(config::CONFIG_FILENAME),
        "offset = 0\n",
    )
    .unwrap();
    let page_path = dir.path().join("page.json");
    std::fs::write(
        &page_path,
        r#"{
            "window": {"width": 400, "height": 800},
            "settings": {"mobileFirst": true},
            "elements": [
                {"tag": "img", "classes": ["b-lazy"],
                 "attrs": {"data-src": "{\"320\": \"a.jpg\", \"768\": \"b.jpg\"}"},
                 "rect": {"x": 0, "y": 0, "width": 400, "height": 300}}
            ]
        }"#,
    )
    .unwrap();

    let base = config::merge_toml(
        config::stock_defaults_value(),
        config::load_raw_config(dir.path()).unwrap().unwrap(),
    );
    let sim = SimPage::load(&page_path).unwrap();
    let engine_config = sim.config(base).unwrap();
    assert_eq!(engine_config.offset, 0);
    assert!(engine_config.mobile_first);

    let report = sim.run(engine_config);
    // Mobile-first picks the 320 entry at 400px
    let img = report
        .elements
        .iter()
        .find(|e| e.id == ElementId(1))
        .unwrap();
    assert_eq!(img.src.as_deref(), Some("a.jpg"));
    assert_eq!(img.record, Some(RecordState::Loaded));
}

#[test]
fn demo_fixtures_parse() {
    let demos = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("demos");
    for name in ["gallery.json", "polling.json"] {
        let sim = SimPage::load(&demos.join(name)).unwrap();
        let config = sim.config(config::stock_defaults_value()).unwrap();
        let reports = sim.inspect(&config);
        assert!(!reports.is_empty(), "{name}");
    }
}
