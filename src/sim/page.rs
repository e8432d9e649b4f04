//! JSON page fixtures and the scenario runner behind `lazymedia simulate`.
//!
//! ```json
//! {
//!   "window": {"width": 400, "height": 800, "device_pixel_ratio": 1},
//!   "capabilities": {"has_intersection_observer": true},
//!   "settings": {"rootMargin": "0px", "disconnect": true},
//!   "elements": [
//!     {"tag": "div", "classes": ["media"], "children": [
//!       {"tag": "img", "classes": ["b-lazy"],
//!        "attrs": {"src": "placeholder.gif", "data-src": "photo.jpg"},
//!        "rect": {"x": 0, "y": 0, "width": 400, "height": 300},
//!        "outcomes": ["success"]}
//!     ]}
//!   ],
//!   "scroll": [600, 600]
//! }
//! ```
//!
//! Elements without `outcomes` load successfully. An empty list leaves the
//! load pending. Elements without `rect` have no geometry and count as
//! hidden. `resources` maps URLs to base64 bytes for the blur fetcher.

use super::element::SimElement;
use super::host::{SimFetcher, SimScheduler, SimWindow};
use crate::breakpoint::ResourceDescriptor;
use crate::capability::{Capabilities, Strategy};
use crate::config::{self, ConfigError, EngineConfig};
use crate::context::EngineContext;
use crate::coordinator::{IntersectionEntry, ObservationCoordinator, ObserverOptions};
use crate::effects::{BlurEffect, EffectsPipeline, KeyValueStore, MemoryStore};
use crate::element::{ElementRef, LoadFailure, MediaElementHandle};
use crate::executor::{LoadExecutor, LoadStats};
use crate::resolver::ElementResolver;
use crate::types::{ElementId, LoadedEvent, ObservationState, Rect, RecordState};
use crate::viewport::WindowMetrics;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SimError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid page fixture: {0}")]
    Json(#[from] serde_json::Error),
    #[error("resource {url}: invalid base64: {source}")]
    Resource {
        url: String,
        source: base64::DecodeError,
    },
    #[error(transparent)]
    Config(#[from] ConfigError),
}

// =========================================================================
// Fixture format
// =========================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PageFixture {
    pub window: WindowFixture,
    #[serde(default)]
    pub capabilities: Capabilities,
    #[serde(default)]
    pub settings: Option<serde_json::Value>,
    pub elements: Vec<ElementFixture>,
    #[serde(default)]
    pub scroll: Vec<f64>,
    #[serde(default)]
    pub resources: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WindowFixture {
    pub width: f64,
    pub height: f64,
    #[serde(default = "default_pixel_ratio")]
    pub device_pixel_ratio: f64,
}

fn default_pixel_ratio() -> f64 {
    1.0
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ElementFixture {
    pub tag: String,
    #[serde(default)]
    pub classes: Vec<String>,
    #[serde(default)]
    pub attrs: BTreeMap<String, String>,
    #[serde(default)]
    pub rect: Option<RectFixture>,
    #[serde(default)]
    pub outcomes: Option<Vec<OutcomeFixture>>,
    #[serde(default)]
    pub decode: bool,
    #[serde(default)]
    pub children: Vec<ElementFixture>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RectFixture {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeFixture {
    Success,
    Error,
}

// =========================================================================
// Built page
// =========================================================================

/// A fixture turned into a live simulated document.
pub struct SimPage {
    pub root: Rc<SimElement>,
    pub window: Rc<SimWindow>,
    pub capabilities: Capabilities,
    pub settings: Option<serde_json::Value>,
    pub scroll: Vec<f64>,
    resources: BTreeMap<String, Vec<u8>>,
}

/// One scripted step and how many loads it started.
#[derive(Debug, Clone, Serialize)]
pub struct StepReport {
    pub label: String,
    pub started: usize,
}

/// Final state of one lazy element.
#[derive(Debug, Clone, Serialize)]
pub struct ElementReport {
    pub id: ElementId,
    pub tag: String,
    pub record: Option<RecordState>,
    pub observation: Option<ObservationState>,
    pub src: Option<String>,
    pub classes: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub strategy: Strategy,
    pub registered: usize,
    pub steps: Vec<StepReport>,
    pub events: Vec<LoadedEvent>,
    pub elements: Vec<ElementReport>,
    pub stats: LoadStats,
}

/// Descriptor check result for one lazy element.
#[derive(Debug, Clone)]
pub struct DescriptorReport {
    pub id: ElementId,
    pub tag: String,
    pub raw: Option<String>,
    pub result: Result<ResourceDescriptor, String>,
}

impl SimPage {
    pub fn load(path: &Path) -> Result<Self, SimError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self, SimError> {
        let fixture: PageFixture = serde_json::from_str(json)?;
        Self::from_fixture(fixture)
    }

    pub fn from_fixture(fixture: PageFixture) -> Result<Self, SimError> {
        let window = Rc::new(
            SimWindow::new(fixture.window.width, fixture.window.height)
                .with_device_pixel_ratio(fixture.window.device_pixel_ratio),
        );
        let root = SimElement::new(0, "body").with_rect(Rect::from_xywh(
            0.0,
            0.0,
            fixture.window.width,
            fixture.window.height,
        ));
        let mut next_id = 1;
        for element in &fixture.elements {
            build(&root, element, &mut next_id);
        }

        let mut resources = BTreeMap::new();
        for (url, encoded) in fixture.resources {
            let bytes = STANDARD
                .decode(encoded.trim())
                .map_err(|source| SimError::Resource {
                    url: url.clone(),
                    source,
                })?;
            resources.insert(url, bytes);
        }

        Ok(Self {
            root,
            window,
            capabilities: fixture.capabilities,
            settings: fixture.settings,
            scroll: fixture.scroll,
            resources,
        })
    }

    /// The page's settings layered over `base` (stock defaults plus any
    /// directory config).
    pub fn config(&self, base: toml::Value) -> Result<EngineConfig, ConfigError> {
        let overlay = self
            .settings
            .as_ref()
            .map(config::settings_overlay)
            .transpose()?;
        config::resolve_config(base, overlay)
    }

    /// Every node in the page below the synthetic `<body>`.
    pub fn nodes(&self) -> Vec<Rc<SimElement>> {
        self.root.descendants_and_self().into_iter().skip(1).collect()
    }

    pub fn find(&self, id: ElementId) -> Option<Rc<SimElement>> {
        self.nodes().into_iter().find(|n| n.id() == id)
    }

    /// Parse every lazy element's resource attribute without running the engine.
    pub fn inspect(&self, config: &EngineConfig) -> Vec<DescriptorReport> {
        self.root
            .find_all(&config.selector)
            .into_iter()
            .map(|el| {
                let raw = el.attr(&config.attributes.src);
                let result = match &raw {
                    Some(raw) => ResourceDescriptor::parse(raw).map_err(|e| e.to_string()),
                    None => Ok(ResourceDescriptor::empty()),
                };
                DescriptorReport {
                    id: el.id(),
                    tag: el.tag_name(),
                    raw,
                    result,
                }
            })
            .collect()
    }

    /// What a host IntersectionObserver would report right now.
    pub fn intersections(&self, options: &ObserverOptions) -> Vec<IntersectionEntry> {
        let root = Rect::from_xywh(0.0, 0.0, self.window.inner_width(), self.window.inner_height())
            .inflate_by(options.root_margin);
        let min_threshold = options
            .thresholds
            .iter()
            .copied()
            .fold(f64::INFINITY, f64::min)
            .min(1.0);

        self.nodes()
            .into_iter()
            .filter(|n| n.is_connected())
            .filter_map(|n| {
                let rect = n.bounding_rect()?;
                let ratio = rect.coverage_by(&root);
                Some(IntersectionEntry {
                    target: n.id(),
                    is_intersecting: rect.overlaps(&root) && ratio >= min_threshold,
                    intersection_ratio: ratio,
                })
            })
            .collect()
    }

    /// Run the whole scenario: scan, deliver, then each scroll step.
    pub fn run(&self, config: EngineConfig) -> SimulationReport {
        let ctx = EngineContext::new(config, &self.capabilities, self.window.clone());
        let scheduler = Rc::new(SimScheduler::new());

        let mut fetcher = SimFetcher::new();
        for (url, bytes) in &self.resources {
            fetcher = fetcher.with_resource(url, bytes.clone());
        }
        let store: Rc<dyn KeyValueStore> = Rc::new(MemoryStore::new());
        let blur = BlurEffect::new(Rc::clone(&ctx), Rc::new(fetcher), Some(store));
        let effects = Rc::new(EffectsPipeline::new(Rc::clone(&ctx)).with_blur(blur));
        let executor = Rc::new(LoadExecutor::new(Rc::clone(&ctx)));
        let mut coordinator = ObservationCoordinator::new(
            Rc::clone(&ctx),
            ElementResolver::new(),
            executor,
            effects,
            scheduler.clone(),
        );

        let mut events = coordinator.subscribe();
        let root: ElementRef = self.root.clone();
        let registered = coordinator.scan(&root);

        let mut steps = vec![StepReport {
            label: "scan".to_string(),
            started: self.deliver(&mut coordinator, &scheduler),
        }];
        for dy in &self.scroll {
            self.root.scroll_by(*dy);
            steps.push(StepReport {
                label: format!("scroll {dy}"),
                started: self.deliver(&mut coordinator, &scheduler),
            });
        }
        coordinator.run_until_stalled();

        let events: Vec<LoadedEvent> =
            std::iter::from_fn(|| events.try_recv().ok()).collect();
        // Settled elements lose the lazy class, so go by what was registered
        let elements = self
            .nodes()
            .into_iter()
            .filter_map(|n| {
                let observation = coordinator.observation_state(n.id());
                observation.map(|_| ElementReport {
                    id: n.id(),
                    tag: n.tag_name(),
                    record: coordinator.record_state(n.id()),
                    observation,
                    src: n.attr("src"),
                    classes: n.classes(),
                })
            })
            .collect();

        SimulationReport {
            strategy: ctx.strategy(),
            registered,
            steps,
            events,
            elements,
            stats: coordinator.stats(),
        }
    }

    /// Hand the coordinator whatever the strategy's observer would see,
    /// then fire the requested frames.
    fn deliver(&self, coordinator: &mut ObservationCoordinator, scheduler: &SimScheduler) -> usize {
        match coordinator.strategy() {
            Strategy::Observer => {
                let entries = self.intersections(&coordinator.observer_options());
                coordinator.observe(entries);
            }
            Strategy::Polling | Strategy::Native => coordinator.poll(),
        }
        scheduler
            .take_due()
            .into_iter()
            .map(|frame| coordinator.on_frame(frame))
            .sum()
    }
}

fn build(parent: &Rc<SimElement>, fixture: &ElementFixture, next_id: &mut u64) {
    let mut node = SimElement::new(*next_id, &fixture.tag);
    *next_id += 1;
    for class in &fixture.classes {
        node = node.with_class(class);
    }
    for (name, value) in &fixture.attrs {
        node = node.with_attr(name, value);
    }
    if let Some(r) = fixture.rect {
        node = node.with_rect(Rect::from_xywh(r.x, r.y, r.width, r.height));
    }
    if fixture.decode {
        node = node.with_decode();
    }
    match &fixture.outcomes {
        None => node = node.with_outcome(Ok(())),
        Some(outcomes) => {
            for outcome in outcomes {
                node = node.with_outcome(match outcome {
                    OutcomeFixture::Success => Ok(()),
                    OutcomeFixture::Error => {
                        Err(LoadFailure::Resource("scripted error".to_string()))
                    }
                });
            }
        }
    }
    SimElement::append(parent, &node);
    for child in &fixture.children {
        build(&node, child, next_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"{
        "window": {"width": 400, "height": 800},
        "elements": [
            {"tag": "div", "classes": ["media"], "children": [
                {"tag": "img", "classes": ["b-lazy"],
                 "attrs": {"src": "placeholder.gif", "data-src": "near.jpg"},
                 "rect": {"x": 0, "y": 100, "width": 400, "height": 300}}
            ]},
            {"tag": "img", "classes": ["b-lazy"],
             "attrs": {"data-src": "far.jpg"},
             "rect": {"x": 0, "y": 3000, "width": 400, "height": 300},
             "outcomes": ["error"]}
        ]
    }"#;

    fn base() -> toml::Value {
        config::stock_defaults_value()
    }

    #[test]
    fn fixture_builds_tree_with_sequential_ids() {
        let page = SimPage::from_json(PAGE).unwrap();
        let ids: Vec<u64> = page.nodes().iter().map(|n| n.id().0).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(page.find(ElementId(2)).unwrap().tag_name(), "img");
    }

    #[test]
    fn unknown_fixture_fields_rejected() {
        let json = r#"{"window": {"width": 1, "height": 1}, "elements": [], "bogus": 1}"#;
        assert!(matches!(SimPage::from_json(json), Err(SimError::Json(_))));
    }

    #[test]
    fn bad_resource_base64_is_an_error() {
        let json = r#"{"window": {"width": 1, "height": 1}, "elements": [],
                       "resources": {"a.png": "!!!"}}"#;
        assert!(matches!(
            SimPage::from_json(json),
            Err(SimError::Resource { .. })
        ));
    }

    #[test]
    fn settings_overlay_applies() {
        let json = r#"{"window": {"width": 1, "height": 1}, "elements": [],
                       "settings": {"loadInvisible": true, "offset": 0}}"#;
        let config = SimPage::from_json(json).unwrap().config(base()).unwrap();
        assert!(config.load_invisible);
        assert_eq!(config.offset, 0);
    }

    #[test]
    fn intersections_respect_root_margin() {
        let page = SimPage::from_json(PAGE).unwrap();
        let options = ObserverOptions {
            root_margin: [0.0; 4],
            thresholds: vec![0.0],
            root: None,
        };
        let entries = page.intersections(&options);
        let near = entries.iter().find(|e| e.target == ElementId(2)).unwrap();
        let far = entries.iter().find(|e| e.target == ElementId(3)).unwrap();
        assert!(near.is_intersecting);
        assert_eq!(near.intersection_ratio, 1.0);
        assert!(!far.is_intersecting);

        let wide = ObserverOptions {
            root_margin: [0.0, 0.0, 3000.0, 0.0],
            ..options
        };
        let far = page
            .intersections(&wide)
            .into_iter()
            .find(|e| e.target == ElementId(3))
            .unwrap();
        assert!(far.is_intersecting);
    }

    #[test]
    fn run_loads_visible_then_scrolled_elements() {
        let mut page = SimPage::from_json(PAGE).unwrap();
        page.scroll = vec![2800.0];
        let report = page.run(page.config(base()).unwrap());

        assert_eq!(report.strategy, Strategy::Observer);
        assert_eq!(report.registered, 2);
        assert_eq!(report.steps[0].started, 1);
        assert_eq!(report.steps[1].started, 1);
        assert_eq!(report.stats, LoadStats { loaded: 1, errored: 1, retried: 0 });
        assert_eq!(report.events.len(), 2);

        let near = report.elements.iter().find(|e| e.id == ElementId(2)).unwrap();
        assert_eq!(near.src.as_deref(), Some("near.jpg"));
        assert_eq!(near.record, Some(RecordState::Loaded));
    }

    #[test]
    fn inspect_flags_malformed_descriptors() {
        let json = r#"{"window": {"width": 1, "height": 1}, "elements": [
            {"tag": "img", "classes": ["b-lazy"], "attrs": {"data-src": "{\"abc\": \"x.jpg\"}"}},
            {"tag": "img", "classes": ["b-lazy"], "attrs": {"data-src": "ok.jpg"}}
        ]}"#;
        let page = SimPage::from_json(json).unwrap();
        let reports = page.inspect(&EngineConfig::default());
        assert_eq!(reports.len(), 2);
        assert!(reports[0].result.is_err());
        assert_eq!(
            reports[1].result,
            Ok(ResourceDescriptor::Static("ok.jpg".into()))
        );
    }
}
