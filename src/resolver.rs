//! Element resolution: which URL an element should load right now.
//!
//! A static descriptor resolves to itself. A breakpoint map is resolved
//! against the current [`WindowSnapshot`]:
//!
//! - **Desktop-first** (default): thresholds are max-widths. The effective
//!   width is `width × devicePixelRatio`; the smallest threshold `≥` it wins.
//! - **Mobile-first**: thresholds are min-widths. The effective width is the
//!   plain CSS width; the largest threshold `≤` it wins.
//!
//! When no threshold qualifies, the extreme entry is used: the largest key
//! if the width is at or above it, the smallest otherwise.
//!
//! ```text
//! {320: a, 768: b, 1200: c}, desktop-first
//!   width  400 → b     (smallest ≥ 400)
//!   width  900 → c     (smallest ≥ 900)
//!   width 1300 → c     (none ≥ 1300, width above largest)
//! ```
//!
//! Fixed (non-breakpoint) aspect ratios are left to static styling.

use crate::breakpoint::{Breakpoint, BreakpointMap, ResourceDescriptor};
use crate::element::MediaRecord;
use crate::viewport::WindowSnapshot;

/// The resource an element should load, with its aspect ratio if the
/// chosen breakpoint declares one.
#[derive(Debug, Clone, PartialEq)]
pub struct ResourceSelection {
    pub url: String,
    pub ratio: Option<f64>,
    /// The breakpoint that matched; `None` for static or fallback sources.
    pub threshold: Option<u32>,
}

impl ResourceSelection {
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ratio: None,
            threshold: None,
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ElementResolver;

impl ElementResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve a record against a window snapshot.
    ///
    /// Returns `None` only when there is nothing at all to load: an empty
    /// map and no fallback source on the element.
    pub fn resolve(
        &self,
        record: &MediaRecord,
        snapshot: &WindowSnapshot,
    ) -> Option<ResourceSelection> {
        match &record.descriptor {
            ResourceDescriptor::Static(url) if !url.is_empty() => {
                Some(ResourceSelection::url(url.clone()))
            }
            ResourceDescriptor::Breakpoints(map) if !map.is_empty() => {
                let width = effective_width(snapshot);
                select_breakpoint(map, width, snapshot.mobile_first).map(|(threshold, bp)| {
                    ResourceSelection {
                        url: bp.url.clone(),
                        ratio: bp.ratio,
                        threshold: Some(threshold),
                    }
                })
            }
            _ => {
                log::warn!(
                    "{:?}: no usable resource data, keeping existing source",
                    record.element
                );
                record.fallback.clone().map(ResourceSelection::url)
            }
        }
    }
}

/// Width used for breakpoint comparison.
pub fn effective_width(snapshot: &WindowSnapshot) -> f64 {
    if snapshot.mobile_first {
        snapshot.width
    } else {
        snapshot.width * snapshot.device_pixel_ratio
    }
}

/// Pick the tightest-fitting breakpoint for `width`.
pub fn select_breakpoint(
    map: &BreakpointMap,
    width: f64,
    mobile_first: bool,
) -> Option<(u32, &Breakpoint)> {
    let mut qualifying = map.entries().iter().filter(|(t, _)| {
        let t = *t as f64;
        if mobile_first { t <= width } else { t >= width }
    });

    let picked = if mobile_first {
        qualifying.next_back()
    } else {
        qualifying.next()
    };

    match picked {
        Some((t, bp)) => Some((*t, bp)),
        None => {
            let (largest, _) = map.last()?;
            if width >= largest as f64 {
                map.last()
            } else {
                map.first()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::breakpoint::BreakpointMap;
    use crate::config::EngineConfig;
    use crate::sim::SimElement;
    use crate::types::Rect;

    fn map(entries: &[(u32, &str)]) -> BreakpointMap {
        BreakpointMap::new(entries.iter().map(|(t, url)| {
            (
                *t,
                Breakpoint {
                    url: url.to_string(),
                    ratio: None,
                },
            )
        }))
    }

    fn snapshot(width: f64, dpr: f64, mobile_first: bool) -> WindowSnapshot {
        WindowSnapshot {
            width,
            height: 800.0,
            device_pixel_ratio: dpr,
            viewport: Rect::default(),
            mobile_first,
        }
    }

    fn url_at(m: &BreakpointMap, width: f64, mobile_first: bool) -> &str {
        select_breakpoint(m, width, mobile_first)
            .map(|(_, bp)| bp.url.as_str())
            .unwrap()
    }

    // =========================================================================
    // Desktop-first
    // =========================================================================

    #[test]
    fn desktop_first_documented_examples() {
        let m = map(&[(320, "a.jpg"), (768, "b.jpg"), (1200, "c.jpg")]);
        assert_eq!(url_at(&m, 400.0, false), "b.jpg");
        assert_eq!(url_at(&m, 900.0, false), "c.jpg");
        assert_eq!(url_at(&m, 1300.0, false), "c.jpg");
    }

    #[test]
    fn desktop_first_boundaries() {
        let m = map(&[(320, "a.jpg"), (768, "b.jpg"), (1200, "c.jpg")]);
        assert_eq!(url_at(&m, 0.0, false), "a.jpg");
        assert_eq!(url_at(&m, 320.0, false), "a.jpg");
        assert_eq!(url_at(&m, 320.5, false), "b.jpg");
        assert_eq!(url_at(&m, 768.0, false), "b.jpg");
        assert_eq!(url_at(&m, 769.0, false), "c.jpg");
        assert_eq!(url_at(&m, 1200.0, false), "c.jpg");
        assert_eq!(url_at(&m, 1201.0, false), "c.jpg");
    }

    /// For every width, desktop-first returns the smallest threshold ≥ w,
    /// or the largest threshold when none qualifies.
    #[test]
    fn desktop_first_is_smallest_upper_bound() {
        let thresholds = [100u32, 480, 481, 1024, 2000];
        let m = map(&[
            (100, "t100"),
            (480, "t480"),
            (481, "t481"),
            (1024, "t1024"),
            (2000, "t2000"),
        ]);
        for w in 0..2100u32 {
            let expected = thresholds.iter().find(|&&t| t >= w).copied().unwrap_or(2000);
            let (got, _) = select_breakpoint(&m, w as f64, false).unwrap();
            assert_eq!(got, expected, "width {w}");
        }
    }

    // =========================================================================
    // Mobile-first
    // =========================================================================

    #[test]
    fn mobile_first_picks_largest_lower_bound() {
        let m = map(&[(320, "a.jpg"), (768, "b.jpg"), (1200, "c.jpg")]);
        assert_eq!(url_at(&m, 400.0, true), "a.jpg");
        assert_eq!(url_at(&m, 768.0, true), "b.jpg");
        assert_eq!(url_at(&m, 1199.0, true), "b.jpg");
        assert_eq!(url_at(&m, 5000.0, true), "c.jpg");
    }

    #[test]
    fn mobile_first_below_smallest_falls_back_to_smallest() {
        let m = map(&[(320, "a.jpg"), (768, "b.jpg")]);
        assert_eq!(url_at(&m, 100.0, true), "a.jpg");
    }

    /// For every width, mobile-first returns the largest threshold ≤ w,
    /// or the smallest threshold when none qualifies.
    #[test]
    fn mobile_first_is_largest_lower_bound() {
        let thresholds = [100u32, 480, 481, 1024, 2000];
        let m = map(&[
            (100, "t100"),
            (480, "t480"),
            (481, "t481"),
            (1024, "t1024"),
            (2000, "t2000"),
        ]);
        for w in 0..2100u32 {
            let expected = thresholds
                .iter()
                .rev()
                .find(|&&t| t <= w)
                .copied()
                .unwrap_or(100);
            let (got, _) = select_breakpoint(&m, w as f64, true).unwrap();
            assert_eq!(got, expected, "width {w}");
        }
    }

    #[test]
    fn single_entry_always_wins() {
        let m = map(&[(768, "only.jpg")]);
        for w in [0.0, 768.0, 10_000.0] {
            assert_eq!(url_at(&m, w, false), "only.jpg");
            assert_eq!(url_at(&m, w, true), "only.jpg");
        }
    }

    #[test]
    fn empty_map_selects_nothing() {
        assert!(select_breakpoint(&BreakpointMap::default(), 500.0, false).is_none());
    }

    // =========================================================================
    // Effective width
    // =========================================================================

    #[test]
    fn desktop_first_multiplies_by_pixel_ratio() {
        assert_eq!(effective_width(&snapshot(400.0, 2.0, false)), 800.0);
        assert_eq!(effective_width(&snapshot(400.0, 2.0, true)), 400.0);
    }

    // =========================================================================
    // resolve()
    // =========================================================================

    fn record(attrs: &[(&str, &str)]) -> MediaRecord {
        let mut img = SimElement::new(1, "img");
        for (k, v) in attrs {
            img = img.with_attr(k, v);
        }
        MediaRecord::from_element(img, &EngineConfig::default())
    }

    #[test]
    fn static_url_resolves_unchanged() {
        let r = record(&[("data-src", "photo.jpg")]);
        let sel = ElementResolver::new()
            .resolve(&r, &snapshot(400.0, 1.0, false))
            .unwrap();
        assert_eq!(sel, ResourceSelection::url("photo.jpg"));
    }

    #[test]
    fn breakpoints_resolve_with_ratio() {
        let r = record(&[(
            "data-src",
            r#"{"320":{"url":"a.jpg","ratio":75},"768":{"url":"b.jpg","ratio":56.25}}"#,
        )]);
        let sel = ElementResolver::new()
            .resolve(&r, &snapshot(400.0, 1.0, false))
            .unwrap();
        assert_eq!(sel.url, "b.jpg");
        assert_eq!(sel.ratio, Some(56.25));
        assert_eq!(sel.threshold, Some(768));
    }

    #[test]
    fn retina_desktop_moves_up_a_breakpoint() {
        let r = record(&[("data-src", r#"{"320":"a.jpg","768":"b.jpg","1200":"c.jpg"}"#)]);
        let sel = ElementResolver::new()
            .resolve(&r, &snapshot(400.0, 2.0, false))
            .unwrap();
        assert_eq!(sel.url, "c.jpg");
    }

    #[test]
    fn malformed_data_keeps_fallback_source() {
        let r = record(&[("src", "placeholder.gif"), ("data-src", "{broken")]);
        let sel = ElementResolver::new()
            .resolve(&r, &snapshot(400.0, 1.0, false))
            .unwrap();
        assert_eq!(sel, ResourceSelection::url("placeholder.gif"));
    }

    #[test]
    fn nothing_to_load_resolves_none() {
        let r = record(&[("data-src", "{}")]);
        assert!(
            ElementResolver::new()
                .resolve(&r, &snapshot(400.0, 1.0, false))
                .is_none()
        );
    }
}
