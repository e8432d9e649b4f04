//! CLI output formatting for the `simulate` and `check` commands.
//!
//! # Element Display Contract
//!
//! Every element follows the same two-level pattern:
//!
//! 1. **Header line**: positional index + `<tag #id>` + state
//! 2. **Context lines**: indented `Source:`, `Classes:`, descriptor details
//!
//! # Output Format
//!
//! ## Simulate
//!
//! ```text
//! Page gallery.json (observer, 3 registered)
//! Steps
//!     scan: 1 started
//!     scroll 600: 2 started
//! Elements
//!     001 <img #2> loaded
//!         Source: b.jpg
//!         Classes: b-loaded
//! Events
//!     #2 success → b.jpg (parent #1)
//! 3 loaded, 1 failed (1 retried)
//! ```
//!
//! ## Check
//!
//! ```text
//! gallery.json
//!     001 <img #2> breakpoints 320, 768, 1200
//!     002 <img #3> static photo.jpg
//!     003 <img #4> INVALID breakpoint threshold is not a width: 'abc'
//!
//! Checked 1 page, 3 elements, 1 malformed
//! ```
//!
//! # Architecture
//!
//! Each command has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::breakpoint::ResourceDescriptor;
use crate::capability::Strategy;
use crate::sim::{DescriptorReport, SimulationReport};
use crate::types::{ElementId, ObservationState, RecordState};
use std::path::Path;

// ============================================================================
// Shared display helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn element_label(tag: &str, id: ElementId) -> String {
    format!("<{} {}>", tag, id)
}

fn plural(n: usize, word: &str) -> String {
    if n == 1 {
        format!("{} {}", n, word)
    } else {
        format!("{} {}s", n, word)
    }
}

fn strategy_name(strategy: Strategy) -> &'static str {
    match strategy {
        Strategy::Observer => "observer",
        Strategy::Native => "native",
        Strategy::Polling => "polling",
    }
}

/// The most specific state word for an element.
fn state_word(record: Option<RecordState>, observation: Option<ObservationState>) -> &'static str {
    match (record, observation) {
        (Some(RecordState::Loaded), _) => "loaded",
        (Some(RecordState::Errored), _) => "errored",
        (Some(RecordState::Loading), _) | (_, Some(ObservationState::Intersecting)) => "loading",
        (_, Some(ObservationState::Observed)) => "waiting",
        _ => "untracked",
    }
}

fn describe_descriptor(descriptor: &ResourceDescriptor) -> String {
    match descriptor {
        ResourceDescriptor::Static(url) if url.is_empty() => "empty".to_string(),
        ResourceDescriptor::Static(url) => format!("static {}", url),
        ResourceDescriptor::Breakpoints(map) if map.is_empty() => {
            "empty breakpoint map".to_string()
        }
        ResourceDescriptor::Breakpoints(map) => {
            let thresholds: Vec<String> = map.thresholds().map(|t| t.to_string()).collect();
            let ratios = if map.has_ratios() { " (with ratios)" } else { "" };
            format!("breakpoints {}{}", thresholds.join(", "), ratios)
        }
    }
}

// ============================================================================
// simulate
// ============================================================================

/// Format a simulation run: steps, final element states, events, totals.
pub fn format_simulation(report: &SimulationReport, page: &Path) -> Vec<String> {
    let name = page
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| page.display().to_string());

    let mut lines = vec![format!(
        "Page {} ({}, {} registered)",
        name,
        strategy_name(report.strategy),
        report.registered
    )];

    lines.push("Steps".to_string());
    for step in &report.steps {
        lines.push(format!("{}{}: {} started", indent(1), step.label, step.started));
    }

    if !report.elements.is_empty() {
        lines.push("Elements".to_string());
        for (i, el) in report.elements.iter().enumerate() {
            lines.push(format!(
                "{}{} {} {}",
                indent(1),
                format_index(i + 1),
                element_label(&el.tag, el.id),
                state_word(el.record, el.observation)
            ));
            if let Some(src) = &el.src {
                lines.push(format!("{}Source: {}", indent(2), src));
            }
            if !el.classes.is_empty() {
                lines.push(format!("{}Classes: {}", indent(2), el.classes.join(" ")));
            }
        }
    }

    if !report.events.is_empty() {
        lines.push("Events".to_string());
        for event in &report.events {
            let target = event.url.as_deref().unwrap_or("(no source)");
            lines.push(format!(
                "{}{} {} \u{2192} {} (parent {})",
                indent(1),
                event.element,
                event.status,
                target,
                event.parent
            ));
        }
    }

    lines.push(report.stats.to_string());
    lines
}

pub fn print_simulation(report: &SimulationReport, page: &Path) {
    for line in format_simulation(report, page) {
        println!("{}", line);
    }
}

// ============================================================================
// check
// ============================================================================

/// Format the descriptor check of one page fixture.
pub fn format_check(page: &Path, reports: &[DescriptorReport]) -> Vec<String> {
    let mut lines = vec![page.display().to_string()];
    if reports.is_empty() {
        lines.push(format!("{}(no lazy elements)", indent(1)));
    }
    for (i, report) in reports.iter().enumerate() {
        let detail = match (&report.raw, &report.result) {
            (None, _) => "no resource attribute".to_string(),
            (Some(_), Ok(descriptor)) => describe_descriptor(descriptor),
            (Some(_), Err(e)) => format!("INVALID {}", e),
        };
        lines.push(format!(
            "{}{} {} {}",
            indent(1),
            format_index(i + 1),
            element_label(&report.tag, report.id),
            detail
        ));
    }
    lines
}

pub fn print_check(page: &Path, reports: &[DescriptorReport]) {
    for line in format_check(page, reports) {
        println!("{}", line);
    }
}

/// Closing line of `check`.
pub fn format_check_summary(pages: usize, elements: usize, malformed: usize) -> String {
    format!(
        "Checked {}, {}, {} malformed",
        plural(pages, "page"),
        plural(elements, "element"),
        malformed
    )
}
