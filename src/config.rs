//! Engine configuration.
//!
//! Handles loading, validating, and merging `lazymedia.toml` files. The
//! configuration is layered: stock defaults are overridden by a directory
//! config file, which is in turn overridden by the settings object a host
//! page supplies.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! offset = 100                     # px before viewport entry triggers a load
//! root_margin = "0px"              # observer inflation, CSS margin syntax
//! threshold = 0.0                  # number or array of intersection ratios
//! disconnect = true                # stop observing an element after it loads
//! load_invisible = false           # also load elements hidden by CSS
//! # container = ".scroller"        # scrolling ancestors for the polling fallback
//! validate_delay = 25              # ms, resize revalidation debounce
//! save_viewport_offset_delay = 50  # ms, viewport recompute debounce
//! mobile_first = false             # breakpoint direction
//! selector = ".b-lazy"             # which elements scan() picks up
//!
//! [classes]
//! success = "b-loaded"
//! error = "b-error"
//!
//! [blur]
//! enabled = true
//! store_key = "lazymedia.blur"
//! restore = true
//! ```
//!
//! ## Host Settings
//!
//! Hosts usually hand over their settings as a JSON object with camelCase
//! keys (`rootMargin`, `loadInvisible`, `validateDelay`, ...). Every option
//! accepts its camelCase spelling as an alias, so the same struct
//! deserializes both.
//!
//! Unknown keys are rejected to catch typos early.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Name of the config file looked up in a directory.
pub const CONFIG_FILENAME: &str = "lazymedia.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Settings conversion error: {0}")]
    Settings(String),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Engine configuration loaded from `lazymedia.toml` and host settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Pixels before viewport entry that already count as visible.
    pub offset: u32,
    /// Observer root inflation, CSS margin syntax (`"10px 0px"`).
    #[serde(alias = "rootMargin")]
    pub root_margin: String,
    /// Intersection ratios at which an observer reports.
    pub threshold: Threshold,
    /// Stop observing an element once it has loaded.
    pub disconnect: bool,
    /// Load elements even when CSS hides them (zero-size geometry).
    #[serde(alias = "loadInvisible")]
    pub load_invisible: bool,
    /// Selector(s) of scrolling ancestors used by the polling fallback.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub container: Option<String>,
    /// Debounce for resize revalidation, in milliseconds.
    #[serde(alias = "validateDelay")]
    pub validate_delay: u64,
    /// Debounce for the viewport rectangle recompute, in milliseconds.
    #[serde(alias = "saveViewportOffsetDelay")]
    pub save_viewport_offset_delay: u64,
    /// Treat breakpoint thresholds as min-widths instead of max-widths.
    #[serde(alias = "mobileFirst")]
    pub mobile_first: bool,
    /// Selector for lazy elements picked up by `scan`.
    pub selector: String,
    /// Class names the engine reads and writes.
    pub classes: ClassesConfig,
    /// Data attribute names the engine reads.
    pub attributes: AttributesConfig,
    /// Blur placeholder settings.
    pub blur: BlurConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            offset: 100,
            root_margin: "0px".to_string(),
            threshold: Threshold::Single(0.0),
            disconnect: true,
            load_invisible: false,
            container: None,
            validate_delay: 25,
            save_viewport_offset_delay: 50,
            mobile_first: false,
            selector: ".b-lazy".to_string(),
            classes: ClassesConfig::default(),
            attributes: AttributesConfig::default(),
            blur: BlurConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.threshold.values().iter().any(|t| !(0.0..=1.0).contains(t)) {
            return Err(ConfigError::Validation(
                "threshold values must be within 0.0-1.0".into(),
            ));
        }
        parse_root_margin(&self.root_margin)?;
        if self.selector.trim().is_empty() {
            return Err(ConfigError::Validation("selector must not be empty".into()));
        }
        if self.blur.enabled && self.blur.store_key.is_empty() {
            return Err(ConfigError::Validation(
                "blur.store_key must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// Root margin as `[top, right, bottom, left]` pixels.
    ///
    /// Falls back to no inflation when the margin does not parse; a
    /// validated config never hits that branch.
    pub fn root_margin_px(&self) -> [f64; 4] {
        parse_root_margin(&self.root_margin).unwrap_or([0.0; 4])
    }
}

/// A single intersection ratio or a list of them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Threshold {
    Single(f64),
    Many(Vec<f64>),
}

impl Threshold {
    pub fn values(&self) -> Vec<f64> {
        match self {
            Threshold::Single(t) => vec![*t],
            Threshold::Many(ts) => ts.clone(),
        }
    }
}

/// Parse a CSS-margin-like string (`"10px"`, `"10px 20px"`, up to four
/// values) into `[top, right, bottom, left]` pixels.
///
/// Only `px` lengths and unitless zero are accepted.
pub fn parse_root_margin(margin: &str) -> Result<[f64; 4], ConfigError> {
    let values = margin
        .split_whitespace()
        .map(|part| {
            let number = part.strip_suffix("px").unwrap_or(part);
            match number.parse::<f64>() {
                Ok(v) if part.ends_with("px") || v == 0.0 => Ok(v),
                _ => Err(ConfigError::Validation(format!(
                    "root_margin: unsupported length '{part}'"
                ))),
            }
        })
        .collect::<Result<Vec<f64>, ConfigError>>()?;

    match values.as_slice() {
        [all] => Ok([*all; 4]),
        [v, h] => Ok([*v, *h, *v, *h]),
        [t, h, b] => Ok([*t, *h, *b, *h]),
        [t, r, b, l] => Ok([*t, *r, *b, *l]),
        _ => Err(ConfigError::Validation(format!(
            "root_margin: expected 1-4 values, got '{margin}'"
        ))),
    }
}

/// Class names the engine reads and writes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClassesConfig {
    /// Added to an element after a successful load.
    pub success: String,
    /// Added to an element after a terminal failure.
    pub error: String,
    /// Lazy marker class, removed once an element settles.
    pub lazy: String,
    /// Selector of the logical parent container.
    pub parent: String,
    /// Added to the logical parent after a successful load.
    pub parent_success: String,
    /// Added to the logical parent after a terminal failure.
    pub parent_error: String,
    /// Selector of containers that opted into a single retry.
    pub revalidate: String,
    /// Base class applied while an animation runs.
    pub animated: String,
    /// Marker left on an element once its animation finished.
    pub animated_marker: String,
    /// Elements carrying this class get the blur effect.
    pub blur: String,
}

impl Default for ClassesConfig {
    fn default() -> Self {
        Self {
            success: "b-loaded".to_string(),
            error: "b-error".to_string(),
            lazy: "b-lazy".to_string(),
            parent: ".media".to_string(),
            parent_success: "is-b-loaded".to_string(),
            parent_error: "is-b-error".to_string(),
            revalidate: ".b-revalidate".to_string(),
            animated: "animated".to_string(),
            animated_marker: "is-b-animated".to_string(),
            blur: "b-blur".to_string(),
        }
    }
}

/// Data attribute names the engine reads.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AttributesConfig {
    /// Real resource: a URL or a JSON breakpoint map.
    pub src: String,
    /// Responsive sources, activated into `srcset`.
    pub srcset: String,
    /// Marks the first item of a slider-like sequence as eager.
    pub initial: String,
    /// Animation name and its timing attributes share this prefix.
    pub animation: String,
    /// Small placeholder image URL for the blur effect.
    pub blur: String,
    /// Cache identifier for the blur effect.
    pub blur_id: String,
}

impl Default for AttributesConfig {
    fn default() -> Self {
        Self {
            src: "data-src".to_string(),
            srcset: "data-srcset".to_string(),
            initial: "data-b-initial".to_string(),
            animation: "data-animation".to_string(),
            blur: "data-b-blur".to_string(),
            blur_id: "data-b-id".to_string(),
        }
    }
}

/// Blur placeholder settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlurConfig {
    /// Cache decoded placeholders in the host key-value store.
    pub enabled: bool,
    /// Key under which the cache array is stored.
    pub store_key: String,
    /// Retry a write once after clearing the store on quota errors.
    pub restore: bool,
}

impl Default for BlurConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            store_key: "lazymedia.blur".to_string(),
            restore: true,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the canonical representation of all default values, used as the
/// base layer for merging user overrides on top.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(EngineConfig::default()).expect("default config must serialize")
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(base_val) => merge_toml(base_val, overlay_val),
                    None => overlay_val,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Load `lazymedia.toml` from a directory as a raw TOML value.
///
/// Returns `Ok(None)` if no config file exists in the directory.
/// Returns `Err` if the file exists but contains invalid TOML.
pub fn load_raw_config(dir: &Path) -> Result<Option<toml::Value>, ConfigError> {
    let config_path = dir.join(CONFIG_FILENAME);
    if !config_path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(&config_path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Convert a host settings object (JSON) into a TOML overlay.
///
/// Keys are normalized to snake_case so they land on the same table keys as
/// the file layer; merging `rootMargin` next to `root_margin` would otherwise
/// produce a duplicate field. JSON `null` has no TOML counterpart; null
/// members are dropped so a host can send `{"container": null}` to mean
/// "not set".
pub fn settings_overlay(settings: &serde_json::Value) -> Result<toml::Value, ConfigError> {
    let cleaned = normalize_settings(settings.clone());
    toml::Value::try_from(cleaned).map_err(|e| ConfigError::Settings(e.to_string()))
}

fn normalize_settings(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (snake_case(&k), normalize_settings(v)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.into_iter().map(normalize_settings).collect())
        }
        other => other,
    }
}

/// `saveViewportOffsetDelay` → `save_viewport_offset_delay`.
fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<EngineConfig, ConfigError> {
    let merged = match overlay {
        Some(ov) => merge_toml(base, ov),
        None => base,
    };
    let config: EngineConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `lazymedia.toml` in the given directory.
///
/// Merges user values on top of stock defaults, rejects unknown keys,
/// and validates the result.
pub fn load_config(dir: &Path) -> Result<EngineConfig, ConfigError> {
    let base = stock_defaults_value();
    let overlay = load_raw_config(dir)?;
    resolve_config(base, overlay)
}

/// Returns a fully-commented stock `lazymedia.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# lazymedia Configuration
# =======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
#
# A page may pass its own settings object on top of this file; its keys
# may use camelCase (rootMargin, loadInvisible, ...).
# Unknown keys will cause an error.

# Pixels before viewport entry that already count as visible.
offset = 100

# Observer root inflation in CSS margin syntax (px only).
root_margin = "0px"

# Intersection ratio(s) at which the observer reports: a number or a list.
threshold = 0.0

# Stop observing an element once it has loaded. Set to false to keep
# loaded elements registered so resizes refresh their aspect ratio.
disconnect = true

# Also load elements hidden by CSS (zero-size geometry).
load_invisible = false

# Scrolling ancestors checked by the polling fallback.
# container = ".scroller"

# Debounce (ms) for re-resolving resources after a resize.
validate_delay = 25

# Debounce (ms) for recomputing the viewport rectangle after a resize.
save_viewport_offset_delay = 50

# Breakpoint direction: false treats thresholds as max-widths,
# true as min-widths.
mobile_first = false

# Elements picked up by scan().
selector = ".b-lazy"

# ---------------------------------------------------------------------------
# Class names
# ---------------------------------------------------------------------------
[classes]
success = "b-loaded"
error = "b-error"
lazy = "b-lazy"
parent = ".media"              # selector of the logical parent
parent_success = "is-b-loaded"
parent_error = "is-b-error"
revalidate = ".b-revalidate"   # selector of containers allowing one retry
animated = "animated"
animated_marker = "is-b-animated"
blur = "b-blur"

# ---------------------------------------------------------------------------
# Data attributes
# ---------------------------------------------------------------------------
[attributes]
src = "data-src"               # URL or JSON breakpoint map
srcset = "data-srcset"
initial = "data-b-initial"     # eager first slide
animation = "data-animation"
blur = "data-b-blur"           # small placeholder image URL
blur_id = "data-b-id"

# ---------------------------------------------------------------------------
# Blur placeholder cache
# ---------------------------------------------------------------------------
[blur]
enabled = true
store_key = "lazymedia.blur"
# After a quota error the cache is cleared; retry the write once.
restore = true
"##
}
