//! Resource descriptor parsing.
//!
//! A lazy element carries its real resource in one attribute. The value is
//! either a literal URL or a JSON object keyed by viewport-width threshold:
//!
//! ```text
//! data-src="photo.jpg"
//! data-src='{"320":{"url":"a.jpg"},"768":{"url":"b.jpg","ratio":56.25}}'
//! data-src='{"320":"a.jpg","768":"b.jpg"}'
//! ```
//!
//! Entries accept `url` or `src` for the resource, and an optional aspect
//! `ratio` given either as a number (padding percentage) or as a `"56.25%"`
//! string. Thresholds must be non-negative integers. Once parsed a
//! [`BreakpointMap`] is immutable and always sorted by threshold.

use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DescriptorError {
    #[error("invalid breakpoint JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("breakpoint threshold is not a width: '{0}'")]
    Threshold(String),
    #[error("breakpoint {0} has an invalid ratio: '{1}'")]
    Ratio(u32, String),
}

/// One breakpoint entry.
#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub url: String,
    /// Aspect ratio as a padding-bottom percentage.
    pub ratio: Option<f64>,
}

/// Width-keyed resource table, ascending by threshold.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct BreakpointMap {
    entries: Vec<(u32, Breakpoint)>,
}

impl BreakpointMap {
    pub fn new(entries: impl IntoIterator<Item = (u32, Breakpoint)>) -> Self {
        let mut entries: Vec<(u32, Breakpoint)> = entries.into_iter().collect();
        entries.sort_by_key(|(t, _)| *t);
        entries.dedup_by_key(|(t, _)| *t);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries in ascending threshold order.
    pub fn entries(&self) -> &[(u32, Breakpoint)] {
        &self.entries
    }

    pub fn thresholds(&self) -> impl Iterator<Item = u32> + '_ {
        self.entries.iter().map(|(t, _)| *t)
    }

    pub fn get(&self, threshold: u32) -> Option<&Breakpoint> {
        self.entries
            .binary_search_by_key(&threshold, |(t, _)| *t)
            .ok()
            .map(|i| &self.entries[i].1)
    }

    pub fn first(&self) -> Option<(u32, &Breakpoint)> {
        self.entries.first().map(|(t, b)| (*t, b))
    }

    pub fn last(&self) -> Option<(u32, &Breakpoint)> {
        self.entries.last().map(|(t, b)| (*t, b))
    }

    /// Whether any entry carries an aspect ratio.
    pub fn has_ratios(&self) -> bool {
        self.entries.iter().any(|(_, b)| b.ratio.is_some())
    }
}

/// What an element's resource attribute describes.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceDescriptor {
    Static(String),
    Breakpoints(BreakpointMap),
}

impl ResourceDescriptor {
    /// An empty breakpoint map: resolution falls back to the element's
    /// existing source.
    pub fn empty() -> Self {
        ResourceDescriptor::Breakpoints(BreakpointMap::default())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            ResourceDescriptor::Static(url) => url.is_empty(),
            ResourceDescriptor::Breakpoints(map) => map.is_empty(),
        }
    }

    /// Parse an attribute value. Values starting with `{` are breakpoint
    /// maps; everything else is a literal URL.
    pub fn parse(raw: &str) -> Result<Self, DescriptorError> {
        let trimmed = raw.trim();
        if !trimmed.starts_with('{') {
            return Ok(ResourceDescriptor::Static(trimmed.to_string()));
        }

        let raw_map: BTreeMap<String, RawEntry> = serde_json::from_str(trimmed)?;
        let mut entries = Vec::with_capacity(raw_map.len());
        for (key, entry) in raw_map {
            let threshold: u32 = key
                .trim()
                .parse()
                .map_err(|_| DescriptorError::Threshold(key.clone()))?;
            entries.push((threshold, entry.into_breakpoint(threshold)?));
        }
        Ok(ResourceDescriptor::Breakpoints(BreakpointMap::new(entries)))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Url(String),
    Full {
        #[serde(alias = "src")]
        url: String,
        #[serde(default)]
        ratio: Option<RawRatio>,
    },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRatio {
    Number(f64),
    Text(String),
}

impl RawEntry {
    fn into_breakpoint(self, threshold: u32) -> Result<Breakpoint, DescriptorError> {
        match self {
            RawEntry::Url(url) => Ok(Breakpoint { url, ratio: None }),
            RawEntry::Full { url, ratio } => {
                let ratio = match ratio {
                    None => None,
                    Some(RawRatio::Number(n)) => Some(n),
                    Some(RawRatio::Text(text)) => {
                        let number = text.trim().trim_end_matches('%');
                        Some(
                            number
                                .parse::<f64>()
                                .map_err(|_| DescriptorError::Ratio(threshold, text.clone()))?,
                        )
                    }
                };
                Ok(Breakpoint { url, ratio })
            }
        }
    }
}
