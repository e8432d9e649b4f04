//! Persistent key-value storage for blur placeholders.
//!
//! The cache is one JSON array under a single key, each item a one-entry
//! object mapping a placeholder id to its data URI:
//!
//! ```json
//! [{"a1b2c3d4e5f60718": "data:image/png;base64,..."}]
//! ```
//!
//! Hosts back it with whatever storage they have (`localStorage` in a
//! browser). A quota failure clears the key and, when restoring is enabled,
//! writes only the newest entry once more. A second failure is logged and
//! swallowed: the cache is an optimization, never a reason to fail a load.

use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage quota exceeded")]
    QuotaExceeded,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

pub trait KeyValueStore {
    fn get_item(&self, key: &str) -> Option<String>;
    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError>;
    fn remove_item(&self, key: &str);
}

/// In-process store with an optional byte quota over keys plus values.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: RefCell<HashMap<String, String>>,
    quota: Option<usize>,
    writes: RefCell<u32>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// Number of `set_item` calls, successful or not.
    pub fn writes(&self) -> u32 {
        *self.writes.borrow()
    }

    fn used_without(&self, key: &str) -> usize {
        self.items
            .borrow()
            .iter()
            .filter(|(k, _)| k.as_str() != key)
            .map(|(k, v)| k.len() + v.len())
            .sum()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_item(&self, key: &str) -> Option<String> {
        self.items.borrow().get(key).cloned()
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StoreError> {
        *self.writes.borrow_mut() += 1;
        if let Some(quota) = self.quota
            && self.used_without(key) + key.len() + value.len() > quota
        {
            return Err(StoreError::QuotaExceeded);
        }
        self.items
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) {
        self.items.borrow_mut().remove(key);
    }
}

/// Blur placeholder cache over a [`KeyValueStore`].
pub struct BlurCache {
    store: Rc<dyn KeyValueStore>,
    key: String,
    restore: bool,
}

impl BlurCache {
    pub fn new(store: Rc<dyn KeyValueStore>, key: impl Into<String>, restore: bool) -> Self {
        Self {
            store,
            key: key.into(),
            restore,
        }
    }

    /// All cached entries in insertion order. Unreadable data counts as empty.
    pub fn entries(&self) -> Vec<(String, String)> {
        let Some(raw) = self.store.get_item(&self.key) else {
            return Vec::new();
        };
        match serde_json::from_str::<Vec<BTreeMap<String, String>>>(&raw) {
            Ok(items) => items.into_iter().flatten().collect(),
            Err(e) => {
                log::warn!("blur cache {}: unreadable, ignoring ({})", self.key, e);
                Vec::new()
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.entries()
            .into_iter()
            .find(|(k, _)| k == id)
            .map(|(_, v)| v)
    }

    /// Add or replace one entry. Never fails; see the module docs.
    pub fn put(&self, id: &str, uri: &str) {
        let mut entries = self.entries();
        entries.retain(|(k, _)| k != id);
        entries.push((id.to_string(), uri.to_string()));

        match self.write(&entries) {
            Ok(()) => {}
            Err(StoreError::QuotaExceeded) => {
                log::warn!("blur cache {}: quota exceeded, clearing", self.key);
                self.store.remove_item(&self.key);
                if self.restore
                    && let Err(e) = self.write(&[(id.to_string(), uri.to_string())])
                {
                    log::warn!("blur cache {}: giving up on {}: {}", self.key, id, e);
                }
            }
            Err(e) => log::warn!("blur cache {}: {}", self.key, e),
        }
    }

    fn write(&self, entries: &[(String, String)]) -> Result<(), StoreError> {
        let items: Vec<BTreeMap<&str, &str>> = entries
            .iter()
            .map(|(k, v)| BTreeMap::from([(k.as_str(), v.as_str())]))
            .collect();
        let json = serde_json::to_string(&items)
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        self.store.set_item(&self.key, &json)
    }
}
