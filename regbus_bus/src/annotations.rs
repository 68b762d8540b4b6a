//! Persistent address labels
//!
//! Labels are independent of live register values and never travel over the
//! wire protocol. The sidecar file is a flat JSON object keyed by the decimal
//! address:
//!
//! ```json
//! { "200": "vision.command", "204": "vision.status" }
//! ```

use crate::error::BusResult;
use regbus::layout::ModuleLayout;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Address to label map with optional file backing
#[derive(Debug, Clone, Default)]
pub struct AnnotationStore {
    path: Option<PathBuf>,
    labels: BTreeMap<u16, String>,
}

impl AnnotationStore {
    /// Store that is never persisted
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Load labels from `path`; a missing file yields an empty store
    ///
    /// Keys that are not valid addresses are skipped with a warning.
    pub fn open(path: impl Into<PathBuf>) -> BusResult<Self> {
        let path = path.into();
        let labels = if path.exists() {
            let content = fs::read_to_string(&path)?;
            let raw: BTreeMap<String, String> = serde_json::from_str(&content)?;
            raw.into_iter()
                .filter_map(|(key, label)| match key.trim().parse::<u16>() {
                    Ok(address) => Some((address, label)),
                    Err(_) => {
                        warn!(key = %key, "skipping annotation with invalid address");
                        None
                    }
                })
                .collect()
        } else {
            debug!(path = %path.display(), "annotation file not found, starting empty");
            BTreeMap::new()
        };
        Ok(Self {
            path: Some(path),
            labels,
        })
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Label of `address`
    pub fn get(&self, address: u16) -> Option<&str> {
        self.labels.get(&address).map(String::as_str)
    }

    /// Set or clear a label
    ///
    /// The label is trimmed; an empty label removes the entry. Returns true
    /// if the store changed.
    pub fn set(&mut self, address: u16, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return self.labels.remove(&address).is_some();
        }
        match self.labels.insert(address, label.to_string()) {
            Some(previous) => previous != label,
            None => true,
        }
    }

    /// Label the fixed registers of a module without overwriting existing labels
    ///
    /// Returns the number of labels added.
    pub fn label_layout(&mut self, layout: &ModuleLayout) -> usize {
        let mut added = 0;
        for (address, label) in layout.register_labels() {
            if !self.labels.contains_key(&address) {
                self.labels.insert(address, label);
                added += 1;
            }
        }
        added
    }

    /// Number of labels
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// True when no labels are stored
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Labels in address order
    pub fn iter(&self) -> impl Iterator<Item = (u16, &str)> {
        self.labels.iter().map(|(a, l)| (*a, l.as_str()))
    }

    /// Write the store to its backing file; no-op for in-memory stores
    pub fn save(&self) -> BusResult<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let raw: BTreeMap<String, &str> = self
            .labels
            .iter()
            .map(|(a, l)| (a.to_string(), l.as_str()))
            .collect();
        fs::write(path, serde_json::to_string_pretty(&raw)?)?;
        debug!(path = %path.display(), count = raw.len(), "annotations saved");
        Ok(())
    }
}
