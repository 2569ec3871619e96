//! In-memory table of registered slides.
//!
//! The registry holds one [`SlideRecord`] and one [`SlideGate`] per slide.
//! It is rebuilt at startup from the upload directory and the on-disk
//! descriptors, so only the flags that the tile cache can prove survive a
//! restart.
//!
//! Flag updates are gated on the caller's [`SlideGate`]: a job that outlives
//! its slide (deleted and re-uploaded under the same name) cannot flip the
//! flags of the new record.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::format::SlideMetadata;

use super::record::{SlideGate, SlideRecord};

struct SlideEntry {
    record: SlideRecord,
    gate: Arc<SlideGate>,
}

/// Registry of slides known to this process.
#[derive(Default)]
pub struct SlideRegistry {
    slides: RwLock<HashMap<String, SlideEntry>>,
}

impl SlideRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a slide, returning its gate.
    ///
    /// An existing entry with the same name is replaced and its gate is
    /// returned in the second position so the caller can close it.
    pub async fn insert(&self, record: SlideRecord) -> (Arc<SlideGate>, Option<Arc<SlideGate>>) {
        let gate = Arc::new(SlideGate::new());
        let name = record.name.clone();
        let previous = self.slides.write().await.insert(
            name.clone(),
            SlideEntry {
                record,
                gate: gate.clone(),
            },
        );
        debug!(slide_id = %name, replaced = previous.is_some(), "Registered slide");
        (gate, previous.map(|e| e.gate))
    }

    /// Snapshot of a slide's record.
    pub async fn get(&self, name: &str) -> Option<SlideRecord> {
        self.slides.read().await.get(name).map(|e| e.record.clone())
    }

    /// Record and gate together.
    pub async fn get_with_gate(&self, name: &str) -> Option<(SlideRecord, Arc<SlideGate>)> {
        self.slides
            .read()
            .await
            .get(name)
            .map(|e| (e.record.clone(), e.gate.clone()))
    }

    /// All records, sorted by name.
    pub async fn list(&self) -> Vec<SlideRecord> {
        let mut records: Vec<SlideRecord> = self
            .slides
            .read()
            .await
            .values()
            .map(|e| e.record.clone())
            .collect();
        records.sort_by(|a, b| a.name.cmp(&b.name));
        records
    }

    /// Cache inspection metadata. Returns `false` if the slide is gone.
    pub async fn set_metadata(&self, name: &str, metadata: SlideMetadata) -> bool {
        match self.slides.write().await.get_mut(name) {
            Some(entry) => {
                entry.record.metadata = Some(metadata);
                true
            }
            None => false,
        }
    }

    /// Mutate a record's flags on behalf of the holder of `gate`.
    ///
    /// Returns `false` without applying `update` when the slide has been
    /// removed or replaced since the gate was issued.
    pub async fn update_flags<F>(&self, name: &str, gate: &Arc<SlideGate>, update: F) -> bool
    where
        F: FnOnce(&mut SlideRecord),
    {
        let mut slides = self.slides.write().await;
        match slides.get_mut(name) {
            Some(entry) if Arc::ptr_eq(&entry.gate, gate) && gate.is_live() => {
                update(&mut entry.record);
                true
            }
            _ => false,
        }
    }

    /// Unregister a slide.
    pub async fn remove(&self, name: &str) -> Option<(SlideRecord, Arc<SlideGate>)> {
        self.slides
            .write()
            .await
            .remove(name)
            .map(|e| (e.record, e.gate))
    }

    pub async fn len(&self) -> usize {
        self.slides.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.slides.read().await.is_empty()
    }
}

// =============================================================================
// Tests
// =============================================================================
