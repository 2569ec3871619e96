//! In-memory LRU for hot tiles.
//!
//! Tiles on disk are immutable for the lifetime of a conversion run, so the
//! cache never needs invalidating on write. It does need purging when a
//! slide's pyramid is cleared or deleted.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the total size of cached tiles in bytes and evicts
//! least-recently-used entries when the capacity is exceeded.
//!
//! # Purge Races
//!
//! A reader may load a tile from disk just before the slide is purged and
//! insert it just after. Every purge bumps a generation counter, and
//! [`TileCache::put_if_current`] drops inserts made against an older
//! generation.

use std::num::NonZeroUsize;
use std::sync::Arc;

use bytes::Bytes;
use lru::LruCache;
use tokio::sync::Mutex;

use super::encoder::TileFormat;

/// Default cache capacity: 64MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 64 * 1024 * 1024;

/// Default maximum number of entries (to bound LRU overhead)
const DEFAULT_MAX_ENTRIES: usize = 10_000;

/// Cache key for an encoded tile.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TileCacheKey {
    pub slide_id: Arc<str>,
    pub level: u32,
    pub col: u32,
    pub row: u32,
    pub format: TileFormat,
}

impl TileCacheKey {
    pub fn new(slide_id: impl Into<Arc<str>>, level: u32, col: u32, row: u32, format: TileFormat) -> Self {
        Self {
            slide_id: slide_id.into(),
            level,
            col,
            row,
            format,
        }
    }
}

struct CacheState {
    entries: LruCache<TileCacheKey, Bytes>,
    size: usize,
    generation: u64,
}

impl CacheState {
    fn evict_to(&mut self, max_size: usize) {
        while self.size > max_size {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.size = self.size.saturating_sub(evicted.len()),
                None => break,
            }
        }
    }
}

/// Size-bounded LRU of encoded tiles, shared across requests.
pub struct TileCache {
    state: Mutex<CacheState>,
    max_size: usize,
}

impl TileCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `max_size` bytes.
    pub fn with_capacity(max_size: usize) -> Self {
        Self::with_capacity_and_entries(max_size, DEFAULT_MAX_ENTRIES)
    }

    /// Create a cache bounded both in bytes and in entry count.
    pub fn with_capacity_and_entries(max_size: usize, max_entries: usize) -> Self {
        let max_entries = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            state: Mutex::new(CacheState {
                entries: LruCache::new(max_entries),
                size: 0,
                generation: 0,
            }),
            max_size,
        }
    }

    /// Look up a tile, marking it recently used.
    pub async fn get(&self, key: &TileCacheKey) -> Option<Bytes> {
        self.state.lock().await.entries.get(key).cloned()
    }

    /// Current purge generation; pass it to [`put_if_current`](Self::put_if_current).
    pub async fn generation(&self) -> u64 {
        self.state.lock().await.generation
    }

    /// Store a tile.
    pub async fn put(&self, key: TileCacheKey, data: Bytes) {
        let mut state = self.state.lock().await;
        Self::insert(&mut state, key, data, self.max_size);
    }

    /// Store a tile unless a purge happened since `generation` was read.
    ///
    /// Returns whether the tile was stored.
    pub async fn put_if_current(&self, key: TileCacheKey, data: Bytes, generation: u64) -> bool {
        let mut state = self.state.lock().await;
        if state.generation != generation {
            return false;
        }
        Self::insert(&mut state, key, data, self.max_size);
        true
    }

    fn insert(state: &mut CacheState, key: TileCacheKey, data: Bytes, max_size: usize) {
        if data.len() > max_size {
            return;
        }
        let added = data.len();
        // `push` hands back either the replaced value or the entry evicted
        // by the count limit
        if let Some((_, old)) = state.entries.push(key, data) {
            state.size = state.size.saturating_sub(old.len());
        }
        state.size += added;
        state.evict_to(max_size);
    }

    /// Drop every cached tile of one slide.
    pub async fn remove_slide(&self, slide_id: &str) -> usize {
        let mut state = self.state.lock().await;
        state.generation += 1;

        let doomed: Vec<TileCacheKey> = state
            .entries
            .iter()
            .filter(|(k, _)| &*k.slide_id == slide_id)
            .map(|(k, _)| k.clone())
            .collect();

        for key in &doomed {
            if let Some(data) = state.entries.pop(key) {
                state.size = state.size.saturating_sub(data.len());
            }
        }
        doomed.len()
    }

    pub async fn clear(&self) {
        let mut state = self.state.lock().await;
        state.generation += 1;
        state.entries.clear();
        state.size = 0;
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.entries.is_empty()
    }

    /// Total size of cached tiles in bytes.
    pub async fn size(&self) -> usize {
        self.state.lock().await.size
    }

    pub fn capacity(&self) -> usize {
        self.max_size
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================
