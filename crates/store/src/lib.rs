//! # Store - ShardKV storage core
//!
//! Owns the two-level shard hierarchy and routes every key to exactly one
//! Block.
//!
//! ## Architecture
//!
//! ```text
//! key ──fingerprint()──> Id
//!                         │
//! ┌───────────────────────┼────────────────────────────┐
//! │ STORE                 v                            │
//! │   closest_part()  ──> Part (XOR-closest id)        │
//! │   closest_block() ──> Block (XOR-closest id)       │
//! │   slot_key()      ──> Slot (per-Block RwLock)      │
//! │                                                    │
//! │ manifest.rs  first run: random topology + MANIFEST │
//! │              restart:   rebuild shells from it     │
//! │ recovery.rs  block files -> slots, tmp cleanup     │
//! │ flush.rs     dirty blocks -> files, new snapshot   │
//! └────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module         | Purpose                                              |
//! |----------------|------------------------------------------------------|
//! | [`lib.rs`]     | `Store` struct, `open`, routing, key operations      |
//! | [`block`]      | `Block`, `Slot`, checksums                            |
//! | [`part`]       | `Part`, closest-match routing                         |
//! | [`manifest`]   | `ensure_manifest`, snapshot, verification, file I/O  |
//! | [`block_file`] | Block data file format                               |
//! | [`recovery`]   | Loading block files at startup                       |
//! | [`flush`]      | Write-back of dirty blocks                           |
//!
//! ## Concurrency
//!
//! The Part and Block sets are built by [`Store::open`] before the store is
//! shared and never change afterwards, so routing takes no locks. Slot maps
//! are guarded per Block. Share a store between threads with `Arc<Store>`.
mod block;
pub mod block_file;
mod flush;
pub mod manifest;
mod part;
mod recovery;

pub use block::{Block, Slot};
pub use block_file::BlockFile;
pub use manifest::{ChecksumMismatch, ManifestState, MANIFEST_FILENAME};
pub use part::{closest_index, Part, Shard};

use anyhow::{ensure, Result};
use config::StoreConfig;
use ident::{fingerprint, random_id, Id};
use protocol::MAX_KEY_LEN;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{info, warn};

/// Current unix time in seconds.
#[must_use]
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Root aggregate: every Part, keyed by numeric part key.
pub struct Store {
    pub(crate) dir: PathBuf,
    pub(crate) persist: bool,
    /// Sorted by id.
    pub(crate) parts: Vec<Part>,
    /// numeric part key -> position in `parts`
    pub(crate) index: HashMap<u64, usize>,
    /// Serializes write-back so two flushes never race on the same tmp file.
    pub(crate) flush_lock: Mutex<()>,
    /// Set when block files were written but the manifest rewrite failed.
    pub(crate) manifest_stale: AtomicBool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("dir", &self.dir)
            .field("persist", &self.persist)
            .field("parts", &self.parts.len())
            .field("blocks", &self.block_count())
            .field("slots", &self.slot_count())
            .field("dirty_blocks", &self.dirty_block_count())
            .finish()
    }
}

impl Store {
    /// Creates a store with no topology. [`Store::ensure_manifest`] or
    /// [`Store::open`] fills it in.
    pub(crate) fn new<P: AsRef<Path>>(dir: P, persist: bool) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            persist,
            parts: Vec::new(),
            index: HashMap::new(),
            flush_lock: Mutex::new(()),
            manifest_stale: AtomicBool::new(false),
        }
    }

    /// Builds the store described by `cfg`, ready to serve.
    ///
    /// # Steps
    ///
    /// 1. Validate the configuration.
    /// 2. With persistence on: create the directory, drop leftover
    ///    `.blk.tmp` files, then [`ensure_manifest`](Store::ensure_manifest).
    /// 3. If the topology came from an existing manifest, load block files
    ///    and compare their checksums with the manifest (mismatches are
    ///    logged).
    /// 4. With persistence off: generate a random topology in memory.
    ///
    /// # Errors
    ///
    /// Any failure here is fatal for the caller: a store with an unknown
    /// topology cannot know where keys live.
    pub fn open(cfg: &StoreConfig) -> Result<Self> {
        cfg.validate()?;
        let mut store = Self::new(&cfg.dir, cfg.persist);

        if cfg.persist {
            store.prepare_dir()?;
        }

        match store.ensure_manifest(cfg)? {
            ManifestState::Disabled => {
                store.generate_topology(cfg.parts, cfg.blocks)?;
                info!(
                    parts = store.part_count(),
                    blocks = store.block_count(),
                    "persistence disabled, using in-memory topology"
                );
            }
            ManifestState::Created => {}
            ManifestState::Loaded(manifest) => {
                let loaded = store.load_block_files()?;
                let mismatches = store.verify(&manifest);
                for m in &mismatches {
                    warn!(block = %m.block_id, expected = %m.expected, actual = ?m.actual, "block checksum differs from manifest");
                }
                info!(
                    blocks_loaded = loaded,
                    mismatches = mismatches.len(),
                    "block files loaded"
                );
            }
        }

        store.check_topology()?;
        Ok(store)
    }

    /// Every part must hold at least one block, and there must be a part.
    fn check_topology(&self) -> Result<()> {
        ensure!(!self.parts.is_empty(), "store topology has no parts");
        for p in &self.parts {
            ensure!(!p.is_empty(), "part {} has no blocks", p.id());
        }
        Ok(())
    }

    /// Generates `parts` parts of `blocks` blocks each, all with fresh
    /// random ids, replacing any existing topology.
    pub(crate) fn generate_topology(&mut self, parts: usize, blocks: usize) -> Result<()> {
        let mut out = Vec::with_capacity(parts);
        for _ in 0..parts {
            let mut part = Part::new(random_id()?);
            for _ in 0..blocks {
                part.add_block(Block::new(random_id()?));
            }
            out.push(part);
        }
        self.set_parts(out);
        Ok(())
    }

    /// Installs a complete part set.
    pub(crate) fn set_parts(&mut self, mut parts: Vec<Part>) {
        parts.sort_by(|a, b| a.id().cmp(b.id()));
        self.index = parts
            .iter()
            .enumerate()
            .map(|(i, p)| (p.id().numeric_key(), i))
            .collect();
        self.parts = parts;
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    #[must_use]
    pub fn persist(&self) -> bool {
        self.persist
    }

    /// Parts in id order.
    #[must_use]
    pub fn parts(&self) -> &[Part] {
        &self.parts
    }

    /// Looks up a part by its numeric key.
    #[must_use]
    pub fn part(&self, numeric_key: u64) -> Option<&Part> {
        self.index.get(&numeric_key).map(|&i| &self.parts[i])
    }

    #[must_use]
    pub fn part_count(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn block_count(&self) -> usize {
        self.parts.iter().map(Part::len).sum()
    }

    /// Total slots, including expired ones not yet evicted.
    #[must_use]
    pub fn slot_count(&self) -> usize {
        self.blocks().map(Block::len).sum()
    }

    #[must_use]
    pub fn dirty_block_count(&self) -> usize {
        self.blocks().filter(|b| b.is_dirty()).count()
    }

    /// Whether the manifest on disk lags behind the block files.
    #[must_use]
    pub fn manifest_stale(&self) -> bool {
        self.manifest_stale.load(Ordering::Acquire)
    }

    /// Every block, part by part.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.parts.iter().flat_map(|p| p.blocks().iter())
    }

    // -------------------- Routing --------------------

    /// Selects the part a fingerprint belongs to.
    #[must_use]
    pub fn closest_part(&self, fingerprint: &Id) -> Option<&Part> {
        closest_index(&self.parts, fingerprint).map(|i| &self.parts[i])
    }

    /// Routes a fingerprint to its block: closest part, then closest block
    /// within it.
    ///
    /// Stores are only handed out by [`Store::open`], which guarantees at
    /// least one part, each with at least one block.
    #[must_use]
    pub fn route(&self, fingerprint: &Id) -> &Block {
        let part = &self.parts[closest_index(&self.parts, fingerprint).unwrap_or_default()];
        &part.blocks()[closest_index(part.blocks(), fingerprint).unwrap_or_default()]
    }

    // -------------------- Key operations --------------------

    /// Returns the live slot for `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Slot> {
        let f = fingerprint(key);
        self.route(&f).get(&f.slot_key(), unix_now())
    }

    /// Stores `value` under `key`. `expires` is unix seconds, 0 for never.
    ///
    /// # Errors
    ///
    /// Rejects keys that could not be carried by the wire protocol.
    pub fn set(&self, key: &str, value: Vec<u8>, expires: u64) -> Result<()> {
        ensure!(
            key.len() <= MAX_KEY_LEN,
            "key too large: {} bytes (max {})",
            key.len(),
            MAX_KEY_LEN
        );
        let f = fingerprint(key);
        self.route(&f)
            .set(f.slot_key(), Slot::new(key, value, expires));
        Ok(())
    }

    /// Deletes `key`, returning `true` if a live value was removed.
    pub fn del(&self, key: &str) -> bool {
        let f = fingerprint(key);
        self.route(&f).del(&f.slot_key(), unix_now())
    }

    /// Live keys starting with `prefix`, sorted.
    #[must_use]
    pub fn list_keys(&self, prefix: &str) -> Vec<String> {
        let now = unix_now();
        let mut keys: Vec<String> = self
            .parts
            .iter()
            .flat_map(|p| p.keys_with_prefix(prefix, now))
            .collect();
        keys.sort();
        keys
    }

    /// Number of live keys starting with `prefix`.
    #[must_use]
    pub fn count_keys(&self, prefix: &str) -> usize {
        let now = unix_now();
        self.blocks()
            .map(|b| b.keys_with_prefix(prefix, now).len())
            .sum()
    }

    /// Removes expired slots from every block.
    pub fn evict_expired(&self) -> usize {
        let now = unix_now();
        self.blocks().map(|b| b.evict_expired(now)).sum()
    }
}

/// Best-effort write-back on drop.
///
/// Errors are logged, not propagated: Drop cannot return them, and the block
/// files from the last successful flush are still intact.
impl Drop for Store {
    fn drop(&mut self) {
        if self.persist && (self.dirty_block_count() > 0 || self.manifest_stale()) {
            if let Err(e) = self.flush() {
                warn!(error = %e, "write-back on drop failed");
            }
        }
    }
}

#[cfg(test)]
mod tests;
