/// # Manifest - topology persistence
///
/// The manifest is how a store remembers its shape. Routing is a pure
/// function of Part and Block ids, so persisting the ids alone is enough
/// to send every key back to the same Block after a restart.
///
/// ## File Format
///
/// `<store dir>/manifest.json`, a JSON document:
///
/// ```text
/// {"parts":[{"part_id":"<hex>","blocks":[{"block_id":"<hex>","hash":"<hex>"}, ...]}, ...]}
/// ```
///
/// ## Crash Safety
///
/// Written atomically: `.tmp` file, fsync, rename. On filesystems where the
/// rename over an existing file fails, the manifest is rewritten in place.
use anyhow::{Context, Result};
use ident::{Checksum, Id};
use protocol::{BlockManifest, Manifest, PartManifest};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, Write};
use std::path::Path;
use tracing::info;

use crate::{Block, Part, Store};

/// Name of the manifest file within the store directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Temporary file used during atomic manifest writes.
const MANIFEST_TMP_FILENAME: &str = "manifest.json.tmp";

/// What [`Store::ensure_manifest`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestState {
    /// Persistence is off; nothing was read or written.
    Disabled,
    /// No manifest existed; a random topology was generated and recorded.
    Created,
    /// The topology was rebuilt from this manifest.
    Loaded(Manifest),
}

/// A block whose current checksum differs from the manifest's record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChecksumMismatch {
    pub block_id: Id,
    pub expected: Checksum,
    /// `None` when the manifest names a block the store does not have.
    pub actual: Option<Checksum>,
}

/// Reads and decodes `<dir>/manifest.json`, `Ok(None)` if it does not exist.
pub fn read_manifest(dir: &Path) -> Result<Option<Manifest>> {
    let path = dir.join(MANIFEST_FILENAME);
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(&path)
        .with_context(|| format!("failed to open manifest at {}", path.display()))?;
    let manifest = serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("failed to decode manifest at {}", path.display()))?;
    Ok(Some(manifest))
}

/// Encodes and writes `manifest` to `<dir>/manifest.json`, replacing any
/// previous one.
pub fn write_manifest(dir: &Path, manifest: &Manifest) -> Result<()> {
    let path = dir.join(MANIFEST_FILENAME);
    let tmp_path = dir.join(MANIFEST_TMP_FILENAME);
    let bytes = serde_json::to_vec_pretty(manifest)?;

    write_synced(&tmp_path, &bytes).with_context(|| {
        format!(
            "failed to create manifest, check directory exists: {}",
            dir.display()
        )
    })?;

    if fs::rename(&tmp_path, &path).is_err() {
        write_synced(&path, &bytes)
            .with_context(|| format!("failed to write manifest at {}", path.display()))?;
        let _ = fs::remove_file(&tmp_path);
    }

    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut f = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)?;
    f.write_all(bytes)?;
    f.flush()?;
    f.sync_all()
}

impl Store {
    /// Makes sure the store has a topology and that it is recorded on disk.
    ///
    /// - Persistence off: no-op, returns [`ManifestState::Disabled`].
    /// - No manifest: generates `cfg.parts` parts of `cfg.blocks` blocks with
    ///   random ids, then writes the manifest.
    /// - Manifest present: rebuilds empty Part/Block shells with the recorded
    ///   ids. Slot contents are not touched here.
    ///
    /// # Errors
    ///
    /// Failing to create the manifest, or to decode an existing one, is an
    /// error the caller must not recover from.
    pub fn ensure_manifest(&mut self, cfg: &config::StoreConfig) -> Result<ManifestState> {
        if !cfg.persist {
            return Ok(ManifestState::Disabled);
        }

        match read_manifest(&self.dir)? {
            None => {
                info!(
                    dir = %self.dir.display(),
                    parts = cfg.parts,
                    blocks = cfg.blocks,
                    "no manifest found, creating topology"
                );
                self.generate_topology(cfg.parts, cfg.blocks)?;
                write_manifest(&self.dir, &self.manifest())?;
                Ok(ManifestState::Created)
            }
            Some(manifest) => {
                self.rebuild_from(&manifest);
                info!(
                    parts = self.part_count(),
                    blocks = self.block_count(),
                    "initialised topology from manifest"
                );
                Ok(ManifestState::Loaded(manifest))
            }
        }
    }

    /// Replaces the topology with empty shells carrying the manifest's ids.
    pub(crate) fn rebuild_from(&mut self, manifest: &Manifest) {
        let parts = manifest
            .parts
            .iter()
            .map(|pm| {
                let blocks = pm.blocks.iter().map(|bm| Block::new(bm.block_id)).collect();
                Part::with_blocks(pm.part_id, blocks)
            })
            .collect();
        self.set_parts(parts);
    }

    /// Point-in-time snapshot of the topology with current block checksums.
    #[must_use]
    pub fn manifest(&self) -> Manifest {
        Manifest {
            parts: self
                .parts
                .iter()
                .map(|part| PartManifest {
                    part_id: *part.id(),
                    blocks: part
                        .blocks()
                        .iter()
                        .map(|block| BlockManifest {
                            block_id: *block.id(),
                            hash: block.checksum(),
                        })
                        .collect(),
                })
                .collect(),
        }
    }

    /// Compares every block the manifest names with the store's current
    /// contents.
    #[must_use]
    pub fn verify(&self, manifest: &Manifest) -> Vec<ChecksumMismatch> {
        let mut out = Vec::new();
        for pm in &manifest.parts {
            let part = self.part(pm.part_id.numeric_key());
            for bm in &pm.blocks {
                let actual = part
                    .and_then(|p| p.block(bm.block_id.numeric_key()))
                    .map(Block::checksum);
                if actual != Some(bm.hash) {
                    out.push(ChecksumMismatch {
                        block_id: bm.block_id,
                        expected: bm.hash,
                        actual,
                    });
                }
            }
        }
        out
    }
}
