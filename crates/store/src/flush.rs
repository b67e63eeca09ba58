/// Write-back: persists dirty blocks and refreshes the manifest snapshot.
///
/// Each dirty block is written to its own file (atomic temp + rename). Once
/// at least one block has been written, the manifest is regenerated whole so
/// its checksums describe what is now on disk. A failed manifest rewrite is
/// retried by the next flush.
use anyhow::Result;
use std::fs;
use std::sync::atomic::Ordering;
use tracing::debug;

use crate::block_file::{BlockFile, BLOCKS_DIR};
use crate::manifest::write_manifest;
use crate::Store;

impl Store {
    /// Writes every dirty block, returning how many were written.
    ///
    /// No-op (returns 0) when persistence is disabled.
    ///
    /// # Errors
    ///
    /// Stops at the first failing block; that block stays dirty so the next
    /// flush retries it. If the manifest rewrite fails, the store remembers
    /// and the next flush rewrites it even when no block is dirty.
    pub fn flush(&self) -> Result<usize> {
        if !self.persist {
            return Ok(0);
        }
        let _guard = self.flush_lock.lock().unwrap_or_else(|e| e.into_inner());

        fs::create_dir_all(self.dir.join(BLOCKS_DIR))?;

        let mut written = 0;
        let result = self.write_dirty_blocks(&mut written);
        if written > 0 {
            self.manifest_stale.store(true, Ordering::Release);
        }
        result?;

        if self.manifest_stale.load(Ordering::Acquire) {
            write_manifest(&self.dir, &self.manifest())?;
            self.manifest_stale.store(false, Ordering::Release);
            debug!(blocks = written, "write-back complete");
        }
        Ok(written)
    }

    fn write_dirty_blocks(&self, written: &mut usize) -> Result<()> {
        for block in self.blocks() {
            // clear the flag before the snapshot so racing writes re-mark it
            if !block.take_dirty() {
                continue;
            }
            let path = BlockFile::path(&self.dir, block.id());
            if let Err(e) = BlockFile::write(&path, &block.snapshot()) {
                block.mark_dirty();
                return Err(e);
            }
            *written += 1;
        }
        Ok(())
    }
}
