/// Cold-start path for block contents: directory preparation, tmp file
/// cleanup, and filling Block shells from their data files.
use anyhow::{Context, Result};
use std::fs;
use tracing::debug;

use crate::block_file::{BlockFile, BLOCKS_DIR, BLOCK_TMP_EXT};
use crate::Store;

impl Store {
    /// Creates the store and block directories, then removes leftover
    /// `.blk.tmp` files from interrupted write-backs.
    pub(crate) fn prepare_dir(&self) -> Result<()> {
        let blocks_dir = self.dir.join(BLOCKS_DIR);
        fs::create_dir_all(&blocks_dir)
            .with_context(|| format!("failed to create store directory {}", blocks_dir.display()))?;

        if let Ok(entries) = fs::read_dir(&blocks_dir) {
            for entry in entries.flatten() {
                let p = entry.path();
                if let Some(name) = p.file_name().and_then(|n| n.to_str()) {
                    if name.ends_with(BLOCK_TMP_EXT) {
                        debug!(file = name, "removing interrupted block write");
                        let _ = fs::remove_file(&p);
                    }
                }
            }
        }
        Ok(())
    }

    /// Fills every block from its data file, returning how many files were
    /// found. A block without a file stays empty.
    ///
    /// # Errors
    ///
    /// A block file that exists but cannot be decoded.
    pub(crate) fn load_block_files(&self) -> Result<usize> {
        let mut loaded = 0;
        for block in self.blocks() {
            let path = BlockFile::path(&self.dir, block.id());
            if !path.exists() {
                continue;
            }
            let slots = BlockFile::read(&path)?;
            block.replace_slots(slots);
            loaded += 1;
        }
        Ok(loaded)
    }
}
