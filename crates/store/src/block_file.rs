//! Block data files: one per Block, holding its slots.
//!
//! ## File layout
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ RECORDS (in slot-key order)                                  │
//! │                                                              │
//! │ crc32 (u32) | slot_key_len (u32) | slot_key                  │
//! │ key_len (u32) | key | expires (u64) | val_len (u64) | val    │
//! │                                                              │
//! │ The CRC32 covers everything after itself in the record.      │
//! ├──────────────────────────────────────────────────────────────┤
//! │ FOOTER (always last 12 bytes)                                │
//! │                                                              │
//! │ record_count (u64 LE) | magic (u32 LE) "BLK1"                │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! All integers are little-endian. Files are named `<hex block id>.blk`
//! inside `<store dir>/blocks/` and are replaced atomically: written to
//! `.blk.tmp`, fsynced, then renamed over the old file.

use anyhow::{bail, Context, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use crc32fast::Hasher as Crc32;
use ident::Id;
use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::Slot;

/// Magic number identifying block files (ASCII "BLK1").
pub const BLOCK_MAGIC: u32 = 0x424C_4B31;

/// Size of the footer: 8 (`record_count`) + 4 (`magic`).
pub const BLOCK_FOOTER_BYTES: usize = 8 + 4;

/// Subdirectory of the store directory holding block files.
pub const BLOCKS_DIR: &str = "blocks";

pub const BLOCK_EXT: &str = "blk";
pub const BLOCK_TMP_EXT: &str = "blk.tmp";

/// Reads and writes block data files. Stateless.
pub struct BlockFile {}

impl BlockFile {
    /// Path of the data file for `id` under the store directory `dir`.
    #[must_use]
    pub fn path(dir: &Path, id: &Id) -> PathBuf {
        dir.join(BLOCKS_DIR).join(format!("{}.{}", id, BLOCK_EXT))
    }

    /// Writes `slots` to `path`, replacing any existing file.
    ///
    /// `slots` must be in slot-key order, as [`crate::Block::snapshot`] returns them.
    pub fn write(path: &Path, slots: &[(String, Slot)]) -> Result<()> {
        let tmp_path = path.with_extension(BLOCK_TMP_EXT);
        let raw_file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&tmp_path)
            .with_context(|| format!("failed to create block file {}", tmp_path.display()))?;
        let mut file = BufWriter::new(raw_file);

        // Reusable buffer for the record body so it can be CRC'd before writing.
        let mut body: Vec<u8> = Vec::with_capacity(256);

        for (slot_key, slot) in slots {
            body.clear();
            body.write_u32::<LittleEndian>(slot_key.len() as u32)?;
            body.extend_from_slice(slot_key.as_bytes());
            body.write_u32::<LittleEndian>(slot.key.len() as u32)?;
            body.extend_from_slice(slot.key.as_bytes());
            body.write_u64::<LittleEndian>(slot.expires)?;
            body.write_u64::<LittleEndian>(slot.value.len() as u64)?;
            body.extend_from_slice(&slot.value);

            let mut hasher = Crc32::new();
            hasher.update(&body);
            file.write_u32::<LittleEndian>(hasher.finalize())?;
            file.write_all(&body)?;
        }

        file.write_u64::<LittleEndian>(slots.len() as u64)?;
        file.write_u32::<LittleEndian>(BLOCK_MAGIC)?;

        file.flush()?;
        file.into_inner()
            .map_err(|e| e.into_error())?
            .sync_all()?;

        fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to move block file into place at {}", path.display()))?;

        // The rename is only durable once the directory entry is synced.
        if let Some(parent) = path.parent() {
            if let Ok(dir) = fs::File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(())
    }

    /// Reads every slot from a block file, verifying each record's CRC.
    ///
    /// # Errors
    ///
    /// Fails if the file is shorter than the footer, carries the wrong magic,
    /// holds a record whose CRC does not match, or holds a different number
    /// of records than the footer announces.
    pub fn read(path: &Path) -> Result<BTreeMap<String, Slot>> {
        let data = fs::read(path)
            .with_context(|| format!("failed to read block file {}", path.display()))?;

        if data.len() < BLOCK_FOOTER_BYTES {
            bail!("block file too small: {}", path.display());
        }
        let (records, mut footer) = data.split_at(data.len() - BLOCK_FOOTER_BYTES);
        let count = footer.read_u64::<LittleEndian>()?;
        let magic = footer.read_u32::<LittleEndian>()?;
        if magic != BLOCK_MAGIC {
            bail!("bad block file magic {:#x} in {}", magic, path.display());
        }

        let mut slots = BTreeMap::new();
        let mut r = records;
        while !r.is_empty() {
            let crc = r.read_u32::<LittleEndian>()?;
            let start = r;

            let slot_key = read_str(&mut r)?;
            let key = read_str(&mut r)?;
            let expires = r.read_u64::<LittleEndian>()?;
            let val_len = r.read_u64::<LittleEndian>()?;
            if val_len > r.len() as u64 {
                bail!("corrupt block file {}: value runs past end", path.display());
            }
            let mut value = vec![0u8; val_len as usize];
            r.read_exact(&mut value)?;

            let body = &start[..start.len() - r.len()];
            let mut hasher = Crc32::new();
            hasher.update(body);
            if hasher.finalize() != crc {
                bail!("corrupt block file {}: crc mismatch", path.display());
            }

            slots.insert(
                slot_key,
                Slot {
                    key,
                    value,
                    expires,
                },
            );
        }

        if slots.len() as u64 != count {
            bail!(
                "corrupt block file {}: footer says {} records, found {}",
                path.display(),
                count,
                slots.len()
            );
        }

        Ok(slots)
    }
}

/// Reads a u32-length-prefixed UTF-8 string from the front of `r`.
fn read_str(r: &mut &[u8]) -> Result<String> {
    let len = r.read_u32::<LittleEndian>()? as usize;
    if len > r.len() {
        bail!("string length {} runs past end of block file", len);
    }
    let bytes: &[u8] = *r;
    let (head, tail) = bytes.split_at(len);
    let s = String::from_utf8(head.to_vec()).context("block file string is not utf-8")?;
    *r = tail;
    Ok(s)
}
