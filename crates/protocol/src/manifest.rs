/// # Manifest - persisted topology snapshot
///
/// Records every Part id and, per Part, every Block id with the Block's
/// checksum at the moment the snapshot was taken. Only ids are needed to
/// rebuild routing; the checksums let a restarted store check that block
/// data on disk still matches what was recorded.
///
/// The manifest is a snapshot, not a log: it is regenerated whole and never
/// patched in place.
use ident::{Checksum, Id};
use serde::{Deserialize, Serialize};

/// One Block entry inside a [`PartManifest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockManifest {
    pub block_id: Id,
    pub hash: Checksum,
}

/// One Part and its Blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartManifest {
    pub part_id: Id,
    pub blocks: Vec<BlockManifest>,
}

/// Ordered list of Parts making up a store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub parts: Vec<PartManifest>,
}

impl Manifest {
    /// Total number of blocks across all parts.
    #[must_use]
    pub fn block_count(&self) -> usize {
        self.parts.iter().map(|p| p.blocks.len()).sum()
    }

    pub fn part_ids(&self) -> impl Iterator<Item = &Id> {
        self.parts.iter().map(|p| &p.part_id)
    }

    pub fn blocks(&self) -> impl Iterator<Item = &BlockManifest> {
        self.parts.iter().flat_map(|p| p.blocks.iter())
    }

    /// Looks up the recorded checksum of a block.
    #[must_use]
    pub fn block_hash(&self, block_id: &Id) -> Option<Checksum> {
        self.blocks()
            .find(|b| &b.block_id == block_id)
            .map(|b| b.hash)
    }
}
