/// Part: a coarse shard owning a fixed set of Blocks, plus the closest-match
/// routing used at both levels of the hierarchy.
///
/// ## Routing
///
/// A key's fingerprint is compared with every candidate id by XOR distance;
/// the smallest distance wins. Candidates are kept sorted by id and only a
/// strictly smaller distance replaces the current best, so a tie (possible
/// only with duplicate ids) goes to the smallest id. The result depends on
/// nothing but the id set: not on insertion order, not on map iteration.
///
/// ```text
/// fingerprint ──closest──> Part ──closest──> Block ──slot_key──> Slot
/// ```
use ident::{xor_distance, Id};
use std::collections::HashMap;

use crate::Block;

/// Anything named by an [`Id`] that routing can select.
pub trait Shard {
    fn shard_id(&self) -> &Id;
}

impl Shard for Block {
    fn shard_id(&self) -> &Id {
        self.id()
    }
}

impl Shard for Part {
    fn shard_id(&self) -> &Id {
        &self.id
    }
}

/// Index of the shard closest to `target`, `None` if `shards` is empty.
///
/// Runs on every request: one pass, no allocation.
pub fn closest_index<T: Shard>(shards: &[T], target: &Id) -> Option<usize> {
    let mut best: Option<(usize, [u8; ident::ID_LEN])> = None;
    for (i, s) in shards.iter().enumerate() {
        let d = xor_distance(s.shard_id(), target);
        let closer = match best {
            Some((_, bd)) => d < bd,
            None => true,
        };
        if closer {
            best = Some((i, d));
        }
    }
    best.map(|(i, _)| i)
}

pub struct Part {
    id: Id,
    /// Sorted by id.
    blocks: Vec<Block>,
    /// numeric block key -> position in `blocks`
    index: HashMap<u64, usize>,
}

impl Part {
    /// Creates a part with no blocks; callers add them before routing.
    #[must_use]
    pub fn new(id: Id) -> Self {
        Self {
            id,
            blocks: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Creates a part owning `blocks`.
    #[must_use]
    pub fn with_blocks(id: Id, blocks: Vec<Block>) -> Self {
        let mut p = Self::new(id);
        p.blocks = blocks;
        p.reindex();
        p
    }

    /// Adds a block during topology construction.
    pub fn add_block(&mut self, block: Block) {
        self.blocks.push(block);
        self.reindex();
    }

    fn reindex(&mut self) {
        self.blocks.sort_by(|a, b| a.id().cmp(b.id()));
        self.index = self
            .blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id().numeric_key(), i))
            .collect();
    }

    #[must_use]
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Blocks in id order.
    #[must_use]
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Looks up a block by its numeric key.
    #[must_use]
    pub fn block(&self, numeric_key: u64) -> Option<&Block> {
        self.index.get(&numeric_key).map(|&i| &self.blocks[i])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Selects the block a fingerprint belongs to.
    ///
    /// Returns `None` only for a part without blocks.
    #[must_use]
    pub fn closest_block(&self, fingerprint: &Id) -> Option<&Block> {
        closest_index(&self.blocks, fingerprint).map(|i| &self.blocks[i])
    }

    /// Logical keys of live slots in this part starting with `prefix`.
    #[must_use]
    pub fn keys_with_prefix(&self, prefix: &str, now: u64) -> Vec<String> {
        self.blocks
            .iter()
            .flat_map(|b| b.keys_with_prefix(prefix, now))
            .collect()
    }
}

impl std::fmt::Debug for Part {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Part")
            .field("id", &self.id)
            .field("blocks", &self.blocks.len())
            .finish()
    }
}
