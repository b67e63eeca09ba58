use crate::*;
use config::StoreConfig;
use ident::random_id;
use std::path::Path;
use std::time::Duration;

/// A part with `blocks` random blocks, each holding `slots` random slots.
pub fn test_part(blocks: usize, slots: usize) -> Part {
    let mut p = Part::new(random_id().unwrap());
    for _ in 0..blocks {
        let block = Block::new(random_id().unwrap());
        for _ in 0..slots {
            let slot_id = random_id().unwrap();
            block.set(
                slot_id.slot_key(),
                Slot::new(slot_id.to_string(), slot_id.as_bytes().to_vec(), 0),
            );
        }
        p.add_block(block);
    }
    p
}

pub fn test_config(dir: &Path, parts: usize, blocks: usize) -> StoreConfig {
    StoreConfig {
        dir: dir.to_path_buf(),
        parts,
        blocks,
        persist: true,
        write_period: Duration::from_secs(1),
    }
}

pub fn memory_config(parts: usize, blocks: usize) -> StoreConfig {
    StoreConfig {
        persist: false,
        ..test_config(Path::new("unused"), parts, blocks)
    }
}

/// Sorted block ids of a store.
pub fn block_ids(store: &Store) -> Vec<ident::Id> {
    let mut ids: Vec<_> = store.blocks().map(|b| *b.id()).collect();
    ids.sort();
    ids
}

/// Sorted part ids of a store.
pub fn part_ids(store: &Store) -> Vec<ident::Id> {
    store.parts().iter().map(|p| *p.id()).collect()
}
