use super::helpers::memory_config;
use crate::*;
use anyhow::Result;
use ident::fingerprint;
use protocol::MAX_KEY_LEN;
use std::sync::Arc;
use std::thread;

// --------------------- Topology ---------------------

#[test]
fn in_memory_store_has_configured_topology() -> Result<()> {
    let store = Store::open(&memory_config(3, 5))?;
    assert_eq!(store.part_count(), 3);
    assert_eq!(store.block_count(), 15);
    assert!(store.parts().iter().all(|p| p.len() == 5));
    assert!(store.parts().windows(2).all(|w| w[0].id() < w[1].id()));
    Ok(())
}

#[test]
fn parts_are_indexed_by_numeric_key() -> Result<()> {
    let store = Store::open(&memory_config(4, 2))?;
    for p in store.parts() {
        assert_eq!(store.part(p.id().numeric_key()).unwrap().id(), p.id());
    }
    Ok(())
}

#[test]
fn zero_counts_are_rejected() {
    assert!(Store::open(&memory_config(0, 4)).is_err());
    assert!(Store::open(&memory_config(4, 0)).is_err());
}

// --------------------- Routing ---------------------

#[test]
fn route_is_closest_block_of_closest_part() -> Result<()> {
    let store = Store::open(&memory_config(4, 4))?;
    for i in 0..200 {
        let f = fingerprint(&format!("k{i}"));
        let part = store.closest_part(&f).unwrap();
        let block = part.closest_block(&f).unwrap();
        assert_eq!(store.route(&f).id(), block.id());
    }
    Ok(())
}

#[test]
fn route_is_deterministic() -> Result<()> {
    let store = Store::open(&memory_config(4, 4))?;
    let f = fingerprint("stable");
    let first = *store.route(&f).id();
    for _ in 0..100 {
        assert_eq!(store.route(&f).id(), &first);
    }
    Ok(())
}

#[test]
fn values_land_in_routed_block() -> Result<()> {
    let store = Store::open(&memory_config(2, 4))?;
    store.set("placed", b"v".to_vec(), 0)?;
    let f = fingerprint("placed");
    assert_eq!(store.route(&f).len(), 1);
    assert_eq!(store.slot_count(), 1);
    Ok(())
}

// --------------------- Key operations ---------------------

#[test]
fn set_get_del() -> Result<()> {
    let store = Store::open(&memory_config(2, 2))?;
    assert!(store.get("missing").is_none());

    store.set("a", b"1".to_vec(), 0)?;
    store.set("b", b"2".to_vec(), 0)?;
    assert_eq!(store.get("a").unwrap().value, b"1".to_vec());

    store.set("a", b"10".to_vec(), 0)?;
    assert_eq!(store.get("a").unwrap().value, b"10".to_vec());

    assert!(store.del("a"));
    assert!(!store.del("a"));
    assert!(store.get("a").is_none());
    assert_eq!(store.get("b").unwrap().value, b"2".to_vec());
    Ok(())
}

#[test]
fn empty_key_and_value_are_allowed() -> Result<()> {
    let store = Store::open(&memory_config(1, 1))?;
    store.set("", Vec::new(), 0)?;
    assert_eq!(store.get("").unwrap().value, Vec::<u8>::new());
    Ok(())
}

#[test]
fn oversized_key_is_rejected() -> Result<()> {
    let store = Store::open(&memory_config(1, 1))?;
    let key = "k".repeat(MAX_KEY_LEN + 1);
    assert!(store.set(&key, b"v".to_vec(), 0).is_err());
    store.set(&"k".repeat(MAX_KEY_LEN), b"v".to_vec(), 0)?;
    Ok(())
}

#[test]
fn expired_keys_are_invisible() -> Result<()> {
    let store = Store::open(&memory_config(2, 2))?;
    store.set("old", b"v".to_vec(), 1)?;
    store.set("new", b"v".to_vec(), unix_now() + 3600)?;
    assert!(store.get("old").is_none());
    assert!(store.get("new").is_some());
    assert_eq!(store.list_keys(""), vec!["new".to_string()]);
    assert_eq!(store.evict_expired(), 1);
    assert_eq!(store.slot_count(), 1);
    Ok(())
}

#[test]
fn list_and_count_by_prefix() -> Result<()> {
    let store = Store::open(&memory_config(4, 4))?;
    for i in 0..20 {
        store.set(&format!("user:{i:02}"), b"u".to_vec(), 0)?;
    }
    for i in 0..5 {
        store.set(&format!("order:{i}"), b"o".to_vec(), 0)?;
    }
    let users = store.list_keys("user:");
    assert_eq!(users.len(), 20);
    assert_eq!(users[0], "user:00");
    assert!(users.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(store.count_keys("order:"), 5);
    assert_eq!(store.count_keys(""), 25);
    assert_eq!(store.count_keys("nothing"), 0);
    Ok(())
}

// --------------------- Concurrency ---------------------

#[test]
fn concurrent_clients_share_one_store() -> Result<()> {
    let store = Arc::new(Store::open(&memory_config(4, 8))?);
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                for i in 0..200 {
                    let key = format!("t{t}:{i}");
                    store.set(&key, key.as_bytes().to_vec(), 0).unwrap();
                    assert_eq!(store.get(&key).unwrap().value, key.as_bytes());
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }
    assert_eq!(store.count_keys("t"), 8 * 200);
    Ok(())
}

#[test]
fn debug_output_mentions_counts() -> Result<()> {
    let store = Store::open(&memory_config(2, 3))?;
    let dbg = format!("{:?}", store);
    assert!(dbg.contains("parts: 2"));
    assert!(dbg.contains("blocks: 6"));
    Ok(())
}
