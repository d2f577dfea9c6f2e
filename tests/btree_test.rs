use std::sync::Arc;
use anyhow::Result;

use cobaltdb::common::types::{PageId, Rid};
use cobaltdb::storage::buffer::BufferPoolManager;
use cobaltdb::index::btree::{BPlusTree, BTreeNode};
use cobaltdb::index::btree::serialization::deserialize_node;

mod common;
use common::create_test_buffer_pool;

fn rid(key: i64) -> Rid {
    Rid::new(key as u32, 0)
}

fn read_node(buffer_pool: &Arc<BufferPoolManager>, page_id: PageId) -> Result<BTreeNode<i64>> {
    let page = buffer_pool.fetch_page(page_id)?.expect("node page resident or on disk");
    let node = {
        let guard = page.read();
        deserialize_node::<i64>(&guard)?
    };
    buffer_pool.unpin_page(page_id, false)?;
    Ok(node)
}

fn leaf_keys(node: &BTreeNode<i64>) -> Vec<i64> {
    node.leaf_entries().iter().map(|(k, _)| *k).collect()
}

#[test]
fn test_insert_and_lookup() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 4, 4);

    assert!(tree.is_empty());
    assert_eq!(tree.get(&42)?, None);

    for key in [5i64, 9, 1, 7, 3] {
        assert!(tree.insert(key, rid(key))?);
    }

    for key in [1i64, 3, 5, 7, 9] {
        assert_eq!(tree.get(&key)?, Some(rid(key)), "key {} missing", key);
    }
    assert_eq!(tree.get(&4)?, None);

    Ok(())
}

#[test]
fn test_duplicate_insert_is_rejected_without_mutation() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 4, 4);

    assert!(tree.insert(10, rid(10))?);
    assert!(!tree.insert(10, Rid::new(99, 99))?);
    assert_eq!(tree.get(&10)?, Some(rid(10)));

    Ok(())
}

#[test]
fn test_remove_missing_key_is_noop() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 4, 4);

    assert!(!tree.remove(&1)?);
    tree.insert(1, rid(1))?;
    assert!(!tree.remove(&2)?);
    assert_eq!(tree.get(&1)?, Some(rid(1)));

    Ok(())
}

#[test]
fn test_split_and_merge_shapes() -> Result<()> {
    // leaf_max = 3, internal_max = 3
    let (buffer_pool, _temp_file) = create_test_buffer_pool(32)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool.clone(), 3, 3);

    for key in 1..=5i64 {
        assert!(tree.insert(key, rid(key))?);
    }

    // One internal root with keys [3, 5] over leaves {1,2}, {3,4}, {5}
    let root = read_node(&buffer_pool, tree.root_page_id())?;
    assert!(!root.is_leaf());
    assert_eq!(root.internal_keys(), &[3, 5]);
    let children = root.internal_children().to_vec();
    assert_eq!(children.len(), 3);

    let first = read_node(&buffer_pool, children[0])?;
    let second = read_node(&buffer_pool, children[1])?;
    let third = read_node(&buffer_pool, children[2])?;
    assert_eq!(leaf_keys(&first), vec![1, 2]);
    assert_eq!(leaf_keys(&second), vec![3, 4]);
    assert_eq!(leaf_keys(&third), vec![5]);
    assert_eq!(first.next_page_id(), children[1]);
    assert_eq!(second.next_page_id(), children[2]);

    // Deleting 3 leaves its leaf exactly at the minimum; no rebalance yet
    assert!(tree.remove(&3)?);

    let root = read_node(&buffer_pool, tree.root_page_id())?;
    assert_eq!(root.internal_keys(), &[3, 5]);
    let children = root.internal_children().to_vec();
    let second = read_node(&buffer_pool, children[1])?;
    assert_eq!(leaf_keys(&second), vec![4]);

    // Emptying that leaf underflows it; it merges into its left sibling
    // and the separator comes out of the root
    assert!(tree.remove(&4)?);

    let root = read_node(&buffer_pool, tree.root_page_id())?;
    assert!(!root.is_leaf());
    assert_eq!(root.internal_keys(), &[5]);
    let children = root.internal_children().to_vec();
    assert_eq!(children.len(), 2);

    let left = read_node(&buffer_pool, children[0])?;
    let right = read_node(&buffer_pool, children[1])?;
    assert_eq!(leaf_keys(&left), vec![1, 2]);
    assert_eq!(leaf_keys(&right), vec![5]);
    assert_eq!(left.next_page_id(), children[1]);

    // Draining the right leaf merges again and the one-child internal
    // root hands the root role down to the surviving leaf
    assert!(tree.remove(&5)?);

    let root = read_node(&buffer_pool, tree.root_page_id())?;
    assert!(root.is_leaf());
    assert_eq!(leaf_keys(&root), vec![1, 2]);
    assert_eq!(root.next_page_id(), cobaltdb::common::types::INVALID_PAGE_ID);

    Ok(())
}

#[test]
fn test_iterator_yields_sorted_entries() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 4, 4);

    let mut keys: Vec<i64> = (1..=50).collect();
    // Insert in a scrambled order
    keys.reverse();
    for &key in &keys {
        tree.insert(key, rid(key))?;
    }

    let mut iter = tree.iter()?;
    let mut seen = Vec::new();
    while let Some((key, value)) = iter.next_entry()? {
        assert_eq!(value, rid(key));
        seen.push(key);
    }
    assert_eq!(seen, (1..=50).collect::<Vec<i64>>());

    Ok(())
}

#[test]
fn test_iter_from_starts_at_lower_bound() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 4, 4);

    for key in (2..=20i64).step_by(2) {
        tree.insert(key, rid(key))?;
    }

    // 7 is absent; the iterator starts at the next present key
    let mut iter = tree.iter_from(&7)?;
    let mut seen = Vec::new();
    while let Some((key, _)) = iter.next_entry()? {
        seen.push(key);
    }
    assert_eq!(seen, vec![8, 10, 12, 14, 16, 18, 20]);

    Ok(())
}

#[test]
fn test_delete_everything_empties_tree() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(64)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 3, 3);

    for key in 1..=30i64 {
        tree.insert(key, rid(key))?;
    }
    for key in 1..=30i64 {
        assert!(tree.remove(&key)?, "failed removing {}", key);
    }

    assert!(tree.is_empty());
    for key in 1..=30i64 {
        assert_eq!(tree.get(&key)?, None);
    }

    // The emptied tree accepts inserts again
    tree.insert(7, rid(7))?;
    assert_eq!(tree.get(&7)?, Some(rid(7)));

    Ok(())
}

#[test]
fn test_large_workload_with_small_nodes() -> Result<()> {
    // Small nodes force deep trees and frequent structural changes
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 3, 3);

    let keys: Vec<i64> = (0..400).map(|i| (i * 37) % 1000).collect();
    let mut inserted = Vec::new();
    for &key in &keys {
        if tree.insert(key, rid(key))? {
            inserted.push(key);
        }
    }

    inserted.sort_unstable();
    let mut iter = tree.iter()?;
    let mut seen = Vec::new();
    while let Some((key, _)) = iter.next_entry()? {
        seen.push(key);
    }
    assert_eq!(seen, inserted);

    // Remove every other key and re-verify
    for key in inserted.iter().step_by(2) {
        assert!(tree.remove(key)?);
    }
    for (i, key) in inserted.iter().enumerate() {
        let expected = if i % 2 == 0 { None } else { Some(rid(*key)) };
        assert_eq!(tree.get(key)?, expected, "key {}", key);
    }

    Ok(())
}

#[test]
fn test_randomized_insert_delete_mix() -> Result<()> {
    use rand::prelude::*;

    // Seeded so a failure replays identically
    let mut rng = StdRng::seed_from_u64(0xC0BA17);
    let (buffer_pool, _temp_file) = create_test_buffer_pool(128)?;
    let tree: BPlusTree<i64> = BPlusTree::new(buffer_pool, 4, 4);

    let mut reference = std::collections::BTreeMap::new();
    for _ in 0..1000 {
        let key = rng.gen_range(0..300i64);
        if rng.gen_bool(0.6) {
            let inserted = tree.insert(key, rid(key))?;
            assert_eq!(inserted, reference.insert(key, rid(key)).is_none());
        } else {
            let removed = tree.remove(&key)?;
            assert_eq!(removed, reference.remove(&key).is_some());
        }
    }

    let mut iter = tree.iter()?;
    let mut seen = Vec::new();
    while let Some((key, _)) = iter.next_entry()? {
        seen.push(key);
    }
    let expected: Vec<i64> = reference.keys().copied().collect();
    assert_eq!(seen, expected);

    Ok(())
}

#[test]
fn test_concurrent_inserts() -> Result<()> {
    let _ = env_logger::builder().is_test(true).try_init();
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new(buffer_pool, 8, 8));

    let mut handles = Vec::new();
    for worker in 0..4i64 {
        let tree = tree.clone();
        handles.push(std::thread::spawn(move || {
            for i in 0..100i64 {
                let key = worker * 100 + i;
                tree.insert(key, rid(key)).expect("insert failed");
            }
        }));
    }
    for handle in handles {
        handle.join().expect("worker panicked");
    }

    for key in 0..400i64 {
        assert_eq!(tree.get(&key)?, Some(rid(key)), "key {} lost", key);
    }

    // The leaf chain observes every key in order
    let mut iter = tree.iter()?;
    let mut seen = Vec::new();
    while let Some((key, _)) = iter.next_entry()? {
        seen.push(key);
    }
    assert_eq!(seen, (0..400).collect::<Vec<i64>>());

    Ok(())
}

#[test]
fn test_concurrent_reads_during_inserts() -> Result<()> {
    let (buffer_pool, _temp_file) = create_test_buffer_pool(256)?;
    let tree: Arc<BPlusTree<i64>> = Arc::new(BPlusTree::new(buffer_pool, 8, 8));

    for key in 0..100i64 {
        tree.insert(key, rid(key))?;
    }

    let writer = {
        let tree = tree.clone();
        std::thread::spawn(move || {
            for key in 100..200i64 {
                tree.insert(key, rid(key)).expect("insert failed");
            }
        })
    };

    // Readers only ever observe fully applied inserts
    for _ in 0..50 {
        for key in 0..100i64 {
            assert_eq!(tree.get(&key).expect("get failed"), Some(rid(key)));
        }
    }

    writer.join().expect("writer panicked");
    for key in 0..200i64 {
        assert_eq!(tree.get(&key)?, Some(rid(key)));
    }

    Ok(())
}
