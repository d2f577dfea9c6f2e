use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::common::types::{Page, Rid, PAGE_SIZE};
use crate::index::btree::node::{BTreeNode, NodeHeader, NodePayload, NodeType};
use crate::index::btree::error::BTreeError;

// Node page layout:
// - node type: u8 (1 = leaf, 2 = internal)
// - size: u16 (number of keys)
// - max size: u16
// - page id: u32
// - parent page id: u32
// - lsn: u64
const NODE_HEADER_SIZE: usize = 21;

const NODE_TYPE_LEAF: u8 = 1;
const NODE_TYPE_INTERNAL: u8 = 2;

/// Serialize a tree node into a page.
///
/// Leaf payload: `size` (key, rid) pairs followed by the next-page id.
/// Internal payload: `size` separator keys followed by `size + 1` child
/// page ids.
pub fn serialize_node<K>(node: &BTreeNode<K>, page: &mut Page) -> Result<(), BTreeError>
where
    K: Serialize + Clone + Ord,
{
    page.data.fill(0);

    let type_byte = match node.header.node_type {
        NodeType::Leaf => NODE_TYPE_LEAF,
        NodeType::Internal => NODE_TYPE_INTERNAL,
    };
    page.data[0] = type_byte;
    LittleEndian::write_u16(&mut page.data[1..3], node.size() as u16);
    LittleEndian::write_u16(&mut page.data[3..5], node.header.max_size);
    LittleEndian::write_u32(&mut page.data[5..9], node.header.page_id);
    LittleEndian::write_u32(&mut page.data[9..13], node.header.parent_page_id);
    LittleEndian::write_u64(&mut page.data[13..21], node.header.lsn);

    let mut offset = NODE_HEADER_SIZE;

    match &node.payload {
        NodePayload::Leaf { entries, next_page_id } => {
            for (key, rid) in entries {
                offset = write_key(page, offset, key)?;
                if offset + 8 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], rid.page_id);
                LittleEndian::write_u32(&mut page.data[offset + 4..offset + 8], rid.slot);
                offset += 8;
            }
            if offset + 4 > PAGE_SIZE {
                return Err(BTreeError::NodeTooLarge);
            }
            LittleEndian::write_u32(&mut page.data[offset..offset + 4], *next_page_id);
        }
        NodePayload::Internal { keys, children } => {
            for key in keys {
                offset = write_key(page, offset, key)?;
            }
            for child in children {
                if offset + 4 > PAGE_SIZE {
                    return Err(BTreeError::NodeTooLarge);
                }
                LittleEndian::write_u32(&mut page.data[offset..offset + 4], *child);
                offset += 4;
            }
        }
    }

    Ok(())
}

/// Deserialize a tree node from a page.
pub fn deserialize_node<K>(page: &Page) -> Result<BTreeNode<K>, BTreeError>
where
    K: DeserializeOwned + Clone + Ord,
{
    let node_type = match page.data[0] {
        NODE_TYPE_LEAF => NodeType::Leaf,
        NODE_TYPE_INTERNAL => NodeType::Internal,
        _ => return Err(BTreeError::InvalidPageFormat),
    };
    let size = LittleEndian::read_u16(&page.data[1..3]) as usize;
    let max_size = LittleEndian::read_u16(&page.data[3..5]);
    let page_id = LittleEndian::read_u32(&page.data[5..9]);
    let parent_page_id = LittleEndian::read_u32(&page.data[9..13]);
    let lsn = LittleEndian::read_u64(&page.data[13..21]);

    let header = NodeHeader {
        node_type,
        max_size,
        page_id,
        parent_page_id,
        lsn,
    };

    let mut offset = NODE_HEADER_SIZE;

    let payload = match node_type {
        NodeType::Leaf => {
            let mut entries = Vec::with_capacity(size);
            for _ in 0..size {
                let (key, next_offset) = read_key::<K>(page, offset)?;
                offset = next_offset;
                let rid_page = LittleEndian::read_u32(&page.data[offset..offset + 4]);
                let rid_slot = LittleEndian::read_u32(&page.data[offset + 4..offset + 8]);
                offset += 8;
                entries.push((key, Rid::new(rid_page, rid_slot)));
            }
            let next_page_id = LittleEndian::read_u32(&page.data[offset..offset + 4]);
            NodePayload::Leaf { entries, next_page_id }
        }
        NodeType::Internal => {
            let mut keys = Vec::with_capacity(size);
            for _ in 0..size {
                let (key, next_offset) = read_key::<K>(page, offset)?;
                offset = next_offset;
                keys.push(key);
            }
            let mut children = Vec::with_capacity(size + 1);
            for _ in 0..size + 1 {
                children.push(LittleEndian::read_u32(&page.data[offset..offset + 4]));
                offset += 4;
            }
            NodePayload::Internal { keys, children }
        }
    };

    Ok(BTreeNode { header, payload })
}

fn write_key<K: Serialize>(page: &mut Page, offset: usize, key: &K) -> Result<usize, BTreeError> {
    let key_bytes = bincode::serialize(key)
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;

    if offset + 2 + key_bytes.len() > PAGE_SIZE {
        return Err(BTreeError::NodeTooLarge);
    }

    LittleEndian::write_u16(&mut page.data[offset..offset + 2], key_bytes.len() as u16);
    let start = offset + 2;
    page.data[start..start + key_bytes.len()].copy_from_slice(&key_bytes);
    Ok(start + key_bytes.len())
}

fn read_key<K: DeserializeOwned>(page: &Page, offset: usize) -> Result<(K, usize), BTreeError> {
    if offset + 2 > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let key_len = LittleEndian::read_u16(&page.data[offset..offset + 2]) as usize;
    let start = offset + 2;
    if start + key_len > PAGE_SIZE {
        return Err(BTreeError::InvalidPageFormat);
    }
    let key = bincode::deserialize(&page.data[start..start + key_len])
        .map_err(|e| BTreeError::SerializationError(e.to_string()))?;
    Ok((key, start + key_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::types::INVALID_PAGE_ID;

    #[test]
    fn test_leaf_round_trip() {
        let mut node: BTreeNode<i64> = BTreeNode::new_leaf(3, 1, 64);
        node.leaf_insert(10, Rid::new(5, 1));
        node.leaf_insert(20, Rid::new(5, 2));
        node.set_next_page_id(9);

        let mut page = Page::new(3);
        serialize_node(&node, &mut page).unwrap();
        let decoded: BTreeNode<i64> = deserialize_node(&page).unwrap();

        assert!(decoded.is_leaf());
        assert_eq!(decoded.header.parent_page_id, 1);
        assert_eq!(decoded.leaf_entries(), node.leaf_entries());
        assert_eq!(decoded.next_page_id(), 9);
    }

    #[test]
    fn test_internal_round_trip() {
        let mut node: BTreeNode<i64> = BTreeNode::new_internal(7, INVALID_PAGE_ID, 64);
        if let NodePayload::Internal { keys, children } = &mut node.payload {
            *keys = vec![100, 200];
            *children = vec![11, 12, 13];
        }

        let mut page = Page::new(7);
        serialize_node(&node, &mut page).unwrap();
        let decoded: BTreeNode<i64> = deserialize_node(&page).unwrap();

        assert!(!decoded.is_leaf());
        assert_eq!(decoded.internal_keys(), &[100, 200]);
        assert_eq!(decoded.internal_children(), &[11, 12, 13]);
    }

    #[test]
    fn test_zeroed_page_is_rejected() {
        let page = Page::new(1);
        let result: Result<BTreeNode<i64>, _> = deserialize_node(&page);
        assert!(matches!(result, Err(BTreeError::InvalidPageFormat)));
    }
}
