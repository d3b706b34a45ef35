use std::collections::BTreeMap;

use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::node::{assert_depth, NodeType, ParsedNode};
use crate::storage::TrieDb;

#[derive(Debug, Clone, Default)]
pub struct GetResult {
    pub exists: bool,
    pub val: Vec<u8>,
    pub node_id: u64,
}

/// Multi-key lookup keyed by raw user keys.
pub type GetMultiQuery = BTreeMap<Vec<u8>, GetResult>;

/// Multi-key lookup keyed by pre-hashed keys.
pub type GetMultiRawQuery = BTreeMap<Key, GetResult>;

impl MerkleDb {
    pub fn get<T: TrieDb>(&self, txn: &T, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut query: GetMultiRawQuery = BTreeMap::new();
        query.insert(Key::hash(key), GetResult::default());
        self.get_multi_raw(txn, &mut query)?;

        match query.into_values().next() {
            Some(res) if res.exists => Ok(Some(res.val)),
            _ => Ok(None),
        }
    }

    /// Look up many raw keys in one traversal: each subtree is visited at
    /// most once.
    pub fn get_multi<T: TrieDb>(&self, txn: &T, query: &mut GetMultiQuery) -> Result<()> {
        let mut map: BTreeMap<Key, &mut GetResult> = BTreeMap::new();
        for (key, res) in query.iter_mut() {
            map.insert(Key::hash(key), res);
        }

        let node_id = self.head_node_id(txn)?;
        get_multi_aux(txn, 0, node_id, &mut map, Key::null(), Key::max())
    }

    pub fn get_multi_raw<T: TrieDb>(&self, txn: &T, query: &mut GetMultiRawQuery) -> Result<()> {
        let mut map: BTreeMap<Key, &mut GetResult> = BTreeMap::new();
        for (key_hash, res) in query.iter_mut() {
            map.insert(*key_hash, res);
        }

        let node_id = self.head_node_id(txn)?;
        get_multi_aux(txn, 0, node_id, &mut map, Key::null(), Key::max())
    }
}

fn get_multi_aux<T: TrieDb>(
    txn: &T,
    depth: u64,
    node_id: u64,
    map: &mut BTreeMap<Key, &mut GetResult>,
    lo: Key,
    hi: Key,
) -> Result<()> {
    if map.range(lo..=hi).next().is_none() {
        return Ok(());
    }

    let node = ParsedNode::read(txn, node_id)?;

    if node.is_empty() {
        for (_, res) in map.range_mut(lo..=hi) {
            res.exists = false;
        }
    } else if node.is_leaf() {
        let leaf_key_hash = node.leaf_key_hash()?;
        for (key_hash, res) in map.range_mut(lo..=hi) {
            if *key_hash == leaf_key_hash {
                if node.node_type == NodeType::WitnessLeaf {
                    return Err(Error::IncompleteTree);
                }
                res.exists = true;
                res.val = node.leaf_val()?.to_vec();
                res.node_id = node.node_id;
            } else {
                res.exists = false;
            }
        }
    } else if node.is_branch() {
        assert_depth(depth)?;

        let mut left_hi = hi;
        left_hi.set_bit(depth as usize, false);
        let mut right_lo = lo;
        right_lo.set_bit(depth as usize, true);

        get_multi_aux(txn, depth + 1, node.left_node_id, map, lo, left_hi)?;
        get_multi_aux(txn, depth + 1, node.right_node_id, map, right_lo, hi)?;
    } else {
        return Err(Error::IncompleteTree);
    }

    Ok(())
}
