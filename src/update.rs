use std::collections::BTreeMap;

use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::node::{assert_depth, BuiltNode, NodeType, ParsedNode};
use crate::storage::TrieDb;

#[derive(Debug, Clone)]
pub(crate) struct Update {
    /// Original user key, kept only when key tracking is on.
    pub key: Option<Vec<u8>>,
    pub val: Vec<u8>,
    pub deletion: bool,
    /// Forces re-use of an existing leaf node. Set on the synthetic entry
    /// injected when a leaf is split.
    pub node_id: u64,
}

/// A batch of pending mutations, iterated in ascending key-hash order.
/// Multiple updates to the same key collapse last-write-wins before
/// application. Consumed by [`MerkleDb::apply`].
pub struct UpdateSet {
    pub(crate) map: BTreeMap<Key, Update>,
    track_keys: bool,
}

impl UpdateSet {
    pub(crate) fn new(track_keys: bool) -> UpdateSet {
        UpdateSet {
            map: BTreeMap::new(),
            track_keys,
        }
    }

    pub fn put(&mut self, key: &[u8], val: &[u8]) -> Result<&mut UpdateSet> {
        if key.is_empty() {
            return Err(Error::ZeroLengthKey);
        }
        self.map.insert(
            Key::hash(key),
            Update {
                key: if self.track_keys {
                    Some(key.to_vec())
                } else {
                    None
                },
                val: val.to_vec(),
                deletion: false,
                node_id: 0,
            },
        );
        Ok(self)
    }

    /// Put under a pre-hashed key (no raw key is recorded).
    pub fn put_key(&mut self, key_hash: Key, val: &[u8]) -> &mut UpdateSet {
        self.map.insert(
            key_hash,
            Update {
                key: None,
                val: val.to_vec(),
                deletion: false,
                node_id: 0,
            },
        );
        self
    }

    pub fn del(&mut self, key: &[u8]) -> Result<&mut UpdateSet> {
        if key.is_empty() {
            return Err(Error::ZeroLengthKey);
        }
        self.map.insert(
            Key::hash(key),
            Update {
                key: None,
                val: vec![],
                deletion: true,
                node_id: 0,
            },
        );
        Ok(self)
    }

    pub fn del_key(&mut self, key_hash: Key) -> &mut UpdateSet {
        self.map.insert(
            key_hash,
            Update {
                key: None,
                val: vec![],
                deletion: true,
                node_id: 0,
            },
        );
        self
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

impl MerkleDb {
    /// Commit a batch of updates against the active head. Copy-on-write:
    /// every changed node gets a fresh id, old ids stay valid for other
    /// heads until garbage-collected.
    pub fn apply<T: TrieDb>(&mut self, txn: &mut T, updates: UpdateSet) -> Result<()> {
        let mut updates = updates;
        let old_node_id = self.head_node_id(txn)?;

        debug!(
            "apply: {} updates against node {}",
            updates.map.len(),
            old_node_id
        );

        let mut bubble_up = false;
        let new_node = self.put_aux(
            txn,
            0,
            old_node_id,
            &mut updates.map,
            Key::null(),
            Key::max(),
            &mut bubble_up,
        )?;

        if new_node.node_id != old_node_id {
            self.set_head_node_id(txn, new_node.node_id)?;
        }
        Ok(())
    }

    /// One-shot single-key put.
    pub fn put<T: TrieDb>(&mut self, txn: &mut T, key: &[u8], val: &[u8]) -> Result<()> {
        let mut changes = self.change();
        changes.put(key, val)?;
        self.apply(txn, changes)
    }

    /// One-shot single-key delete.
    pub fn del<T: TrieDb>(&mut self, txn: &mut T, key: &[u8]) -> Result<()> {
        let mut changes = self.change();
        changes.del(key)?;
        self.apply(txn, changes)
    }

    /// Recursive rebuild over the window of updates `[lo, hi]`. The window
    /// bounds always span exactly the key range of the subtree at the
    /// current position, so halving the window is setting bit `depth` of a
    /// bound. `bubble_up` is set for the caller when the result collapsed
    /// to Empty or to a lone leaf that must rise.
    #[allow(clippy::too_many_arguments)]
    fn put_aux<T: TrieDb>(
        &self,
        txn: &mut T,
        depth: u64,
        node_id: u64,
        updates: &mut BTreeMap<Key, Update>,
        lo: Key,
        hi: Key,
        bubble_up: &mut bool,
    ) -> Result<BuiltNode> {
        let node = ParsedNode::read(txn, node_id)?;
        let mut check_bubble = false;

        let (first, multiple) = {
            let mut window = updates.range(lo..=hi);
            let first = window.next().map(|(k, _)| *k);
            (first, window.next().is_some())
        };

        let first = match first {
            None => return Ok(BuiltNode::reuse(&node)),
            Some(first) => first,
        };

        if node.node_type == NodeType::Witness {
            return Err(Error::WitnessEncountered);
        } else if node.is_empty() {
            // Deletions of absent keys are no-ops.
            let dels: Vec<Key> = updates
                .range(lo..=hi)
                .filter(|(_, u)| u.deletion)
                .map(|(k, _)| *k)
                .collect();
            for k in &dels {
                updates.remove(k);
            }

            let (first, multiple) = {
                let mut window = updates.range(lo..=hi);
                let first = window.next().map(|(k, _)| *k);
                (first, window.next().is_some())
            };

            match first {
                None => return Ok(BuiltNode::reuse(&node)),
                Some(key_hash) if !multiple => {
                    return self.new_leaf_from_update(txn, &key_hash, updates);
                }
                _ => {}
            }
        } else if node.is_leaf() {
            let leaf_key_hash = node.leaf_key_hash()?;

            if !multiple && first == leaf_key_hash {
                // Update of exactly this leaf's record.
                let update = updates
                    .get(&leaf_key_hash)
                    .ok_or_else(|| Error::CorruptionError("update window desynced".into()))?;

                if update.deletion {
                    *bubble_up = true;
                    return Ok(BuiltNode::empty());
                }

                if node.node_type == NodeType::Leaf && update.val == node.leaf_val()? {
                    // No change. A WitnessLeaf never takes this path: it
                    // must be upgraded to a real Leaf.
                    return Ok(BuiltNode::reuse(&node));
                }

                return self.new_leaf_from_update(txn, &leaf_key_hash, updates);
            }

            let mut delete_this_leaf = false;
            let dels: Vec<Key> = updates
                .range(lo..=hi)
                .filter(|(_, u)| u.deletion)
                .map(|(k, _)| *k)
                .collect();
            for k in &dels {
                if *k == leaf_key_hash {
                    delete_this_leaf = true;
                }
                // Any deletion here may leave this subtree needing collapse.
                check_bubble = true;
                updates.remove(k);
            }

            if updates.range(lo..=hi).next().is_none() {
                if delete_this_leaf {
                    *bubble_up = true;
                    return Ok(BuiltNode::empty());
                }
                return Ok(BuiltNode::reuse(&node));
            }

            // The leaf splits into a branch: feed it back into the update
            // set so it gets re-placed at its deeper position. entry()
            // keeps any real update to the same key.
            if !delete_this_leaf {
                updates.entry(leaf_key_hash).or_insert(Update {
                    key: None,
                    val: vec![],
                    deletion: false,
                    node_id: node.node_id,
                });
            }
        }

        // Partition the window by the bit at the current depth.

        assert_depth(depth)?;

        let mut left_hi = hi;
        left_hi.set_bit(depth as usize, false);
        let mut right_lo = lo;
        right_lo.set_bit(depth as usize, true);

        let left = self.put_aux(
            txn,
            depth + 1,
            node.left_node_id,
            updates,
            lo,
            left_hi,
            &mut check_bubble,
        )?;
        let right = self.put_aux(
            txn,
            depth + 1,
            node.right_node_id,
            updates,
            right_lo,
            hi,
            &mut check_bubble,
        )?;

        if check_bubble {
            if left.node_type == NodeType::Witness || right.node_type == NodeType::Witness {
                // Can't tell whether the opaque side is a branch or a leaf.
                return Err(Error::CannotBubbleWitness);
            } else if left.is_empty() && right.is_empty() {
                *bubble_up = true;
                return Ok(BuiltNode::empty());
            } else if left.is_leaf() && right.is_empty() {
                *bubble_up = true;
                let node = ParsedNode::read(txn, left.node_id)?;
                return Ok(BuiltNode::reuse(&node));
            } else if left.is_empty() && right.is_leaf() {
                *bubble_up = true;
                let node = ParsedNode::read(txn, right.node_id)?;
                return Ok(BuiltNode::reuse(&node));
            }
            // A branch on one side, or leaves on both: bubbling stops here.
        }

        BuiltNode::new_branch(txn, &left, &right)
    }

    fn new_leaf_from_update<T: TrieDb>(
        &self,
        txn: &mut T,
        key_hash: &Key,
        updates: &BTreeMap<Key, Update>,
    ) -> Result<BuiltNode> {
        let update = updates
            .get(key_hash)
            .ok_or_else(|| Error::CorruptionError("update window desynced".into()))?;

        if update.node_id != 0 {
            let node = ParsedNode::read(txn, update.node_id)?;
            return Ok(BuiltNode::reuse(&node));
        }

        BuiltNode::new_leaf(self, txn, key_hash, &update.val, update.key.as_deref())
    }
}
