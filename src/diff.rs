use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::node::ParsedNode;
use crate::storage::TrieDb;
use crate::walk::walk_tree;

/// One record of a key-level delta. Applying the full record stream over
/// the `a` side of a diff reproduces the `b` side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiffRecord {
    pub key_hash: Key,
    /// Original user key, when key tracking has it.
    pub key: Option<Vec<u8>>,
    /// New value for an insertion, old value for a deletion.
    pub val: Vec<u8>,
    pub deletion: bool,
}

impl MerkleDb {
    /// Key-level delta from the tree at `node_id_a` to the tree at
    /// `node_id_b`. Shared subtrees (same node id) are skipped without
    /// being read. Witnesses on either side abort the diff.
    pub fn diff<T: TrieDb>(
        &self,
        txn: &T,
        node_id_a: u64,
        node_id_b: u64,
    ) -> Result<Vec<DiffRecord>> {
        let mut output = vec![];
        self.diff_aux(txn, node_id_a, node_id_b, &mut output)?;
        Ok(output)
    }

    /// Replay a diff as a patch over the active head.
    pub fn apply_diff<T: TrieDb>(&mut self, txn: &mut T, diff: &[DiffRecord]) -> Result<()> {
        let mut changes = self.change();
        for record in diff {
            if record.deletion {
                changes.del_key(record.key_hash);
            } else {
                changes.put_key(record.key_hash, &record.val);
            }
        }
        self.apply(txn, changes)
    }

    fn diff_push<T: TrieDb>(
        &self,
        txn: &T,
        node: &ParsedNode,
        output: &mut Vec<DiffRecord>,
        deletion: bool,
    ) -> Result<()> {
        output.push(DiffRecord {
            key_hash: node.leaf_key_hash()?,
            key: self.get_leaf_key(txn, node.node_id)?,
            val: node.leaf_val()?.to_vec(),
            deletion,
        });
        Ok(())
    }

    fn diff_walk<T, F>(&self, txn: &T, node_id: u64, cb: &mut F) -> Result<()>
    where
        T: TrieDb,
        F: FnMut(&ParsedNode) -> Result<()>,
    {
        walk_tree(txn, node_id, &mut |node, _depth| {
            if node.is_witness_any() {
                return Err(Error::WitnessEncountered);
            }
            if node.is_leaf() {
                cb(node)?;
            }
            Ok(true)
        })
    }

    fn diff_aux<T: TrieDb>(
        &self,
        txn: &T,
        node_id_a: u64,
        node_id_b: u64,
        output: &mut Vec<DiffRecord>,
    ) -> Result<()> {
        if node_id_a == node_id_b {
            return Ok(());
        }

        let node_a = ParsedNode::read(txn, node_id_a)?;
        let node_b = ParsedNode::read(txn, node_id_b)?;

        if node_a.is_witness_any() || node_b.is_witness_any() {
            return Err(Error::WitnessEncountered);
        }

        if node_a.is_branch() && node_b.is_branch() {
            self.diff_aux(txn, node_a.left_node_id, node_b.left_node_id, output)?;
            self.diff_aux(txn, node_a.right_node_id, node_b.right_node_id, output)?;
        } else if !node_a.is_branch() && node_b.is_branch() {
            // Everything in B was added, except possibly A's own leaf.
            let mut found_leaf = false;
            self.diff_walk(txn, node_id_b, &mut |node| {
                if node_a.is_leaf() && node.leaf_key_hash()? == node_a.leaf_key_hash()? {
                    found_leaf = true;
                    if node.leaf_val()? != node_a.leaf_val()? {
                        self.diff_push(txn, &node_a, output, true)?;
                        self.diff_push(txn, node, output, false)?;
                    }
                } else {
                    self.diff_push(txn, node, output, false)?;
                }
                Ok(())
            })?;
            if node_a.is_leaf() && !found_leaf {
                self.diff_push(txn, &node_a, output, true)?;
            }
        } else if node_a.is_branch() && !node_b.is_branch() {
            // Everything in A was deleted, except possibly B's own leaf.
            let mut found_leaf = false;
            self.diff_walk(txn, node_id_a, &mut |node| {
                if node_b.is_leaf() && node.leaf_key_hash()? == node_b.leaf_key_hash()? {
                    found_leaf = true;
                    if node.leaf_val()? != node_b.leaf_val()? {
                        self.diff_push(txn, node, output, true)?;
                        self.diff_push(txn, &node_b, output, false)?;
                    }
                } else {
                    self.diff_push(txn, node, output, true)?;
                }
                Ok(())
            })?;
            if node_b.is_leaf() && !found_leaf {
                self.diff_push(txn, &node_b, output, false)?;
            }
        } else if node_a.is_leaf() && node_b.is_leaf() {
            if node_a.leaf_key_hash()? != node_b.leaf_key_hash()?
                || node_a.leaf_val()? != node_b.leaf_val()?
            {
                self.diff_push(txn, &node_a, output, true)?;
                self.diff_push(txn, &node_b, output, false)?;
            }
        } else if node_a.is_leaf() {
            self.diff_push(txn, &node_a, output, true)?;
        } else if node_b.is_leaf() {
            self.diff_push(txn, &node_b, output, false)?;
        }

        Ok(())
    }
}
