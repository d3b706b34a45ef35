use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::node::ParsedNode;
use crate::storage::TrieDb;

/// Ordered traversal over the leaves of the active head, starting at the
/// first leaf whose key hash is `>=` the target (or `<=` when reversed).
///
/// The cursor holds the root-to-leaf path as a stack of parsed nodes. It
/// never descends into opaque witness subtrees; landing on one surfaces
/// `IncompleteTree` from [`TrieIterator::get`].
pub struct TrieIterator<'a, T: TrieDb> {
    txn: &'a T,
    stack: Vec<ParsedNode>,
    reverse: bool,
}

/// A compact resumption point: enough to rebuild the cursor stack against
/// a different (or later) transaction.
#[derive(Debug, Clone)]
pub struct IteratorCheckpoint {
    pub key: Key,
    pub reverse: bool,
}

impl MerkleDb {
    pub fn iterate<'a, T: TrieDb>(
        &self,
        txn: &'a T,
        target: &Key,
        reverse: bool,
    ) -> Result<TrieIterator<'a, T>> {
        let node_id = self.head_node_id(txn)?;
        TrieIterator::seek(txn, node_id, target, reverse)
    }
}

impl<'a, T: TrieDb> TrieIterator<'a, T> {
    pub(crate) fn seek(
        txn: &'a T,
        root_node_id: u64,
        target: &Key,
        reverse: bool,
    ) -> Result<TrieIterator<'a, T>> {
        let mut stack = vec![ParsedNode::read(txn, root_node_id)?];
        let mut left_bias = false;

        // Follow the target's bits down; when the addressed side is empty,
        // fall into the other side and remember which way we biased.
        loop {
            let top = match stack.last() {
                Some(top) if top.is_branch() => top,
                _ => break,
            };

            let mut next_node_id = if !target.bit(stack.len() - 1) {
                top.left_node_id
            } else {
                top.right_node_id
            };

            if next_node_id == 0 {
                if top.left_node_id != 0 {
                    next_node_id = top.left_node_id;
                    left_bias = false;
                } else {
                    next_node_id = top.right_node_id;
                    left_bias = true;
                }
                stack.push(ParsedNode::read(txn, next_node_id)?);
                break;
            } else {
                stack.push(ParsedNode::read(txn, next_node_id)?);
            }
        }

        loop {
            let top = match stack.last() {
                Some(top) if top.is_branch() => top,
                _ => break,
            };
            let next_node_id = if left_bias {
                if top.left_node_id != 0 {
                    top.left_node_id
                } else {
                    top.right_node_id
                }
            } else if top.right_node_id != 0 {
                top.right_node_id
            } else {
                top.left_node_id
            };
            stack.push(ParsedNode::read(txn, next_node_id)?);
        }

        let mut iter = TrieIterator {
            txn,
            stack,
            reverse,
        };

        // The discovered leaf may sit on the wrong side of the target.
        if let Some(top) = iter.stack.last() {
            if top.is_leaf() {
                let key_hash = top.leaf_key_hash()?;
                if (reverse && key_hash > *target) || (!reverse && key_hash < *target) {
                    iter.next()?;
                }
            }
        }

        Ok(iter)
    }

    /// Step to the next leaf in iteration order: pop until an ancestor has
    /// an unexplored side, then descend its near edge.
    pub fn next(&mut self) -> Result<()> {
        let descend_node_id = loop {
            let prev_node_id = match self.stack.pop() {
                Some(node) => node.node_id,
                None => return Ok(()),
            };
            match self.stack.last() {
                None => return Ok(()),
                Some(top) => {
                    let test_node_id = if self.reverse {
                        top.left_node_id
                    } else {
                        top.right_node_id
                    };
                    if top.is_branch() && test_node_id != 0 && test_node_id != prev_node_id {
                        break test_node_id;
                    }
                }
            }
        };

        self.stack.push(ParsedNode::read(self.txn, descend_node_id)?);

        loop {
            let top = match self.stack.last() {
                Some(top) if top.is_branch() => top,
                _ => break,
            };
            let next_node_id = if self.reverse {
                if top.right_node_id != 0 {
                    top.right_node_id
                } else {
                    top.left_node_id
                }
            } else if top.left_node_id != 0 {
                top.left_node_id
            } else {
                top.right_node_id
            };
            self.stack.push(ParsedNode::read(self.txn, next_node_id)?);
        }

        Ok(())
    }

    /// The leaf under the cursor, or `None` at the end of iteration.
    pub fn get(&self) -> Result<Option<&ParsedNode>> {
        match self.stack.last() {
            None => Ok(None),
            Some(node) if node.node_id == 0 => Ok(None),
            Some(node) => {
                if node.is_witness() {
                    return Err(Error::IncompleteTree);
                }
                Ok(Some(node))
            }
        }
    }

    pub fn at_end(&self) -> bool {
        match self.stack.last() {
            None => true,
            Some(node) => node.node_id == 0,
        }
    }

    /// Capture the cursor position. `None` at the end of iteration.
    pub fn save(&self) -> Result<Option<IteratorCheckpoint>> {
        match self.get()? {
            None => Ok(None),
            Some(node) => Ok(Some(IteratorCheckpoint {
                key: node.leaf_key_hash()?,
                reverse: self.reverse,
            })),
        }
    }

    /// Rebuild a cursor from a checkpoint, possibly against a different
    /// transaction. The cursor lands on the checkpointed leaf if it still
    /// exists, otherwise on its nearest surviving neighbor.
    pub fn restore(
        db: &MerkleDb,
        txn: &'a T,
        checkpoint: &IteratorCheckpoint,
    ) -> Result<TrieIterator<'a, T>> {
        db.iterate(txn, &checkpoint.key, checkpoint.reverse)
    }
}
