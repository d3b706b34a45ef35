use std::collections::HashSet;

use crate::db::MerkleDb;
use crate::errors::Result;
use crate::storage::TrieDb;
use crate::walk::walk_tree;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GcStats {
    pub total: u64,
    pub collected: u64,
}

/// Two-phase collector: mark every node reachable from retained roots,
/// then sweep the node table and delete whatever was not marked.
/// Runs under a single write transaction; snapshot readers are unaffected.
#[derive(Default)]
pub struct GarbageCollector {
    marked_nodes: HashSet<u64>,
}

impl GarbageCollector {
    pub fn new() -> GarbageCollector {
        GarbageCollector::default()
    }

    /// Mark every named head's tree, plus the session's detached head.
    pub fn mark_all_heads<T: TrieDb>(&mut self, db: &MerkleDb, txn: &T) -> Result<()> {
        for (_name, node_id) in txn.heads()? {
            self.mark_tree(txn, node_id)?;
        }
        if db.is_detached() {
            self.mark_tree(txn, db.detached_node_id())?;
        }
        Ok(())
    }

    pub fn mark_tree<T: TrieDb>(&mut self, txn: &T, root_node_id: u64) -> Result<()> {
        let marked_nodes = &mut self.marked_nodes;
        walk_tree(txn, root_node_id, &mut |node, _depth| {
            // Shared subtrees are marked once.
            Ok(marked_nodes.insert(node.node_id))
        })
    }

    /// Delete every unmarked node (and its leaf-key side record). The
    /// optional predicate can veto specific ids by returning false.
    pub fn sweep<T: TrieDb>(
        &self,
        db: &MerkleDb,
        txn: &mut T,
        can_collect: Option<&dyn Fn(u64) -> bool>,
    ) -> Result<GcStats> {
        let mut stats = GcStats::default();

        for node_id in txn.node_ids()? {
            stats.total += 1;

            if self.marked_nodes.contains(&node_id) {
                continue;
            }
            if let Some(can_collect) = can_collect {
                if !can_collect(node_id) {
                    continue;
                }
            }

            txn.del_node(node_id)?;
            if db.track_keys {
                txn.del_leaf_key(node_id)?;
            }
            stats.collected += 1;
        }

        debug!(
            "gc sweep: collected {} of {} nodes",
            stats.collected, stats.total
        );

        Ok(stats)
    }
}
