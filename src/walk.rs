use std::cmp;
use std::fmt::Write as _;

use crate::db::MerkleDb;
use crate::errors::Result;
use crate::node::{assert_depth, NodeType, ParsedNode};
use crate::storage::TrieDb;

/// Depth-first walk over every non-empty node reachable from `node_id`.
/// The callback returns `false` to skip a subtree.
pub fn walk_tree<T, F>(txn: &T, node_id: u64, cb: &mut F) -> Result<()>
where
    T: TrieDb,
    F: FnMut(&ParsedNode, u64) -> Result<bool>,
{
    walk_tree_aux(txn, node_id, 0, cb)
}

fn walk_tree_aux<T, F>(txn: &T, node_id: u64, depth: u64, cb: &mut F) -> Result<()>
where
    T: TrieDb,
    F: FnMut(&ParsedNode, u64) -> Result<bool>,
{
    let node = ParsedNode::read(txn, node_id)?;

    if node.is_empty() {
        return Ok(());
    }

    if !cb(&node, depth)? {
        return Ok(());
    }

    if node.is_branch() {
        assert_depth(depth)?;
        walk_tree_aux(txn, node.left_node_id, depth + 1, cb)?;
        walk_tree_aux(txn, node.right_node_id, depth + 1, cb)?;
    }

    Ok(())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub num_nodes: u64,
    pub num_leaf_nodes: u64,
    pub num_branch_nodes: u64,
    pub num_witness_nodes: u64,
    pub max_depth: u64,
    pub num_bytes: u64,
}

impl MerkleDb {
    pub fn stats<T: TrieDb>(&self, txn: &T) -> Result<TreeStats> {
        let node_id = self.head_node_id(txn)?;
        self.stats_of(txn, node_id)
    }

    pub fn stats_of<T: TrieDb>(&self, txn: &T, node_id: u64) -> Result<TreeStats> {
        let mut stats = TreeStats::default();

        walk_tree(txn, node_id, &mut |node, depth| {
            stats.num_nodes += 1;
            stats.max_depth = cmp::max(stats.max_depth, depth);
            stats.num_bytes += node.raw_len() as u64;

            if node.node_type == NodeType::Leaf {
                stats.num_leaf_nodes += 1;
            } else if node.is_branch() {
                stats.num_branch_nodes += 1;
            } else if node.is_witness_any() {
                stats.num_witness_nodes += 1;
            }

            Ok(true)
        })?;

        Ok(stats)
    }
}

/// Render the tree rooted at the active head, one node per line. Debug
/// aid for the CLI and tests.
pub fn dump_tree<T: TrieDb>(db: &MerkleDb, txn: &T) -> Result<String> {
    let node_id = db.head_node_id(txn)?;
    let mut out = String::new();
    out.push_str("-----------------\n");
    dump_tree_aux(txn, node_id, 0, &mut out)?;
    out.push_str("-----------------\n");
    Ok(out)
}

fn dump_tree_aux<T: TrieDb>(txn: &T, node_id: u64, depth: usize, out: &mut String) -> Result<()> {
    let node = ParsedNode::read(txn, node_id)?;

    let _ = write!(
        out,
        "{}{}: 0x{}: ",
        " ".repeat(depth * 2),
        node_id,
        node.node_hash()
    );

    match node.node_type {
        NodeType::Empty => {
            out.push_str("empty\n");
        }
        NodeType::Leaf => {
            let _ = writeln!(
                out,
                "leaf: 0x{} val = {}",
                node.leaf_key_hash()?,
                String::from_utf8_lossy(node.leaf_val()?)
            );
        }
        NodeType::WitnessLeaf => {
            let _ = writeln!(
                out,
                "witness leaf: 0x{} hash(val) = 0x{}",
                node.leaf_key_hash()?,
                node.leaf_val_hash()?
            );
        }
        NodeType::Witness => {
            out.push_str("witness\n");
        }
        _ => {
            out.push_str("branch:\n");
            dump_tree_aux(txn, node.left_node_id, depth + 1, out)?;
            dump_tree_aux(txn, node.right_node_id, depth + 1, out)?;
        }
    }

    Ok(())
}
