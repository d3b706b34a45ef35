use blake2::{Blake2s256, Digest};

use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::storage::{write_node, TrieDb};

/// Storage-level node tags. Proof strands use a different numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeType {
    Empty = 0,
    BranchLeft = 1,
    BranchRight = 2,
    BranchBoth = 3,
    Leaf = 4,
    Witness = 5,
    WitnessLeaf = 6,
    Invalid = 15,
}

impl NodeType {
    pub fn from_u8(tag: u8) -> Result<NodeType> {
        match tag {
            0 => Ok(NodeType::Empty),
            1 => Ok(NodeType::BranchLeft),
            2 => Ok(NodeType::BranchRight),
            3 => Ok(NodeType::BranchBoth),
            4 => Ok(NodeType::Leaf),
            5 => Ok(NodeType::Witness),
            6 => Ok(NodeType::WitnessLeaf),
            _ => Err(Error::CorruptionError(format!(
                "unrecognized node type tag: {}",
                tag
            ))),
        }
    }
}

/// Guard against descending past the bottom of the key space. Reaching
/// depth 256 would mean two distinct keys share all 256 path bits.
pub(crate) fn assert_depth(depth: u64) -> Result<()> {
    if depth > 255 {
        return Err(Error::DepthLimitExceeded);
    }
    Ok(())
}

/// A node record decoded from storage.
///
/// Record layout: an 8-byte little-endian word whose low byte is the tag
/// and whose upper 56 bits carry one child id, the 32-byte node hash, then
/// variant payload (`BranchBoth` leads with the right child id; leaves
/// carry `keyHash` plus value or value hash).
///
/// The record bytes are owned, so a `ParsedNode` stays valid for as long
/// as the caller needs it, independent of the backing transaction.
#[derive(Debug, Clone)]
pub struct ParsedNode {
    pub node_id: u64,
    pub node_type: NodeType,
    pub left_node_id: u64,
    pub right_node_id: u64,
    raw: Vec<u8>,
}

impl ParsedNode {
    pub fn read<T: TrieDb>(txn: &T, node_id: u64) -> Result<ParsedNode> {
        if node_id == 0 {
            return Ok(ParsedNode {
                node_id: 0,
                node_type: NodeType::Empty,
                left_node_id: 0,
                right_node_id: 0,
                raw: vec![],
            });
        }

        let raw = txn.get_node(node_id)?.ok_or(Error::NotFoundError)?;
        if raw.len() < 40 {
            return Err(Error::CorruptionError(format!(
                "node {} too short: {} bytes",
                node_id,
                raw.len()
            )));
        }

        let w1 = u64::from_le_bytes(raw[0..8].try_into().expect("8-byte slice"));
        let node_type = NodeType::from_u8((w1 & 0xFF) as u8)?;
        let w1 = w1 >> 8;

        let mut left_node_id = 0;
        let mut right_node_id = 0;

        match node_type {
            NodeType::BranchLeft => left_node_id = w1,
            NodeType::BranchRight => right_node_id = w1,
            NodeType::BranchBoth => {
                if raw.len() < 48 {
                    return Err(Error::CorruptionError(format!(
                        "branch node {} missing right child id",
                        node_id
                    )));
                }
                left_node_id = w1;
                right_node_id = u64::from_le_bytes(raw[40..48].try_into().expect("8-byte slice"));
            }
            NodeType::Leaf | NodeType::WitnessLeaf => {
                if raw.len() < 8 + 32 + 32 {
                    return Err(Error::CorruptionError(format!(
                        "leaf node {} too short: {} bytes",
                        node_id,
                        raw.len()
                    )));
                }
            }
            _ => {}
        }

        Ok(ParsedNode {
            node_id,
            node_type,
            left_node_id,
            right_node_id,
            raw,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.node_type == NodeType::Empty
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Leaf || self.node_type == NodeType::WitnessLeaf
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.node_type,
            NodeType::BranchLeft | NodeType::BranchRight | NodeType::BranchBoth
        )
    }

    pub fn is_witness(&self) -> bool {
        self.node_type == NodeType::Witness
    }

    pub fn is_witness_leaf(&self) -> bool {
        self.node_type == NodeType::WitnessLeaf
    }

    pub fn is_witness_any(&self) -> bool {
        self.node_type == NodeType::Witness || self.node_type == NodeType::WitnessLeaf
    }

    pub fn node_hash(&self) -> Key {
        if self.is_empty() {
            return Key::null();
        }
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&self.raw[8..40]);
        Key(bytes)
    }

    pub fn leaf_key_hash(&self) -> Result<Key> {
        if !self.is_leaf() {
            return Err(Error::CorruptionError(
                "node is not a Leaf/WitnessLeaf".into(),
            ));
        }
        Key::from_bytes(&self.raw[40..72])
    }

    pub fn leaf_val(&self) -> Result<&[u8]> {
        if self.node_type != NodeType::Leaf {
            return Err(Error::CorruptionError("node is not a Leaf".into()));
        }
        Ok(&self.raw[72..])
    }

    pub fn leaf_val_hash(&self) -> Result<Key> {
        match self.node_type {
            NodeType::Leaf => Ok(Key::hash(&self.raw[72..])),
            NodeType::WitnessLeaf => Key::from_bytes(&self.raw[72..104]),
            _ => Err(Error::CorruptionError(
                "node is not a Leaf/WitnessLeaf".into(),
            )),
        }
    }

    pub fn raw_len(&self) -> usize {
        self.raw.len()
    }
}

fn leaf_node_hash(key_hash: &Key, val_hash: &Key) -> Key {
    let mut hasher = Blake2s256::new();
    hasher.update(key_hash);
    hasher.update(val_hash);
    hasher.update([0u8]);
    Key(hasher.finalize().into())
}

/// The result of materializing a node: its id, hash, and enough of a type
/// to classify it during bubble-up (Empty / leaf-ish / Witness / interior).
#[derive(Debug, Clone, Copy)]
pub struct BuiltNode {
    pub node_id: u64,
    pub node_hash: Key,
    pub node_type: NodeType,
}

impl BuiltNode {
    pub fn empty() -> BuiltNode {
        BuiltNode {
            node_id: 0,
            node_hash: Key::null(),
            node_type: NodeType::Empty,
        }
    }

    pub fn reuse(node: &ParsedNode) -> BuiltNode {
        BuiltNode {
            node_id: node.node_id,
            node_hash: node.node_hash(),
            node_type: node.node_type,
        }
    }

    /// For when a node id and hash are known but nothing else is needed.
    pub fn stubbed(node_id: u64, node_hash: Key) -> BuiltNode {
        BuiltNode {
            node_id,
            node_hash,
            node_type: NodeType::Invalid,
        }
    }

    pub fn new_leaf<T: TrieDb>(
        db: &MerkleDb,
        txn: &mut T,
        key_hash: &Key,
        val: &[u8],
        leaf_key: Option<&[u8]>,
    ) -> Result<BuiltNode> {
        let node_hash = leaf_node_hash(key_hash, &Key::hash(val));

        let mut raw = Vec::with_capacity(8 + 32 + 32 + val.len());
        raw.extend_from_slice(&(NodeType::Leaf as u64).to_le_bytes());
        raw.extend_from_slice(node_hash.as_bytes());
        raw.extend_from_slice(key_hash.as_bytes());
        raw.extend_from_slice(val);

        let node_id = write_node(txn, &raw)?;

        if let Some(leaf_key) = leaf_key {
            db.set_leaf_key(txn, node_id, leaf_key)?;
        }

        Ok(BuiltNode {
            node_id,
            node_hash,
            node_type: NodeType::Leaf,
        })
    }

    pub fn new_witness_leaf<T: TrieDb>(
        txn: &mut T,
        key_hash: &Key,
        val_hash: &Key,
    ) -> Result<BuiltNode> {
        let node_hash = leaf_node_hash(key_hash, val_hash);

        let mut raw = Vec::with_capacity(8 + 32 + 32 + 32);
        raw.extend_from_slice(&(NodeType::WitnessLeaf as u64).to_le_bytes());
        raw.extend_from_slice(node_hash.as_bytes());
        raw.extend_from_slice(key_hash.as_bytes());
        raw.extend_from_slice(val_hash.as_bytes());

        let node_id = write_node(txn, &raw)?;

        Ok(BuiltNode {
            node_id,
            node_hash,
            node_type: NodeType::WitnessLeaf,
        })
    }

    pub fn new_branch<T: TrieDb>(
        txn: &mut T,
        left: &BuiltNode,
        right: &BuiltNode,
    ) -> Result<BuiltNode> {
        let mut hasher = Blake2s256::new();
        hasher.update(left.node_hash);
        hasher.update(right.node_hash);
        let node_hash = Key(hasher.finalize().into());

        let (node_type, w1) = if right.node_id == 0 {
            (
                NodeType::BranchLeft,
                NodeType::BranchLeft as u64 | left.node_id << 8,
            )
        } else if left.node_id == 0 {
            (
                NodeType::BranchRight,
                NodeType::BranchRight as u64 | right.node_id << 8,
            )
        } else {
            (
                NodeType::BranchBoth,
                NodeType::BranchBoth as u64 | left.node_id << 8,
            )
        };

        let mut raw = Vec::with_capacity(8 + 32 + 8);
        raw.extend_from_slice(&w1.to_le_bytes());
        raw.extend_from_slice(node_hash.as_bytes());
        if left.node_id != 0 && right.node_id != 0 {
            raw.extend_from_slice(&right.node_id.to_le_bytes());
        }

        let node_id = write_node(txn, &raw)?;

        Ok(BuiltNode {
            node_id,
            node_hash,
            node_type,
        })
    }

    pub fn new_witness<T: TrieDb>(txn: &mut T, hash: &Key) -> Result<BuiltNode> {
        let mut raw = Vec::with_capacity(8 + 32);
        raw.extend_from_slice(&(NodeType::Witness as u64).to_le_bytes());
        raw.extend_from_slice(hash.as_bytes());

        let node_id = write_node(txn, &raw)?;

        // Reported as an interior node: bubble-up classification treats an
        // opaque subtree like a branch, never like a leaf.
        Ok(BuiltNode {
            node_id,
            node_hash: *hash,
            node_type: NodeType::BranchBoth,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.node_type == NodeType::Empty
    }

    pub fn is_leaf(&self) -> bool {
        self.node_type == NodeType::Leaf || self.node_type == NodeType::WitnessLeaf
    }

    pub fn is_branch(&self) -> bool {
        matches!(
            self.node_type,
            NodeType::BranchLeft | NodeType::BranchRight | NodeType::BranchBoth
        )
    }
}
