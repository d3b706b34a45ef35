use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;

use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::node::{assert_depth, BuiltNode, NodeType, ParsedNode};
use crate::storage::TrieDb;

/// One vertical path of a proof. `val` is the value for a Leaf strand,
/// the value hash for a WitnessLeaf, the node hash for a Witness, and
/// unused for WitnessEmpty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofStrand {
    pub strand_type: ProofStrandType,
    pub depth: u64,
    pub key_hash: Key,
    pub val: Vec<u8>,
    /// Original user key, carried only by Leaf strands when available.
    pub key: Vec<u8>,
}

/// Wire ids for strands. Distinct from the storage-level node tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ProofStrandType {
    Leaf = 0,
    Invalid = 1,
    WitnessLeaf = 2,
    WitnessEmpty = 3,
    Witness = 4,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofCmdOp {
    HashProvided,
    HashEmpty,
    Merge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofCmd {
    pub op: ProofCmdOp,
    pub node_offset: u64,
    /// Sibling hash, for HashProvided only.
    pub hash: Option<Key>,
}

/// A self-contained proof: strands plus the command stream that folds
/// them into the root. Owns its data and survives transaction boundaries.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Proof {
    pub strands: Vec<ProofStrand>,
    pub cmds: Vec<ProofCmd>,
}

struct ProofGenItem {
    node_id: u64,
    parent_node_id: u64,
    strand: ProofStrand,
}

impl MerkleDb {
    /// Export the proof fragment answering one sync request: the subtree
    /// at `req.path` truncated to `req.start_depth`, expanded down to
    /// `req.depth_limit` levels.
    pub(crate) fn export_proof_fragment<T: TrieDb>(
        &self,
        txn: &T,
        node_id: u64,
        mut curr_path: Key,
        req: &crate::sync::SyncRequest,
    ) -> Result<Proof> {
        let depth = req.start_depth;
        curr_path.keep_prefix_bits(depth as usize);

        let mut items = vec![];
        let mut reverse_map = ProofReverseNodeMap::new();

        self.export_proof_range_aux(
            txn,
            depth,
            node_id,
            0,
            req.depth_limit,
            req.expand_leaves,
            &mut curr_path,
            &Key::null(),
            &Key::max(),
            &mut items,
            &mut reverse_map,
        )?;

        let cmds = export_proof_cmds(txn, &items, &reverse_map, node_id, depth)?;

        Ok(Proof {
            strands: items.into_iter().map(|item| item.strand).collect(),
            cmds,
        })
    }
}

/// child node id -> parent node id, collected during the export walk so
/// command generation can climb without parent pointers on nodes.
type ProofReverseNodeMap = HashMap<u64, u64>;

impl MerkleDb {
    /// Export a proof for a set of raw keys against the active head.
    pub fn export_proof<T: TrieDb>(&self, txn: &T, keys: &[&[u8]]) -> Result<Proof> {
        let mut key_hashes: BTreeMap<Key, Vec<u8>> = BTreeMap::new();
        for key in keys {
            key_hashes.insert(Key::hash(key), key.to_vec());
        }
        self.export_proof_hashed(txn, &key_hashes)
    }

    /// Export a proof for pre-hashed keys (no raw keys carried).
    pub fn export_proof_raw<T: TrieDb>(&self, txn: &T, keys: &[Key]) -> Result<Proof> {
        let mut key_hashes: BTreeMap<Key, Vec<u8>> = BTreeMap::new();
        for key in keys {
            key_hashes.insert(*key, vec![]);
        }
        self.export_proof_hashed(txn, &key_hashes)
    }

    fn export_proof_hashed<T: TrieDb>(
        &self,
        txn: &T,
        key_hashes: &BTreeMap<Key, Vec<u8>>,
    ) -> Result<Proof> {
        let head_node_id = self.head_node_id(txn)?;

        let mut items = vec![];
        let mut reverse_map = ProofReverseNodeMap::new();

        self.export_proof_aux(
            txn,
            0,
            head_node_id,
            0,
            key_hashes,
            Key::null(),
            Key::max(),
            &mut items,
            &mut reverse_map,
        )?;

        let cmds = export_proof_cmds(txn, &items, &reverse_map, head_node_id, 0)?;

        debug!(
            "export_proof: {} strands, {} cmds from node {}",
            items.len(),
            cmds.len(),
            head_node_id
        );

        Ok(Proof {
            strands: items.into_iter().map(|item| item.strand).collect(),
            cmds,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn export_proof_aux<T: TrieDb>(
        &self,
        txn: &T,
        depth: u64,
        node_id: u64,
        parent_node_id: u64,
        key_hashes: &BTreeMap<Key, Vec<u8>>,
        lo: Key,
        hi: Key,
        items: &mut Vec<ProofGenItem>,
        reverse_map: &mut ProofReverseNodeMap,
    ) -> Result<()> {
        let first = match key_hashes.range(lo..=hi).next() {
            None => return Ok(()),
            Some((key_hash, _)) => *key_hash,
        };

        let node = ParsedNode::read(txn, node_id)?;

        if node.is_empty() {
            let mut key_hash = first;
            key_hash.keep_prefix_bits(depth as usize);

            items.push(ProofGenItem {
                node_id,
                parent_node_id,
                strand: ProofStrand {
                    strand_type: ProofStrandType::WitnessEmpty,
                    depth,
                    key_hash,
                    val: vec![],
                    key: vec![],
                },
            });
        } else if node.is_leaf() {
            let leaf_key_hash = node.leaf_key_hash()?;
            let queried = key_hashes
                .range(lo..=hi)
                .any(|(key_hash, _)| *key_hash == leaf_key_hash);

            if queried {
                if node.node_type == NodeType::WitnessLeaf {
                    // The caller asked for a real leaf this store only
                    // holds as a witness.
                    return Err(Error::IncompleteTree);
                }

                let leaf_key = self.get_leaf_key(txn, node.node_id)?.unwrap_or_default();

                items.push(ProofGenItem {
                    node_id,
                    parent_node_id,
                    strand: ProofStrand {
                        strand_type: ProofStrandType::Leaf,
                        depth,
                        key_hash: leaf_key_hash,
                        val: node.leaf_val()?.to_vec(),
                        key: leaf_key,
                    },
                });
            } else {
                items.push(ProofGenItem {
                    node_id,
                    parent_node_id,
                    strand: ProofStrand {
                        strand_type: ProofStrandType::WitnessLeaf,
                        depth,
                        key_hash: leaf_key_hash,
                        val: node.leaf_val_hash()?.as_bytes().to_vec(),
                        key: vec![],
                    },
                });
            }
        } else if node.is_branch() {
            assert_depth(depth)?;

            if node.left_node_id != 0 {
                reverse_map.insert(node.left_node_id, node_id);
            }
            if node.right_node_id != 0 {
                reverse_map.insert(node.right_node_id, node_id);
            }

            let mut left_hi = hi;
            left_hi.set_bit(depth as usize, false);
            let mut right_lo = lo;
            right_lo.set_bit(depth as usize, true);

            let left_queries = key_hashes.range(lo..=left_hi).next().is_some();
            let right_queries = key_hashes.range(right_lo..=hi).next().is_some();

            // Skip an empty child when all queries went to the sibling:
            // the sibling path's HashEmpty command already covers it.
            if node.left_node_id != 0 || !right_queries {
                self.export_proof_aux(
                    txn,
                    depth + 1,
                    node.left_node_id,
                    node_id,
                    key_hashes,
                    lo,
                    left_hi,
                    items,
                    reverse_map,
                )?;
            }
            if node.right_node_id != 0 || !left_queries {
                self.export_proof_aux(
                    txn,
                    depth + 1,
                    node.right_node_id,
                    node_id,
                    key_hashes,
                    right_lo,
                    hi,
                    items,
                    reverse_map,
                )?;
            }
        } else {
            return Err(Error::IncompleteTree);
        }

        Ok(())
    }

    /// Export everything between two key bounds, down to `depth_limit`
    /// levels of full branches, as a proof. The backbone of sync fragment
    /// responses; `depth_limit` cut-offs become Witness strands.
    pub fn export_proof_range<T: TrieDb>(
        &self,
        txn: &T,
        node_id: u64,
        begin: &Key,
        end: &Key,
    ) -> Result<Proof> {
        let mut items = vec![];
        let mut reverse_map = ProofReverseNodeMap::new();
        let mut curr_path = Key::null();

        self.export_proof_range_aux(
            txn,
            0,
            node_id,
            0,
            u64::MAX,
            true,
            &mut curr_path,
            begin,
            end,
            &mut items,
            &mut reverse_map,
        )?;

        let cmds = export_proof_cmds(txn, &items, &reverse_map, node_id, 0)?;

        Ok(Proof {
            strands: items.into_iter().map(|item| item.strand).collect(),
            cmds,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn export_proof_range_aux<T: TrieDb>(
        &self,
        txn: &T,
        depth: u64,
        node_id: u64,
        parent_node_id: u64,
        mut depth_limit: u64,
        expand_leaves: bool,
        curr_path: &mut Key,
        begin: &Key,
        end: &Key,
        items: &mut Vec<ProofGenItem>,
        reverse_map: &mut ProofReverseNodeMap,
    ) -> Result<()> {
        let node = ParsedNode::read(txn, node_id)?;

        if node.is_empty() {
            items.push(ProofGenItem {
                node_id,
                parent_node_id,
                strand: ProofStrand {
                    strand_type: ProofStrandType::WitnessEmpty,
                    depth,
                    key_hash: *curr_path,
                    val: vec![],
                    key: vec![],
                },
            });
        } else if node.is_leaf() {
            if node.node_type == NodeType::WitnessLeaf {
                return Err(Error::IncompleteTree);
            }

            let leaf_val = node.leaf_val()?;

            if expand_leaves || leaf_val.len() <= 32 {
                let leaf_key = self.get_leaf_key(txn, node.node_id)?.unwrap_or_default();
                items.push(ProofGenItem {
                    node_id,
                    parent_node_id,
                    strand: ProofStrand {
                        strand_type: ProofStrandType::Leaf,
                        depth,
                        key_hash: node.leaf_key_hash()?,
                        val: leaf_val.to_vec(),
                        key: leaf_key,
                    },
                });
            } else {
                items.push(ProofGenItem {
                    node_id,
                    parent_node_id,
                    strand: ProofStrand {
                        strand_type: ProofStrandType::WitnessLeaf,
                        depth,
                        key_hash: node.leaf_key_hash()?,
                        val: node.leaf_val_hash()?.as_bytes().to_vec(),
                        key: vec![],
                    },
                });
            }
        } else if node.is_branch() {
            assert_depth(depth)?;

            if node.left_node_id != 0 {
                reverse_map.insert(node.left_node_id, node_id);
            }
            if node.right_node_id != 0 {
                reverse_map.insert(node.right_node_id, node_id);
            }

            if depth_limit == 0 {
                items.push(ProofGenItem {
                    node_id,
                    parent_node_id,
                    strand: ProofStrand {
                        strand_type: ProofStrandType::Witness,
                        depth,
                        key_hash: *curr_path,
                        val: node.node_hash().as_bytes().to_vec(),
                        key: vec![],
                    },
                });
                return Ok(());
            }

            // Only full branches consume depth budget; chains of one-sided
            // branches stay cheap to expand.
            if node.node_type == NodeType::BranchBoth {
                depth_limit -= 1;
            }

            curr_path.set_bit(depth as usize, true);
            let do_left = *begin < *curr_path;
            let do_right = *end >= *curr_path;

            curr_path.set_bit(depth as usize, false);
            if do_left {
                self.export_proof_range_aux(
                    txn,
                    depth + 1,
                    node.left_node_id,
                    node_id,
                    depth_limit,
                    expand_leaves,
                    curr_path,
                    begin,
                    end,
                    items,
                    reverse_map,
                )?;
            }

            curr_path.set_bit(depth as usize, true);
            if do_right {
                self.export_proof_range_aux(
                    txn,
                    depth + 1,
                    node.right_node_id,
                    node_id,
                    depth_limit,
                    expand_leaves,
                    curr_path,
                    begin,
                    end,
                    items,
                    reverse_map,
                )?;
            }

            curr_path.set_bit(depth as usize, false);
        } else {
            return Err(Error::IncompleteTree);
        }

        Ok(())
    }

    /// Import a proof into an empty head, installing its reconstructed
    /// root. `expected_root` is checked when supplied.
    pub fn import_proof<T: TrieDb>(
        &mut self,
        txn: &mut T,
        proof: &Proof,
        expected_root: Option<&Key>,
    ) -> Result<BuiltNode> {
        if self.head_node_id(txn)? != 0 {
            return Err(Error::ExistsError);
        }

        let root_node = self.import_proof_internal(txn, proof, 0)?;

        if let Some(expected_root) = expected_root {
            if root_node.node_hash != *expected_root {
                return Err(Error::ProofInvalid(
                    "reconstructed root does not match expected root".into(),
                ));
            }
        }

        self.set_head_node_id(txn, root_node.node_id)?;

        Ok(root_node)
    }

    /// Merge a proof over the same root into the current head, replacing
    /// local witnesses with the proof's concrete structure.
    pub fn merge_proof<T: TrieDb>(&mut self, txn: &mut T, proof: &Proof) -> Result<BuiltNode> {
        let root_node = self.import_proof_internal(txn, proof, 0)?;

        if root_node.node_hash != self.root(txn)? {
            return Err(Error::ProofInvalid(
                "different roots, unable to merge proofs".into(),
            ));
        }

        let head_node_id = self.head_node_id(txn)?;
        let updated_root = self.merge_proof_internal(txn, head_node_id, root_node.node_id)?;

        self.set_head_node_id(txn, updated_root.node_id)?;

        Ok(root_node)
    }

    /// Replay a proof's strands and commands into freshly built nodes.
    /// Every verification obligation lives here: strand consumption, depth
    /// accounting, offset bounds, and merge depth agreement.
    pub(crate) fn import_proof_internal<T: TrieDb>(
        &self,
        txn: &mut T,
        proof: &Proof,
        expected_depth: u64,
    ) -> Result<BuiltNode> {
        struct ImportAccum {
            depth: u64,
            node_id: u64,
            next: i64,
            key_hash: Key,
            node_hash: Key,
            merged: bool,
        }

        let mut accums: Vec<ImportAccum> = vec![];

        for (i, strand) in proof.strands.iter().enumerate() {
            let next = (i + 1) as i64;

            let (node_id, node_hash) = match strand.strand_type {
                ProofStrandType::Leaf => {
                    let built = BuiltNode::new_leaf(
                        self,
                        txn,
                        &strand.key_hash,
                        &strand.val,
                        if strand.key.is_empty() {
                            None
                        } else {
                            Some(strand.key.as_slice())
                        },
                    )?;
                    (built.node_id, built.node_hash)
                }
                ProofStrandType::WitnessLeaf => {
                    let val_hash = Key::from_bytes(&strand.val)
                        .map_err(|_| Error::ProofInvalid("bad witness-leaf value hash".into()))?;
                    let built = BuiltNode::new_witness_leaf(txn, &strand.key_hash, &val_hash)?;
                    (built.node_id, built.node_hash)
                }
                ProofStrandType::WitnessEmpty => (0, Key::null()),
                ProofStrandType::Witness => {
                    let node_hash = Key::from_bytes(&strand.val)
                        .map_err(|_| Error::ProofInvalid("bad witness node hash".into()))?;
                    let built = BuiltNode::new_witness(txn, &node_hash)?;
                    (built.node_id, built.node_hash)
                }
                ProofStrandType::Invalid => {
                    return Err(Error::ProofInvalid("invalid strand type".into()));
                }
            };

            accums.push(ImportAccum {
                depth: strand.depth,
                node_id,
                next,
                key_hash: strand.key_hash,
                node_hash,
                merged: false,
            });
        }

        if accums.is_empty() {
            return Err(Error::ProofInvalid("empty proof".into()));
        }

        let last = accums.len() - 1;
        accums[last].next = -1;

        for cmd in &proof.cmds {
            if cmd.node_offset as usize >= proof.strands.len() {
                return Err(Error::ProofInvalid("command offset out of range".into()));
            }
            let offset = cmd.node_offset as usize;

            if accums[offset].merged {
                return Err(Error::ProofInvalid("strand already merged".into()));
            }
            if accums[offset].depth == 0 {
                return Err(Error::ProofInvalid("node depth underflow".into()));
            }

            let sibling = match cmd.op {
                ProofCmdOp::HashProvided => {
                    let hash = cmd
                        .hash
                        .ok_or_else(|| Error::ProofInvalid("missing provided hash".into()))?;
                    BuiltNode::new_witness(txn, &hash)?
                }
                ProofCmdOp::HashEmpty => BuiltNode::empty(),
                ProofCmdOp::Merge => {
                    if accums[offset].next < 0 {
                        return Err(Error::ProofInvalid("no strands left to merge with".into()));
                    }
                    let next_offset = accums[offset].next as usize;

                    if accums[offset].depth != accums[next_offset].depth {
                        return Err(Error::ProofInvalid("merge depth mismatch".into()));
                    }

                    accums[offset].next = accums[next_offset].next;
                    accums[next_offset].merged = true;

                    BuiltNode::stubbed(accums[next_offset].node_id, accums[next_offset].node_hash)
                }
            };

            let accum = &accums[offset];
            let accum_stub = BuiltNode::stubbed(accum.node_id, accum.node_hash);

            // Merges always fold left-then-right; otherwise the key bit
            // above the accumulator decides which side it sits on.
            let branch = if cmd.op == ProofCmdOp::Merge
                || !accum.key_hash.bit(accum.depth as usize - 1)
            {
                BuiltNode::new_branch(txn, &accum_stub, &sibling)?
            } else {
                BuiltNode::new_branch(txn, &sibling, &accum_stub)?
            };

            let accum = &mut accums[offset];
            accum.depth -= 1;
            accum.node_id = branch.node_id;
            accum.node_hash = branch.node_hash;
        }

        if accums[0].next != -1 {
            return Err(Error::ProofInvalid("not all proof strands were merged".into()));
        }
        if accums[0].depth != expected_depth {
            return Err(Error::ProofInvalid("proof did not reach expected depth".into()));
        }

        Ok(BuiltNode::stubbed(accums[0].node_id, accums[0].node_hash))
    }

    /// Lock-step walk of the current tree and an imported proof tree,
    /// adopting the proof's structure wherever the local side is opaque.
    /// Untouched subtrees keep their node ids.
    fn merge_proof_internal<T: TrieDb>(
        &self,
        txn: &mut T,
        orig_node_id: u64,
        new_node_id: u64,
    ) -> Result<BuiltNode> {
        let orig = ParsedNode::read(txn, orig_node_id)?;
        let new = ParsedNode::read(txn, new_node_id)?;

        if (orig.is_witness_any() && !new.is_witness_any())
            || (orig.node_type == NodeType::Witness && new.node_type == NodeType::WitnessLeaf)
        {
            Ok(BuiltNode::reuse(&new))
        } else if orig.is_branch() && new.is_branch() {
            let left = self.merge_proof_internal(txn, orig.left_node_id, new.left_node_id)?;
            let right = self.merge_proof_internal(txn, orig.right_node_id, new.right_node_id)?;

            if orig.left_node_id == left.node_id && orig.right_node_id == right.node_id {
                Ok(BuiltNode::reuse(&orig))
            } else if new.left_node_id == left.node_id && new.right_node_id == right.node_id {
                Ok(BuiltNode::reuse(&new))
            } else {
                BuiltNode::new_branch(txn, &left, &right)
            }
        } else {
            Ok(BuiltNode::reuse(&orig))
        }
    }
}

/// Generate the command stream for a set of exported strands. Walks the
/// accumulators from the deepest level up; neighbors sharing a parent
/// merge, everything else takes a sibling hash (provided or empty).
fn export_proof_cmds<T: TrieDb>(
    txn: &T,
    items: &[ProofGenItem],
    reverse_map: &ProofReverseNodeMap,
    head_node_id: u64,
    start_depth: u64,
) -> Result<Vec<ProofCmd>> {
    if items.is_empty() {
        return Ok(vec![]);
    }

    struct GenAccum {
        depth: u64,
        node_id: u64,
        next: i64,
        merged_order: u64,
        cmds: Vec<ProofCmd>,
    }

    let mut accums: Vec<GenAccum> = vec![];
    let mut max_depth = 0;

    for (i, item) in items.iter().enumerate() {
        max_depth = max_depth.max(item.strand.depth);
        accums.push(GenAccum {
            depth: item.strand.depth,
            node_id: item.node_id,
            next: (i + 1) as i64,
            merged_order: 0,
            cmds: vec![],
        });
    }

    let last = accums.len() - 1;
    accums[last].next = -1;

    let parent_of = |accums: &Vec<GenAccum>, i: usize| -> u64 {
        if accums[i].node_id != 0 {
            reverse_map.get(&accums[i].node_id).copied().unwrap_or(0)
        } else {
            items[i].parent_node_id
        }
    };

    let mut curr_merge_order = 0u64;
    let mut curr_depth = max_depth;

    // O(N*D) = O(N log N): each pass consumes one level of depth.
    while curr_depth > start_depth {
        let mut i: i64 = 0;
        while i != -1 {
            let iu = i as usize;

            if accums[iu].depth != curr_depth {
                i = accums[iu].next;
                continue;
            }

            let curr_parent = parent_of(&accums, iu);

            if accums[iu].next != -1 {
                let ni = accums[iu].next as usize;
                let next_parent = parent_of(&accums, ni);

                if curr_parent == next_parent {
                    accums[iu].cmds.push(ProofCmd {
                        op: ProofCmdOp::Merge,
                        node_offset: iu as u64,
                        hash: None,
                    });
                    accums[ni].merged_order = curr_merge_order;
                    curr_merge_order += 1;
                    accums[iu].next = accums[ni].next;
                    accums[iu].node_id = curr_parent;
                    accums[iu].depth -= 1;
                    i = accums[iu].next;
                    continue;
                }
            }

            let parent_node = ParsedNode::read(txn, curr_parent)?;
            let sibling_node_id = if parent_node.left_node_id == accums[iu].node_id {
                parent_node.right_node_id
            } else {
                parent_node.left_node_id
            };

            if sibling_node_id != 0 {
                let sibling = ParsedNode::read(txn, sibling_node_id)?;
                accums[iu].cmds.push(ProofCmd {
                    op: ProofCmdOp::HashProvided,
                    node_offset: iu as u64,
                    hash: Some(sibling.node_hash()),
                });
            } else {
                accums[iu].cmds.push(ProofCmd {
                    op: ProofCmdOp::HashEmpty,
                    node_offset: iu as u64,
                    hash: None,
                });
            }

            accums[iu].node_id = curr_parent;
            accums[iu].depth -= 1;
            i = accums[iu].next;
        }

        curr_depth -= 1;
    }

    if accums[0].depth != start_depth || accums[0].node_id != head_node_id || accums[0].next != -1
    {
        return Err(Error::CorruptionError(
            "proof command generation did not converge on the root".into(),
        ));
    }
    accums[0].merged_order = curr_merge_order;

    accums.sort_by_key(|accum| accum.merged_order);

    let mut cmds = vec![];
    for accum in accums.iter_mut() {
        cmds.append(&mut accum.cmds);
    }

    Ok(cmds)
}

/// Human-readable rendering of a proof, for the CLI `--dump` flag.
pub fn dump_proof(proof: &Proof) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "STRANDS ({}):", proof.strands.len());
    for (i, strand) in proof.strands.iter().enumerate() {
        let _ = writeln!(out, "  STRAND {}: 0x{}", i, strand.key_hash);
        let _ = writeln!(
            out,
            "    {:?}  depth={}",
            strand.strand_type, strand.depth
        );
        match strand.strand_type {
            ProofStrandType::Leaf => {
                let _ = writeln!(out, "    val: {}", String::from_utf8_lossy(&strand.val));
            }
            ProofStrandType::WitnessLeaf | ProofStrandType::Witness => {
                let _ = writeln!(out, "    hash: 0x{}", hex::encode(&strand.val));
            }
            _ => {}
        }
    }

    let _ = writeln!(out, "CMDS ({}):", proof.cmds.len());
    for (i, cmd) in proof.cmds.iter().enumerate() {
        let _ = writeln!(out, "  CMD {}: {:?} -> {}", i, cmd.op, cmd.node_offset);
        if let Some(hash) = &cmd.hash {
            let _ = writeln!(out, "    sibling hash: 0x{}", hash);
        }
    }

    out
}
