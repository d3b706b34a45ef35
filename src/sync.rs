use std::collections::HashSet;

use crate::db::MerkleDb;
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::node::{assert_depth, BuiltNode, ParsedNode};
use crate::proofs::Proof;
use crate::storage::TrieDb;

/// Ask a peer for the subtree at `path` truncated to `start_depth`,
/// expanded `depth_limit` levels down. `expand_leaves` forces full leaf
/// values even when they are large.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    pub path: Key,
    pub start_depth: u64,
    pub depth_limit: u64,
    pub expand_leaves: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffType {
    Added,
    Deleted,
    Changed,
}

impl MerkleDb {
    /// Responder side of the sync protocol: turn a sorted batch of
    /// requests into proof fragments, stopping early once `bytes_budget`
    /// is spent.
    pub fn handle_sync_requests<T: TrieDb>(
        &self,
        txn: &T,
        node_id: u64,
        reqs: &[SyncRequest],
        bytes_budget: u64,
    ) -> Result<Vec<Proof>> {
        if bytes_budget == 0 {
            return Err(Error::ProofInvalid("bytes budget can't be 0".into()));
        }
        if reqs.is_empty() {
            return Err(Error::ProofInvalid("empty sync request batch".into()));
        }
        for i in 1..reqs.len() {
            if reqs[i].path <= reqs[i - 1].path {
                return Err(Error::ProofInvalid("sync requests out of order".into()));
            }
        }

        let mut resps = vec![];
        let mut curr_path = Key::null();
        let mut bytes_budget = bytes_budget;

        self.handle_sync_requests_aux(
            txn,
            0,
            node_id,
            &mut curr_path,
            reqs,
            &mut resps,
            &mut bytes_budget,
        )?;

        debug!(
            "handle_sync_requests: {} requests -> {} fragments",
            reqs.len(),
            resps.len()
        );

        Ok(resps)
    }

    #[allow(clippy::too_many_arguments)]
    fn handle_sync_requests_aux<T: TrieDb>(
        &self,
        txn: &T,
        depth: u64,
        node_id: u64,
        curr_path: &mut Key,
        reqs: &[SyncRequest],
        resps: &mut Vec<Proof>,
        bytes_budget: &mut u64,
    ) -> Result<()> {
        if reqs.is_empty() || *bytes_budget == 0 {
            return Ok(());
        }

        // A request must not end on the path of another request in the
        // batch; the requester's reconcile pass never produces that.
        if reqs.len() == 1 && reqs[0].start_depth == depth {
            let proof = self.export_proof_fragment(txn, node_id, *curr_path, &reqs[0])?;
            let estimate = estimate_proof_size(&proof);
            *bytes_budget = bytes_budget.saturating_sub(estimate);
            resps.push(proof);
            return Ok(());
        }

        let node = ParsedNode::read(txn, node_id)?;

        if !node.is_branch() {
            return Err(Error::SyncMismatch("fragment path not available".into()));
        }

        let middle = reqs.partition_point(|req| !req.path.bit(depth as usize));

        assert_depth(depth)?;

        if node.left_node_id != 0 || middle == reqs.len() {
            self.handle_sync_requests_aux(
                txn,
                depth + 1,
                node.left_node_id,
                curr_path,
                &reqs[..middle],
                resps,
                bytes_budget,
            )?;
        }

        if node.right_node_id != 0 || middle == 0 {
            curr_path.set_bit(depth as usize, true);
            self.handle_sync_requests_aux(
                txn,
                depth + 1,
                node.right_node_id,
                curr_path,
                &reqs[middle..],
                resps,
                bytes_budget,
            )?;
            curr_path.set_bit(depth as usize, false);
        }

        Ok(())
    }

    /// Graft imported fragments into the shadow tree at their request
    /// paths, returning the new shadow root.
    pub(crate) fn import_sync_responses<T: TrieDb>(
        &self,
        txn: &mut T,
        node_id: u64,
        reqs: &[SyncRequest],
        resps: &[Proof],
    ) -> Result<BuiltNode> {
        if resps.len() > reqs.len() {
            return Err(Error::ProofInvalid(
                "too many responses when importing fragments".into(),
            ));
        }
        if resps.is_empty() {
            return Err(Error::ProofInvalid("no fragments to import".into()));
        }

        let frags: Vec<(&SyncRequest, &Proof)> =
            reqs.iter().take(resps.len()).zip(resps.iter()).collect();

        self.import_sync_responses_aux(txn, node_id, 0, &frags)
    }

    fn import_sync_responses_aux<T: TrieDb>(
        &self,
        txn: &mut T,
        node_id: u64,
        depth: u64,
        frags: &[(&SyncRequest, &Proof)],
    ) -> Result<BuiltNode> {
        let orig = ParsedNode::read(txn, node_id)?;

        // No fragment targets this subtree: keep it as-is.
        if frags.is_empty() {
            return Ok(BuiltNode::reuse(&orig));
        }

        if frags.len() == 1 && frags[0].0.start_depth == depth {
            if !orig.is_witness_any() {
                return Err(Error::SyncMismatch(
                    "fragment import tried to expand a non-witness".into(),
                ));
            }

            let new_node = self.import_proof_internal(txn, frags[0].1, depth)?;

            if new_node.node_hash != orig.node_hash() {
                // The very first fragment replaces the null-hash stub the
                // shadow starts from; everything else must agree.
                let is_initial_stub =
                    depth == 0 && orig.node_hash() == Key::null() && orig.is_witness();
                if !is_initial_stub {
                    return Err(Error::SyncMismatch(
                        "fragment subtree hash disagrees with recorded witness".into(),
                    ));
                }
            }

            return Ok(new_node);
        }

        if orig.is_branch() {
            let middle = frags.partition_point(|(req, _)| !req.path.bit(depth as usize));

            assert_depth(depth)?;

            let left = if orig.left_node_id != 0 || middle == frags.len() {
                self.import_sync_responses_aux(txn, orig.left_node_id, depth + 1, &frags[..middle])?
            } else {
                BuiltNode::reuse(&ParsedNode::read(txn, orig.left_node_id)?)
            };

            let right = if orig.right_node_id != 0 || middle == 0 {
                self.import_sync_responses_aux(
                    txn,
                    orig.right_node_id,
                    depth + 1,
                    &frags[middle..],
                )?
            } else {
                BuiltNode::reuse(&ParsedNode::read(txn, orig.right_node_id)?)
            };

            return BuiltNode::new_branch(txn, &left, &right);
        }

        Ok(BuiltNode::reuse(&orig))
    }
}

fn estimate_proof_size(proof: &Proof) -> u64 {
    let mut size = proof.strands.len() as u64 * 10;

    for strand in &proof.strands {
        size += strand.val.len() as u64;
        size += strand.key.len() as u64;
    }

    size += proof.cmds.len() as u64;

    for cmd in &proof.cmds {
        if cmd.hash.is_some() {
            size += 32;
        }
    }

    size
}

/// Requester side of the sync protocol. Holds a *shadow* of the remote
/// tree, seeded as a single witness stub, and repeatedly compares it
/// against the local tree to decide which subtrees to fetch next.
pub struct Sync {
    pub node_id_local: u64,
    pub node_id_shadow: u64,
    pub initial_request_depth: u64,
    pub later_request_depth: u64,
    inited: bool,
    finished_nodes: HashSet<u64>,
}

impl Sync {
    pub fn new<T: TrieDb>(txn: &mut T, node_id_local: u64) -> Result<Sync> {
        let stub = BuiltNode::new_witness(txn, &Key::null())?;
        Ok(Sync {
            node_id_local,
            node_id_shadow: stub.node_id,
            initial_request_depth: 4,
            later_request_depth: 4,
            inited: false,
            finished_nodes: HashSet::new(),
        })
    }

    /// Requests for the next round. Empty means the shadow matches the
    /// remote tree and the sync is complete.
    pub fn get_reqs<T: TrieDb>(&mut self, txn: &T, bytes_budget: u64) -> Result<Vec<SyncRequest>> {
        if bytes_budget == 0 {
            return Err(Error::ProofInvalid("bytes budget can't be 0".into()));
        }

        if !self.inited {
            return Ok(vec![SyncRequest {
                path: Key::null(),
                start_depth: 0,
                depth_limit: self.initial_request_depth,
                expand_leaves: false,
            }]);
        }

        let mut output = vec![];
        let mut curr_path = Key::null();
        let mut bytes_budget = bytes_budget;

        self.reconcile_trees(
            txn,
            self.node_id_local,
            self.node_id_shadow,
            0,
            &mut curr_path,
            &mut bytes_budget,
            &mut output,
        )?;

        Ok(output)
    }

    /// Fold a round of responses into the shadow.
    pub fn add_resps<T: TrieDb>(
        &mut self,
        db: &MerkleDb,
        txn: &mut T,
        reqs: &[SyncRequest],
        resps: &[Proof],
    ) -> Result<()> {
        let old_root = db.root_of(txn, self.node_id_shadow)?;
        let new_shadow = db.import_sync_responses(txn, self.node_id_shadow, reqs, resps)?;

        if self.inited && old_root != db.root_of(txn, new_shadow.node_id)? {
            return Err(Error::SyncMismatch(
                "shadow root changed while importing responses".into(),
            ));
        }

        self.inited = true;
        self.node_id_shadow = new_shadow.node_id;
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn reconcile_trees<T: TrieDb>(
        &mut self,
        txn: &T,
        node_id_ours: u64,
        node_id_theirs: u64,
        depth: u64,
        curr_path: &mut Key,
        bytes_budget: &mut u64,
        output: &mut Vec<SyncRequest>,
    ) -> Result<()> {
        let ours = ParsedNode::read(txn, node_id_ours)?;
        let theirs = ParsedNode::read(txn, node_id_theirs)?;

        if ours.node_hash() == theirs.node_hash()
            || self.finished_nodes.contains(&node_id_ours)
            || *bytes_budget == 0
        {
            return Ok(());
        }

        if theirs.is_branch() {
            let output_size_before = output.len();

            self.reconcile_trees(
                txn,
                if ours.is_branch() {
                    ours.left_node_id
                } else {
                    node_id_ours
                },
                theirs.left_node_id,
                depth + 1,
                curr_path,
                bytes_budget,
                output,
            )?;

            curr_path.set_bit(depth as usize, true);
            self.reconcile_trees(
                txn,
                if ours.is_branch() {
                    ours.right_node_id
                } else {
                    node_id_ours
                },
                theirs.right_node_id,
                depth + 1,
                curr_path,
                bytes_budget,
                output,
            )?;
            curr_path.set_bit(depth as usize, false);

            // Subtrees that produced no requests are fully reconciled and
            // never need revisiting.
            if output.len() == output_size_before && node_id_ours != 0 {
                self.finished_nodes.insert(node_id_ours);
            }
        } else if theirs.is_witness_leaf() {
            output.push(SyncRequest {
                path: *curr_path,
                start_depth: depth,
                depth_limit: 1,
                expand_leaves: true,
            });
            *bytes_budget = bytes_budget.saturating_sub(16);
        } else if theirs.is_witness() {
            output.push(SyncRequest {
                path: *curr_path,
                start_depth: depth,
                depth_limit: self.later_request_depth,
                expand_leaves: false,
            });
            *bytes_budget = bytes_budget.saturating_sub(16);
        }

        Ok(())
    }
}

/// Per-leaf diff between two fully materialized trees in the same store,
/// typically the local tree and a completed shadow.
pub fn synced_diff<T, F>(txn: &T, node_id_ours: u64, node_id_theirs: u64, cb: &mut F) -> Result<()>
where
    T: TrieDb,
    F: FnMut(DiffType, &ParsedNode),
{
    let ours = ParsedNode::read(txn, node_id_ours)?;
    let theirs = ParsedNode::read(txn, node_id_theirs)?;

    if ours.node_hash() == theirs.node_hash() {
        return Ok(());
    }

    if ours.is_witness() || theirs.is_witness() {
        return Err(Error::WitnessEncountered);
    }

    if ours.is_branch() && theirs.is_branch() {
        synced_diff(txn, ours.left_node_id, theirs.left_node_id, cb)?;
        synced_diff(txn, ours.right_node_id, theirs.right_node_id, cb)?;
    } else if theirs.is_branch() {
        let mut found: Option<ParsedNode> = None;
        synced_diff_aux(txn, theirs.left_node_id, &ours, &mut found, DiffType::Added, cb)?;
        synced_diff_aux(txn, theirs.right_node_id, &ours, &mut found, DiffType::Added, cb)?;
        if ours.node_id != 0 {
            match found {
                Some(found) => {
                    if found.node_hash() != ours.node_hash() {
                        cb(DiffType::Changed, &found);
                    }
                }
                None => cb(DiffType::Deleted, &ours),
            }
        }
    } else if ours.is_branch() {
        let mut found: Option<ParsedNode> = None;
        synced_diff_aux(txn, ours.left_node_id, &theirs, &mut found, DiffType::Deleted, cb)?;
        synced_diff_aux(txn, ours.right_node_id, &theirs, &mut found, DiffType::Deleted, cb)?;
        if theirs.node_id != 0 {
            match found {
                Some(found) => {
                    if found.node_hash() != theirs.node_hash() {
                        cb(DiffType::Changed, &theirs);
                    }
                }
                None => cb(DiffType::Added, &theirs),
            }
        }
    } else if ours.is_leaf() && theirs.is_leaf() && ours.leaf_key_hash()? == theirs.leaf_key_hash()?
    {
        cb(DiffType::Changed, &theirs);
    } else {
        if ours.node_id != 0 {
            cb(DiffType::Deleted, &ours);
        }
        if theirs.node_id != 0 {
            cb(DiffType::Added, &theirs);
        }
    }

    Ok(())
}

fn synced_diff_aux<T, F>(
    txn: &T,
    node_id: u64,
    search_node: &ParsedNode,
    found: &mut Option<ParsedNode>,
    diff_type: DiffType,
    cb: &mut F,
) -> Result<()>
where
    T: TrieDb,
    F: FnMut(DiffType, &ParsedNode),
{
    let node = ParsedNode::read(txn, node_id)?;

    if node.is_witness() {
        return Err(Error::WitnessEncountered);
    }

    if node.is_branch() {
        synced_diff_aux(txn, node.left_node_id, search_node, found, diff_type, cb)?;
        synced_diff_aux(txn, node.right_node_id, search_node, found, diff_type, cb)?;
    } else if search_node.node_id != 0
        && node.node_id != 0
        && search_node.is_leaf()
        && node.leaf_key_hash()? == search_node.leaf_key_hash()?
    {
        *found = Some(node);
    } else if node.node_id != 0 {
        cb(diff_type, &node);
    }

    Ok(())
}
