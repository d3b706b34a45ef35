use crate::errors::Result;
use crate::key::Key;
use crate::node::ParsedNode;
use crate::storage::TrieDb;
use crate::update::UpdateSet;

pub const DEFAULT_HEAD: &str = "master";

#[derive(Debug, Clone)]
pub struct MerkleDbOpts {
    /// Keep a side table mapping leaf node ids to the original user keys.
    pub track_keys: bool,
}

impl Default for MerkleDbOpts {
    fn default() -> MerkleDbOpts {
        MerkleDbOpts { track_keys: true }
    }
}

/// Session state for one tree: which head is active, or which node the
/// session is detached at. Storage access always goes through an explicit
/// backend handle, so a `MerkleDb` is cheap and carries no connection.
pub struct MerkleDb {
    head: String,
    detached_head: bool,
    detached_head_node_id: u64,
    pub track_keys: bool,
}

impl MerkleDb {
    pub fn new(opts: MerkleDbOpts) -> MerkleDb {
        MerkleDb {
            head: DEFAULT_HEAD.to_string(),
            detached_head: false,
            detached_head_node_id: 0,
            track_keys: opts.track_keys,
        }
    }

    pub fn is_detached(&self) -> bool {
        self.detached_head
    }

    /// The active head name, or `None` in detached mode.
    pub fn head_name(&self) -> Option<&str> {
        if self.detached_head {
            None
        } else {
            Some(&self.head)
        }
    }

    pub fn detached_node_id(&self) -> u64 {
        self.detached_head_node_id
    }

    /// Detach at the given node (0 = the empty tree).
    pub fn checkout_node(&mut self, node_id: u64) {
        self.detached_head = true;
        self.detached_head_node_id = node_id;
    }

    /// Switch to a named head. The head need not exist yet; a missing head
    /// reads as the empty tree.
    pub fn checkout_head(&mut self, name: &str) {
        self.head = name.to_string();
        self.detached_head = false;
    }

    pub fn head_node_id<T: TrieDb>(&self, txn: &T) -> Result<u64> {
        if self.detached_head {
            return Ok(self.detached_head_node_id);
        }
        Ok(txn.get_head(&self.head)?.unwrap_or(0))
    }

    pub fn head_node_id_of<T: TrieDb>(&self, txn: &T, name: &str) -> Result<u64> {
        Ok(txn.get_head(name)?.unwrap_or(0))
    }

    pub fn set_head_node_id<T: TrieDb>(&mut self, txn: &mut T, node_id: u64) -> Result<()> {
        if self.detached_head {
            self.detached_head_node_id = node_id;
        } else {
            txn.put_head(&self.head, node_id)?;
        }
        Ok(())
    }

    /// Root hash of the active head.
    pub fn root<T: TrieDb>(&self, txn: &T) -> Result<Key> {
        let node_id = self.head_node_id(txn)?;
        self.root_of(txn, node_id)
    }

    /// Root hash of an arbitrary node.
    pub fn root_of<T: TrieDb>(&self, txn: &T, node_id: u64) -> Result<Key> {
        Ok(ParsedNode::read(txn, node_id)?.node_hash())
    }

    /// Enter detached mode at the current root.
    pub fn fork<T: TrieDb>(&mut self, txn: &mut T) -> Result<()> {
        let node_id = self.head_node_id(txn)?;
        self.checkout_node(node_id);
        self.set_head_node_id(txn, node_id)
    }

    /// Create a named head sharing the current root, and switch to it.
    pub fn fork_to<T: TrieDb>(&mut self, txn: &mut T, name: &str) -> Result<()> {
        let node_id = self.head_node_id(txn)?;
        self.checkout_head(name);
        self.set_head_node_id(txn, node_id)
    }

    pub fn remove_head<T: TrieDb>(&self, txn: &mut T, name: &str) -> Result<()> {
        txn.del_head(name)
    }

    /// Start accumulating a batch of updates.
    pub fn change(&self) -> UpdateSet {
        UpdateSet::new(self.track_keys)
    }

    /// The original user key recorded for a leaf node, when key tracking
    /// is on and the key was available at write time.
    pub fn get_leaf_key<T: TrieDb>(&self, txn: &T, node_id: u64) -> Result<Option<Vec<u8>>> {
        if !self.track_keys {
            return Ok(None);
        }
        txn.get_leaf_key(node_id)
    }

    pub(crate) fn set_leaf_key<T: TrieDb>(
        &self,
        txn: &mut T,
        node_id: u64,
        leaf_key: &[u8],
    ) -> Result<()> {
        if !self.track_keys || leaf_key.is_empty() {
            return Ok(());
        }
        txn.put_leaf_key(node_id, leaf_key)
    }
}
