//! Authenticated, versioned key-value store on a sparse binary Merkle
//! trie.
//!
//! Every logical database state is addressable by a 32-byte root digest.
//! Updates are copy-on-write: a batch of puts and deletes produces a new
//! root that shares unchanged subtrees with every previous version.
//! Subsets of a tree can be exported as compact proofs that third parties
//! verify against the root, import into an empty store, read from, update
//! (producing the same new root the full store would), or exchange to
//! incrementally synchronize diverging trees.
//!
//! Storage is abstract: all operations take an explicit backend handle
//! (SQLite and in-memory backends are provided) and run inside whatever
//! transaction the caller manages.

#[macro_use]
pub mod util;

pub mod db;
pub mod diff;
pub mod errors;
pub mod gc;
pub mod get;
pub mod iterator;
pub mod key;
pub mod node;
pub mod proofs;
pub mod storage;
pub mod sync;
pub mod transport;
pub mod update;
pub mod walk;

#[cfg(test)]
mod tests;

pub use crate::db::{MerkleDb, MerkleDbOpts, DEFAULT_HEAD};
pub use crate::diff::DiffRecord;
pub use crate::errors::{Error, Result};
pub use crate::gc::{GarbageCollector, GcStats};
pub use crate::get::{GetMultiQuery, GetMultiRawQuery, GetResult};
pub use crate::iterator::{IteratorCheckpoint, TrieIterator};
pub use crate::key::Key;
pub use crate::node::{BuiltNode, NodeType, ParsedNode};
pub use crate::proofs::{Proof, ProofCmd, ProofCmdOp, ProofStrand, ProofStrandType};
pub use crate::storage::{MemoryTrieDb, SqliteTrieDb, TrieDb};
pub use crate::sync::{synced_diff, DiffType, Sync, SyncRequest};
pub use crate::transport::EncodingType;
pub use crate::update::UpdateSet;
pub use crate::walk::{dump_tree, walk_tree, TreeStats};
