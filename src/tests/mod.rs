use crate::db::{MerkleDb, MerkleDbOpts};
use crate::errors::{Error, Result};
use crate::key::Key;
use crate::storage::{MemoryTrieDb, TrieDb};

mod proofs;

pub fn test_db() -> (MerkleDb, MemoryTrieDb) {
    (MerkleDb::new(MerkleDbOpts::default()), MemoryTrieDb::new())
}

/// Run two scripts from an empty detached head and compare the resulting
/// roots.
pub fn equiv_heads<F1, F2>(
    db: &mut MerkleDb,
    txn: &mut MemoryTrieDb,
    f1: F1,
    f2: F2,
    expect_equal: bool,
) where
    F1: FnOnce(&mut MerkleDb, &mut MemoryTrieDb) -> Result<()>,
    F2: FnOnce(&mut MerkleDb, &mut MemoryTrieDb) -> Result<()>,
{
    db.checkout_node(0);
    f1(db, txn).unwrap();
    let root1 = db.root(txn).unwrap();

    db.checkout_node(0);
    f2(db, txn).unwrap();
    let root2 = db.root(txn).unwrap();

    assert_eq!(root1 == root2, expect_equal);
}

#[test]
fn basic_put_get() {
    let (mut db, mut txn) = test_db();

    db.put(&mut txn, b"hello", b"world").unwrap();

    assert_eq!(db.get(&txn, b"hello").unwrap().unwrap(), b"world");

    let stats = db.stats(&txn).unwrap();
    assert_eq!(stats.num_leaf_nodes, 1);
}

#[test]
fn zero_length_keys() {
    let (db, _txn) = test_db();

    assert!(matches!(
        db.change().put(b"", b"1"),
        Err(Error::ZeroLengthKey)
    ));
    assert!(matches!(db.change().del(b""), Err(Error::ZeroLengthKey)));
}

#[test]
fn empty_heads() {
    let (mut db, mut txn) = test_db();

    assert_eq!(db.root(&txn).unwrap(), Key::null());
    assert!(db.get(&txn, b"hello").unwrap().is_none());

    let stats = db.stats(&txn).unwrap();
    assert_eq!(stats.num_leaf_nodes, 0);

    db.put(&mut txn, b"a", b"1").unwrap();
    assert_ne!(db.root(&txn).unwrap(), Key::null());

    db.del(&mut txn, b"a").unwrap();
    assert_eq!(db.root(&txn).unwrap(), Key::null());
}

#[test]
fn overwriting_updates_before_apply() {
    let (mut db, mut txn) = test_db();

    equiv_heads(
        &mut db,
        &mut txn,
        |db, txn| {
            db.put(txn, b"a", b"1")?;
            db.put(txn, b"a", b"1")
        },
        |db, txn| db.put(txn, b"a", b"1"),
        true,
    );

    // del overwrites put
    equiv_heads(
        &mut db,
        &mut txn,
        |db, txn| {
            let mut changes = db.change();
            changes.put(b"a", b"1")?.del(b"a")?;
            db.apply(txn, changes)
        },
        |_db, _txn| Ok(()),
        true,
    );

    // put overwrites del overwrites put
    equiv_heads(
        &mut db,
        &mut txn,
        |db, txn| {
            let mut changes = db.change();
            changes.put(b"a", b"1")?.del(b"a")?.put(b"a", b"2")?;
            db.apply(txn, changes)
        },
        |db, txn| db.put(txn, b"a", b"2"),
        true,
    );
}

#[test]
fn batch_insert() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    changes.put(b"a", b"1").unwrap();
    changes.put(b"b", b"2").unwrap();
    changes.put(b"c", b"3").unwrap();
    db.apply(&mut txn, changes).unwrap();

    let stats = db.stats(&txn).unwrap();
    assert_eq!(stats.num_leaf_nodes, 3);

    assert_eq!(db.get(&txn, b"b").unwrap().unwrap(), b"2");
}

#[test]
fn get_multi() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    for i in 0..100 {
        let key = i.to_string();
        changes
            .put(key.as_bytes(), format!("N = {}", i).as_bytes())
            .unwrap();
    }
    db.apply(&mut txn, changes).unwrap();

    let mut query = crate::get::GetMultiQuery::new();
    for key in ["30", "31", "32", "blah", "nope"] {
        query.insert(key.as_bytes().to_vec(), Default::default());
    }
    db.get_multi(&txn, &mut query).unwrap();

    assert!(query[b"30".as_slice()].exists);
    assert_eq!(query[b"30".as_slice()].val, b"N = 30");
    assert!(query[b"31".as_slice()].exists);
    assert_eq!(query[b"31".as_slice()].val, b"N = 31");
    assert!(query[b"32".as_slice()].exists);
    assert_eq!(query[b"32".as_slice()].val, b"N = 32");
    assert!(!query[b"blah".as_slice()].exists);
    assert!(!query[b"nope".as_slice()].exists);
}

#[test]
fn fork_and_detached_checkout() {
    let (mut db, mut txn) = test_db();

    let mut changes = db.change();
    changes.put(b"a", b"A").unwrap();
    changes.put(b"b", b"B").unwrap();
    changes.put(b"c", b"C").unwrap();
    changes.put(b"d", b"D").unwrap();
    db.apply(&mut txn, changes).unwrap();

    let orig_node_id = db.head_node_id(&txn).unwrap();

    db.fork(&mut txn).unwrap();
    assert!(db.is_detached());

    db.put(&mut txn, b"e", b"E").unwrap();

    let new_node_id = db.head_node_id(&txn).unwrap();

    assert_eq!(db.get(&txn, b"a").unwrap().unwrap(), b"A");
    assert_eq!(db.get(&txn, b"e").unwrap().unwrap(), b"E");
    assert_eq!(db.stats(&txn).unwrap().num_leaf_nodes, 5);

    db.checkout_node(orig_node_id);
    assert_eq!(db.get(&txn, b"a").unwrap().unwrap(), b"A");
    assert!(db.get(&txn, b"e").unwrap().is_none());
    assert_eq!(db.stats(&txn).unwrap().num_leaf_nodes, 4);

    db.checkout_node(new_node_id);
    assert_eq!(db.get(&txn, b"a").unwrap().unwrap(), b"A");
    assert_eq!(db.get(&txn, b"e").unwrap().unwrap(), b"E");

    // The named head never saw the forked writes.
    db.checkout_head(crate::db::DEFAULT_HEAD);
    assert_eq!(db.head_node_id(&txn).unwrap(), orig_node_id);
}

#[test]
fn fork_to_named_head() {
    let (mut db, mut txn) = test_db();

    db.put(&mut txn, b"a", b"1").unwrap();
    let orig_root = db.root(&txn).unwrap();

    db.fork_to(&mut txn, "branch").unwrap();
    assert_eq!(db.head_name(), Some("branch"));
    assert_eq!(db.root(&txn).unwrap(), orig_root);

    db.put(&mut txn, b"b", b"2").unwrap();
    assert_ne!(db.root(&txn).unwrap(), orig_root);

    db.checkout_head(crate::db::DEFAULT_HEAD);
    assert_eq!(db.root(&txn).unwrap(), orig_root);

    assert_eq!(txn.heads().unwrap().len(), 2);
}

#[test]
fn sqlite_backend_smoke() {
    use crate::storage::{SqliteTrieDb, TrieDb};

    let mut conn = SqliteTrieDb::open_memory().unwrap();
    let mut db = MerkleDb::new(MerkleDbOpts::default());

    let root = {
        let tx = conn.transaction().unwrap();
        let root = {
            let mut store = SqliteTrieDb::new(&tx);
            db.put(&mut store, b"hello", b"world").unwrap();
            db.put(&mut store, b"foo", b"bar").unwrap();
            assert_eq!(store.last_node_id().unwrap(), store.node_ids().unwrap().len() as u64);
            db.root(&store).unwrap()
        };
        tx.commit().unwrap();
        root
    };

    let tx = conn.transaction().unwrap();
    let store = SqliteTrieDb::new(&tx);
    assert_eq!(db.root(&store).unwrap(), root);
    assert_eq!(db.get(&store, b"hello").unwrap().unwrap(), b"world");
    assert_eq!(db.get(&store, b"foo").unwrap().unwrap(), b"bar");
}

#[test]
fn memory_and_sqlite_roots_agree() {
    use crate::storage::SqliteTrieDb;

    let (mut mem_db, mut mem_txn) = test_db();
    let mut changes = mem_db.change();
    for i in 0..50 {
        changes
            .put(i.to_string().as_bytes(), format!("{}val", i).as_bytes())
            .unwrap();
    }
    mem_db.apply(&mut mem_txn, changes).unwrap();

    let mut conn = SqliteTrieDb::open_memory().unwrap();
    let tx = conn.transaction().unwrap();
    let mut store = SqliteTrieDb::new(&tx);
    let mut sql_db = MerkleDb::new(MerkleDbOpts::default());
    let mut changes = sql_db.change();
    for i in 0..50 {
        changes
            .put(i.to_string().as_bytes(), format!("{}val", i).as_bytes())
            .unwrap();
    }
    sql_db.apply(&mut store, changes).unwrap();

    assert_eq!(mem_db.root(&mem_txn).unwrap(), sql_db.root(&store).unwrap());
}
