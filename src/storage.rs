use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::Path;

use rusqlite::{Connection, OpenFlags, OptionalExtension, ToSql};

use crate::errors::{Error, Result};

/// Storage contract for the trie: three tables keyed by 64-bit node id
/// (`heads` by name), point lookups, monotonic id allocation, and head
/// enumeration. Implementations wrap an open transaction (or an owned
/// map), so every method is already transaction-scoped; atomicity and
/// snapshot isolation come from the host transaction.
pub trait TrieDb {
    fn get_node(&self, node_id: u64) -> Result<Option<Vec<u8>>>;
    fn put_node(&mut self, node_id: u64, data: &[u8]) -> Result<()>;
    fn del_node(&mut self, node_id: u64) -> Result<()>;

    /// Largest allocated node id, or 0 when no nodes are stored.
    fn last_node_id(&self) -> Result<u64>;

    /// Every stored node id, for the GC sweep.
    fn node_ids(&self) -> Result<Vec<u64>>;

    fn get_head(&self, name: &str) -> Result<Option<u64>>;
    fn put_head(&mut self, name: &str, node_id: u64) -> Result<()>;
    fn del_head(&mut self, name: &str) -> Result<()>;

    /// All named heads, in name order.
    fn heads(&self) -> Result<Vec<(String, u64)>>;

    fn get_leaf_key(&self, node_id: u64) -> Result<Option<Vec<u8>>>;
    fn put_leaf_key(&mut self, node_id: u64, key: &[u8]) -> Result<()>;
    fn del_leaf_key(&mut self, node_id: u64) -> Result<()>;
}

/// Append a node record under a freshly allocated id. Id 0 is reserved
/// for Empty and never written.
pub fn write_node<T: TrieDb>(txn: &mut T, data: &[u8]) -> Result<u64> {
    let node_id = txn.last_node_id()? + 1;
    txn.put_node(node_id, data)?;
    trace!("write_node: id {} ({} bytes)", node_id, data.len());
    Ok(node_id)
}

pub(crate) fn u64_to_sql(x: u64) -> Result<i64> {
    if x > i64::MAX as u64 {
        return Err(Error::CorruptionError(format!(
            "id out of sql range: {}",
            x
        )));
    }
    Ok(x as i64)
}

pub const SQL_SCHEMA_VERSION: i64 = 1;

static SQL_MERKDB_TABLES: &str = "
CREATE TABLE IF NOT EXISTS heads (
   name TEXT PRIMARY KEY,
   node_id INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS nodes (
   node_id INTEGER PRIMARY KEY,
   data BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS leaf_keys (
   node_id INTEGER PRIMARY KEY,
   key BLOB NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_version (
   version INTEGER DEFAULT 1 NOT NULL
);
";

/// SQLite rendering of the storage contract. Construct one over an open
/// `rusqlite::Transaction` (it derefs to `Connection`); the caller owns
/// commit and abort.
pub struct SqliteTrieDb<'a> {
    conn: &'a Connection,
}

impl<'a> SqliteTrieDb<'a> {
    pub fn new(conn: &'a Connection) -> SqliteTrieDb<'a> {
        SqliteTrieDb { conn }
    }

    /// Open (creating if necessary) a merkdb database file and set the
    /// usual pragmas.
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool) -> Result<Connection> {
        let mut create_flag = false;
        let open_flags = if path.as_ref().to_str() != Some(":memory:") {
            match fs::metadata(path.as_ref()) {
                Err(e) => {
                    if e.kind() == io::ErrorKind::NotFound {
                        if !readonly {
                            create_flag = true;
                            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
                        } else {
                            return Err(Error::NotFoundError);
                        }
                    } else {
                        return Err(Error::IOError(e));
                    }
                }
                Ok(_md) => {
                    if !readonly {
                        OpenFlags::SQLITE_OPEN_READ_WRITE
                    } else {
                        OpenFlags::SQLITE_OPEN_READ_ONLY
                    }
                }
            }
        } else {
            create_flag = true;
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
        };

        let mut conn = Connection::open_with_flags(path, open_flags)?;
        Self::sql_pragma(&conn, "journal_mode", &"WAL")?;
        Self::sql_pragma(&conn, "synchronous", &"NORMAL")?;

        if create_flag {
            Self::create_tables_if_needed(&mut conn)?;
        }

        let version = Self::get_schema_version(&conn)?;
        if version != SQL_SCHEMA_VERSION {
            return Err(Error::CorruptionError(format!(
                "unsupported schema version: {}",
                version
            )));
        }

        Ok(conn)
    }

    pub fn open_memory() -> Result<Connection> {
        let mut conn = Connection::open_in_memory()?;
        Self::create_tables_if_needed(&mut conn)?;
        Ok(conn)
    }

    pub fn create_tables_if_needed(conn: &mut Connection) -> Result<()> {
        let tx = conn.transaction()?;
        tx.execute_batch(SQL_MERKDB_TABLES)?;
        let count: i64 = tx.query_row("SELECT COUNT(*) FROM schema_version", [], |row| {
            row.get(0)
        })?;
        if count == 0 {
            tx.execute(
                "INSERT INTO schema_version (version) VALUES (?1)",
                [SQL_SCHEMA_VERSION],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_schema_version(conn: &Connection) -> Result<i64> {
        let version = conn
            .query_row("SELECT version FROM schema_version", [], |row| row.get(0))
            .optional()?;
        Ok(version.unwrap_or(1))
    }

    fn sql_pragma(conn: &Connection, pragma_name: &str, pragma_value: &dyn ToSql) -> Result<()> {
        conn.pragma_update(None, pragma_name, pragma_value)
            .map_err(|e| Error::SQLError(e.to_string()))
    }
}

impl TrieDb for SqliteTrieDb<'_> {
    fn get_node(&self, node_id: u64) -> Result<Option<Vec<u8>>> {
        let data = self
            .conn
            .query_row(
                "SELECT data FROM nodes WHERE node_id = ?1",
                [u64_to_sql(node_id)?],
                |row| row.get(0),
            )
            .optional()?;
        Ok(data)
    }

    fn put_node(&mut self, node_id: u64, data: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO nodes (node_id, data) VALUES (?1, ?2)",
            rusqlite::params![u64_to_sql(node_id)?, data],
        )?;
        Ok(())
    }

    fn del_node(&mut self, node_id: u64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM nodes WHERE node_id = ?1",
            [u64_to_sql(node_id)?],
        )?;
        Ok(())
    }

    fn last_node_id(&self) -> Result<u64> {
        let max: Option<i64> = self
            .conn
            .query_row("SELECT MAX(node_id) FROM nodes", [], |row| row.get(0))?;
        Ok(max.unwrap_or(0) as u64)
    }

    fn node_ids(&self) -> Result<Vec<u64>> {
        let mut stmt = self
            .conn
            .prepare("SELECT node_id FROM nodes ORDER BY node_id")?;
        let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
        let mut ids = vec![];
        for row in rows {
            ids.push(row? as u64);
        }
        Ok(ids)
    }

    fn get_head(&self, name: &str) -> Result<Option<u64>> {
        let node_id: Option<i64> = self
            .conn
            .query_row(
                "SELECT node_id FROM heads WHERE name = ?1",
                [name],
                |row| row.get(0),
            )
            .optional()?;
        Ok(node_id.map(|id| id as u64))
    }

    fn put_head(&mut self, name: &str, node_id: u64) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO heads (name, node_id) VALUES (?1, ?2)",
            rusqlite::params![name, u64_to_sql(node_id)?],
        )?;
        Ok(())
    }

    fn del_head(&mut self, name: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM heads WHERE name = ?1", [name])?;
        Ok(())
    }

    fn heads(&self) -> Result<Vec<(String, u64)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT name, node_id FROM heads ORDER BY name")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        let mut heads = vec![];
        for row in rows {
            let (name, node_id) = row?;
            heads.push((name, node_id as u64));
        }
        Ok(heads)
    }

    fn get_leaf_key(&self, node_id: u64) -> Result<Option<Vec<u8>>> {
        let key = self
            .conn
            .query_row(
                "SELECT key FROM leaf_keys WHERE node_id = ?1",
                [u64_to_sql(node_id)?],
                |row| row.get(0),
            )
            .optional()?;
        Ok(key)
    }

    fn put_leaf_key(&mut self, node_id: u64, key: &[u8]) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO leaf_keys (node_id, key) VALUES (?1, ?2)",
            rusqlite::params![u64_to_sql(node_id)?, key],
        )?;
        Ok(())
    }

    fn del_leaf_key(&mut self, node_id: u64) -> Result<()> {
        self.conn.execute(
            "DELETE FROM leaf_keys WHERE node_id = ?1",
            [u64_to_sql(node_id)?],
        )?;
        Ok(())
    }
}

/// In-memory rendering of the storage contract. The workhorse for tests
/// and for proof-only scratch stores that never touch disk.
#[derive(Debug, Default)]
pub struct MemoryTrieDb {
    nodes: BTreeMap<u64, Vec<u8>>,
    heads: BTreeMap<String, u64>,
    leaf_keys: BTreeMap<u64, Vec<u8>>,
}

impl MemoryTrieDb {
    pub fn new() -> MemoryTrieDb {
        MemoryTrieDb::default()
    }
}

impl TrieDb for MemoryTrieDb {
    fn get_node(&self, node_id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.nodes.get(&node_id).cloned())
    }

    fn put_node(&mut self, node_id: u64, data: &[u8]) -> Result<()> {
        self.nodes.insert(node_id, data.to_vec());
        Ok(())
    }

    fn del_node(&mut self, node_id: u64) -> Result<()> {
        self.nodes.remove(&node_id);
        Ok(())
    }

    fn last_node_id(&self) -> Result<u64> {
        Ok(self.nodes.keys().next_back().copied().unwrap_or(0))
    }

    fn node_ids(&self) -> Result<Vec<u64>> {
        Ok(self.nodes.keys().copied().collect())
    }

    fn get_head(&self, name: &str) -> Result<Option<u64>> {
        Ok(self.heads.get(name).copied())
    }

    fn put_head(&mut self, name: &str, node_id: u64) -> Result<()> {
        self.heads.insert(name.to_string(), node_id);
        Ok(())
    }

    fn del_head(&mut self, name: &str) -> Result<()> {
        self.heads.remove(name);
        Ok(())
    }

    fn heads(&self) -> Result<Vec<(String, u64)>> {
        Ok(self
            .heads
            .iter()
            .map(|(name, id)| (name.clone(), *id))
            .collect())
    }

    fn get_leaf_key(&self, node_id: u64) -> Result<Option<Vec<u8>>> {
        Ok(self.leaf_keys.get(&node_id).cloned())
    }

    fn put_leaf_key(&mut self, node_id: u64, key: &[u8]) -> Result<()> {
        self.leaf_keys.insert(node_id, key.to_vec());
        Ok(())
    }

    fn del_leaf_key(&mut self, node_id: u64) -> Result<()> {
        self.leaf_keys.remove(&node_id);
        Ok(())
    }
}
