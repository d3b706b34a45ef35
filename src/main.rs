use std::io::{Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use rand::Rng;
use rusqlite::{Connection, OptionalExtension};

use merkdb::{
    dump_tree, error, info, proofs, transport, Error, GarbageCollector, Key, MerkleDb,
    MerkleDbOpts, Result, SqliteTrieDb, TrieDb,
};

#[derive(Parser)]
#[command(name = "merkdb", about = "Authenticated key-value store on a sparse Merkle trie")]
struct Cli {
    /// Database file
    #[arg(long = "db", default_value = "./merkdb.sqlite", global = true)]
    db: PathBuf,

    /// Do not record original keys alongside leaves
    #[arg(long = "noTrackKeys", global = true)]
    no_track_keys: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
#[command(rename_all = "camelCase")]
enum Command {
    /// Create the database file and its tables
    Init,
    /// Store a value under a key
    Put { key: String, val: String },
    /// Print the value stored under a key
    Get { key: String },
    /// Delete a key
    Del { key: String },
    /// Print every key/value pair on the active head
    Export {
        #[arg(long, default_value = ",")]
        sep: String,
    },
    /// Read key/value lines from stdin and apply them as one batch
    Import {
        #[arg(long, default_value = ",")]
        sep: String,
    },
    /// Print the root hash of the active head
    Root,
    /// Print tree statistics for the active head
    Stats,
    /// Print the session state: active head, root, tracking mode
    Status,
    /// Print the whole tree, one node per line
    Dump,
    /// Print the patch that transforms the active head into head H
    Diff { head: String },
    /// Read a patch from stdin and apply it to the active head
    Patch,
    /// List named heads, or remove one
    Head {
        #[command(subcommand)]
        cmd: Option<HeadCmd>,
    },
    /// Switch the active head, or detach at a node id
    Checkout {
        name: Option<String>,
        #[arg(long)]
        node: Option<u64>,
    },
    /// Fork the current root into a new head (or into detached mode)
    Fork {
        name: Option<String>,
        #[arg(long)]
        from: Option<String>,
    },
    /// Garbage-collect nodes unreachable from any head
    Gc,
    /// Export a proof for the given keys
    ExportProof {
        #[arg(long, default_value = "noKeys")]
        format: String,
        #[arg(long)]
        hex: bool,
        #[arg(long)]
        dump: bool,
        keys: Vec<String>,
    },
    /// Import a proof from stdin into an empty head
    ImportProof {
        #[arg(long)]
        root: Option<String>,
        #[arg(long)]
        hex: bool,
    },
    /// Merge a proof from stdin into the active head
    MergeProof {
        #[arg(long)]
        hex: bool,
    },
    /// Search for a preimage whose key hash starts with the given bits
    MineHash { prefix: String },
}

#[derive(Subcommand)]
#[command(rename_all = "camelCase")]
enum HeadCmd {
    Rm { name: String },
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli) {
        error!("{}", e);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    if let Command::MineHash { prefix } = &cli.command {
        return mine_hash(prefix);
    }

    let mut conn = SqliteTrieDb::open(&cli.db, false)?;
    init_cli_state(&conn)?;

    let mut db = MerkleDb::new(MerkleDbOpts {
        track_keys: !cli.no_track_keys,
    });
    load_cli_state(&conn, &mut db)?;

    let tx = conn.transaction()?;
    {
        let mut store = SqliteTrieDb::new(&tx);
        dispatch(&cli.command, &mut db, &mut store)?;
    }
    save_cli_state(&tx, &db)?;
    tx.commit()?;

    Ok(())
}

fn dispatch(command: &Command, db: &mut MerkleDb, store: &mut SqliteTrieDb) -> Result<()> {
    match command {
        Command::Init => {
            info!("initialized");
        }

        Command::Put { key, val } => {
            db.put(store, key.as_bytes(), val.as_bytes())?;
        }

        Command::Get { key } => match db.get(store, key.as_bytes())? {
            Some(val) => {
                let mut stdout = std::io::stdout();
                stdout.write_all(&val)?;
                stdout.write_all(b"\n")?;
            }
            None => return Err(Error::NotFoundError),
        },

        Command::Del { key } => {
            db.del(store, key.as_bytes())?;
        }

        Command::Export { sep } => {
            let mut iter = db.iterate(store, &Key::null(), false)?;
            while !iter.at_end() {
                if let Some(node) = iter.get()? {
                    let key = match db.get_leaf_key(store, node.node_id)? {
                        Some(key) => String::from_utf8_lossy(&key).into_owned(),
                        None => format!("0x{}", node.leaf_key_hash()?),
                    };
                    println!(
                        "{}{}{}",
                        key,
                        sep,
                        String::from_utf8_lossy(node.leaf_val()?)
                    );
                }
                iter.next()?;
            }
        }

        Command::Import { sep } => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;

            let mut changes = db.change();
            for line in input.lines() {
                if line.is_empty() {
                    continue;
                }
                let (key, val) = line.split_once(sep.as_str()).ok_or_else(|| {
                    Error::CorruptionError(format!("import line missing separator: {}", line))
                })?;
                changes.put(key.as_bytes(), val.as_bytes())?;
            }
            db.apply(store, changes)?;
        }

        Command::Root => {
            println!("0x{}", db.root(store)?);
        }

        Command::Stats => {
            let stats = db.stats(store)?;
            println!("numNodes:        {}", stats.num_nodes);
            println!("numLeafNodes:    {}", stats.num_leaf_nodes);
            println!("numBranchNodes:  {}", stats.num_branch_nodes);
            println!("numWitnessNodes: {}", stats.num_witness_nodes);
            println!("maxDepth:        {}", stats.max_depth);
            println!("numBytes:        {}", stats.num_bytes);
        }

        Command::Status => {
            match db.head_name() {
                Some(name) => println!("head: {}", name),
                None => println!("head: detached at node {}", db.detached_node_id()),
            }
            println!("root: 0x{}", db.root(store)?);
            println!("trackKeys: {}", db.track_keys);
        }

        Command::Dump => {
            print!("{}", dump_tree(db, store)?);
        }

        Command::Diff { head } => {
            let node_id_a = db.head_node_id(store)?;
            let node_id_b = db.head_node_id_of(store, head)?;
            for record in db.diff(store, node_id_a, node_id_b)? {
                if record.deletion {
                    println!("del {}", record.key_hash);
                } else {
                    println!("put {} {}", record.key_hash, hex::encode(&record.val));
                }
            }
        }

        Command::Patch => {
            let mut input = String::new();
            std::io::stdin().read_to_string(&mut input)?;

            let mut changes = db.change();
            for line in input.lines() {
                if line.is_empty() {
                    continue;
                }
                let fields: Vec<&str> = line.split(' ').collect();
                match fields.as_slice() {
                    ["del", key_hash] => {
                        changes.del_key(parse_key(key_hash)?);
                    }
                    ["put", key_hash, val] => {
                        let val = hex::decode(val).map_err(|_| {
                            Error::CorruptionError(format!("bad patch value: {}", line))
                        })?;
                        changes.put_key(parse_key(key_hash)?, &val);
                    }
                    _ => {
                        return Err(Error::CorruptionError(format!("bad patch line: {}", line)));
                    }
                }
            }
            db.apply(store, changes)?;
        }

        Command::Head { cmd } => match cmd {
            Some(HeadCmd::Rm { name }) => {
                db.remove_head(store, name)?;
            }
            None => {
                for (name, node_id) in store.heads()? {
                    println!("{} 0x{}", name, db.root_of(store, node_id)?);
                }
            }
        },

        Command::Checkout { name, node } => match (name, node) {
            (Some(name), None) => db.checkout_head(name),
            (None, Some(node_id)) => db.checkout_node(*node_id),
            (None, None) => db.checkout_node(0),
            (Some(_), Some(_)) => {
                return Err(Error::CorruptionError(
                    "checkout takes a head name or --node, not both".into(),
                ))
            }
        },

        Command::Fork { name, from } => {
            if let Some(from) = from {
                db.checkout_head(from);
            }
            match name {
                Some(name) => db.fork_to(store, name)?,
                None => db.fork(store)?,
            }
        }

        Command::Gc => {
            let mut collector = GarbageCollector::new();
            collector.mark_all_heads(db, store)?;
            let stats = collector.sweep(db, store, None)?;
            println!("total: {}", stats.total);
            println!("collected: {}", stats.collected);
        }

        Command::ExportProof {
            format,
            hex: hex_out,
            dump,
            keys,
        } => {
            let encoding = match format.as_str() {
                "noKeys" => transport::EncodingType::HashedKeys,
                "withKeys" => transport::EncodingType::FullKeys,
                other => {
                    return Err(Error::CorruptionError(format!(
                        "unknown proof format: {}",
                        other
                    )))
                }
            };

            let key_slices: Vec<&[u8]> = keys.iter().map(|k| k.as_bytes()).collect();
            let proof = db.export_proof(store, &key_slices)?;

            if *dump {
                print!("{}", proofs::dump_proof(&proof));
            } else {
                let encoded = transport::encode_proof(&proof, encoding)?;
                write_bytes_out(&encoded, *hex_out)?;
            }
        }

        Command::ImportProof { root, hex: hex_in } => {
            let proof = transport::decode_proof(&read_bytes_in(*hex_in)?)?;
            let expected_root = match root {
                Some(root) => Some(parse_key(root)?),
                None => None,
            };
            let root_node = db.import_proof(store, &proof, expected_root.as_ref())?;
            println!("0x{}", root_node.node_hash);
        }

        Command::MergeProof { hex: hex_in } => {
            let proof = transport::decode_proof(&read_bytes_in(*hex_in)?)?;
            db.merge_proof(store, &proof)?;
            println!("0x{}", db.root(store)?);
        }

        Command::MineHash { .. } => unreachable!("handled in run()"),
    }

    Ok(())
}

fn mine_hash(prefix: &str) -> Result<()> {
    let mut rng = rand::thread_rng();

    loop {
        let r: u64 = rng.gen_range(1..=1_000_000_000_000);
        let key_hash = Key::hash(r.to_string().as_bytes());

        let matched = prefix.chars().enumerate().all(|(i, c)| {
            (c == '0' && !key_hash.bit(i)) || (c == '1' && key_hash.bit(i))
        });

        if matched {
            println!("{} -> 0x{}", r, key_hash);
            return Ok(());
        }
    }
}

fn parse_key(s: &str) -> Result<Key> {
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes =
        hex::decode(s).map_err(|_| Error::CorruptionError(format!("bad key hash: {}", s)))?;
    Key::from_bytes(&bytes)
}

fn read_bytes_in(hex_in: bool) -> Result<Vec<u8>> {
    if hex_in {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        let input = input.trim();
        let input = input.strip_prefix("0x").unwrap_or(input);
        hex::decode(input).map_err(|_| Error::CorruptionError("bad hex input".into()))
    } else {
        let mut input = vec![];
        std::io::stdin().read_to_end(&mut input)?;
        Ok(input)
    }
}

fn write_bytes_out(bytes: &[u8], hex_out: bool) -> Result<()> {
    if hex_out {
        println!("0x{}", hex::encode(bytes));
    } else {
        std::io::stdout().write_all(bytes)?;
    }
    Ok(())
}

static SQL_CLI_STATE_TABLE: &str = "
CREATE TABLE IF NOT EXISTS cli_state (k TEXT PRIMARY KEY, v TEXT NOT NULL);
";

fn init_cli_state(conn: &Connection) -> Result<()> {
    conn.execute_batch(SQL_CLI_STATE_TABLE)?;
    Ok(())
}

fn get_state(conn: &Connection, k: &str) -> Result<Option<String>> {
    let v = conn
        .query_row("SELECT v FROM cli_state WHERE k = ?1", [k], |row| {
            row.get(0)
        })
        .optional()?;
    Ok(v)
}

fn load_cli_state(conn: &Connection, db: &mut MerkleDb) -> Result<()> {
    if let Some(node_id) = get_state(conn, "detached")? {
        let node_id = node_id
            .parse::<u64>()
            .map_err(|_| Error::CorruptionError("bad detached node id in cli state".into()))?;
        db.checkout_node(node_id);
    } else if let Some(head) = get_state(conn, "head")? {
        db.checkout_head(&head);
    }
    Ok(())
}

fn save_cli_state(conn: &Connection, db: &MerkleDb) -> Result<()> {
    match db.head_name() {
        Some(name) => {
            conn.execute(
                "INSERT OR REPLACE INTO cli_state (k, v) VALUES ('head', ?1)",
                [name],
            )?;
            conn.execute("DELETE FROM cli_state WHERE k = 'detached'", [])?;
        }
        None => {
            conn.execute(
                "INSERT OR REPLACE INTO cli_state (k, v) VALUES ('detached', ?1)",
                [db.detached_node_id().to_string()],
            )?;
        }
    }
    Ok(())
}
