use argh::FromArgs;
use log::{info, warn};
use snmp_rust_fetcher::config::BackendKind;
use snmp_rust_fetcher::stored_walk::{snapshot_to_dir, DEFAULT_WALK_ROOTS};
use snmp_rust_fetcher::table::SnmpValue;
use snmp_rust_fetcher::value::to_stored_walk_text;
use snmp_rust_fetcher::{
    get_snmp_table, Backend, BackendPaths, BackendSnmpTree, CancelToken, SnmpBackend,
    SnmpHostConfig, WalkCache,
};
use std::error::Error;
use std::fs::read_to_string;
use std::path::PathBuf;
use std::time::{Duration, Instant};

#[derive(FromArgs)]
/// Fetch SNMP data of a host with the net-snmp tools or from a stored walk
struct Cli {
    /// host configuration file, well known locations are searched if absent
    #[argh(option, short = 'c')]
    config: Option<PathBuf>,

    /// directory of stored walk files
    #[argh(option, default = "PathBuf::from(\"stored_walks\")")]
    stored_walk_dir: PathBuf,

    /// directory holding snmpget, snmpgetnext, snmpwalk and snmpbulkwalk
    #[argh(option)]
    tool_dir: Option<PathBuf>,

    /// answer from the stored walk whatever the configured backend
    #[argh(switch, short = 's')]
    stored_walk: bool,

    /// give up on a running query after this many seconds
    #[argh(option)]
    deadline: Option<u64>,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Get(GetArgs),
    Walk(WalkArgs),
    Table(TableArgs),
    Snapshot(SnapshotArgs),
}

#[derive(FromArgs)]
/// Fetch single OIDs, a trailing .* fetches the first OID below the prefix
#[argh(subcommand, name = "get")]
struct GetArgs {
    /// SNMPv3 context
    #[argh(option, default = "String::new()")]
    context: String,

    /// OIDs to fetch
    #[argh(positional)]
    oids: Vec<String>,
}

#[derive(FromArgs)]
/// Walk a subtree
#[argh(subcommand, name = "walk")]
struct WalkArgs {
    /// SNMPv3 context
    #[argh(option, default = "String::new()")]
    context: String,

    /// root of the subtree
    #[argh(positional)]
    oid: String,
}

#[derive(FromArgs)]
/// Fetch a table described by a JSON tree file
#[argh(subcommand, name = "table")]
struct TableArgs {
    /// section the table belongs to, selects contexts and range limits
    #[argh(option)]
    section: Option<String>,

    /// walk cache directory, no cache files are used if absent
    #[argh(option)]
    cache_dir: Option<PathBuf>,

    /// JSON file with base OID and columns
    #[argh(positional)]
    tree: PathBuf,
}

#[derive(FromArgs)]
/// Write a stored walk of the host into the stored walk directory
#[argh(subcommand, name = "snapshot")]
struct SnapshotArgs {
    /// root OIDs, mib-2 and enterprises if none given
    #[argh(positional)]
    roots: Vec<String>,
}

fn cell_text(cell: &SnmpValue) -> String {
    match cell {
        SnmpValue::String(s) => s.clone(),
        SnmpValue::Binary(b) => hex::encode(b),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    let cli: Cli = argh::from_env();
    let config = match &cli.config {
        Some(path) => SnmpHostConfig::from_file(path)?,
        None => SnmpHostConfig::load()?,
    };
    let paths = BackendPaths {
        stored_walk_dir: cli.stored_walk_dir.clone(),
        tool_dir: cli.tool_dir.clone(),
    };
    let kind = if cli.stored_walk {
        BackendKind::StoredWalk
    } else {
        config.snmp_backend
    };
    let backend = match (Backend::from_kind(kind, config, &paths)?, cli.deadline) {
        (Backend::Classic(classic), Some(secs)) => {
            let token = CancelToken::with_deadline(Instant::now() + Duration::from_secs(secs));
            Backend::Classic(classic.with_cancel_token(token))
        }
        (backend, _) => backend,
    };
    info!("Using {kind:?} backend for {}", backend.hostname());

    match cli.command {
        Command::Get(args) => {
            for oid in &args.oids {
                match backend.get(oid, &args.context)? {
                    Some(value) => println!("{oid} {}", to_stored_walk_text(&value)),
                    None => warn!("No value for {oid}"),
                }
            }
        }
        Command::Walk(args) => {
            for (oid, value) in backend.walk(&args.oid, &args.context, None, None)? {
                println!("{oid} {}", to_stored_walk_text(&value));
            }
        }
        Command::Table(args) => {
            let tree = BackendSnmpTree::from_json(&read_to_string(&args.tree)?)?;
            let mut walk_cache = match &args.cache_dir {
                Some(dir) => {
                    let mut cache = WalkCache::new(&dir.join(backend.hostname()));
                    cache.load_for(std::slice::from_ref(&tree))?;
                    cache
                }
                None => WalkCache::new(&PathBuf::new()),
            };
            let table = get_snmp_table(args.section.as_deref(), &tree, &mut walk_cache, &backend)?;
            for row in table {
                let cells: Vec<String> = row.iter().map(cell_text).collect();
                println!("{}", cells.join("\t"));
            }
            if args.cache_dir.is_some() {
                walk_cache.save()?;
            }
        }
        Command::Snapshot(args) => {
            let roots = if args.roots.is_empty() {
                DEFAULT_WALK_ROOTS.iter().map(|r| r.to_string()).collect()
            } else {
                args.roots
            };
            let path = snapshot_to_dir(&backend, &roots, &cli.stored_walk_dir)?;
            println!("{}", path.display());
        }
    }
    Ok(())
}
