//! Walk cache.
//!
//! Holds the rows of every walk done while fetching tables for one host, keyed
//! by fetch OID and a hash of the SNMPv3 contexts queried. Entries are kept on
//! disk as one JSON file per key, so the next polling cycle starts from the
//! data the previous one fetched. Values are stored hex encoded.
//!
//! Not safe for concurrent writers to one directory.

use crate::backend::SnmpRowInfo;
use crate::error::Result;
use crate::oid::is_in_subtree;
use crate::table::BackendSnmpTree;
use log::debug;
use sha1::{Digest, Sha1};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

const NAME_PREFIX: &str = "OID";
const ESCAPED: [char; 4] = ['%', '/', '-', '\0'];

/// Stable hash identifying a list of contexts.
pub fn snmp_context_hash(contexts: &[String]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(contexts.join("\0").as_bytes());
    hex::encode(hasher.finalize())
}

fn escape(part: &str) -> String {
    let mut out = String::with_capacity(part.len());
    for c in part.chars() {
        if ESCAPED.contains(&c) {
            out.push('%');
            out.push_str(&hex::encode_upper([c as u8]));
        } else {
            out.push(c);
        }
    }
    out
}

fn unescape(part: &str) -> Option<String> {
    let mut out = String::with_capacity(part.len());
    let mut rest = part;
    while let Some(i) = rest.find('%') {
        out.push_str(&rest[..i]);
        let code = rest.get(i + 1..i + 3)?;
        let byte = hex::decode(code).ok()?;
        out.push(char::from(*byte.first()?));
        rest = &rest[i + 3..];
    }
    out.push_str(rest);
    Some(out)
}

/// File name for a cache key.
pub fn oid2name(fetchoid: &str, context_hash: &str) -> String {
    format!("{NAME_PREFIX}{}-{}", escape(fetchoid), escape(context_hash))
}

/// Cache key of a file name, `None` if the name is not one of ours.
pub fn name2oid(basename: &str) -> Option<(String, String)> {
    let rest = basename.strip_prefix(NAME_PREFIX)?;
    let (oid, context_hash) = rest.split_once('-')?;
    Some((unescape(oid)?, unescape(context_hash)?))
}

#[derive(Debug)]
struct CacheEntry {
    /// Populated this cycle and not yet written.
    needs_writing: bool,
    save_to_cache: bool,
    rows: SnmpRowInfo,
}

#[derive(Debug)]
pub struct WalkCache {
    path: PathBuf,
    cache: BTreeMap<(String, String), CacheEntry>,
}

impl WalkCache {
    pub fn new(path: &Path) -> Self {
        WalkCache {
            path: path.to_path_buf(),
            cache: BTreeMap::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    /// Read every cache file of the directory.
    pub fn load(&mut self) -> Result<()> {
        self.load_filtered(|_| true)
    }

    /// Read the cache files, skipping OIDs that a column of `trees` fetches
    /// without caching.
    pub fn load_for(&mut self, trees: &[BackendSnmpTree]) -> Result<()> {
        let uncached: HashSet<String> = trees
            .iter()
            .flat_map(|t| t.uncached_fetch_oids())
            .collect();
        self.load_filtered(|oid| !uncached.contains(oid))
    }

    fn load_filtered<F: Fn(&str) -> bool>(&mut self, wanted: F) -> Result<()> {
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e.into()),
        };
        for entry in entries {
            let path = entry?.path();
            let Some(key) = path
                .file_name()
                .and_then(|n| n.to_str())
                .and_then(name2oid)
            else {
                continue;
            };
            if !wanted(&key.0) {
                continue;
            }
            match read_rows(&path) {
                Ok(rows) => {
                    debug!("  Loaded {} from walk cache", key.0);
                    self.cache.insert(
                        key,
                        CacheEntry {
                            needs_writing: false,
                            save_to_cache: true,
                            rows,
                        },
                    );
                }
                Err(e) => debug!("  Failed to load {} from walk cache: {e}", path.display()),
            }
        }
        Ok(())
    }

    /// Write out the entries populated since the last load or save.
    pub fn save(&mut self) -> Result<usize> {
        let mut written = 0;
        for ((oid, context_hash), entry) in self.cache.iter_mut() {
            if !entry.needs_writing || !entry.save_to_cache {
                continue;
            }
            if written == 0 {
                fs::create_dir_all(&self.path)?;
            }
            let path = self.path.join(oid2name(oid, context_hash));
            debug!("  Saving walk of {oid} to walk cache {}", path.display());
            write_rows(&path, &entry.rows)?;
            entry.needs_writing = false;
            written += 1;
        }
        Ok(written)
    }

    /// Exact entry, or an entry of a broader OID whose walk covers `oid`.
    fn lookup(&self, oid: &str, context_hash: &str) -> Option<(&str, &CacheEntry)> {
        if let Some((k, e)) = self
            .cache
            .get_key_value(&(oid.to_string(), context_hash.to_string()))
        {
            return Some((k.0.as_str(), e));
        }
        self.cache
            .iter()
            .find(|((o, c), _)| c == context_hash && o != oid && is_in_subtree(o, oid))
            .map(|((o, _), e)| (o.as_str(), e))
    }

    pub fn contains(&self, oid: &str, context_hash: &str) -> bool {
        self.lookup(oid, context_hash).is_some()
    }

    /// Rows of `oid`, filtered out of a covering walk if needed.
    pub fn get(&self, oid: &str, context_hash: &str) -> Option<SnmpRowInfo> {
        let (found, entry) = self.lookup(oid, context_hash)?;
        if found == oid {
            return Some(entry.rows.clone());
        }
        debug!("  {oid} covered by cached walk of {found}");
        Some(
            entry
                .rows
                .iter()
                .filter(|(o, _)| is_in_subtree(oid, o))
                .cloned()
                .collect(),
        )
    }

    pub fn insert(&mut self, oid: &str, context_hash: &str, rows: SnmpRowInfo, save_to_cache: bool) {
        self.cache.insert(
            (oid.to_string(), context_hash.to_string()),
            CacheEntry {
                needs_writing: true,
                save_to_cache,
                rows,
            },
        );
    }
}

fn read_rows(path: &Path) -> Result<SnmpRowInfo> {
    let text = fs::read_to_string(path)?;
    let stored: Vec<(String, String)> = serde_json::from_str(&text)?;
    let mut rows = Vec::with_capacity(stored.len());
    for (oid, value) in stored {
        let value = hex::decode(&value).map_err(|e| {
            crate::error::SnmpError::Config(format!("bad value for {oid} in walk cache: {e}"))
        })?;
        rows.push((oid, value));
    }
    Ok(rows)
}

fn write_rows(path: &Path, rows: &SnmpRowInfo) -> Result<()> {
    let stored: Vec<(&str, String)> = rows
        .iter()
        .map(|(oid, value)| (oid.as_str(), hex::encode(value)))
        .collect();
    fs::write(path, serde_json::to_string(&stored)?)?;
    Ok(())
}
