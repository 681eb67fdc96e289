//! Backend answering from a stored walk file.
//!
//! A stored walk is the text dump of a previous walk of the host: one
//! `<oid> <value>` record per line, a line not starting with `.` continues the
//! value of the record before it. The records are expected to be sorted by
//! OID; this is not checked, an unsorted dump simply gives wrong answers.
//!
//! Lookups binary search for any record inside the requested subtree, then
//! scan outwards from the hit to collect the whole run.

use crate::backend::{limit_rows, SnmpBackend, SnmpRowInfo};
use crate::config::SnmpHostConfig;
use crate::error::{Result, SnmpError};
use crate::oid::{cmp_oids, compare_prefix, is_in_subtree, normalize, parse_arcs, split_dot_star};
use crate::value::{
    strip_snmp_value_encoded, to_stored_walk_text, CharacterEncoding, SnmpRawValue,
    END_OF_MIB_VIEW,
};
use log::{debug, error, info};
use std::cmp::Ordering;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// SNMPv2-SMI::mib-2 and SNMPv2-SMI::enterprises
pub const DEFAULT_WALK_ROOTS: [&str; 2] = [".1.3.6.1.2.1", ".1.3.6.1.4.1"];

struct WalkRecord {
    /// OID without the leading dot.
    oid: String,
    arcs: Vec<u64>,
    /// Raw value text, continuation lines included.
    value: String,
}

pub struct StoredWalkBackend {
    config: SnmpHostConfig,
    path: PathBuf,
    records: Vec<WalkRecord>,
}

/// Logical lines of a walk dump, each with its starting physical line number.
///
/// Continuation lines are appended with their newline kept. Anything before
/// the first OID line is dropped.
pub fn read_walk_lines(text: &str) -> Vec<(usize, String)> {
    let mut lines: Vec<(usize, String)> = Vec::new();
    for (n, line) in text.split_inclusive('\n').enumerate() {
        if line.starts_with('.') {
            lines.push((n + 1, line.to_string()));
        } else if let Some(last) = lines.last_mut() {
            last.1.push_str(line);
        }
    }
    lines
}

fn split_record(line: &str) -> (&str, &str) {
    match line.find(char::is_whitespace) {
        Some(i) => (&line[..i], line[i..].trim_start()),
        None => (line, ""),
    }
}

impl StoredWalkBackend {
    /// Load the walk at `path`. A missing file is fatal right away.
    pub fn new(config: SnmpHostConfig, path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(SnmpError::MissingWalkFile {
                path: path.to_path_buf(),
            });
        }
        let encoding = config
            .character_encoding
            .unwrap_or(CharacterEncoding::Utf8);
        let text = encoding.decode(&fs::read(path)?);
        let mut records = Vec::new();
        for (line_no, line) in read_walk_lines(&text) {
            let (oid, value) = split_record(&line);
            let oid = oid.strip_prefix('.').unwrap_or(oid);
            let arcs = parse_arcs(oid).map_err(|_| SnmpError::MalformedWalk {
                path: path.to_path_buf(),
                line: line_no,
            })?;
            records.push(WalkRecord {
                oid: oid.to_string(),
                arcs,
                value: value.to_string(),
            });
        }
        info!("Loaded {} records from {}", records.len(), path.display());
        Ok(StoredWalkBackend {
            config,
            path: path.to_path_buf(),
            records,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Index of some record inside the subtree of `prefix`.
    fn search(&self, prefix: &[u64]) -> Option<usize> {
        let mut begin = 0;
        let mut end = self.records.len();
        while begin < end {
            let current = (begin + end) / 2;
            match compare_prefix(prefix, &self.records[current].arcs) {
                Ordering::Equal => return Some(current),
                Ordering::Greater => begin = current + 1,
                Ordering::Less => end = current,
            }
        }
        None
    }

    fn row(&self, record: &WalkRecord) -> (String, SnmpRawValue) {
        let encoding = self
            .config
            .character_encoding
            .unwrap_or(CharacterEncoding::Utf8);
        (
            format!(".{}", record.oid),
            strip_snmp_value_encoded(&record.value, encoding),
        )
    }

    fn collect(&self, prefix_arcs: &[u64], oid_prefix: &str) -> SnmpRowInfo {
        let Some(hit) = self.search(prefix_arcs) else {
            return vec![];
        };
        let matches = |r: &&WalkRecord| is_in_subtree(oid_prefix, &r.oid);
        let mut rows: SnmpRowInfo = self.records[..=hit]
            .iter()
            .rev()
            .take_while(matches)
            .map(|r| self.row(r))
            .collect();
        rows.reverse();
        rows.extend(
            self.records[hit + 1..]
                .iter()
                .take_while(matches)
                .map(|r| self.row(r)),
        );
        rows
    }
}

impl SnmpBackend for StoredWalkBackend {
    fn config(&self) -> &SnmpHostConfig {
        &self.config
    }

    fn set_port(&mut self, port: u16) {
        self.config = self.config.with_port(port);
    }

    fn get(&self, oid: &str, context: &str) -> Result<Option<SnmpRawValue>> {
        let oid = normalize(oid);
        let mut walk = self.walk(&oid, context, None, None)?;
        // a walk returns the whole subtree, a get wants the exact OID
        if walk.len() == 1 && walk[0].0 == oid {
            return Ok(walk.pop().map(|(_, v)| v));
        }
        if oid.ends_with(crate::oid::DOT_STAR) && !walk.is_empty() {
            return Ok(Some(walk.swap_remove(0).1));
        }
        Ok(None)
    }

    fn walk(
        &self,
        oid: &str,
        _context: &str,
        section_name: Option<&str>,
        table_base_oid: Option<&str>,
    ) -> Result<SnmpRowInfo> {
        let oid = oid.strip_prefix('.').unwrap_or(oid);
        let (oid_prefix, dot_star) = split_dot_star(oid);
        debug!("Loading {oid} from {}", self.path.display());
        let prefix_arcs = parse_arcs(oid_prefix)?;
        let mut rows = self.collect(&prefix_arcs, oid_prefix);
        if dot_star {
            rows.truncate(1);
        }
        Ok(limit_rows(&self.config, rows, section_name, table_base_oid))
    }
}

/// Walk `roots` through `backend` and write the rows in stored walk format.
///
/// Roots are walked in numeric order. A root that fails is logged and
/// skipped, cancellation aborts the whole snapshot. Returns the number of
/// rows written.
pub fn write_stored_walk<B, W>(backend: &B, roots: &[String], out: &mut W) -> Result<usize>
where
    B: SnmpBackend + ?Sized,
    W: Write,
{
    let mut roots: Vec<&String> = roots.iter().collect();
    roots.sort_by(|a, b| cmp_oids(a, b));
    let mut written = 0;
    for root in roots {
        info!("Walk on \"{root}\"...");
        let rows = match backend.walk(root, "", None, None) {
            Ok(rows) => rows,
            Err(SnmpError::Cancelled) => return Err(SnmpError::Cancelled),
            Err(e) => {
                error!("Walk of {root} on {} failed: {e}", backend.hostname());
                continue;
            }
        };
        let mut count = 0;
        for (oid, value) in rows {
            if value == END_OF_MIB_VIEW {
                continue;
            }
            writeln!(out, "{} {}", oid, to_stored_walk_text(&value))?;
            count += 1;
        }
        info!("{count} variables.");
        written += count;
    }
    out.flush()?;
    Ok(written)
}

/// Snapshot into the stored walk file of the backend's host below `dir`.
pub fn snapshot_to_dir<B>(backend: &B, roots: &[String], dir: &Path) -> Result<PathBuf>
where
    B: SnmpBackend + ?Sized,
{
    fs::create_dir_all(dir)?;
    let path = crate::backend::stored_walk_path(dir, backend.hostname());
    let mut out = BufWriter::new(File::create(&path)?);
    write_stored_walk(backend, roots, &mut out)?;
    info!("Successfully wrote {}", path.display());
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    const WALK: &str = ".1.3.6.1.2.1.1.1.0 Linux zeus 4.8.6.5-smp #2 SMP Sun Nov 13 14:58:11 CDT 2016 i686
.1.3.6.1.2.1.1.9.1.2.1 .1.3.6.1.6.3.10.3.1.1
.1.3.6.1.2.1.1.9.1.2.2 .1.3.6.1.6.3.11.3.1.1
.1.3.6.1.2.1.1.9.1.3.1 The SNMP Management Architecture MIB.
.1.3.6.1.2.1.1.9.10.1 9-10
.1.3.6.1.2.1.2.2.1.6.1 \"00 0C 29 3A 4B 5C \"
.1.3.6.1.2.1.2.2.1.6.2 \"00 0C 29 3A 4B 5C 00 11
22 33 44 55 \"
.1.3.6.1.4.1.2021.10.1.3.1 0.03
";

    fn backend(text: &str) -> (tempfile::TempDir, StoredWalkBackend) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("zeus");
        let mut f = File::create(&path).unwrap();
        f.write_all(text.as_bytes()).unwrap();
        let b = StoredWalkBackend::new(SnmpHostConfig::new("zeus", "127.0.0.1"), &path).unwrap();
        (dir, b)
    }

    #[test]
    fn test_get() {
        let (_d, b) = backend(WALK);
        assert_eq!(
            b.get(".1.3.6.1.2.1.1.1.0", "").unwrap(),
            Some(b"Linux zeus 4.8.6.5-smp #2 SMP Sun Nov 13 14:58:11 CDT 2016 i686".to_vec())
        );
        assert_eq!(
            b.get(".1.3.6.1.2.1.1.9.1.*", "").unwrap(),
            Some(b".1.3.6.1.6.3.10.3.1.1".to_vec())
        );
        assert_eq!(b.get(".1.3.100.200.300.400", "").unwrap(), None);
        // a subtree is not a single value
        assert_eq!(b.get(".1.3.6.1.2.1.1.9.1", "").unwrap(), None);
    }

    #[test]
    fn test_walk_subtree() {
        let (_d, b) = backend(WALK);
        let rows = b.walk(".1.3.6.1.2.1.1.9.1", "", None, None).unwrap();
        let oids: Vec<&str> = rows.iter().map(|(o, _)| o.as_str()).collect();
        assert_eq!(
            oids,
            vec![
                ".1.3.6.1.2.1.1.9.1.2.1",
                ".1.3.6.1.2.1.1.9.1.2.2",
                ".1.3.6.1.2.1.1.9.1.3.1"
            ]
        );
        // leading dot is optional on the query
        assert_eq!(b.walk("1.3.6.1.2.1.1.9.1", "", None, None).unwrap(), rows);
        assert!(b.walk(".1.3.6.1.3", "", None, None).unwrap().is_empty());
        assert_eq!(b.walk(".1.3", "", None, None).unwrap().len(), b.len());
    }

    #[test]
    fn test_continuation_lines() {
        let (_d, b) = backend(WALK);
        assert_eq!(
            b.get(".1.3.6.1.2.1.2.2.1.6.2", "").unwrap(),
            Some(vec![0x00, 0x0c, 0x29, 0x3a, 0x4b, 0x5c, 0x00, 0x11, 0x22, 0x33, 0x44, 0x55])
        );
        let lines = read_walk_lines("junk\n.1.2 a\nb\n.1.3 c\n");
        assert_eq!(lines, vec![(2, ".1.2 a\nb\n".to_string()), (4, ".1.3 c\n".to_string())]);
    }

    #[test]
    fn test_missing_and_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let config = SnmpHostConfig::new("zeus", "127.0.0.1");
        let res = StoredWalkBackend::new(config.clone(), &dir.path().join("nothere"));
        assert!(matches!(res, Err(SnmpError::MissingWalkFile { .. })));
        let path = dir.path().join("bad");
        fs::write(&path, ".1.3.6 ok\n.1.x.6 bad\n").unwrap();
        let res = StoredWalkBackend::new(config, &path);
        assert!(matches!(res, Err(SnmpError::MalformedWalk { line: 2, .. })));
    }

    #[test]
    fn test_snapshot_reads_back() {
        let (dir, b) = backend(WALK);
        let roots: Vec<String> = DEFAULT_WALK_ROOTS.iter().rev().map(|s| s.to_string()).collect();
        let mut out = Vec::new();
        let written = write_stored_walk(&b, &roots, &mut out).unwrap();
        assert_eq!(written, b.len());
        let copy_path = dir.path().join("copy");
        fs::write(&copy_path, &out).unwrap();
        let copy = StoredWalkBackend::new(SnmpHostConfig::new("zeus", "127.0.0.1"), &copy_path).unwrap();
        assert_eq!(
            copy.walk(".1.3", "", None, None).unwrap(),
            b.walk(".1.3", "", None, None).unwrap()
        );
    }
}
