//! Table assembler.
//!
//! A `BackendSnmpTree` names the columns of one SNMP table below a base OID.
//! Each column is walked (or served from the walk cache), the columns are
//! aligned on their end OIDs, and the result is transposed into rows.

use crate::backend::{SnmpBackend, SnmpRowInfo};
use crate::config::SnmpHostConfig;
use crate::error::{Result, SnmpError};
use crate::oid::{cmp_oids, extract_end_oid, normalize, parse_arcs};
use crate::walk_cache::{snmp_context_hash, WalkCache};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Columns synthesised from the OIDs of the other columns instead of fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SpecialColumn {
    /// End OID as text, e.g. `"7.1"`.
    End,
    /// Complete OID as text.
    String,
    /// Arcs of the complete OID as bytes.
    Bin,
    /// Arcs of the end OID as bytes.
    EndBin,
    /// Octet string index: `EndBin` without its length arc.
    EndOctetString,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OidColumn {
    Special(SpecialColumn),
    /// Column OID relative to the tree base.
    Oid(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueEncoding {
    #[default]
    String,
    Binary,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OidSpec {
    pub column: OidColumn,
    #[serde(default)]
    pub encoding: ValueEncoding,
    #[serde(default)]
    pub save_to_cache: bool,
}

impl OidSpec {
    pub fn new(column: &str) -> Self {
        OidSpec {
            column: OidColumn::Oid(column.to_string()),
            encoding: ValueEncoding::String,
            save_to_cache: false,
        }
    }

    pub fn special(column: SpecialColumn) -> Self {
        OidSpec {
            column: OidColumn::Special(column),
            encoding: ValueEncoding::String,
            save_to_cache: false,
        }
    }

    pub fn binary(mut self) -> Self {
        self.encoding = ValueEncoding::Binary;
        self
    }

    pub fn cached(mut self) -> Self {
        self.save_to_cache = true;
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendSnmpTree {
    pub base: String,
    pub oids: Vec<OidSpec>,
}

impl BackendSnmpTree {
    pub fn new(base: &str, oids: Vec<OidSpec>) -> Result<Self> {
        let tree = BackendSnmpTree {
            base: normalize(base),
            oids,
        };
        tree.validate()?;
        Ok(tree)
    }

    fn validate(&self) -> Result<()> {
        parse_arcs(&self.base).map_err(|_| SnmpError::InvalidTree(format!("bad base OID {}", self.base)))?;
        if self.oids.is_empty() {
            return Err(SnmpError::InvalidTree(format!("no columns below {}", self.base)));
        }
        let mut specials = 0;
        for spec in &self.oids {
            match &spec.column {
                OidColumn::Special(_) => specials += 1,
                OidColumn::Oid(c) => {
                    if c.starts_with('.') || parse_arcs(c).is_err() {
                        return Err(SnmpError::InvalidTree(format!(
                            "bad column {c} below {}",
                            self.base
                        )));
                    }
                }
            }
        }
        if specials > 1 {
            return Err(SnmpError::InvalidTree(format!(
                "more than one index column below {}",
                self.base
            )));
        }
        Ok(())
    }

    /// OID walked for a column. Special columns use the base.
    pub fn fetch_oid(&self, spec: &OidSpec) -> String {
        match &spec.column {
            OidColumn::Oid(c) => format!("{}.{c}", self.base),
            OidColumn::Special(_) => self.base.clone(),
        }
    }

    /// Fetch OIDs of the columns that must not be served from cache files.
    pub fn uncached_fetch_oids(&self) -> Vec<String> {
        self.oids
            .iter()
            .filter(|s| !s.save_to_cache && matches!(s.column, OidColumn::Oid(_)))
            .map(|s| self.fetch_oid(s))
            .collect()
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(text: &str) -> Result<Self> {
        let tree: BackendSnmpTree = serde_json::from_str(text)?;
        let tree = BackendSnmpTree {
            base: normalize(&tree.base),
            ..tree
        };
        tree.validate()?;
        Ok(tree)
    }
}

/// A decoded table cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnmpValue {
    String(String),
    Binary(Vec<u8>),
}

impl SnmpValue {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            SnmpValue::String(s) => s.as_bytes(),
            SnmpValue::Binary(b) => b,
        }
    }
}

pub type SnmpTable = Vec<Vec<SnmpValue>>;

struct Column {
    fetchoid: String,
    rows: SnmpRowInfo,
    encoding: ValueEncoding,
}

/// Walk every column of `tree` and assemble the rows.
pub fn get_snmp_table(
    section_name: Option<&str>,
    tree: &BackendSnmpTree,
    walk_cache: &mut WalkCache,
    backend: &dyn SnmpBackend,
) -> Result<SnmpTable> {
    let mut index: Option<(usize, SpecialColumn)> = None;
    let mut columns: Vec<Column> = Vec::with_capacity(tree.oids.len());
    let mut longest: Option<usize> = None;

    for spec in &tree.oids {
        let fetchoid = tree.fetch_oid(spec);
        if let OidColumn::Special(kind) = spec.column {
            index = Some((columns.len(), kind));
            columns.push(Column {
                fetchoid,
                rows: vec![],
                encoding: spec.encoding,
            });
            continue;
        }
        let rows = get_snmpwalk(
            section_name,
            &tree.base,
            &fetchoid,
            walk_cache,
            spec.save_to_cache,
            backend,
        )?;
        if longest.is_none_or(|l| rows.len() > columns[l].rows.len()) {
            longest = Some(columns.len());
        }
        columns.push(Column {
            fetchoid,
            rows,
            encoding: spec.encoding,
        });
    }

    if let (Some((pos, kind)), Some(longest)) = (index, longest) {
        let fetchoid = columns[longest].fetchoid.clone();
        let mut index_rows = Vec::with_capacity(columns[longest].rows.len());
        for (o, _) in &columns[longest].rows {
            index_rows.push((o.clone(), index_value(kind, &fetchoid, o)?));
        }
        columns[pos] = Column {
            fetchoid,
            rows: index_rows,
            encoding: match kind {
                SpecialColumn::End | SpecialColumn::String => ValueEncoding::String,
                _ => ValueEncoding::Binary,
            },
        };
    }

    Ok(make_table(columns, backend.config()))
}

/// One code point per arc.
///
/// When every arc fits a byte the code points are the bytes. Otherwise the
/// code points are UTF-8 encoded, arcs that are no Unicode scalar value
/// becoming U+FFFD.
fn arcs_as_bytes(arcs: &[u64]) -> Vec<u8> {
    if let Ok(bytes) = arcs.iter().map(|a| u8::try_from(*a)).collect::<std::result::Result<Vec<u8>, _>>() {
        return bytes;
    }
    arcs.iter()
        .map(|a| {
            u32::try_from(*a)
                .ok()
                .and_then(char::from_u32)
                .unwrap_or(char::REPLACEMENT_CHARACTER)
        })
        .collect::<String>()
        .into_bytes()
}

fn index_value(kind: SpecialColumn, fetchoid: &str, oid: &str) -> Result<Vec<u8>> {
    let end = extract_end_oid(fetchoid, oid);
    Ok(match kind {
        SpecialColumn::End => end.as_bytes().to_vec(),
        SpecialColumn::String => oid.as_bytes().to_vec(),
        SpecialColumn::Bin => arcs_as_bytes(&parse_arcs(oid)?),
        SpecialColumn::EndBin => arcs_as_bytes(&parse_arcs(end)?),
        // the first arc is the length of the octet string
        SpecialColumn::EndOctetString => {
            let arcs = parse_arcs(end)?;
            arcs_as_bytes(arcs.get(1..).unwrap_or_default())
        }
    })
}

fn get_snmpwalk(
    section_name: Option<&str>,
    base_oid: &str,
    fetchoid: &str,
    walk_cache: &mut WalkCache,
    save_walk_cache: bool,
    backend: &dyn SnmpBackend,
) -> Result<SnmpRowInfo> {
    let context_hash = snmp_context_hash(&backend.config().snmpv3_contexts_of(section_name));
    if let Some(rows) = walk_cache.get(fetchoid, &context_hash) {
        debug!("Already fetched OID: {fetchoid}");
        return Ok(rows);
    }
    debug!("Fetching {fetchoid}...");
    let rows = perform_snmpwalk(section_name, base_oid, fetchoid, backend)?;
    walk_cache.insert(fetchoid, &context_hash, rows.clone(), save_walk_cache);
    Ok(rows)
}

fn perform_snmpwalk(
    section_name: Option<&str>,
    base_oid: &str,
    fetchoid: &str,
    backend: &dyn SnmpBackend,
) -> Result<SnmpRowInfo> {
    let mut added_oids: HashSet<String> = HashSet::new();
    let mut rowinfo = SnmpRowInfo::new();
    for context in backend.config().snmpv3_contexts_of(section_name) {
        let mut rows = backend.walk(fetchoid, &context, section_name, Some(base_oid))?;
        // some agents answer every step of a walk with the same OID
        if rows.len() > 1 && rows[0].0 == rows[1].0 {
            debug!("Detected broken SNMP agent. Ignoring duplicate OID {}.", rows[0].0);
            rows.truncate(1);
        }
        for (oid, value) in rows {
            if added_oids.insert(oid.clone()) {
                rowinfo.push((oid, value));
            } else {
                debug!("Duplicate OID found: {oid} ({value:?})");
            }
        }
    }
    Ok(rowinfo)
}

fn are_ascending(endoids: &[String]) -> bool {
    endoids
        .windows(2)
        .all(|w| cmp_oids(&w[0], &w[1]) != std::cmp::Ordering::Greater)
}

/// Align the columns on the union of their end OIDs.
///
/// Some devices leave out cells, so a column shorter than the union is padded
/// with empty values wherever its end OID sequence skips one.
fn sanitize_columns(mut columns: Vec<Column>) -> Vec<(ValueEncoding, Vec<Vec<u8>>)> {
    let mut endoids: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();
    for column in &columns {
        for (o, _) in &column.rows {
            let endoid = extract_end_oid(&column.fetchoid, o);
            if seen.insert(endoid.to_string()) {
                endoids.push(endoid.to_string());
            }
        }
    }
    let need_sort = !are_ascending(&endoids);
    if need_sort {
        endoids.sort_by(|a, b| cmp_oids(a, b));
    }

    let mut sanitized = Vec::with_capacity(columns.len());
    for column in columns.iter_mut() {
        if need_sort {
            column.rows.sort_by(|a, b| cmp_oids(&a.0, &b.0));
        }
        let complete = column.rows.len() == endoids.len();
        let mut i = 0;
        let mut values = Vec::with_capacity(endoids.len());
        for (o, value) in column.rows.drain(..) {
            if !complete {
                let eo = extract_end_oid(&column.fetchoid, &o);
                while i < endoids.len() && endoids[i] != eo {
                    values.push(vec![]);
                    i += 1;
                }
            }
            values.push(value);
            i += 1;
        }
        while i < endoids.len() {
            values.push(vec![]);
            i += 1;
        }
        sanitized.push((column.encoding, values));
    }
    sanitized
}

fn make_table(columns: Vec<Column>, config: &SnmpHostConfig) -> SnmpTable {
    let columns = sanitize_columns(columns);
    let height = columns.iter().map(|(_, v)| v.len()).min().unwrap_or(0);
    (0..height)
        .map(|r| {
            columns
                .iter()
                .map(|(encoding, values)| match encoding {
                    ValueEncoding::Binary => SnmpValue::Binary(values[r].clone()),
                    ValueEncoding::String => SnmpValue::String(config.ensure_str(&values[r])),
                })
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ContextRule, SnmpVersion, SnmpCredentials};
    use std::cell::RefCell;
    use std::path::Path;

    struct FakeBackend {
        config: SnmpHostConfig,
        rows: Vec<(String, SnmpRowInfo)>,
        walked: RefCell<Vec<(String, String)>>,
    }

    impl FakeBackend {
        fn new(rows: &[(&str, Vec<(&str, &str)>)]) -> Self {
            FakeBackend {
                config: SnmpHostConfig::new("fake", "127.0.0.1"),
                rows: rows
                    .iter()
                    .map(|(oid, r)| {
                        (
                            oid.to_string(),
                            r.iter().map(|(o, v)| (o.to_string(), v.as_bytes().to_vec())).collect(),
                        )
                    })
                    .collect(),
                walked: RefCell::new(vec![]),
            }
        }
    }

    impl SnmpBackend for FakeBackend {
        fn config(&self) -> &SnmpHostConfig {
            &self.config
        }

        fn set_port(&mut self, port: u16) {
            self.config = self.config.with_port(port);
        }

        fn get(&self, _oid: &str, _context: &str) -> Result<Option<Vec<u8>>> {
            Ok(None)
        }

        fn walk(&self, oid: &str, context: &str, _s: Option<&str>, _t: Option<&str>) -> Result<SnmpRowInfo> {
            self.walked.borrow_mut().push((oid.to_string(), context.to_string()));
            Ok(self
                .rows
                .iter()
                .find(|(o, _)| o == oid)
                .map(|(_, r)| r.clone())
                .unwrap_or_default())
        }
    }

    const IF_DESCR: &str = ".1.3.6.1.2.1.2.2.1.2";
    const IF_TYPE: &str = ".1.3.6.1.2.1.2.2.1.3";

    fn if_tree(index: SpecialColumn) -> BackendSnmpTree {
        BackendSnmpTree::new(
            ".1.3.6.1.2.1.2.2.1",
            vec![
                OidSpec::special(index),
                OidSpec::new("2"),
                OidSpec::new("3").binary(),
            ],
        )
        .unwrap()
    }

    fn if_backend() -> FakeBackend {
        FakeBackend::new(&[
            (
                IF_DESCR,
                vec![
                    (".1.3.6.1.2.1.2.2.1.2.1", "lo"),
                    (".1.3.6.1.2.1.2.2.1.2.2", "eth0"),
                    (".1.3.6.1.2.1.2.2.1.2.10", "eth1"),
                ],
            ),
            (IF_TYPE, vec![(".1.3.6.1.2.1.2.2.1.3.1", "24"), (".1.3.6.1.2.1.2.2.1.3.10", "6")]),
        ])
    }

    fn s(v: &str) -> SnmpValue {
        SnmpValue::String(v.to_string())
    }

    fn b(v: &[u8]) -> SnmpValue {
        SnmpValue::Binary(v.to_vec())
    }

    #[test]
    fn test_table_with_gap() {
        let backend = if_backend();
        let mut cache = WalkCache::new(Path::new("/nonexistent"));
        let table = get_snmp_table(Some("interfaces"), &if_tree(SpecialColumn::End), &mut cache, &backend).unwrap();
        assert_eq!(
            table,
            vec![
                vec![s("1"), s("lo"), b(b"24")],
                vec![s("2"), s("eth0"), b(b"")],
                vec![s("10"), s("eth1"), b(b"6")],
            ]
        );
    }

    #[test]
    fn test_index_formats() {
        let backend = if_backend();
        let mut cache = WalkCache::new(Path::new("/nonexistent"));
        let table = get_snmp_table(None, &if_tree(SpecialColumn::EndBin), &mut cache, &backend).unwrap();
        assert_eq!(table[2][0], b(&[10]));
        let table = get_snmp_table(None, &if_tree(SpecialColumn::String), &mut cache, &backend).unwrap();
        assert_eq!(table[0][0], s(".1.3.6.1.2.1.2.2.1.2.1"));
        let table = get_snmp_table(None, &if_tree(SpecialColumn::Bin), &mut cache, &backend).unwrap();
        assert_eq!(table[0][0], b(&[1, 3, 6, 1, 2, 1, 2, 2, 1, 2, 1]));
        assert_eq!(index_value(SpecialColumn::EndOctetString, ".1.2", ".1.2.3.65.66.67").unwrap(), b"ABC");
    }

    #[test]
    fn test_index_arcs_above_a_byte() {
        let backend = FakeBackend::new(&[(
            IF_DESCR,
            vec![(".1.3.6.1.2.1.2.2.1.2.1", "lo"), (".1.3.6.1.2.1.2.2.1.2.1001", "eth0")],
        )]);
        let tree = BackendSnmpTree::new(
            ".1.3.6.1.2.1.2.2.1",
            vec![OidSpec::special(SpecialColumn::EndBin), OidSpec::new("2")],
        )
        .unwrap();
        let mut cache = WalkCache::new(Path::new("/nonexistent"));
        let table = get_snmp_table(None, &tree, &mut cache, &backend).unwrap();
        assert_eq!(
            table,
            vec![
                vec![b(&[1]), s("lo")],
                vec![b("\u{3e9}".as_bytes()), s("eth0")],
            ]
        );
        // enterprise number 2021 below BIN
        assert_eq!(
            index_value(SpecialColumn::Bin, ".1.3.6.1.4.1", ".1.3.6.1.4.1.2021.4").unwrap(),
            "\u{1}\u{3}\u{6}\u{1}\u{4}\u{1}\u{7e5}\u{4}".as_bytes()
        );
        assert_eq!(
            index_value(SpecialColumn::EndOctetString, ".1.2", ".1.2.2.300.5000000").unwrap(),
            "\u{12c}\u{fffd}".as_bytes()
        );
    }

    #[test]
    fn test_walk_cache_is_used() {
        let backend = if_backend();
        let mut cache = WalkCache::new(Path::new("/nonexistent"));
        let tree = if_tree(SpecialColumn::End);
        get_snmp_table(None, &tree, &mut cache, &backend).unwrap();
        get_snmp_table(None, &tree, &mut cache, &backend).unwrap();
        assert_eq!(backend.walked.borrow().len(), 2);
    }

    #[test]
    fn test_broken_agent_and_contexts() {
        let mut backend = FakeBackend::new(&[(
            ".1.3.6.1.2.1.1.1",
            vec![(".1.3.6.1.2.1.1.1.0", "a"), (".1.3.6.1.2.1.1.1.0", "a")],
        )]);
        backend.config.snmp_version = SnmpVersion::V3;
        backend.config.credentials = SnmpCredentials::V3(vec!["noAuthNoPriv".into(), "bob".into()]);
        backend.config.snmpv3_contexts.push(ContextRule {
            section: None,
            contexts: vec!["".into(), "vlan-1".into()],
        });
        let tree = BackendSnmpTree::new(".1.3.6.1.2.1.1", vec![OidSpec::new("1")]).unwrap();
        let mut cache = WalkCache::new(Path::new("/nonexistent"));
        let table = get_snmp_table(Some("sys"), &tree, &mut cache, &backend).unwrap();
        assert_eq!(table, vec![vec![s("a")]]);
        assert_eq!(
            *backend.walked.borrow(),
            vec![
                (".1.3.6.1.2.1.1.1".to_string(), "".to_string()),
                (".1.3.6.1.2.1.1.1".to_string(), "vlan-1".to_string())
            ]
        );
    }

    #[test]
    fn test_tree_validation() {
        assert!(BackendSnmpTree::new("1.3.x", vec![OidSpec::new("1")]).is_err());
        assert!(BackendSnmpTree::new(".1.3", vec![]).is_err());
        assert!(BackendSnmpTree::new(".1.3", vec![OidSpec::new(".1")]).is_err());
        assert!(BackendSnmpTree::new(
            ".1.3",
            vec![OidSpec::special(SpecialColumn::End), OidSpec::special(SpecialColumn::Bin)]
        )
        .is_err());
        let tree = BackendSnmpTree::new("1.3", vec![OidSpec::new("2").cached(), OidSpec::new("4")]).unwrap();
        assert_eq!(tree.base, ".1.3");
        assert_eq!(tree.uncached_fetch_oids(), vec![".1.3.4"]);
    }

    #[test]
    fn test_tree_json() {
        let tree = if_tree(SpecialColumn::EndOctetString);
        let json = tree.to_json().unwrap();
        assert!(json.contains("\"END_OCTET_STRING\""));
        assert_eq!(BackendSnmpTree::from_json(&json).unwrap(), tree);
        let short = r#"{"base": "1.3.6", "oids": [{"column": "2"}]}"#;
        assert_eq!(BackendSnmpTree::from_json(short).unwrap().oids[0], OidSpec::new("2"));
    }
}
