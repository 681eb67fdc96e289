//! SNMP detection predicates.
//!
//! A detection spec is a list of alternatives, each a list of atoms that must
//! all hold. An atom matches the value of one OID against a regular
//! expression: full match, case insensitive, `.` matching newlines too.
//!
//! The evaluator knows nothing about backends, values come from a getter.

use crate::error::{Result, SnmpError};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnmpDetectAtom {
    pub oid: String,
    pub pattern: String,
    pub expect_match: bool,
}

/// Alternatives (OR) of atom lists (AND).
pub type SnmpDetectSpec = Vec<Vec<SnmpDetectAtom>>;

const MATCH_ANYTHING: &str = ".*";

fn compile(pattern: &str) -> Result<Regex> {
    RegexBuilder::new(&format!("^(?:{pattern})$"))
        .case_insensitive(true)
        .dot_matches_new_line(true)
        .build()
        .map_err(|source| SnmpError::Pattern {
            pattern: pattern.to_string(),
            source,
        })
}

/// Compiled atom patterns, shared by the specs of one scan.
#[derive(Debug, Default)]
pub struct PatternCache {
    compiled: HashMap<String, Regex>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.compiled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.compiled.is_empty()
    }

    fn is_match(&mut self, pattern: &str, value: &str) -> Result<bool> {
        if let Some(re) = self.compiled.get(pattern) {
            return Ok(re.is_match(value));
        }
        let re = compile(pattern)?;
        let found = re.is_match(value);
        self.compiled.insert(pattern.to_string(), re);
        Ok(found)
    }
}

fn evaluate_atom<F>(atom: &SnmpDetectAtom, patterns: &mut PatternCache, get_value: &mut F) -> Result<bool>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    match get_value(&atom.oid)? {
        // only "not exists" is satisfied by a missing value
        None => Ok(atom.pattern == MATCH_ANYTHING && !atom.expect_match),
        Some(value) => Ok(patterns.is_match(&atom.pattern, &value)? == atom.expect_match),
    }
}

/// True if all atoms of at least one alternative hold.
///
/// Evaluation stops at the first failing atom of an alternative and at the
/// first matching alternative, so `get_value` is only asked for OIDs that
/// matter.
pub fn evaluate_snmp_detection<F>(detect_spec: &SnmpDetectSpec, get_value: F) -> Result<bool>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    evaluate_snmp_detection_with(detect_spec, &mut PatternCache::new(), get_value)
}

/// Like [`evaluate_snmp_detection`], compiling each pattern once per cache.
pub fn evaluate_snmp_detection_with<F>(
    detect_spec: &SnmpDetectSpec,
    patterns: &mut PatternCache,
    mut get_value: F,
) -> Result<bool>
where
    F: FnMut(&str) -> Result<Option<String>>,
{
    'alternatives: for alternative in detect_spec {
        for atom in alternative {
            if !evaluate_atom(atom, patterns, &mut get_value)? {
                continue 'alternatives;
            }
        }
        return Ok(true);
    }
    Ok(false)
}

fn single(oid: &str, pattern: String, expect_match: bool) -> SnmpDetectSpec {
    vec![vec![SnmpDetectAtom {
        oid: oid.to_string(),
        pattern,
        expect_match,
    }]]
}

pub fn startswith(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, format!("{}.*", regex::escape(value)), true)
}

pub fn endswith(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, format!(".*{}", regex::escape(value)), true)
}

pub fn contains(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, format!(".*{}.*", regex::escape(value)), true)
}

pub fn equals(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, regex::escape(value), true)
}

pub fn matches(oid: &str, regex: &str) -> SnmpDetectSpec {
    single(oid, regex.to_string(), true)
}

pub fn exists(oid: &str) -> SnmpDetectSpec {
    single(oid, MATCH_ANYTHING.to_string(), true)
}

pub fn not_startswith(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, format!("{}.*", regex::escape(value)), false)
}

pub fn not_endswith(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, format!(".*{}", regex::escape(value)), false)
}

pub fn not_contains(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, format!(".*{}.*", regex::escape(value)), false)
}

pub fn not_equals(oid: &str, value: &str) -> SnmpDetectSpec {
    single(oid, regex::escape(value), false)
}

pub fn not_matches(oid: &str, regex: &str) -> SnmpDetectSpec {
    single(oid, regex.to_string(), false)
}

pub fn not_exists(oid: &str) -> SnmpDetectSpec {
    single(oid, MATCH_ANYTHING.to_string(), false)
}

/// Conjunction: every combination of one alternative from each spec.
pub fn all_of(specs: &[SnmpDetectSpec]) -> SnmpDetectSpec {
    specs.iter().fold(vec![vec![]], |acc, spec| {
        acc.iter()
            .flat_map(|left| {
                spec.iter().map(move |right| {
                    let mut combined = left.clone();
                    combined.extend(right.iter().cloned());
                    combined
                })
            })
            .collect()
    })
}

/// Disjunction: the alternatives of all specs.
pub fn any_of(specs: &[SnmpDetectSpec]) -> SnmpDetectSpec {
    specs.iter().flatten().cloned().collect()
}
