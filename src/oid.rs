//! Helpers for dotted-string OIDs.
//!
//! OIDs travel through the fetch layer as strings, exactly as the query tools
//! print them. Ordering and subtree membership are decided on the numeric
//! arc tuple, never on the string.

use crate::error::{Result, SnmpError};
use nom::{
    character::complete::{char, digit1},
    combinator::{all_consuming, map_res, opt},
    multi::separated_list1,
    sequence::preceded,
    IResult, Parser,
};
use std::cmp::Ordering;

/// Suffix marking a GETNEXT style query: "first OID below this prefix".
pub const DOT_STAR: &str = ".*";

fn arcs(input: &str) -> IResult<&str, Vec<u64>> {
    preceded(
        opt(char('.')),
        separated_list1(char('.'), map_res(digit1, str::parse::<u64>)),
    )
    .parse(input)
}

/// Parse a dotted OID (leading dot optional) into its arcs.
pub fn parse_arcs(oid: &str) -> Result<Vec<u64>> {
    all_consuming(arcs)
        .parse(oid)
        .map(|(_, a)| a)
        .map_err(|_| SnmpError::InvalidOid(oid.to_string()))
}

/// Make sure the OID is absolute, i.e. starts with a dot.
pub fn normalize(oid: &str) -> String {
    if oid.starts_with('.') {
        oid.to_string()
    } else {
        format!(".{oid}")
    }
}

/// Split off a trailing `.*`, returning the prefix and whether it was there.
pub fn split_dot_star(oid: &str) -> (&str, bool) {
    match oid.strip_suffix(DOT_STAR) {
        Some(prefix) => (prefix, true),
        None => (oid, false),
    }
}

/// Compare a query prefix against a candidate, both as arc tuples.
///
/// `Equal` means `candidate` lies in the subtree of `prefix` (the prefix
/// itself included). Otherwise the result is plain tuple ordering of
/// `prefix` relative to `candidate`.
pub fn compare_prefix(prefix: &[u64], candidate: &[u64]) -> Ordering {
    if prefix.len() <= candidate.len() && candidate[..prefix.len()] == *prefix {
        Ordering::Equal
    } else {
        prefix.cmp(candidate)
    }
}

/// String level subtree test used on tool output: the OID itself or anything
/// extending it with a further component.
pub fn is_in_subtree(prefix: &str, oid: &str) -> bool {
    oid == prefix
        || (oid.len() > prefix.len() && oid.starts_with(prefix) && oid[prefix.len()..].starts_with('.'))
}

/// Numeric ordering of two dotted OIDs. Falls back to string ordering for
/// anything that does not parse.
pub fn cmp_oids(a: &str, b: &str) -> Ordering {
    match (parse_arcs(a), parse_arcs(b)) {
        (Ok(aa), Ok(bb)) => aa.cmp(&bb),
        _ => a.cmp(b),
    }
}

/// Everything after `prefix` in `complete`, without the separating dot.
pub fn extract_end_oid<'a>(prefix: &str, complete: &'a str) -> &'a str {
    complete
        .get(prefix.len()..)
        .unwrap_or("")
        .trim_start_matches('.')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arcs() {
        assert_eq!(parse_arcs(".1.3.6.1").unwrap(), vec![1, 3, 6, 1]);
        assert_eq!(parse_arcs("1.3.6").unwrap(), vec![1, 3, 6]);
        assert!(parse_arcs(".1.3.x").is_err());
        assert!(parse_arcs("").is_err());
        assert!(parse_arcs(".1..3").is_err());
        assert!(parse_arcs(".1.3.").is_err());
    }

    #[test]
    fn test_compare_prefix() {
        let p = [1, 3, 6, 1, 2, 1, 11];
        assert_eq!(compare_prefix(&p, &[1, 3, 6, 1, 2, 1, 11]), Ordering::Equal);
        assert_eq!(
            compare_prefix(&p, &[1, 3, 6, 1, 2, 1, 11, 5, 0]),
            Ordering::Equal
        );
        assert_eq!(compare_prefix(&p, &[1, 3, 6, 1, 2, 1, 2]), Ordering::Greater);
        // numeric, not lexicographic on the text
        assert_eq!(compare_prefix(&p, &[1, 3, 6, 1, 2, 1, 110]), Ordering::Less);
        assert_eq!(compare_prefix(&p, &[1, 3, 6, 1]), Ordering::Greater);
    }

    #[test]
    fn test_is_in_subtree() {
        assert!(is_in_subtree(".1.3.6", ".1.3.6"));
        assert!(is_in_subtree(".1.3.6", ".1.3.6.1"));
        assert!(!is_in_subtree(".1.3.6", ".1.3.61"));
        assert!(!is_in_subtree(".1.3.6", ".1.3"));
    }

    #[test]
    fn test_dot_star_and_normalize() {
        assert_eq!(split_dot_star(".1.3.*"), (".1.3", true));
        assert_eq!(split_dot_star(".1.3"), (".1.3", false));
        assert_eq!(normalize("1.3.6"), ".1.3.6");
        assert_eq!(normalize(".1.3.6"), ".1.3.6");
    }

    #[test]
    fn test_extract_end_oid() {
        assert_eq!(extract_end_oid(".1.3.6.1.2", ".1.3.6.1.2.7.1"), "7.1");
        assert_eq!(extract_end_oid(".1.3.6.1.2", ".1.3.6.1.2"), "");
        assert_eq!(cmp_oids("2.10", "2.9"), Ordering::Greater);
    }
}
