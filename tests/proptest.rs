//! Property tests for OID subtree membership, cache file names and the
//! value normalizer.

use proptest::prelude::*;
use snmp_rust_fetcher::oid::{compare_prefix, is_in_subtree, parse_arcs};
use snmp_rust_fetcher::stored_walk::StoredWalkBackend;
use snmp_rust_fetcher::value::{strip_snmp_value, to_stored_walk_text};
use snmp_rust_fetcher::walk_cache::{name2oid, oid2name};
use snmp_rust_fetcher::{SnmpBackend, SnmpHostConfig};
use std::cmp::Ordering;
use std::fs;

fn arcs() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..20, 1..8)
}

fn dotted(arcs: &[u64]) -> String {
    arcs.iter().map(|a| format!(".{a}")).collect()
}

proptest! {
    #[test]
    fn prefix_compare_agrees_with_text(a in arcs(), b in arcs()) {
        let by_arcs = compare_prefix(&a, &b) == Ordering::Equal;
        prop_assert_eq!(by_arcs, is_in_subtree(&dotted(&a), &dotted(&b)));
        prop_assert_eq!(by_arcs, b.starts_with(&a));
        prop_assert_eq!(parse_arcs(&dotted(&a)).unwrap(), a);
    }

    #[test]
    fn stored_walk_finds_exactly_the_subtree(
        oids in prop::collection::btree_set(arcs(), 1..40),
        query in arcs(),
    ) {
        let mut oids = oids;
        oids.insert(query.clone());
        let sorted: Vec<Vec<u64>> = oids.into_iter().collect();
        let text: String = sorted.iter().map(|o| format!("{} v\n", dotted(o))).collect();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h");
        fs::write(&path, text).unwrap();
        let backend = StoredWalkBackend::new(SnmpHostConfig::new("h", "127.0.0.1"), &path).unwrap();

        let expected: Vec<String> = sorted
            .iter()
            .filter(|o| o.starts_with(&query))
            .map(|o| dotted(o))
            .collect();
        let got: Vec<String> = backend
            .walk(&dotted(&query), "", None, None)
            .unwrap()
            .into_iter()
            .map(|(o, _)| o)
            .collect();
        prop_assert_eq!(got, expected);
    }

    #[test]
    fn cache_names_round_trip(oid in "[.0-9a-z%/-]{0,30}", context in "\\PC{0,20}") {
        let name = oid2name(&oid, &context);
        prop_assert!(!name.contains('/'));
        prop_assert_eq!(name2oid(&name), Some((oid, context)));
    }

    #[test]
    fn printable_values_are_written_as_is(value in prop::collection::vec(32u8..=126, 1..40)) {
        let text = to_stored_walk_text(&value);
        prop_assert_eq!(text.as_bytes(), value.as_slice());
        prop_assume!(text.trim() == text && !text.starts_with('"'));
        prop_assert_eq!(strip_snmp_value(&text), value);
    }

    #[test]
    fn hex_encoded_values_round_trip(value in prop::collection::vec(any::<u8>(), 1..40)) {
        prop_assume!(value.iter().any(|c| *c < 32 || *c > 127));
        prop_assert_eq!(strip_snmp_value(&to_stored_walk_text(&value)), value);
    }
}
