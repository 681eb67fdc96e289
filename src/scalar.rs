//! Single OID fetches and the SNMP section scan.
//!
//! Detection needs the same handful of scalar OIDs for many sections, so
//! every value (or its absence) is remembered per host in a
//! [`SingleOidCache`].

use crate::backend::SnmpBackend;
use crate::detect::{evaluate_snmp_detection_with, PatternCache, SnmpDetectSpec};
use crate::error::{Result, SnmpError};
use crate::oid::normalize;
use crate::value::SnmpRawValue;
use log::{debug, warn};
use std::collections::HashMap;

/// SNMPv2-MIB::sysDescr.0
pub const OID_SYS_DESCR: &str = ".1.3.6.1.2.1.1.1.0";
/// SNMPv2-MIB::sysObjectID.0
pub const OID_SYS_OBJ: &str = ".1.3.6.1.2.1.1.2.0";

/// Values of single OIDs of one host, `None` for known absent ones.
///
/// Keys include a trailing `.*` when the value was fetched by GETNEXT.
#[derive(Debug, Default)]
pub struct SingleOidCache {
    values: HashMap<String, Option<SnmpRawValue>>,
}

impl SingleOidCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, oid: &str) -> Option<&Option<SnmpRawValue>> {
        self.values.get(oid)
    }

    pub fn insert(&mut self, oid: &str, value: Option<SnmpRawValue>) {
        self.values.insert(oid.to_string(), value);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }
}

/// Fetch one OID, trying each context of the section until one answers.
///
/// Failures other than cancellation are logged and count as "no value".
pub fn get_single_oid(
    oid: &str,
    section_name: Option<&str>,
    cache: &mut SingleOidCache,
    backend: &dyn SnmpBackend,
) -> Result<Option<SnmpRawValue>> {
    let oid = normalize(oid);
    if let Some(value) = cache.get(&oid) {
        debug!("       Using cached OID {oid}: {value:?}");
        return Ok(value.clone());
    }
    let mut value = None;
    for context in backend.config().snmpv3_contexts_of(section_name) {
        match backend.get(&oid, &context) {
            Ok(Some(v)) => {
                value = Some(v);
                break;
            }
            Ok(None) => {}
            Err(SnmpError::Cancelled) => return Err(SnmpError::Cancelled),
            Err(e) => warn!("Fetching {oid} from {} failed: {e}", backend.hostname()),
        }
    }
    debug!("       Got OID {oid}: {value:?}");
    cache.insert(&oid, value.clone());
    Ok(value)
}

/// What to do when detecting one section fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum OnError {
    #[default]
    Raise,
    Warn,
    Ignore,
}

fn prefetch_description_object(cache: &mut SingleOidCache, backend: &dyn SnmpBackend) -> Result<()> {
    if get_single_oid(OID_SYS_DESCR, None, cache, backend)?.is_none() {
        return Err(SnmpError::NoSysDescription {
            host: backend.hostname().to_string(),
        });
    }
    get_single_oid(OID_SYS_OBJ, None, cache, backend)?;
    Ok(())
}

fn fake_description_object(cache: &mut SingleOidCache) {
    for oid in [OID_SYS_DESCR, OID_SYS_OBJ] {
        cache.insert(oid, Some(vec![]));
    }
}

/// Names of the sections whose detection spec matches the device.
///
/// Unless `missing_sys_description` is set, a device without sysDescr fails
/// the scan. Cancellation always aborts it.
pub fn snmp_scan(
    sections: &[(String, SnmpDetectSpec)],
    on_error: OnError,
    missing_sys_description: bool,
    cache: &mut SingleOidCache,
    backend: &dyn SnmpBackend,
) -> Result<Vec<String>> {
    if missing_sys_description {
        fake_description_object(cache);
    } else {
        prefetch_description_object(cache, backend)?;
    }
    let config = backend.config();
    let mut patterns = PatternCache::new();
    let mut found = Vec::new();
    for (name, spec) in sections {
        let detected = evaluate_snmp_detection_with(spec, &mut patterns, |oid| {
            Ok(get_single_oid(oid, Some(name.as_str()), cache, backend)?.map(|v| config.ensure_str(&v)))
        });
        match detected {
            Ok(true) => found.push(name.clone()),
            Ok(false) => {}
            Err(SnmpError::Cancelled) => return Err(SnmpError::Cancelled),
            Err(e) => match on_error {
                OnError::Raise => return Err(e),
                OnError::Warn => warn!("   Exception in SNMP scan function of {name}: {e}"),
                OnError::Ignore => debug!("   Exception in SNMP scan function of {name}: {e}"),
            },
        }
    }
    debug!("SNMP scan found {}", found.join(" "));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SnmpRowInfo;
    use crate::config::SnmpHostConfig;
    use crate::detect::{any_of, exists, matches, not_exists, startswith};
    use std::cell::RefCell;

    struct CountingBackend {
        config: SnmpHostConfig,
        values: HashMap<String, Vec<u8>>,
        broken: bool,
        cancelled: bool,
        gets: RefCell<usize>,
    }

    impl CountingBackend {
        fn new(values: &[(&str, &str)]) -> Self {
            CountingBackend {
                config: SnmpHostConfig::new("zeus", "127.0.0.1"),
                values: values
                    .iter()
                    .map(|(o, v)| (o.to_string(), v.as_bytes().to_vec()))
                    .collect(),
                broken: false,
                cancelled: false,
                gets: RefCell::new(0),
            }
        }
    }

    impl SnmpBackend for CountingBackend {
        fn config(&self) -> &SnmpHostConfig {
            &self.config
        }

        fn set_port(&mut self, port: u16) {
            self.config = self.config.with_port(port);
        }

        fn get(&self, oid: &str, _context: &str) -> Result<Option<SnmpRawValue>> {
            *self.gets.borrow_mut() += 1;
            if self.cancelled {
                return Err(SnmpError::Cancelled);
            }
            if self.broken {
                return Err(SnmpError::Io(std::io::Error::other("spawn failed")));
            }
            Ok(self.values.get(oid).cloned())
        }

        fn walk(&self, _oid: &str, _c: &str, _s: Option<&str>, _t: Option<&str>) -> Result<SnmpRowInfo> {
            Ok(vec![])
        }
    }

    #[test]
    fn test_single_oid_cache() {
        let backend = CountingBackend::new(&[(OID_SYS_DESCR, "Linux")]);
        let mut cache = SingleOidCache::new();
        assert_eq!(
            get_single_oid("1.3.6.1.2.1.1.1.0", None, &mut cache, &backend).unwrap(),
            Some(b"Linux".to_vec())
        );
        assert_eq!(
            get_single_oid(OID_SYS_DESCR, None, &mut cache, &backend).unwrap(),
            Some(b"Linux".to_vec())
        );
        assert_eq!(get_single_oid(OID_SYS_OBJ, None, &mut cache, &backend).unwrap(), None);
        assert_eq!(get_single_oid(OID_SYS_OBJ, None, &mut cache, &backend).unwrap(), None);
        assert_eq!(*backend.gets.borrow(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_errors_fold_into_none() {
        let mut backend = CountingBackend::new(&[]);
        backend.broken = true;
        let mut cache = SingleOidCache::new();
        assert_eq!(get_single_oid(OID_SYS_DESCR, None, &mut cache, &backend).unwrap(), None);
        backend.cancelled = true;
        let res = get_single_oid(OID_SYS_OBJ, None, &mut cache, &backend);
        assert!(matches!(res, Err(SnmpError::Cancelled)));
    }

    fn sections() -> Vec<(String, SnmpDetectSpec)> {
        vec![
            ("linux".to_string(), startswith(OID_SYS_DESCR, "linux")),
            ("cisco".to_string(), startswith(OID_SYS_DESCR, "cisco")),
            (
                "hr".to_string(),
                any_of(&[exists(".1.3.6.1.2.1.25.1.1.0"), not_exists(".1.3.6.1.4.1.9.9.9.0")]),
            ),
            ("broken".to_string(), matches(OID_SYS_DESCR, "(")),
        ]
    }

    #[test]
    fn test_snmp_scan() {
        let backend = CountingBackend::new(&[(OID_SYS_DESCR, "Linux zeus"), (OID_SYS_OBJ, ".1.3.6.1.4.1.8072")]);
        let mut cache = SingleOidCache::new();
        let found = snmp_scan(&sections(), OnError::Ignore, false, &mut cache, &backend).unwrap();
        assert_eq!(found, vec!["linux", "hr"]);
        let res = snmp_scan(&sections(), OnError::Raise, false, &mut cache, &backend);
        assert!(matches!(res, Err(SnmpError::Pattern { .. })));
    }

    #[test]
    fn test_snmp_scan_without_sys_descr() {
        let backend = CountingBackend::new(&[]);
        let mut cache = SingleOidCache::new();
        let res = snmp_scan(&sections(), OnError::Ignore, false, &mut cache, &backend);
        assert!(matches!(res, Err(SnmpError::NoSysDescription { .. })));
        let mut cache = SingleOidCache::new();
        let found = snmp_scan(&sections(), OnError::Ignore, true, &mut cache, &backend).unwrap();
        assert_eq!(found, vec!["hr"]);
    }
}
