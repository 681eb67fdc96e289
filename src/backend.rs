//! The backend contract and backend selection.
//!
//! Every backend answers `get` and `walk` the same way: `Ok(None)` or an
//! empty row list for legitimately absent data, `Err` for a failure of the
//! transport itself.

use crate::classic::ClassicBackend;
use crate::config::{BackendKind, SnmpHostConfig};
use crate::error::Result;
use crate::stored_walk::StoredWalkBackend;
use crate::value::SnmpRawValue;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Result of one GET/WALK: `(oid, value)` pairs in OID order.
pub type SnmpRowInfo = Vec<(String, SnmpRawValue)>;

pub trait SnmpBackend {
    fn config(&self) -> &SnmpHostConfig;

    /// Rebind to a copy of the config with another port.
    fn set_port(&mut self, port: u16);

    /// Single value, or the first value below the prefix for an OID ending in `.*`.
    fn get(&self, oid: &str, context: &str) -> Result<Option<SnmpRawValue>>;

    /// All rows of the subtree below `oid`.
    ///
    /// `section_name` and `table_base_oid` identify the table fetch this walk
    /// belongs to; together they enable the section's OID range limits.
    fn walk(
        &self,
        oid: &str,
        context: &str,
        section_name: Option<&str>,
        table_base_oid: Option<&str>,
    ) -> Result<SnmpRowInfo>;

    fn hostname(&self) -> &str {
        &self.config().hostname
    }

    fn address(&self) -> &str {
        &self.config().ipaddress
    }

    fn port(&self) -> u16 {
        self.config().port
    }
}

/// Apply range limits if this walk is part of a table fetch of a section.
pub(crate) fn limit_rows(
    config: &SnmpHostConfig,
    rows: SnmpRowInfo,
    section_name: Option<&str>,
    table_base_oid: Option<&str>,
) -> SnmpRowInfo {
    match (section_name, table_base_oid) {
        (Some(section), Some(_)) => config.apply_range_limits(section, rows),
        _ => rows,
    }
}

/// Cancellation signal shared between a caller and a running backend call.
///
/// Fires when [`CancelToken::cancel`] is called or, if set, the deadline
/// passes. Clones share the same flag.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        CancelToken {
            flag: Arc::new(AtomicBool::new(false)),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst) || self.deadline.is_some_and(|d| Instant::now() >= d)
    }
}

/// Where backends find the things they need on disk.
#[derive(Clone, Debug, Default)]
pub struct BackendPaths {
    /// Directory of stored walk files, one file per host name.
    pub stored_walk_dir: PathBuf,
    /// Directory holding the net-snmp tools, `$PATH` if not set.
    pub tool_dir: Option<PathBuf>,
}

/// One of the interchangeable backends, selected by `SnmpHostConfig::snmp_backend`.
pub enum Backend {
    Classic(ClassicBackend),
    StoredWalk(StoredWalkBackend),
}

impl Backend {
    pub fn from_config(config: SnmpHostConfig, paths: &BackendPaths) -> Result<Self> {
        Backend::from_kind(config.snmp_backend, config, paths)
    }

    /// Like `from_config`, but overriding the configured kind.
    pub fn from_kind(kind: BackendKind, config: SnmpHostConfig, paths: &BackendPaths) -> Result<Self> {
        match kind {
            BackendKind::Classic => {
                let mut backend = ClassicBackend::new(config);
                if let Some(dir) = &paths.tool_dir {
                    backend = backend.with_tool_dir(dir);
                }
                Ok(Backend::Classic(backend))
            }
            BackendKind::StoredWalk => {
                let path = stored_walk_path(&paths.stored_walk_dir, &config.hostname);
                Ok(Backend::StoredWalk(StoredWalkBackend::new(config, &path)?))
            }
        }
    }
}

pub fn stored_walk_path(dir: &Path, hostname: &str) -> PathBuf {
    dir.join(hostname)
}

impl SnmpBackend for Backend {
    fn config(&self) -> &SnmpHostConfig {
        match self {
            Backend::Classic(b) => b.config(),
            Backend::StoredWalk(b) => b.config(),
        }
    }

    fn set_port(&mut self, port: u16) {
        match self {
            Backend::Classic(b) => b.set_port(port),
            Backend::StoredWalk(b) => b.set_port(port),
        }
    }

    fn get(&self, oid: &str, context: &str) -> Result<Option<SnmpRawValue>> {
        match self {
            Backend::Classic(b) => b.get(oid, context),
            Backend::StoredWalk(b) => b.get(oid, context),
        }
    }

    fn walk(
        &self,
        oid: &str,
        context: &str,
        section_name: Option<&str>,
        table_base_oid: Option<&str>,
    ) -> Result<SnmpRowInfo> {
        match self {
            Backend::Classic(b) => b.walk(oid, context, section_name, table_base_oid),
            Backend::StoredWalk(b) => b.walk(oid, context, section_name, table_base_oid),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cancel_token() {
        let t = CancelToken::new();
        let t2 = t.clone();
        assert!(!t.is_cancelled());
        t2.cancel();
        assert!(t.is_cancelled());
        let past = CancelToken::with_deadline(Instant::now() - Duration::from_millis(1));
        assert!(past.is_cancelled());
    }

    #[test]
    fn test_missing_stored_walk_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = SnmpHostConfig::new("nosuchhost", "127.0.0.1");
        config.snmp_backend = BackendKind::StoredWalk;
        let paths = BackendPaths {
            stored_walk_dir: dir.path().to_path_buf(),
            tool_dir: None,
        };
        assert!(Backend::from_config(config, &paths).is_err());
    }

    #[test]
    fn test_port_setter() {
        let config = SnmpHostConfig::new("h", "127.0.0.1");
        let mut backend = Backend::from_config(config.clone(), &BackendPaths::default()).unwrap();
        backend.set_port(1161);
        assert_eq!(backend.port(), 1161);
        assert_eq!(config.port, 161);
    }
}
