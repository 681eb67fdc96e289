//! Error taxonomy for the fetch layer.
//!
//! A soft miss (no such object, GETNEXT leaving the subtree) is not an error:
//! backends answer `Ok(None)` for it. Everything here is a genuine failure of
//! the current operation.

use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum SnmpError {
    /// The query tool exited non-zero during a walk.
    #[error("SNMP Error on {host}: {stderr} (Exit-Code: {exit_code})")]
    Transport {
        host: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("No snmpwalk file {}", path.display())]
    MissingWalkFile { path: PathBuf },

    #[error("malformed stored walk {}:{line}", path.display())]
    MalformedWalk { path: PathBuf, line: usize },

    /// Bad credentials shape, unknown protocol names and the like.
    /// Raised before any process is spawned.
    #[error("configuration error: {0}")]
    Config(String),

    /// The caller signalled cancellation; the subprocess has been killed.
    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid OID: {0}")]
    InvalidOid(String),

    #[error("invalid SNMP tree specification: {0}")]
    InvalidTree(String),

    #[error("invalid detection pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("Cannot fetch system description OID of {host}")]
    NoSysDescription { host: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnmpError>;
