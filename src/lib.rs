//! SNMP fetch layer.
//!
//! Fetches SNMP data of one host through one of two interchangeable
//! backends: the net-snmp command line tools, or a stored walk file captured
//! earlier. On top of the backends sit the walk cache, the table assembler,
//! single OID fetches and the detection predicate evaluator.
//!
//! ```no_run
//! use snmp_rust_fetcher::{Backend, BackendPaths, SnmpBackend, SnmpHostConfig};
//!
//! let config = SnmpHostConfig::new("zeus", "10.1.1.1");
//! let backend = Backend::from_config(config, &BackendPaths::default())?;
//! let _descr = backend.get(".1.3.6.1.2.1.1.1.0", "")?;
//! # Ok::<(), snmp_rust_fetcher::SnmpError>(())
//! ```

pub mod backend;
pub mod classic;
pub mod config;
pub mod detect;
pub mod error;
pub mod oid;
pub mod scalar;
pub mod stored_walk;
pub mod table;
pub mod value;
pub mod walk_cache;

pub use backend::{Backend, BackendPaths, CancelToken, SnmpBackend, SnmpRowInfo};
pub use config::{BackendKind, SnmpContext, SnmpHostConfig};
pub use error::{Result, SnmpError};
pub use table::{get_snmp_table, BackendSnmpTree, SnmpValue};
pub use value::{strip_snmp_value, SnmpRawValue};
pub use walk_cache::WalkCache;
