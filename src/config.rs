//! Per host SNMP configuration.
//!
//! `SnmpHostConfig` is a value type: backends own a copy, and the only field
//! that may change after construction (the port) is changed by building a new
//! value with [`SnmpHostConfig::with_port`].
//!
//! The loader looks for a configuration file in some well known places, unless
//! given a path. The file is a text file of Key Value pairs, separated by a
//! single space. Unrecognized keys are ignored.
//!
//! Compulsory keys:
//! * Hostname - name of the host, also the name of its stored walk file.
//! * Address - IP address or name handed to the query tools.
//!
//! Optional keys:
//! * IPv6 - `yes` if the address is IPv6 (selects the `udp6:` transport).
//! * Port - UDP port, 161 if absent.
//! * Version - `1`, `2c` or `3`; 2c if absent.
//! * Community - community string for v1/v2c, `public` if absent.
//! * V3Credentials - 2, 4 or 6 space separated fields: security level, auth
//!   protocol, security name, auth password, privacy protocol, privacy password
//!   (2 fields are security level and security name).
//! * Bulkwalk - `yes` to use bulk walks, BulkSize sets the repetitions (10).
//! * Timeout - seconds, fractional allowed. Retries - count.
//! * Encoding - `utf-8` or `latin-1`.
//! * Backend - `classic` or `stored-walk`.
//! * Contexts - section name (or `*` for all) followed by SNMPv3 contexts.
//! * RangeLimit - section name followed by `first N`, `last N` or `mid FROM N`.

use crate::error::{Result, SnmpError};
use crate::value::CharacterEncoding;
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{exists, read_to_string};
use std::path::Path;
use std::str::FromStr;

/// Identifies an SNMPv3 context. Empty for the default context.
pub type SnmpContext = String;

pub const DEFAULT_PORT: u16 = 161;
pub const DEFAULT_BULK_WALK_SIZE: u32 = 10;

const CONF_FILES: [&str; 3] = [
    "/etc/snmp-fetcher/snmp-fetcher.conf",
    "~/.snmp-fetcher.conf",
    ".snmp-fetcher.conf",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnmpVersion {
    V1,
    V2c,
    V3,
}

impl SnmpVersion {
    pub fn flag(&self) -> &'static str {
        match self {
            SnmpVersion::V1 => "-v1",
            SnmpVersion::V2c => "-v2c",
            SnmpVersion::V3 => "-v3",
        }
    }
}

/// Community string for v1/v2c, or the SNMPv3 tuple.
///
/// Serialises as a plain string or a list of strings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SnmpCredentials {
    Community(String),
    V3(Vec<String>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct SnmpTiming {
    /// Seconds per attempt, passed on with two decimals.
    pub timeout: Option<f64>,
    pub retries: Option<u32>,
}

/// Restricts which rows of a walk are kept, by position in the walk result.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RangeLimit {
    First(usize),
    Last(usize),
    Mid(usize, usize),
}

impl RangeLimit {
    fn contains(&self, position: usize, total: usize) -> bool {
        match *self {
            RangeLimit::First(n) => position < n,
            RangeLimit::Last(n) => position >= total.saturating_sub(n),
            RangeLimit::Mid(from, n) => position >= from && position < from.saturating_add(n),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[default]
    Classic,
    StoredWalk,
}

/// One `Contexts` rule: applies to `section`, or to every section if `None`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextRule {
    pub section: Option<String>,
    pub contexts: Vec<SnmpContext>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SnmpHostConfig {
    pub hostname: String,
    pub ipaddress: String,
    pub is_ipv6_primary: bool,
    pub port: u16,
    pub credentials: SnmpCredentials,
    pub snmp_version: SnmpVersion,
    pub use_bulkwalk: bool,
    pub bulk_walk_size: u32,
    pub timing: SnmpTiming,
    pub oid_range_limits: BTreeMap<String, Vec<RangeLimit>>,
    pub snmpv3_contexts: Vec<ContextRule>,
    pub character_encoding: Option<CharacterEncoding>,
    pub snmp_backend: BackendKind,
}

impl SnmpHostConfig {
    /// A v2c host with community `public` and every optional setting unset.
    pub fn new(hostname: &str, ipaddress: &str) -> Self {
        SnmpHostConfig {
            hostname: hostname.to_string(),
            ipaddress: ipaddress.to_string(),
            is_ipv6_primary: false,
            port: DEFAULT_PORT,
            credentials: SnmpCredentials::Community("public".to_string()),
            snmp_version: SnmpVersion::V2c,
            use_bulkwalk: false,
            bulk_walk_size: DEFAULT_BULK_WALK_SIZE,
            timing: SnmpTiming::default(),
            oid_range_limits: BTreeMap::new(),
            snmpv3_contexts: vec![],
            character_encoding: None,
            snmp_backend: BackendKind::Classic,
        }
    }

    pub fn is_snmpv3_host(&self) -> bool {
        self.snmp_version == SnmpVersion::V3
    }

    /// Check the invariants between version, credentials and bulk walk.
    pub fn validate(&self) -> Result<()> {
        match (&self.credentials, self.snmp_version) {
            (SnmpCredentials::Community(_), SnmpVersion::V1 | SnmpVersion::V2c) => {}
            (SnmpCredentials::V3(fields), SnmpVersion::V3) => {
                if ![2, 4, 6].contains(&fields.len()) {
                    return Err(SnmpError::Config(format!(
                        "Invalid SNMP credentials for host {}: must be 2-tuple, 4-tuple or 6-tuple, got {} fields",
                        self.hostname,
                        fields.len()
                    )));
                }
            }
            (SnmpCredentials::Community(_), SnmpVersion::V3) => {
                return Err(SnmpError::Config(format!(
                    "SNMPv3 host {} needs credential tuple, not a community",
                    self.hostname
                )));
            }
            (SnmpCredentials::V3(_), _) => {
                return Err(SnmpError::Config(format!(
                    "SNMPv1/v2c host {} needs a community string",
                    self.hostname
                )));
            }
        }
        if self.use_bulkwalk && self.snmp_version == SnmpVersion::V1 {
            return Err(SnmpError::Config(format!(
                "Bulk walk is not available with SNMPv1 (host {})",
                self.hostname
            )));
        }
        Ok(())
    }

    /// Copy of this config with a different port.
    pub fn with_port(&self, port: u16) -> Self {
        SnmpHostConfig {
            port,
            ..self.clone()
        }
    }

    /// Contexts to query for a section. Non-v3 hosts, and sections without a
    /// matching rule, get the default context only.
    pub fn snmpv3_contexts_of(&self, section_name: Option<&str>) -> Vec<SnmpContext> {
        let default = vec![String::new()];
        let Some(section) = section_name else {
            return default;
        };
        if !self.is_snmpv3_host() {
            return default;
        }
        for rule in &self.snmpv3_contexts {
            match &rule.section {
                None => return rule.contexts.clone(),
                Some(s) if s == section => return rule.contexts.clone(),
                _ => {}
            }
        }
        default
    }

    /// Keep only the rows selected by the range limits of `section_name`.
    pub fn apply_range_limits<T>(&self, section_name: &str, rows: Vec<T>) -> Vec<T> {
        let Some(limits) = self.oid_range_limits.get(section_name) else {
            return rows;
        };
        if limits.is_empty() {
            return rows;
        }
        let total = rows.len();
        rows.into_iter()
            .enumerate()
            .filter(|(pos, _)| limits.iter().any(|l| l.contains(*pos, total)))
            .map(|(_, row)| row)
            .collect()
    }

    /// Decode a raw value for display or string columns.
    pub fn ensure_str(&self, value: &[u8]) -> String {
        if let Some(encoding) = self.character_encoding {
            return encoding.decode(value);
        }
        match std::str::from_utf8(value) {
            Ok(s) => s.to_string(),
            Err(_) => CharacterEncoding::Latin1.decode(value),
        }
    }

    pub fn serialize(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn deserialize(serialized: &str) -> Result<Self> {
        let config: SnmpHostConfig = serde_json::from_str(serialized)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a Key Value configuration text.
    pub fn from_str_config(text: &str) -> Result<Self> {
        let mut config = SnmpHostConfig::new("", "");
        let mut got_hostname = false;
        let mut got_address = false;
        let mut v3_fields: Option<Vec<String>> = None;
        let mut community: Option<String> = None;
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let parts: Vec<&str> = line.splitn(2, ' ').collect();
            let arg = parts.get(1).copied().unwrap_or("").trim();
            let bad = |what: &str| SnmpError::Config(format!("line {}: bad {what} {arg:?}", lineno + 1));
            match parts[0] {
                "Hostname" => {
                    config.hostname = arg.to_string();
                    got_hostname = true;
                }
                "Address" => {
                    config.ipaddress = arg.to_string();
                    got_address = true;
                }
                "IPv6" => config.is_ipv6_primary = parse_bool(arg).ok_or_else(|| bad("IPv6"))?,
                "Port" => config.port = u16::from_str(arg).map_err(|_| bad("Port"))?,
                "Version" => {
                    config.snmp_version = match arg {
                        "1" | "v1" => SnmpVersion::V1,
                        "2c" | "v2c" => SnmpVersion::V2c,
                        "3" | "v3" => SnmpVersion::V3,
                        _ => return Err(bad("Version")),
                    }
                }
                "Community" => community = Some(arg.to_string()),
                "V3Credentials" => {
                    v3_fields = Some(arg.split(' ').map(str::to_string).collect());
                }
                "Bulkwalk" => config.use_bulkwalk = parse_bool(arg).ok_or_else(|| bad("Bulkwalk"))?,
                "BulkSize" => {
                    config.bulk_walk_size = u32::from_str(arg).map_err(|_| bad("BulkSize"))?
                }
                "Timeout" => {
                    config.timing.timeout = Some(f64::from_str(arg).map_err(|_| bad("Timeout"))?)
                }
                "Retries" => {
                    config.timing.retries = Some(u32::from_str(arg).map_err(|_| bad("Retries"))?)
                }
                "Encoding" => {
                    config.character_encoding =
                        Some(CharacterEncoding::from_name(arg).ok_or_else(|| bad("Encoding"))?)
                }
                "Backend" => {
                    config.snmp_backend = match arg {
                        "classic" => BackendKind::Classic,
                        "stored-walk" => BackendKind::StoredWalk,
                        _ => return Err(bad("Backend")),
                    }
                }
                "Contexts" => {
                    let mut words = arg.split(' ');
                    let section = match words.next() {
                        Some("*") => None,
                        Some(s) if !s.is_empty() => Some(s.to_string()),
                        _ => return Err(bad("Contexts")),
                    };
                    // "" stands for the default context
                    let contexts = words
                        .map(|w| if w == "\"\"" { String::new() } else { w.to_string() })
                        .collect();
                    config.snmpv3_contexts.push(ContextRule { section, contexts });
                }
                "RangeLimit" => {
                    let (section, limit) = parse_range_limit(arg).ok_or_else(|| bad("RangeLimit"))?;
                    config.oid_range_limits.entry(section).or_default().push(limit);
                }
                _ => {}
            }
        }
        if !got_hostname {
            return Err(SnmpError::Config("Hostname not found in config file".to_string()));
        }
        if !got_address {
            return Err(SnmpError::Config("Address not found in config file".to_string()));
        }
        if let Some(fields) = v3_fields {
            config.credentials = SnmpCredentials::V3(fields);
        } else if let Some(c) = community {
            config.credentials = SnmpCredentials::Community(c);
        }
        config.validate()?;
        debug!("Loaded SNMP config for {}", config.hostname);
        Ok(config)
    }

    pub fn from_file(filename: &Path) -> Result<Self> {
        let text = read_to_string(filename)?;
        SnmpHostConfig::from_str_config(&text)
    }

    /// Load from the first well known location that exists.
    pub fn load() -> Result<Self> {
        for name in CONF_FILES {
            if let Ok(true) = exists(name) {
                return SnmpHostConfig::from_file(Path::new(name));
            }
        }
        Err(SnmpError::Config("No configuration file found".to_string()))
    }
}

fn parse_bool(text: &str) -> Option<bool> {
    match text {
        "yes" | "true" | "1" => Some(true),
        "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

fn parse_range_limit(arg: &str) -> Option<(String, RangeLimit)> {
    let words: Vec<&str> = arg.split(' ').collect();
    let num = |i: usize| words.get(i).and_then(|w| usize::from_str(w).ok());
    let limit = match (words.get(1).copied(), words.len()) {
        (Some("first"), 3) => RangeLimit::First(num(2)?),
        (Some("last"), 3) => RangeLimit::Last(num(2)?),
        (Some("mid"), 4) => RangeLimit::Mid(num(2)?, num(3)?),
        _ => return None,
    };
    Some((words[0].to_string(), limit))
}
