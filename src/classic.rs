//! Backend driving the net-snmp command line tools.
//!
//! Command lines are built from the host config, the tool runs as a
//! subprocess and its line oriented `<oid> = <value>` output is parsed.
//! Output is read on a helper thread so that a caller's [`CancelToken`] can
//! kill the tool while it is still talking.

use crate::backend::{limit_rows, CancelToken, SnmpBackend, SnmpRowInfo};
use crate::config::{SnmpCredentials, SnmpHostConfig, SnmpVersion, DEFAULT_PORT};
use crate::error::{Result, SnmpError};
use crate::oid::{normalize, split_dot_star};
use crate::value::{strip_snmp_value_encoded, CharacterEncoding, SnmpRawValue};
use log::{debug, error, warn};
use nom::{
    bytes::complete::take_until, character::complete::char, combinator::rest,
    sequence::separated_pair, IResult, Parser,
};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::thread;
use std::time::Duration;

pub const AUTH_PROTOCOLS: [&str; 6] = ["md5", "sha", "SHA-224", "SHA-256", "SHA-384", "SHA-512"];
pub const PRIV_PROTOCOLS: [&str; 4] = ["DES", "AES", "AES-256", "AES-192"];

/// Texts the tools print instead of a value. These follow the net-snmp
/// version in use and may need extending for other tool versions.
pub const NO_VALUE_SENTINELS: [&str; 4] = [
    "No more variables",
    "End of MIB",
    "No Such Object available",
    "No Such Instance currently exists",
];

const GET_OUTPUT_OPTIONS: [&str; 4] = ["-On", "-OQ", "-Oe", "-Ot"];
const WALK_OUTPUT_OPTIONS: [&str; 4] = ["-OQ", "-OU", "-On", "-Ot"];

/// How often a blocked read checks for cancellation.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SnmpCommand {
    Get,
    GetNext,
    Walk,
}

struct ToolOutput {
    status: ExitStatus,
    lines: Vec<String>,
    stderr: String,
}

pub struct ClassicBackend {
    config: SnmpHostConfig,
    tool_dir: Option<PathBuf>,
    cancel: Option<CancelToken>,
}

fn auth_proto_for(name: &str) -> Result<&'static str> {
    AUTH_PROTOCOLS
        .iter()
        .find(|p| **p == name)
        .copied()
        .ok_or_else(|| SnmpError::Config(format!("Invalid SNMP auth protocol: {name}")))
}

fn priv_proto_for(name: &str) -> Result<&'static str> {
    PRIV_PROTOCOLS
        .iter()
        .find(|p| **p == name)
        .copied()
        .ok_or_else(|| SnmpError::Config(format!("Invalid SNMP privacy protocol: {name}")))
}

impl ClassicBackend {
    pub fn new(config: SnmpHostConfig) -> Self {
        ClassicBackend {
            config,
            tool_dir: None,
            cancel: None,
        }
    }

    /// Run the tools from `dir` instead of looking them up in `$PATH`.
    pub fn with_tool_dir(mut self, dir: &Path) -> Self {
        self.tool_dir = Some(dir.to_path_buf());
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn encoding(&self) -> CharacterEncoding {
        self.config
            .character_encoding
            .unwrap_or(CharacterEncoding::Utf8)
    }

    /// Tool, version, credential, context, MIB and timing options.
    pub fn base_command(&self, what: SnmpCommand, context: &str) -> Result<Vec<String>> {
        let config = &self.config;
        if config.use_bulkwalk && config.snmp_version == SnmpVersion::V1 {
            return Err(SnmpError::Config(format!(
                "Bulk walk is not available with SNMPv1 (host {})",
                config.hostname
            )));
        }
        let mut command: Vec<String> = match what {
            SnmpCommand::Get => vec!["snmpget".to_string()],
            SnmpCommand::GetNext => vec!["snmpgetnext".to_string(), "-Cf".to_string()],
            SnmpCommand::Walk if config.use_bulkwalk => vec![
                "snmpbulkwalk".to_string(),
                format!("-Cr{}", config.bulk_walk_size),
            ],
            SnmpCommand::Walk => vec!["snmpwalk".to_string()],
        };
        command.push(config.snmp_version.flag().to_string());

        match (&config.credentials, config.snmp_version) {
            (SnmpCredentials::Community(community), SnmpVersion::V1 | SnmpVersion::V2c) => {
                command.extend(["-c".to_string(), community.clone()]);
            }
            (SnmpCredentials::V3(fields), SnmpVersion::V3) => {
                let options: Vec<&str> = match fields.as_slice() {
                    [level, user] => vec!["-l", level.as_str(), "-u", user.as_str()],
                    [level, auth, user, auth_pw] => vec![
                        "-l",
                        level.as_str(),
                        "-a",
                        auth_proto_for(auth)?,
                        "-u",
                        user.as_str(),
                        "-A",
                        auth_pw.as_str(),
                    ],
                    [level, auth, user, auth_pw, privacy, priv_pw] => vec![
                        "-l",
                        level.as_str(),
                        "-a",
                        auth_proto_for(auth)?,
                        "-u",
                        user.as_str(),
                        "-A",
                        auth_pw.as_str(),
                        "-x",
                        priv_proto_for(privacy)?,
                        "-X",
                        priv_pw.as_str(),
                    ],
                    _ => {
                        return Err(SnmpError::Config(format!(
                            "Invalid SNMP credentials for host {}: must be string, 2-tuple, 4-tuple or 6-tuple",
                            config.hostname
                        )))
                    }
                };
                command.extend(options.into_iter().map(str::to_string));
                if !context.is_empty() {
                    command.extend(["-n".to_string(), context.to_string()]);
                }
            }
            _ => {
                return Err(SnmpError::Config(format!(
                    "Credentials of host {} do not match SNMP version {:?}",
                    config.hostname, config.snmp_version
                )))
            }
        }

        // Do not load any MIB files, that saves a lot of CPU
        command.extend(["-m", "", "-M", ""].map(str::to_string));

        if let Some(timeout) = config.timing.timeout {
            command.extend(["-t".to_string(), format!("{timeout:.2}")]);
        }
        if let Some(retries) = config.timing.retries {
            command.extend(["-r".to_string(), retries.to_string()]);
        }
        Ok(command)
    }

    pub fn walk_command(&self, context: &str) -> Result<Vec<String>> {
        let mut command = self.base_command(SnmpCommand::Walk, context)?;
        command.push("-Cc".to_string());
        Ok(command)
    }

    /// `[udp6:]address[:port]` as the tools expect it.
    pub fn address_spec(&self) -> String {
        let config = &self.config;
        let (proto, address) = if config.is_ipv6_primary {
            ("udp6:", format!("[{}]", config.ipaddress))
        } else {
            ("", config.ipaddress.clone())
        };
        if config.port == DEFAULT_PORT {
            format!("{proto}{address}")
        } else {
            format!("{proto}{address}:{}", config.port)
        }
    }

    fn program(&self, name: &str) -> PathBuf {
        match &self.tool_dir {
            Some(dir) => dir.join(name),
            None => PathBuf::from(name),
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    fn run(&self, command: &[String]) -> Result<ToolOutput> {
        let shown: Vec<&str> = command
            .iter()
            .map(|a| if a.is_empty() { "''" } else { a.as_str() })
            .collect();
        debug!("Running '{}'", shown.join(" "));

        let mut child = Command::new(self.program(&command[0]))
            .args(&command[1..])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| std::io::Error::other("stdout of query tool not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| std::io::Error::other("stderr of query tool not captured"))?;

        let (tx, rx) = channel::<Vec<u8>>();
        let out_reader = thread::spawn(move || {
            for line in BufReader::new(stdout).split(b'\n') {
                match line {
                    Ok(l) => {
                        if tx.send(l).is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
        });
        let err_reader = thread::spawn(move || {
            let mut buf = Vec::new();
            let _ = BufReader::new(stderr).read_to_end(&mut buf);
            buf
        });

        let encoding = self.encoding();
        let mut lines = Vec::new();
        loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(raw) => lines.push(encoding.decode(&raw)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }
            if self.is_cancelled() {
                warn!("Cancelled, killing '{}'", command[0]);
                let _ = child.kill();
                let _ = child.wait();
                return Err(SnmpError::Cancelled);
            }
        }
        let status = child.wait()?;
        let _ = out_reader.join();
        let stderr = err_reader.join().unwrap_or_default();
        Ok(ToolOutput {
            status,
            lines,
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
        })
    }
}

fn oid_value_line(input: &str) -> IResult<&str, (&str, &str)> {
    separated_pair(take_until("="), char('='), rest).parse(input)
}

/// Split `<oid> = <value>` at the first `=`.
fn split_line(line: &str) -> Option<(&str, &str)> {
    oid_value_line(line)
        .ok()
        .map(|(_, (oid, value))| (oid.trim(), value.trim()))
}

fn opens_unterminated_quote(value: &str) -> bool {
    value == "\"" || (value.len() > 1 && value.starts_with('"') && !value.ends_with('"'))
}

/// Value of the first output line of snmpget/snmpgetnext, if any.
pub fn parse_get_output(
    lines: &[String],
    oid_prefix: &str,
    is_getnext: bool,
    encoding: CharacterEncoding,
) -> Option<SnmpRawValue> {
    let line = lines.first()?.trim();
    if line.is_empty() {
        debug!("Error in response to snmpget.");
        return None;
    }
    let (item, value) = split_line(line)?;
    debug!("SNMP answer: ==> [{value}]");
    if NO_VALUE_SENTINELS.iter().any(|s| value.starts_with(s)) {
        return None;
    }
    // GETNEXT may have walked out of the subtree
    if is_getnext && !item.starts_with(&format!("{oid_prefix}.")) {
        return None;
    }
    Some(strip_snmp_value_encoded(value, encoding))
}

/// Rows of snmpwalk/snmpbulkwalk output.
///
/// Long values, hex dumps in particular, are split over several lines by
/// the tools. A value that opens a quote without closing it continues on the
/// following lines (joined with a space) up to the line ending in a quote.
pub fn parse_walk_output<I, S>(lines: I, encoding: CharacterEncoding) -> SnmpRowInfo
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut rows = SnmpRowInfo::new();
    let mut pending: Option<(String, String)> = None;
    for raw in lines {
        let line = raw.as_ref().trim();
        if let Some((oid, mut value)) = pending.take() {
            value.push(' ');
            value.push_str(line);
            if value.ends_with('"') {
                rows.push((oid, strip_snmp_value_encoded(&value, encoding)));
            } else {
                pending = Some((oid, value));
            }
            continue;
        }
        let Some((oid, value)) = split_line(line) else {
            continue;
        };
        if NO_VALUE_SENTINELS.iter().any(|s| value.starts_with(s)) {
            continue;
        }
        if opens_unterminated_quote(value) {
            pending = Some((oid.to_string(), value.to_string()));
            continue;
        }
        rows.push((oid.to_string(), strip_snmp_value_encoded(value, encoding)));
    }
    if let Some((oid, value)) = pending {
        warn!("Output ended inside quoted value of {oid}");
        rows.push((oid, strip_snmp_value_encoded(&value, encoding)));
    }
    rows
}

impl SnmpBackend for ClassicBackend {
    fn config(&self) -> &SnmpHostConfig {
        &self.config
    }

    fn set_port(&mut self, port: u16) {
        self.config = self.config.with_port(port);
    }

    fn get(&self, oid: &str, context: &str) -> Result<Option<SnmpRawValue>> {
        let oid = normalize(oid);
        let (oid_prefix, is_getnext) = split_dot_star(&oid);
        let what = if is_getnext {
            SnmpCommand::GetNext
        } else {
            SnmpCommand::Get
        };
        let mut command = self.base_command(what, context)?;
        command.extend(GET_OUTPUT_OPTIONS.map(str::to_string));
        command.push(self.address_spec());
        command.push(oid_prefix.to_string());

        let output = self.run(&command)?;
        if !output.status.success() {
            warn!(
                "SNMP error on {} getting {oid} (Exit-Code: {}): {}",
                self.config.ipaddress,
                output.status.code().unwrap_or(-1),
                output.stderr.trim()
            );
            return Ok(None);
        }
        Ok(parse_get_output(
            &output.lines,
            oid_prefix,
            is_getnext,
            self.encoding(),
        ))
    }

    fn walk(
        &self,
        oid: &str,
        context: &str,
        section_name: Option<&str>,
        table_base_oid: Option<&str>,
    ) -> Result<SnmpRowInfo> {
        let oid = normalize(oid);
        let mut command = self.walk_command(context)?;
        command.extend(WALK_OUTPUT_OPTIONS.map(str::to_string));
        command.push(self.address_spec());
        command.push(oid.clone());

        let output = self.run(&command)?;
        if !output.status.success() {
            let exit_code = output.status.code().unwrap_or(-1);
            error!(
                "SNMP error on {} walking {oid}: {} (Exit-Code: {exit_code})",
                self.config.ipaddress,
                output.stderr.trim()
            );
            return Err(SnmpError::Transport {
                host: self.config.ipaddress.clone(),
                exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        let rows = parse_walk_output(&output.lines, self.encoding());
        Ok(limit_rows(&self.config, rows, section_name, table_base_oid))
    }
}
