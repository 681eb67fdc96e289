//! Value normalizer.
//!
//! Backends see values as text: a token from a tool output line or from a
//! stored walk. Downstream code wants raw bytes. Quoted hex dumps such as
//! `"00 12 79 "` are decoded, everything else is taken literally and
//! encoded with the host character encoding. Quotes around literal text are
//! kept as the tool printed them.

use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// The wire level value of one OID before any column decoding.
pub type SnmpRawValue = Vec<u8>;

/// Character encodings a host can be configured with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CharacterEncoding {
    Utf8,
    Latin1,
}

impl CharacterEncoding {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "utf-8" | "utf8" => Some(CharacterEncoding::Utf8),
            "latin-1" | "latin1" | "iso-8859-1" | "iso8859-1" => Some(CharacterEncoding::Latin1),
            _ => None,
        }
    }

    /// Latin-1 maps byte for byte, so it never fails. UTF-8 is lossy on
    /// invalid sequences.
    pub fn decode(&self, bytes: &[u8]) -> String {
        match self {
            CharacterEncoding::Utf8 => String::from_utf8_lossy(bytes).into_owned(),
            CharacterEncoding::Latin1 => bytes.iter().map(|b| char::from(*b)).collect(),
        }
    }

    /// Characters without a Latin-1 representation become `?`.
    pub fn encode(&self, text: &str) -> Vec<u8> {
        match self {
            CharacterEncoding::Utf8 => text.as_bytes().to_vec(),
            CharacterEncoding::Latin1 => text
                .chars()
                .map(|c| u8::try_from(u32::from(c)).unwrap_or(b'?'))
                .collect(),
        }
    }
}

fn quoted_inner(value: &str) -> Option<&str> {
    if value.len() >= 2 && value.starts_with('"') && value.ends_with('"') {
        Some(&value[1..value.len() - 1])
    } else {
        None
    }
}

/// Decode the inside of a quoted token if it is a hex dump.
///
/// A hex dump is made of whitespace separated two-digit groups. The tools
/// leave a trailing space inside the quotes; without it at least two groups
/// are required so that a short literal like `"AB"` stays text.
fn decode_hex_dump(inner: &str) -> Option<SnmpRawValue> {
    let groups: Vec<&str> = inner.split_whitespace().collect();
    if groups.is_empty() {
        return None;
    }
    let trailing_space = inner.ends_with(|c: char| c.is_ascii_whitespace());
    if groups.len() < 2 && !trailing_space {
        return None;
    }
    groups
        .iter()
        .map(|g| {
            if g.len() == 2 {
                u8::from_str_radix(g, 16).ok()
            } else {
                None
            }
        })
        .collect()
}

/// Normalize one value token, encoding literal text with `encoding`.
pub fn strip_snmp_value_encoded(value: &str, encoding: CharacterEncoding) -> SnmpRawValue {
    let v = value.trim();
    if let Some(bytes) = quoted_inner(v).and_then(decode_hex_dump) {
        return bytes;
    }
    encoding.encode(v)
}

/// Normalize one value token as UTF-8.
pub fn strip_snmp_value(value: &str) -> SnmpRawValue {
    strip_snmp_value_encoded(value, CharacterEncoding::Utf8)
}

/// Marker some agents return in place of a value at the end of the MIB view.
pub const END_OF_MIB_VIEW: &[u8] = b"ENDOFMIBVIEW";

fn needs_hex_encoding(value: &[u8]) -> bool {
    value.iter().any(|c| *c < 32 || *c > 127)
}

/// Render a raw value for a stored walk file.
///
/// Printable ASCII is written as is, anything else as a quoted hex dump that
/// the normalizer decodes back to the same bytes.
pub fn to_stored_walk_text(value: &[u8]) -> String {
    if needs_hex_encoding(value) {
        let mut encoded = String::with_capacity(value.len() * 3 + 2);
        encoded.push('"');
        for c in value {
            let _ = write!(encoded, "{c:02X} ");
        }
        encoded.push('"');
        encoded
    } else {
        String::from_utf8_lossy(value).into_owned()
    }
}
