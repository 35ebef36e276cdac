//! Metadata documents stored next to the tiles.
//!
//! Layer metadata, parameter sets and the store marker are small
//! `key=value` documents. They are written in INI form without sections so
//! that they stay readable with any properties-style tooling.

use std::collections::BTreeMap;

use bytes::Bytes;
use ini::{EscapePolicy, Ini, ParseOption, WriteOption};
use sha2::{Digest, Sha256};

use crate::error::{StoreError, StoreResult};

/// Content type used when uploading metadata documents.
pub const PROPERTIES_CONTENT_TYPE: &str = "text/plain";

/// Flat string properties of one metadata document.
pub type Properties = BTreeMap<String, String>;

/// Serializes properties into a section-less INI document.
///
/// Values are written verbatim except for backslashes, line breaks and
/// whitespace at either end, which are escaped so that the document reads
/// back to exactly the same properties.
///
/// # Errors
///
/// Returns [`StoreError::Metadata`] if the document cannot be written.
pub fn encode_properties(key: &str, properties: &Properties) -> StoreResult<Bytes> {
    let mut ini = Ini::new();
    for (name, value) in properties {
        ini.with_section(None::<String>)
            .set(name.as_str(), escape_value(value));
    }

    let options = WriteOption {
        escape_policy: EscapePolicy::Nothing,
        ..WriteOption::default()
    };
    let mut buffer = Vec::new();
    ini.write_to_opt(&mut buffer, options)
        .map_err(|e| StoreError::Metadata {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
    Ok(Bytes::from(buffer))
}

/// Parses a metadata document previously written by [`encode_properties`].
///
/// # Errors
///
/// Returns [`StoreError::Metadata`] if the document is not valid UTF-8, not
/// valid INI or carries a malformed escape.
pub fn decode_properties(key: &str, data: &[u8]) -> StoreResult<Properties> {
    let invalid = |reason: String| StoreError::Metadata {
        key: key.to_string(),
        reason,
    };

    let text = std::str::from_utf8(data).map_err(|e| invalid(e.to_string()))?;
    // Quotes are data, escapes are ours
    let options = ParseOption {
        enabled_quote: false,
        enabled_escape: false,
        ..ParseOption::default()
    };
    let ini = Ini::load_from_str_opt(text, options).map_err(|e| invalid(e.to_string()))?;

    ini.general_section()
        .iter()
        .map(|(name, value)| -> StoreResult<(String, String)> {
            let value = unescape_value(value).map_err(&invalid)?;
            Ok((name.to_string(), value))
        })
        .collect()
}

fn escape_value(value: &str) -> String {
    let start = value.len() - value.trim_start().len();
    let end = value.trim_end().len();

    let mut escaped = String::with_capacity(value.len());
    for (index, c) in value.char_indices() {
        let at_edge = index < start || index >= end;
        match c {
            '\\' => escaped.push_str("\\\\"),
            '\n' | '\r' => escaped.push_str(&format!("\\u{{{:x}}}", c as u32)),
            c if at_edge && c.is_whitespace() => {
                escaped.push_str(&format!("\\u{{{:x}}}", c as u32))
            }
            c => escaped.push(c),
        }
    }
    escaped
}

fn unescape_value(value: &str) -> Result<String, String> {
    let mut unescaped = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            unescaped.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => unescaped.push('\\'),
            Some('u') => {
                if chars.next() != Some('{') {
                    return Err(format!("malformed escape in {:?}", value));
                }
                let hex: String = chars.by_ref().take_while(|&c| c != '}').collect();
                let decoded = u32::from_str_radix(&hex, 16)
                    .ok()
                    .and_then(char::from_u32)
                    .ok_or_else(|| format!("malformed escape in {:?}", value))?;
                unescaped.push(decoded);
            }
            _ => return Err(format!("malformed escape in {:?}", value)),
        }
    }
    Ok(unescaped)
}

/// Stable identifier of a parameter set.
///
/// The identifier is the lowercase hex SHA-256 of the sorted
/// `key=value` pairs joined with `&`. An empty set is the default parameter
/// set and has no identifier.
pub fn parameters_id(parameters: &BTreeMap<String, String>) -> Option<String> {
    if parameters.is_empty() {
        return None;
    }

    let kvp = parameters
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut hasher = Sha256::new();
    hasher.update(kvp.as_bytes());
    Some(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props(pairs: &[(&str, &str)]) -> Properties {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_encode_decode_properties() {
        let original = props(&[("STYLES", "population"), ("expires", "3600")]);
        let encoded = encode_properties("layer/metadata.properties", &original).unwrap();
        let decoded = decode_properties("layer/metadata.properties", &encoded).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_values_read_back_verbatim() {
        let original = props(&[
            ("CQL_FILTER", "type = 'road' AND name = \"Main St\""),
            ("STYLES", " night "),
            ("ENV", "\tcolor:red;path=C:\\tiles\\\n"),
            ("EMPTY", ""),
            ("COMMENTISH", "; not a comment # either"),
        ]);
        let encoded = encode_properties("parameters-x.properties", &original).unwrap();
        let decoded = decode_properties("parameters-x.properties", &encoded).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(parameters_id(&decoded), parameters_id(&original));
    }

    #[test]
    fn test_plain_values_are_written_unescaped() {
        let encoded = encode_properties("m", &props(&[("expires", "3600")])).unwrap();
        let text = std::str::from_utf8(&encoded).unwrap();
        assert!(text.contains("expires=3600"));
    }

    #[test]
    fn test_decode_rejects_malformed_escape() {
        let err = decode_properties("bad.properties", b"STYLES=\\q").unwrap_err();
        assert!(matches!(err, StoreError::Metadata { .. }));
    }

    #[test]
    fn test_decode_empty_document() {
        let decoded = decode_properties("metadata.properties", b"").unwrap();
        assert!(decoded.is_empty());
    }

    #[test]
    fn test_decode_invalid_utf8() {
        let err = decode_properties("bad.properties", &[0xff, 0xfe]).unwrap_err();
        assert!(matches!(err, StoreError::Metadata { .. }));
    }

    #[test]
    fn test_parameters_id_is_order_independent() {
        let a = props(&[("A", "1"), ("B", "2")]);
        let mut b = Properties::new();
        b.insert("B".to_string(), "2".to_string());
        b.insert("A".to_string(), "1".to_string());
        assert_eq!(parameters_id(&a), parameters_id(&b));
    }

    #[test]
    fn test_parameters_id_differs_by_value() {
        let a = props(&[("STYLES", "red")]);
        let b = props(&[("STYLES", "blue")]);
        assert_ne!(parameters_id(&a), parameters_id(&b));
        assert_eq!(parameters_id(&a).unwrap().len(), 64);
    }

    #[test]
    fn test_parameters_id_empty_is_none() {
        assert_eq!(parameters_id(&Properties::new()), None);
    }
}
