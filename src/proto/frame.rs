//! The RESP value tree.

use std::collections::HashMap;

use bytes::Bytes;

/// A RESP value as decoded from the wire.
///
/// Bulk strings keep their raw bytes ([`Bytes`]) so binary payloads survive
/// round-trips; simple strings and error lines are UTF-8 text by protocol.
/// Both `$-1` (null bulk) and `*-1` (null array) decode to [`Value::Null`].
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value (`$-1` or `*-1`).
    Null,
    /// Simple string (`+OK`).
    Simple(String),
    /// Error line (`-ERR ...`).
    Error(String),
    /// Signed 64-bit integer (`:1000`).
    Integer(i64),
    /// Binary-safe bulk string (`$6\r\nfoobar`).
    Bulk(Bytes),
    /// Array of nested values (`*2\r\n...`).
    Array(Vec<Value>),
}

impl Value {
    /// Returns true if this value is `Null`.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Returns true if this value is an error reply.
    pub fn is_error(&self) -> bool {
        matches!(self, Value::Error(_))
    }

    /// Returns true for either string form (simple or bulk).
    pub fn is_string(&self) -> bool {
        matches!(self, Value::Simple(_) | Value::Bulk(_))
    }

    /// The raw bytes of a simple or bulk string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Simple(s) => Some(s.as_bytes()),
            Value::Bulk(b) => Some(b),
            _ => None,
        }
    }

    /// The value as UTF-8 text, if it is a string form and valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Simple(s) => Some(s),
            Value::Bulk(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    /// The integer payload, if this is an integer reply.
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The array elements, if this is an array reply.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// `None` for `Null`, the text for string forms, `None` otherwise.
    pub fn as_optional_string(&self) -> Option<String> {
        match self {
            Value::Simple(s) => Some(s.clone()),
            Value::Bulk(b) => Some(String::from_utf8_lossy(b).into_owned()),
            _ => None,
        }
    }

    /// An integer, accepting both integer replies and numeric strings.
    pub fn as_optional_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            Value::Simple(_) | Value::Bulk(_) => self.as_str()?.parse().ok(),
            _ => None,
        }
    }

    /// Interprets a flat `[field, value, field, value, ...]` array as a map.
    ///
    /// Returns an empty map for `Null` and for odd-length arrays; entries
    /// whose field or value is not a string form are skipped.
    pub fn as_string_map(&self) -> HashMap<String, Bytes> {
        let mut out = HashMap::new();
        let Some(items) = self.as_array() else {
            return out;
        };
        if items.len() % 2 != 0 {
            return out;
        }
        for pair in items.chunks_exact(2) {
            let (Some(field), Some(value)) = (pair[0].as_str(), pair[1].as_bytes()) else {
                continue;
            };
            out.insert(field.to_string(), Bytes::copy_from_slice(value));
        }
        out
    }

    /// Collects the string-form elements of an array reply.
    pub fn as_bytes_vec(&self) -> Vec<Bytes> {
        let Some(items) = self.as_array() else {
            return Vec::new();
        };
        items
            .iter()
            .filter_map(|v| v.as_bytes().map(Bytes::copy_from_slice))
            .collect()
    }
}
