//! Reply shaping for the typed command surface.
//!
//! Each helper validates the RESP shape a command is expected to produce and
//! maps mismatches to `Protocol` errors tagged with the operation name.
//! Bulk-string nulls become `None`; `Null` replies for hash, set, and list
//! commands collapse to empty collections.

use std::collections::HashMap;

use bytes::Bytes;

use crate::proto::error::{Error, Result};
use crate::proto::frame::Value;

pub(crate) fn optional_bytes(value: Value, op: &str) -> Result<Option<Bytes>> {
    match value {
        Value::Null => Ok(None),
        Value::Bulk(data) => Ok(Some(data)),
        Value::Simple(text) => Ok(Some(Bytes::from(text))),
        _ => Err(unexpected(op)),
    }
}

pub(crate) fn integer(value: Value, op: &str) -> Result<i64> {
    value.as_integer().ok_or_else(|| unexpected(op))
}

pub(crate) fn string_map(value: Value, op: &str) -> Result<HashMap<String, Bytes>> {
    let items = match value {
        Value::Null => return Ok(HashMap::new()),
        Value::Array(items) => items,
        _ => return Err(unexpected(op)),
    };
    if items.len() % 2 != 0 {
        return Err(Error::protocol(format!("{op}: odd array size")));
    }
    let mut out = HashMap::with_capacity(items.len() / 2);
    for pair in items.chunks_exact(2) {
        let (Some(field), Some(data)) = (pair[0].as_str(), pair[1].as_bytes()) else {
            continue;
        };
        out.insert(field.to_string(), Bytes::copy_from_slice(data));
    }
    Ok(out)
}

pub(crate) fn bytes_vec(value: Value, op: &str) -> Result<Vec<Bytes>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(unexpected(op)),
    };
    Ok(items
        .iter()
        .filter_map(|v| v.as_bytes().map(Bytes::copy_from_slice))
        .collect())
}

pub(crate) fn scored_pairs(value: Value, op: &str) -> Result<Vec<(Bytes, f64)>> {
    let items = match value {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        _ => return Err(unexpected(op)),
    };
    if items.len() % 2 != 0 {
        return Err(Error::protocol(format!("{op}: odd array size")));
    }
    let mut out = Vec::with_capacity(items.len() / 2);
    for pair in items.chunks_exact(2) {
        let (Some(member), Some(score)) = (pair[0].as_bytes(), pair[1].as_str()) else {
            continue;
        };
        let score: f64 = score
            .parse()
            .map_err(|_| Error::protocol(format!("{op}: invalid score")))?;
        out.push((Bytes::copy_from_slice(member), score));
    }
    Ok(out)
}

fn unexpected(op: &str) -> Error {
    Error::protocol(format!("{op}: unexpected type"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optional_bytes() {
        assert_eq!(optional_bytes(Value::Null, "GET").unwrap(), None);
        assert_eq!(
            optional_bytes(Value::Bulk(Bytes::from_static(b"v")), "GET").unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        let err = optional_bytes(Value::Integer(1), "GET").unwrap_err();
        assert_eq!(err.message(), "GET: unexpected type");
    }

    #[test]
    fn test_integer() {
        assert_eq!(integer(Value::Integer(3), "DEL").unwrap(), 3);
        assert!(integer(Value::Simple("3".into()), "DEL").is_err());
    }

    #[test]
    fn test_string_map_null_collapses() {
        assert!(string_map(Value::Null, "HGETALL").unwrap().is_empty());
    }

    #[test]
    fn test_string_map_odd_size() {
        let v = Value::Array(vec![Value::Bulk(Bytes::from_static(b"f"))]);
        let err = string_map(v, "HGETALL").unwrap_err();
        assert_eq!(err.message(), "HGETALL: odd array size");
    }

    #[test]
    fn test_bytes_vec_null_collapses() {
        assert!(bytes_vec(Value::Null, "SMEMBERS").unwrap().is_empty());
        assert!(bytes_vec(Value::Integer(0), "SMEMBERS").is_err());
    }

    #[test]
    fn test_scored_pairs() {
        let v = Value::Array(vec![
            Value::Bulk(Bytes::from_static(b"a")),
            Value::Bulk(Bytes::from_static(b"1.5")),
        ]);
        let pairs = scored_pairs(v, "ZRANGE").unwrap();
        assert_eq!(pairs, vec![(Bytes::from_static(b"a"), 1.5)]);
    }

    #[test]
    fn test_scored_pairs_bad_score() {
        let v = Value::Array(vec![
            Value::Bulk(Bytes::from_static(b"a")),
            Value::Bulk(Bytes::from_static(b"nope")),
        ]);
        let err = scored_pairs(v, "ZRANGE").unwrap_err();
        assert_eq!(err.message(), "ZRANGE: invalid score");
    }
}
