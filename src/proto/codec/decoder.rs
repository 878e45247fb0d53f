use bytes::{Buf, Bytes, BytesMut};

use crate::proto::error::{Error, Result};
use crate::proto::frame::Value;

const DEFAULT_MAX_FRAME_SIZE: usize = 512 * 1024 * 1024; // 512 MB default

/// A streaming RESP decoder.
///
/// Bytes arrive through [`feed`](Decoder::feed); [`next`](Decoder::next)
/// yields one complete top-level [`Value`] per call, or `Ok(None)` when the
/// buffered input does not yet hold a whole frame. A frame is only consumed
/// from the buffer once it is complete, so the decoder is resumable at any
/// byte boundary — including mid-length-prefix and mid-array.
///
/// Declared lengths are checked against a maximum frame size, so a
/// malformed or hostile `$`/`*` header fails fast as a protocol error
/// instead of making the decoder buffer input indefinitely.
///
/// # Example
///
/// ```
/// use shoal::proto::codec::Decoder;
/// use shoal::Value;
///
/// let mut decoder = Decoder::new();
/// decoder.feed(b"+OK\r");
/// assert_eq!(decoder.next().unwrap(), None);
/// decoder.feed(b"\n");
/// assert_eq!(decoder.next().unwrap(), Some(Value::Simple("OK".into())));
/// ```
#[derive(Debug)]
pub struct Decoder {
    buf: BytesMut,
    max_frame_size: usize,
}

impl Decoder {
    /// Creates a new decoder with an empty buffer.
    pub fn new() -> Self {
        Self::with_max_frame_size(DEFAULT_MAX_FRAME_SIZE)
    }

    /// Creates a new decoder with a custom maximum frame size.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            buf: BytesMut::new(),
            max_frame_size,
        }
    }

    /// Appends raw bytes from the transport; never blocks.
    ///
    /// Size limits are checked during [`next`](Decoder::next), not here, so
    /// large frames can stream in incrementally.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Decodes one complete value, if present.
    ///
    /// Repeated calls return successive messages. Malformed input is a
    /// [`Protocol`](Error::Protocol) error; once that happens the stream
    /// can no longer be trusted and the connection should be discarded.
    pub fn next(&mut self) -> Result<Option<Value>> {
        if self.buf.len() > self.max_frame_size {
            return Err(Error::protocol("buffer exceeds maximum frame size"));
        }
        match parse_value(&self.buf, 0, self.max_frame_size)? {
            Some((value, end)) => {
                self.buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parses one value starting at `pos`.
///
/// Returns the value and the offset just past its final byte, or `None`
/// when the buffer ends before the value does. Nothing is consumed here;
/// the caller commits the advance only for complete frames.
fn parse_value(buf: &[u8], pos: usize, max: usize) -> Result<Option<(Value, usize)>> {
    let Some(&tag) = buf.get(pos) else {
        return Ok(None);
    };
    match tag {
        b'+' => Ok(parse_line(buf, pos + 1).map(|(line, end)| (Value::Simple(line), end))),
        b'-' => Ok(parse_line(buf, pos + 1).map(|(line, end)| (Value::Error(line), end))),
        b':' => Ok(parse_number(buf, pos + 1, "integer")?
            .map(|(n, end)| (Value::Integer(n), end))),
        b'$' => parse_bulk(buf, pos + 1, max),
        b'*' => parse_array(buf, pos + 1, max),
        other => Err(Error::protocol(format!(
            "unknown frame tag: {:?}",
            other as char
        ))),
    }
}

fn parse_bulk(buf: &[u8], pos: usize, max: usize) -> Result<Option<(Value, usize)>> {
    let Some((len, data_start)) = parse_number(buf, pos, "bulk length")? else {
        return Ok(None);
    };
    if len == -1 {
        return Ok(Some((Value::Null, data_start)));
    }
    if len < 0 {
        return Err(Error::protocol(format!("invalid bulk length: {len}")));
    }
    let len = len as usize;
    if len > max {
        return Err(Error::protocol(
            "bulk string length exceeds maximum frame size",
        ));
    }
    let end = data_start + len + 2;
    if buf.len() < end {
        return Ok(None);
    }
    if &buf[data_start + len..end] != b"\r\n" {
        return Err(Error::protocol("bulk string missing CRLF terminator"));
    }
    let data = Bytes::copy_from_slice(&buf[data_start..data_start + len]);
    Ok(Some((Value::Bulk(data), end)))
}

fn parse_array(buf: &[u8], pos: usize, max: usize) -> Result<Option<(Value, usize)>> {
    let Some((len, mut cursor)) = parse_number(buf, pos, "array length")? else {
        return Ok(None);
    };
    if len == -1 {
        return Ok(Some((Value::Null, cursor)));
    }
    if len < 0 {
        return Err(Error::protocol(format!("invalid array length: {len}")));
    }
    // every element is at least 4 bytes on the wire
    if len as usize > max / 4 {
        return Err(Error::protocol("array length exceeds maximum frame size"));
    }
    let mut items = Vec::new();
    for _ in 0..len {
        match parse_value(buf, cursor, max)? {
            Some((item, next)) => {
                items.push(item);
                cursor = next;
            }
            None => return Ok(None),
        }
    }
    Ok(Some((Value::Array(items), cursor)))
}

/// Reads a line up to CRLF, lossily decoded as UTF-8.
fn parse_line(buf: &[u8], from: usize) -> Option<(String, usize)> {
    let cr = find_crlf(buf, from)?;
    Some((String::from_utf8_lossy(&buf[from..cr]).into_owned(), cr + 2))
}

/// Reads a signed decimal line up to CRLF.
fn parse_number(buf: &[u8], from: usize, what: &str) -> Result<Option<(i64, usize)>> {
    let Some(cr) = find_crlf(buf, from) else {
        return Ok(None);
    };
    let line = &buf[from..cr];
    let n = std::str::from_utf8(line)
        .ok()
        .and_then(|s| s.parse::<i64>().ok())
        .ok_or_else(|| {
            Error::protocol(format!(
                "invalid {what}: {:?}",
                String::from_utf8_lossy(line)
            ))
        })?;
    Ok(Some((n, cr + 2)))
}

fn find_crlf(buf: &[u8], from: usize) -> Option<usize> {
    buf.get(from..)?
        .windows(2)
        .position(|w| w == b"\r\n")
        .map(|i| from + i)
}
