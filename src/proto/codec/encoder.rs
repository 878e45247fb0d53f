use bytes::{BufMut, BytesMut};

use crate::proto::frame::Value;

/// Encodes a command and its arguments as a RESP multi-bulk array.
///
/// The command name is the first bulk string, followed by one bulk string
/// per argument. Arguments are raw bytes; embedded CR/LF is legal because
/// every element is length-prefixed.
///
/// # Example
///
/// ```
/// use shoal::proto::codec::encode_command;
///
/// let frame = encode_command("SET", &["key", "value"]);
/// assert_eq!(&frame[..], b"*3\r\n$3\r\nSET\r\n$3\r\nkey\r\n$5\r\nvalue\r\n");
/// ```
pub fn encode_command<A: AsRef<[u8]>>(cmd: &str, args: &[A]) -> BytesMut {
    let mut buf = BytesMut::with_capacity(64);
    put_header(&mut buf, b'*', (args.len() + 1) as i64);
    put_bulk(&mut buf, cmd.as_bytes());
    for arg in args {
        put_bulk(&mut buf, arg.as_ref());
    }
    buf
}

fn put_header(buf: &mut BytesMut, tag: u8, n: i64) {
    buf.put_u8(tag);
    buf.extend_from_slice(n.to_string().as_bytes());
    buf.extend_from_slice(b"\r\n");
}

fn put_bulk(buf: &mut BytesMut, data: &[u8]) {
    put_header(buf, b'$', data.len() as i64);
    buf.extend_from_slice(data);
    buf.extend_from_slice(b"\r\n");
}

/// A RESP encoder that serializes [`Value`]s into an internal buffer.
///
/// Used by mock servers in the test suite to script replies; the client's
/// request path goes through [`encode_command`] directly.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    /// Creates a new encoder with an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the wire form of `value` to the internal buffer.
    pub fn encode(&mut self, value: &Value) {
        match value {
            Value::Null => self.buf.extend_from_slice(b"$-1\r\n"),
            Value::Simple(s) => {
                self.buf.put_u8(b'+');
                self.buf.extend_from_slice(s.as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            Value::Error(e) => {
                self.buf.put_u8(b'-');
                self.buf.extend_from_slice(e.as_bytes());
                self.buf.extend_from_slice(b"\r\n");
            }
            Value::Integer(n) => put_header(&mut self.buf, b':', *n),
            Value::Bulk(data) => put_bulk(&mut self.buf, data),
            Value::Array(items) => {
                put_header(&mut self.buf, b'*', items.len() as i64);
                for item in items {
                    self.encode(item);
                }
            }
        }
    }

    /// Takes the encoded bytes, leaving the buffer empty for reuse.
    pub fn take(&mut self) -> BytesMut {
        std::mem::take(&mut self.buf)
    }
}
