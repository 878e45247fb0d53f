//! Wire-format properties of the codec, exercised through the public API.

use bytes::Bytes;
use shoal::proto::codec::{encode_command, Decoder};
use shoal::Value;

/// Deterministic byte-sequence generator; arbitrary content including CR,
/// LF, NUL, and high bytes.
struct ByteGen(u64);

impl ByteGen {
    fn next_byte(&mut self) -> u8 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 33) as u8
    }

    fn next_arg(&mut self, max_len: usize) -> Vec<u8> {
        let len = (self.next_byte() as usize) % (max_len + 1);
        (0..len).map(|_| self.next_byte()).collect()
    }
}

/// Encoding then parsing a command yields an array of bulk strings equal to
/// `[cmd, args...]`, for arbitrary argument bytes.
#[test]
fn encode_round_trip_arbitrary_args() {
    let mut generator = ByteGen(0x5eed);

    for case in 0..200 {
        let argc = case % 5;
        let args: Vec<Vec<u8>> = (0..argc).map(|_| generator.next_arg(40)).collect();

        let frame = encode_command("DISPATCH", &args);
        let mut decoder = Decoder::new();
        decoder.feed(&frame);
        let decoded = decoder.next().unwrap().expect("complete frame");
        assert_eq!(decoder.next().unwrap(), None, "nothing left over");

        let items = decoded.as_array().expect("commands are arrays");
        assert_eq!(items.len(), args.len() + 1);
        assert_eq!(items[0], Value::Bulk(Bytes::from_static(b"DISPATCH")));
        for (item, arg) in items[1..].iter().zip(&args) {
            assert_eq!(item, &Value::Bulk(Bytes::copy_from_slice(arg)));
        }
    }
}

/// Feeding a frame stream in arbitrarily-sized pieces yields the same
/// values as feeding it whole.
#[test]
fn parser_is_split_invariant() {
    let mut stream = Vec::new();
    let mut generator = ByteGen(0xfeed);
    for _ in 0..10 {
        let args: Vec<Vec<u8>> = (0..3).map(|_| generator.next_arg(25)).collect();
        stream.extend_from_slice(&encode_command("MSET", &args));
    }
    stream.extend_from_slice(b"+OK\r\n:-42\r\n$-1\r\n*-1\r\n");

    let mut whole = Decoder::new();
    whole.feed(&stream);
    let mut expected = Vec::new();
    while let Some(v) = whole.next().unwrap() {
        expected.push(v);
    }
    assert_eq!(expected.len(), 14);

    for chunk_size in [1, 2, 3, 7, 16, 61] {
        let mut decoder = Decoder::new();
        let mut got = Vec::new();
        for piece in stream.chunks(chunk_size) {
            decoder.feed(piece);
            while let Some(v) = decoder.next().unwrap() {
                got.push(v);
            }
        }
        assert_eq!(got, expected, "chunk size {chunk_size}");
    }
}
