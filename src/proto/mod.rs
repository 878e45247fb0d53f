//! RESP (Redis Serialization Protocol) support.
//!
//! - [`frame`] — the tagged value tree exchanged over the wire
//! - [`codec`] — command encoding and the streaming reply decoder
//! - [`error`] — the crate-wide error type

pub mod codec;
pub mod error;
pub mod frame;
