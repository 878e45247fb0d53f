//! Streaming RESP codec.
//!
//! [`encode_command`] builds the multi-bulk request frame for a command and
//! its arguments; [`Decoder`] turns incoming bytes back into [`Value`]s
//! incrementally, resumable at any byte boundary. [`Encoder`] serializes
//! arbitrary values and is what test servers answer with.
//!
//! [`Value`]: crate::proto::frame::Value

mod decoder;
mod encoder;

pub use decoder::Decoder;
pub use encoder::{encode_command, Encoder};
