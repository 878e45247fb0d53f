//! Core connection handling.
//!
//! - [`config`] — connection and cluster configuration
//! - [`client`] — the single-node client: one TCP stream, one in-flight
//!   command at a time
//! - [`pool`] — bounded per-node pool of reusable clients

pub mod client;
pub mod config;
pub mod pool;
pub(crate) mod response;

pub use client::Client;
