//! Cluster support: slot-based routing with redirect handling.
//!
//! - **Slot math** — [`key_slot`] maps a key to one of 16384 hash slots,
//!   honoring `{...}` hash tags.
//! - **Discovery** — the client walks its seed list and builds a slot map
//!   from `CLUSTER SLOTS`; non-clustered servers are detected and served
//!   through the same API by mapping every slot to the single seed node.
//! - **Routing** — commands go to the pooled connection of the slot owner;
//!   `MOVED` updates the slot map and retries, `ASK` probes the migration
//!   target once without touching the map.

mod client;
mod redirect;
mod slot;

pub use client::ClusterClient;
pub use slot::{key_slot, SLOT_COUNT};
