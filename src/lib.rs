//! # Shoal
//!
//! Asynchronous client for Redis-compatible key-value stores, covering the
//! three common deployment topologies:
//!
//! - **Standalone** — [`Client`]: one node, one connection per client.
//! - **Sentinel** — [`SentinelPool`]: master resolution through Sentinel,
//!   with automatic re-resolution after failover.
//! - **Cluster** — [`ClusterClient`]: slot-based routing over `CLUSTER SLOTS`
//!   discovery, MOVED/ASK redirect handling, and a bounded connection pool
//!   per node. Non-clustered servers are served transparently through the
//!   same API.
//!
//! ## Example
//!
//! ```no_run
//! use shoal::{ClusterClient, ClusterConfig, SeedAddr};
//!
//! #[tokio::main]
//! async fn main() -> shoal::Result<()> {
//!     let client = ClusterClient::new(ClusterConfig {
//!         seeds: vec![SeedAddr::new("127.0.0.1", 7000)],
//!         ..Default::default()
//!     });
//!     client.connect().await?;
//!     client.set("user:42", "Kirill".into()).await?;
//!     let value = client.get("user:42").await?;
//!     assert_eq!(value.as_deref(), Some(&b"Kirill"[..]));
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]

pub mod cluster;
pub mod core;
pub mod proto;
pub mod sentinel;

pub use crate::cluster::{key_slot, ClusterClient};
pub use crate::core::config::{ClusterConfig, RedisConfig, SeedAddr};
pub use crate::core::pool::{ConnectionPool, PooledClient};
pub use crate::core::Client;
pub use crate::proto::error::{Error, Result};
pub use crate::proto::frame::Value;
pub use crate::sentinel::{SentinelAddr, SentinelConfig, SentinelPool};
