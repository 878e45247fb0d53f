//! Sentinel support: master resolution and a failover-aware pool.
//!
//! [`resolve_master`] asks each configured Sentinel, in order, where the
//! named master currently lives. [`SentinelPool`] composes that resolver
//! with a connection pool: the pool is built lazily against the resolved
//! master, and any command failing with an I/O error triggers exactly one
//! re-resolution and retry — the window in which a failover has promoted a
//! different node.

use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::core::client::Client;
use crate::core::config::RedisConfig;
use crate::core::pool::ConnectionPool;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Value;

/// Address and credentials of one Sentinel process.
#[derive(Debug, Clone)]
pub struct SentinelAddr {
    /// Sentinel hostname or IP address.
    pub host: String,
    /// Sentinel port.
    pub port: u16,
    /// ACL username for the Sentinel itself.
    pub username: Option<String>,
    /// Password for the Sentinel itself.
    pub password: Option<String>,
}

impl SentinelAddr {
    /// Creates an unauthenticated sentinel address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            username: None,
            password: None,
        }
    }
}

/// Settings for [`SentinelPool`].
#[derive(Debug, Clone)]
pub struct SentinelConfig {
    /// Name the master is monitored under.
    pub master_name: String,
    /// Sentinels to query, in order; first usable answer wins.
    pub sentinels: Vec<SentinelAddr>,
    /// Cap on TCP connection establishment to sentinels, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Cap on each sentinel read/write, in milliseconds.
    pub io_timeout_ms: u64,
    /// Template for master connections; host and port are overridden with
    /// the resolved address, everything else (db, credentials, timeouts)
    /// applies as-is.
    pub base_redis: RedisConfig,
    /// Connections kept to the master; 0 falls back to the minimum of 1.
    pub pool_size: usize,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            master_name: String::new(),
            sentinels: Vec::new(),
            connect_timeout_ms: 3000,
            io_timeout_ms: 3000,
            base_redis: RedisConfig::default(),
            pool_size: 4,
        }
    }
}

/// Resolves the current master address for `cfg.master_name`.
///
/// Each sentinel is tried in order over a throwaway connection with
/// `SENTINEL get-master-addr-by-name`. A usable reply is a two-element
/// array `[host, port-as-string]` with a port in `1..=65535`; malformed
/// replies and unreachable sentinels are skipped. When every sentinel
/// fails, the result is `Io "all sentinels failed"`.
pub async fn resolve_master(cfg: &SentinelConfig) -> Result<RedisConfig> {
    if cfg.sentinels.is_empty() {
        return Err(Error::io("no sentinels configured"));
    }

    for sentinel in &cfg.sentinels {
        let probe = Client::new(RedisConfig {
            host: sentinel.host.clone(),
            port: sentinel.port,
            db: 0,
            username: sentinel.username.clone(),
            password: sentinel.password.clone(),
            connect_timeout_ms: cfg.connect_timeout_ms,
            io_timeout_ms: cfg.io_timeout_ms,
        });
        if let Err(e) = probe.connect().await {
            warn!(host = %sentinel.host, port = sentinel.port, error = %e, "sentinel unreachable");
            continue;
        }

        let reply = match probe
            .command(
                "SENTINEL",
                &["get-master-addr-by-name", cfg.master_name.as_str()],
            )
            .await
        {
            Ok(reply) => reply,
            Err(e) => {
                warn!(host = %sentinel.host, port = sentinel.port, error = %e, "sentinel query failed");
                continue;
            }
        };

        let Some((host, port)) = parse_master_addr(&reply) else {
            warn!(host = %sentinel.host, port = sentinel.port, "sentinel reply malformed");
            continue;
        };

        info!(master = %cfg.master_name, %host, port, "master resolved");
        let mut master = cfg.base_redis.clone();
        master.host = host;
        master.port = port;
        return Ok(master);
    }

    Err(Error::io("all sentinels failed"))
}

/// Extracts `[host, port-as-string]` from a sentinel reply.
fn parse_master_addr(reply: &Value) -> Option<(String, u16)> {
    let parts = reply.as_array()?;
    if parts.len() < 2 {
        return None;
    }
    let host = parts[0].as_str()?.to_string();
    let port: u32 = parts[1].as_str()?.parse().ok()?;
    if port == 0 || port > 65535 {
        return None;
    }
    Some((host, port as u16))
}

struct SentinelState {
    pool: Option<ConnectionPool>,
}

/// A pool that follows the master through Sentinel failovers.
///
/// # Example
///
/// ```no_run
/// use shoal::{SentinelAddr, SentinelConfig, SentinelPool};
///
/// #[tokio::main]
/// async fn main() -> shoal::Result<()> {
///     let pool = SentinelPool::new(SentinelConfig {
///         master_name: "mymaster".to_string(),
///         sentinels: vec![SentinelAddr::new("127.0.0.1", 26379)],
///         ..Default::default()
///     });
///     pool.connect().await?;
///     let reply = pool.command("SET", &["k", "v"]).await?;
///     assert!(!reply.is_error());
///     Ok(())
/// }
/// ```
pub struct SentinelPool {
    cfg: SentinelConfig,
    state: Mutex<SentinelState>,
}

impl SentinelPool {
    /// Creates a pool; no I/O happens until `connect` or the first command.
    pub fn new(mut cfg: SentinelConfig) -> Self {
        if cfg.pool_size == 0 {
            cfg.pool_size = 1;
        }
        Self {
            cfg,
            state: Mutex::new(SentinelState { pool: None }),
        }
    }

    /// The settings this pool was built with.
    pub fn config(&self) -> &SentinelConfig {
        &self.cfg
    }

    /// Resolves the master and pre-warms the underlying pool.
    pub async fn connect(&self) -> Result<()> {
        let mut state = self.state.lock().await;
        self.ensure_connected_locked(&mut state).await?;
        Ok(())
    }

    /// Runs one command against the current master.
    ///
    /// An `Io` failure triggers exactly one re-resolution: the pool is
    /// rebuilt against whatever master Sentinel reports now and the command
    /// is retried once. If re-resolution itself fails, the *original* error
    /// is returned. Non-Io errors are never retried.
    pub async fn command<A: AsRef<[u8]>>(&self, cmd: &str, args: &[A]) -> Result<Value> {
        let pool = {
            let mut state = self.state.lock().await;
            self.ensure_connected_locked(&mut state).await?
        };

        let err = match pool.command(cmd, args).await {
            Ok(value) => return Ok(value),
            Err(e) => e,
        };
        if !err.is_io() {
            return Err(err);
        }

        warn!(cmd, error = %err, "io failure, re-resolving master");
        let pool = {
            let mut state = self.state.lock().await;
            state.pool = None;
            match self.ensure_connected_locked(&mut state).await {
                Ok(pool) => pool,
                Err(e) => {
                    warn!(error = %e, "re-resolution failed, keeping original error");
                    return Err(err);
                }
            }
        };
        pool.command(cmd, args).await
    }

    async fn ensure_connected_locked(
        &self,
        state: &mut SentinelState,
    ) -> Result<ConnectionPool> {
        if let Some(pool) = &state.pool {
            return Ok(pool.clone());
        }

        let master = resolve_master(&self.cfg).await?;
        info!(addr = %master.addr(), "connecting master pool");
        let pool = ConnectionPool::new(master, self.cfg.pool_size);
        pool.connect_all().await?;
        state.pool = Some(pool.clone());
        Ok(pool)
    }
}

impl std::fmt::Debug for SentinelPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SentinelPool")
            .field("master_name", &self.cfg.master_name)
            .field("sentinels", &self.cfg.sentinels.len())
            .finish()
    }
}
