//! Connection and cluster configuration.

use std::time::Duration;

/// Connection settings for a single Redis-compatible node.
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Server hostname or IP address.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Logical database selected after connecting (`SELECT` is skipped for 0).
    pub db: u32,
    /// ACL username; when set, AUTH is sent in its two-argument form.
    pub username: Option<String>,
    /// Password; when absent, AUTH is skipped entirely.
    pub password: Option<String>,
    /// Cap on TCP connection establishment, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Cap on each read/write operation, in milliseconds.
    pub io_timeout_ms: u64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            username: None,
            password: None,
            connect_timeout_ms: 5000,
            io_timeout_ms: 5000,
        }
    }
}

impl RedisConfig {
    /// Trims surrounding whitespace from credentials, once, at construction.
    ///
    /// A password that is only whitespace becomes the empty string and is
    /// still sent to the server.
    pub(crate) fn normalized(mut self) -> Self {
        normalize_credential(&mut self.username);
        normalize_credential(&mut self.password);
        self
    }

    pub(crate) fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub(crate) fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub(crate) fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

fn normalize_credential(credential: &mut Option<String>) {
    if let Some(value) = credential {
        let trimmed = value.trim();
        if trimmed.len() != value.len() {
            *value = trimmed.to_string();
        }
    }
}

/// A cluster bootstrap address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeedAddr {
    /// Node hostname or IP address.
    pub host: String,
    /// Node port.
    pub port: u16,
}

impl SeedAddr {
    /// Creates a seed address.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Settings for [`ClusterClient`](crate::ClusterClient).
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    /// Bootstrap addresses; discovery walks them in order. Must be non-empty.
    pub seeds: Vec<SeedAddr>,
    /// ACL username applied to every node connection.
    pub username: Option<String>,
    /// Password applied to every node connection.
    pub password: Option<String>,
    /// Cap on TCP connection establishment, in milliseconds.
    pub connect_timeout_ms: u64,
    /// Cap on each read/write operation, in milliseconds.
    pub io_timeout_ms: u64,
    /// MOVED + ASK retry budget per command; 0 falls back to the default of 5.
    pub max_redirections: u32,
    /// Per-node pool cap; 0 falls back to the minimum of 1.
    pub max_connections_per_node: usize,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            username: None,
            password: None,
            connect_timeout_ms: 5000,
            io_timeout_ms: 5000,
            max_redirections: 5,
            max_connections_per_node: 4,
        }
    }
}

impl ClusterConfig {
    /// The per-node connection settings for a cluster member.
    pub(crate) fn node_config(&self, host: &str, port: u16) -> RedisConfig {
        RedisConfig {
            host: host.to_string(),
            port,
            db: 0,
            username: self.username.clone(),
            password: self.password.clone(),
            connect_timeout_ms: self.connect_timeout_ms,
            io_timeout_ms: self.io_timeout_ms,
        }
    }
}
