use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, info, warn};

use crate::cluster::redirect::{parse_redirection, Redirection};
use crate::cluster::slot::{key_slot, SLOT_COUNT};
use crate::core::client::Client;
use crate::core::config::{ClusterConfig, RedisConfig, SeedAddr};
use crate::core::pool::ConnectionPool;
use crate::core::response;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Value;

/// Error-text marker for servers running without cluster support.
const CLUSTER_DISABLED_MARKER: &str = "cluster support disabled";

/// One cluster member.
///
/// Data-plane traffic borrows connections from `pool`; `main_client` is a
/// single long-lived control-plane connection used for discovery probes and
/// ASK redirects, dialed lazily. Nodes are addressed by their stable index
/// in the router's node table.
struct Node {
    cfg: RedisConfig,
    pool: ConnectionPool,
    main_client: Mutex<Option<Arc<Client>>>,
}

struct RouterState {
    nodes: Vec<Arc<Node>>,
    /// Dense slot table; -1 means "unknown, consult discovery".
    slot_to_node: Vec<i32>,
}

enum InitState {
    Idle,
    Running,
    Done(Result<()>),
}

/// A cluster client with slot-based routing.
///
/// `connect` discovers the topology once via `CLUSTER SLOTS`, walking the
/// seed list in order; concurrent callers share a single discovery pass and
/// all observe its cached result. Commands are routed by the slot of their
/// first argument to a pooled connection of the owning node; `MOVED` replies
/// rewrite the slot map and retry, `ASK` replies probe the migration target
/// once. Servers with cluster support disabled are handled transparently by
/// mapping every slot to the seed node.
///
/// # Example
///
/// ```no_run
/// use shoal::{ClusterClient, ClusterConfig, SeedAddr};
///
/// #[tokio::main]
/// async fn main() -> shoal::Result<()> {
///     let client = ClusterClient::new(ClusterConfig {
///         seeds: vec![
///             SeedAddr::new("127.0.0.1", 7000),
///             SeedAddr::new("127.0.0.1", 7001),
///         ],
///         ..Default::default()
///     });
///     client.connect().await?;
///     let _ = client.incrby("visits", 1).await?;
///     Ok(())
/// }
/// ```
pub struct ClusterClient {
    cfg: ClusterConfig,
    state: Mutex<RouterState>,
    init: Mutex<InitState>,
    init_event: Notify,
}

impl ClusterClient {
    /// Creates a client for the given seeds; no I/O happens until
    /// [`connect`](ClusterClient::connect) or the first command.
    ///
    /// `max_redirections == 0` falls back to 5 and
    /// `max_connections_per_node == 0` to 1.
    pub fn new(mut cfg: ClusterConfig) -> Self {
        if cfg.max_redirections == 0 {
            cfg.max_redirections = 5;
        }
        if cfg.max_connections_per_node == 0 {
            cfg.max_connections_per_node = 1;
        }
        Self {
            cfg,
            state: Mutex::new(RouterState {
                nodes: Vec::new(),
                slot_to_node: vec![-1; SLOT_COUNT as usize],
            }),
            init: Mutex::new(InitState::Idle),
            init_event: Notify::new(),
        }
    }

    /// Runs topology discovery, exactly once across all concurrent callers.
    ///
    /// The outcome — success or failure — is cached; later callers observe
    /// it without triggering another discovery. A failed bootstrap is only
    /// retried by building a new client.
    pub async fn connect(&self) -> Result<()> {
        self.ensure_init().await
    }

    /// Sends `cmd` to the node owning the slot of the first argument.
    ///
    /// Commands without arguments (or with an empty first argument) go to an
    /// arbitrary node. Redirections are consumed transparently up to the
    /// configured budget; exhausting it yields
    /// `Protocol "too many redirections"`. Transport errors poison the
    /// borrowed connection and surface unchanged.
    pub async fn command<A: AsRef<[u8]>>(&self, cmd: &str, args: &[A]) -> Result<Value> {
        self.ensure_init().await?;

        let key: Option<Vec<u8>> = args
            .first()
            .map(|a| a.as_ref().to_vec())
            .filter(|k| !k.is_empty());

        let mut attempts = 0;
        while attempts < self.cfg.max_redirections {
            let pool = match &key {
                Some(key) => self.pool_for_slot(key_slot(key)).await?,
                None => self.any_pool().await?,
            };

            let pooled = pool.checkout().await?;
            let err = match pooled.client().command(cmd, args).await {
                Ok(value) => {
                    pooled.release(false);
                    return Ok(value);
                }
                Err(e) if !e.is_server_reply() => {
                    pooled.release(true);
                    return Err(e);
                }
                Err(e) => {
                    pooled.release(false);
                    e
                }
            };

            let Some(redirection) = parse_redirection(err.message()) else {
                return Err(err);
            };

            match redirection {
                Redirection::Moved {
                    slot,
                    ref host,
                    port,
                } => {
                    debug!(slot, %host, port, attempt = attempts + 1, "MOVED redirect");
                    self.apply_moved(slot, host, port).await;
                    attempts += 1;
                }
                Redirection::Ask {
                    slot,
                    ref host,
                    port,
                } => {
                    debug!(slot, %host, port, attempt = attempts + 1, "ASK redirect");
                    let target = self.main_client_for_node(host, port).await?;
                    // one-shot flag on the target; its reply is discarded
                    let _ = target.command("ASKING", &[] as &[&str]).await;
                    match target.command(cmd, args).await {
                        Ok(value) => return Ok(value),
                        Err(e2) => match parse_redirection(e2.message()) {
                            Some(Redirection::Moved {
                                slot,
                                ref host,
                                port,
                            }) => {
                                self.apply_moved(slot, host, port).await;
                                attempts += 1;
                            }
                            _ => return Err(e2),
                        },
                    }
                }
            }
        }

        Err(Error::protocol("too many redirections"))
    }

    /// The main-client handle of the node owning `key`'s slot.
    ///
    /// Empty keys resolve to an arbitrary node.
    pub async fn get_client_for_key(&self, key: &[u8]) -> Result<Arc<Client>> {
        self.ensure_init().await?;
        if key.is_empty() {
            return self.get_any_client().await;
        }
        self.get_client_for_slot(key_slot(key)).await
    }

    /// The main-client handle of the node owning `slot` (0..=16383).
    pub async fn get_client_for_slot(&self, slot: u16) -> Result<Arc<Client>> {
        self.ensure_init().await?;
        if slot >= SLOT_COUNT {
            return Err(Error::protocol("invalid slot"));
        }
        let (host, port) = {
            let state = self.state.lock().await;
            if state.nodes.is_empty() {
                return Err(Error::protocol("no nodes discovered"));
            }
            let index = state.slot_to_node[slot as usize];
            if index < 0 || index as usize >= state.nodes.len() {
                return Err(Error::protocol("slot mapping is empty"));
            }
            let node = &state.nodes[index as usize];
            (node.cfg.host.clone(), node.cfg.port)
        };
        self.main_client_for_node(&host, port).await
    }

    /// A main-client handle to some node of the cluster.
    pub async fn get_any_client(&self) -> Result<Arc<Client>> {
        self.ensure_init().await?;
        let (host, port) = {
            let state = self.state.lock().await;
            match state.nodes.first() {
                Some(node) => (node.cfg.host.clone(), node.cfg.port),
                None => return Err(Error::protocol("no nodes discovered")),
            }
        };
        self.main_client_for_node(&host, port).await
    }

    /// Number of known nodes, masters and replicas alike.
    pub async fn node_count(&self) -> usize {
        self.state.lock().await.nodes.len()
    }

    /// The `host:port` of the node currently mapped to `slot`, if any.
    pub async fn node_for_slot(&self, slot: u16) -> Option<String> {
        if slot >= SLOT_COUNT {
            return None;
        }
        let state = self.state.lock().await;
        let index = state.slot_to_node[slot as usize];
        state
            .nodes
            .get(usize::try_from(index).ok()?)
            .map(|n| n.cfg.addr())
    }

    async fn ensure_init(&self) -> Result<()> {
        loop {
            // register for completion before inspecting the flags, so a
            // signal between the check and the await cannot be missed
            let completed = self.init_event.notified();
            let run_discovery = {
                let mut init = self.init.lock().await;
                match &*init {
                    InitState::Done(result) => return result.clone(),
                    InitState::Running => false,
                    InitState::Idle => {
                        *init = InitState::Running;
                        true
                    }
                }
            };
            if run_discovery {
                let result = self.initial_discovery().await;
                *self.init.lock().await = InitState::Done(result.clone());
                self.init_event.notify_waiters();
                return result;
            }
            completed.await;
        }
    }

    async fn initial_discovery(&self) -> Result<()> {
        if self.cfg.seeds.is_empty() {
            return Err(Error::protocol("seeds list is empty"));
        }

        for seed in &self.cfg.seeds {
            let probe = Client::new(self.cfg.node_config(&seed.host, seed.port));
            if let Err(e) = probe.connect().await {
                warn!(host = %seed.host, port = seed.port, error = %e, "seed connect failed");
                continue;
            }

            match probe.command("CLUSTER", &["SLOTS"]).await {
                Ok(reply) => match self.install_slot_map(seed, &reply).await {
                    Ok(nodes) => {
                        info!(
                            host = %seed.host,
                            port = seed.port,
                            nodes = nodes.len(),
                            "slot map installed"
                        );
                        self.prewarm(&nodes).await;
                        return Ok(());
                    }
                    Err(e) => {
                        warn!(host = %seed.host, port = seed.port, error = %e, "CLUSTER SLOTS reply rejected");
                        continue;
                    }
                },
                Err(e) if e.is_server_reply() && e.message().contains(CLUSTER_DISABLED_MARKER) => {
                    info!(host = %seed.host, port = seed.port, "standalone-mode fallback");
                    let nodes = self.install_standalone().await;
                    self.prewarm(&nodes).await;
                    return Ok(());
                }
                Err(e) => {
                    warn!(host = %seed.host, port = seed.port, error = %e, "CLUSTER SLOTS failed");
                    continue;
                }
            }
        }

        Err(Error::io("CLUSTER SLOTS failed on all seeds"))
    }

    /// Rebuilds the node table and slot map from a `CLUSTER SLOTS` reply.
    ///
    /// Each range is `[start, end, master, replica...]`; malformed ranges
    /// are skipped. Replica endpoints are registered as nodes but own no
    /// slots. Returns the nodes for pre-warming.
    async fn install_slot_map(&self, seed: &SeedAddr, reply: &Value) -> Result<Vec<Arc<Node>>> {
        let ranges = reply
            .as_array()
            .ok_or_else(|| Error::protocol("CLUSTER SLOTS reply is not an array"))?;

        let mut state = self.state.lock().await;
        state.nodes.clear();
        state.slot_to_node.fill(-1);

        for range in ranges {
            let Some(range) = range.as_array() else {
                continue;
            };
            if range.len() < 3 {
                continue;
            }
            let (Some(start), Some(end)) = (range[0].as_integer(), range[1].as_integer()) else {
                continue;
            };

            let Some(index) = self.register_endpoint(&mut state, &range[2], seed) else {
                continue;
            };

            let start = start.clamp(0, i64::from(SLOT_COUNT) - 1);
            let end = end.clamp(0, i64::from(SLOT_COUNT) - 1);
            for slot in start..=end {
                state.slot_to_node[slot as usize] = index;
            }

            for replica in &range[3..] {
                let _ = self.register_endpoint(&mut state, replica, seed);
            }
        }

        if state.nodes.is_empty() {
            return Err(Error::protocol(
                "CLUSTER SLOTS reply contained no usable ranges",
            ));
        }
        Ok(state.nodes.clone())
    }

    /// Maps every slot to the first seed; used when the server reports
    /// cluster support disabled.
    async fn install_standalone(&self) -> Vec<Arc<Node>> {
        let mut state = self.state.lock().await;
        state.nodes.clear();
        for seed in &self.cfg.seeds {
            self.find_or_create_node(&mut state, &seed.host, seed.port);
        }
        state.slot_to_node.fill(0);
        state.nodes.clone()
    }

    async fn prewarm(&self, nodes: &[Arc<Node>]) {
        for node in nodes {
            if let Err(e) = node.pool.connect_all().await {
                warn!(addr = %node.cfg.addr(), error = %e, "pool pre-warm incomplete");
            }
        }
    }

    /// Parses a `[host, port, id?]` endpoint and registers its node.
    ///
    /// An empty host means "same address as the answering seed".
    fn register_endpoint(
        &self,
        state: &mut RouterState,
        endpoint: &Value,
        seed: &SeedAddr,
    ) -> Option<i32> {
        let parts = endpoint.as_array()?;
        if parts.len() < 2 {
            return None;
        }
        let host = parts[0].as_str()?;
        let port = parts[1].as_integer()?;
        if port <= 0 || port > 65535 {
            return None;
        }
        let host = if host.is_empty() {
            seed.host.as_str()
        } else {
            host
        };
        Some(self.find_or_create_node(state, host, port as u16))
    }

    fn find_or_create_node(&self, state: &mut RouterState, host: &str, port: u16) -> i32 {
        if let Some(index) = state
            .nodes
            .iter()
            .position(|n| n.cfg.host == host && n.cfg.port == port)
        {
            return index as i32;
        }
        let cfg = self.cfg.node_config(host, port);
        let pool = ConnectionPool::new(cfg.clone(), self.cfg.max_connections_per_node);
        state.nodes.push(Arc::new(Node {
            cfg,
            pool,
            main_client: Mutex::new(None),
        }));
        (state.nodes.len() - 1) as i32
    }

    /// Remaps one slot to its new owner. Never evicts pooled connections to
    /// the previous owner; they stay valid for that node's other slots.
    async fn apply_moved(&self, slot: u16, host: &str, port: u16) {
        if slot >= SLOT_COUNT {
            return;
        }
        // the new owner must be reachable before the map is rewritten
        if self.main_client_for_node(host, port).await.is_err() {
            return;
        }
        let mut state = self.state.lock().await;
        if let Some(index) = state
            .nodes
            .iter()
            .position(|n| n.cfg.host == host && n.cfg.port == port)
        {
            state.slot_to_node[slot as usize] = index as i32;
        }
    }

    async fn main_client_for_node(&self, host: &str, port: u16) -> Result<Arc<Client>> {
        let mut state = self.state.lock().await;
        let index = self.find_or_create_node(&mut state, host, port) as usize;
        let node = Arc::clone(&state.nodes[index]);
        let mut main = node.main_client.lock().await;
        if let Some(client) = main.as_ref() {
            // reconnects in place if the cached handle was poisoned
            client.connect().await?;
            return Ok(Arc::clone(client));
        }
        let client = Arc::new(Client::new(node.cfg.clone()));
        client.connect().await?;
        *main = Some(Arc::clone(&client));
        Ok(client)
    }

    async fn pool_for_slot(&self, slot: u16) -> Result<ConnectionPool> {
        let state = self.state.lock().await;
        if state.nodes.is_empty() {
            return Err(Error::protocol("no nodes discovered"));
        }
        let index = state.slot_to_node[slot as usize];
        if index < 0 || index as usize >= state.nodes.len() {
            return Err(Error::protocol("slot mapping is empty"));
        }
        Ok(state.nodes[index as usize].pool.clone())
    }

    async fn any_pool(&self) -> Result<ConnectionPool> {
        let state = self.state.lock().await;
        match state.nodes.first() {
            Some(node) => Ok(node.pool.clone()),
            None => Err(Error::protocol("no nodes discovered")),
        }
    }

    // Typed command surface, routed like any other command.

    /// GET: the value at `key`, or `None` if absent.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let reply = self.command("GET", &[key]).await?;
        response::optional_bytes(reply, "GET")
    }

    /// SET: stores `value` at `key`.
    pub async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let args = [Bytes::copy_from_slice(key.as_bytes()), value];
        self.command("SET", &args).await?;
        Ok(())
    }

    /// SETEX: stores `value` at `key` with a time-to-live in seconds.
    pub async fn setex(&self, key: &str, ttl_secs: u64, value: Bytes) -> Result<()> {
        let args = [
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::from(ttl_secs.to_string()),
            value,
        ];
        self.command("SETEX", &args).await?;
        Ok(())
    }

    /// DEL: removes the given keys, returning how many existed.
    ///
    /// All keys route by the first one; callers spreading keys over several
    /// slots should use hash tags or issue separate deletes.
    pub async fn del(&self, keys: &[&str]) -> Result<i64> {
        if keys.is_empty() {
            return Ok(0);
        }
        let reply = self.command("DEL", keys).await?;
        response::integer(reply, "DEL")
    }

    /// INCRBY: adds `delta` to the integer at `key`, returning the new value.
    pub async fn incrby(&self, key: &str, delta: i64) -> Result<i64> {
        let args = [key.to_string(), delta.to_string()];
        let reply = self.command("INCRBY", &args).await?;
        response::integer(reply, "INCRBY")
    }

    /// HSET: sets one hash field, returning the number of new fields.
    pub async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<i64> {
        let args = [
            Bytes::copy_from_slice(key.as_bytes()),
            Bytes::copy_from_slice(field.as_bytes()),
            value,
        ];
        let reply = self.command("HSET", &args).await?;
        response::integer(reply, "HSET")
    }

    /// HGET: one hash field, or `None` if absent.
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        let reply = self.command("HGET", &[key, field]).await?;
        response::optional_bytes(reply, "HGET")
    }

    /// HGETALL: every field of the hash; an absent key is an empty map.
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        let reply = self.command("HGETALL", &[key]).await?;
        response::string_map(reply, "HGETALL")
    }

    /// SADD: adds members to a set, returning how many were new.
    pub async fn sadd(&self, key: &str, members: &[Bytes]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let args = key_with(key, members);
        let reply = self.command("SADD", &args).await?;
        response::integer(reply, "SADD")
    }

    /// SREM: removes members from a set, returning how many were present.
    pub async fn srem(&self, key: &str, members: &[Bytes]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let args = key_with(key, members);
        let reply = self.command("SREM", &args).await?;
        response::integer(reply, "SREM")
    }

    /// SMEMBERS: every member of the set; an absent key is an empty vec.
    pub async fn smembers(&self, key: &str) -> Result<Vec<Bytes>> {
        let reply = self.command("SMEMBERS", &[key]).await?;
        response::bytes_vec(reply, "SMEMBERS")
    }

    /// LPUSH: prepends values to a list, returning the new length.
    pub async fn lpush(&self, key: &str, values: &[Bytes]) -> Result<i64> {
        if values.is_empty() {
            return Ok(0);
        }
        let args = key_with(key, values);
        let reply = self.command("LPUSH", &args).await?;
        response::integer(reply, "LPUSH")
    }

    /// LRANGE: list elements between `start` and `stop`, both inclusive.
    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<Bytes>> {
        let args = [key.to_string(), start.to_string(), stop.to_string()];
        let reply = self.command("LRANGE", &args).await?;
        response::bytes_vec(reply, "LRANGE")
    }

    /// ZADD: adds scored members to a sorted set, returning how many were new.
    pub async fn zadd(&self, key: &str, members: &[(Bytes, f64)]) -> Result<i64> {
        if members.is_empty() {
            return Ok(0);
        }
        let mut args = Vec::with_capacity(1 + members.len() * 2);
        args.push(Bytes::copy_from_slice(key.as_bytes()));
        for (member, score) in members {
            args.push(Bytes::from(score.to_string()));
            args.push(member.clone());
        }
        let reply = self.command("ZADD", &args).await?;
        response::integer(reply, "ZADD")
    }

    /// ZRANGE ... WITHSCORES: members and scores between two ranks.
    pub async fn zrange_with_scores(
        &self,
        key: &str,
        start: i64,
        stop: i64,
    ) -> Result<Vec<(Bytes, f64)>> {
        let args = [
            key.to_string(),
            start.to_string(),
            stop.to_string(),
            "WITHSCORES".to_string(),
        ];
        let reply = self.command("ZRANGE", &args).await?;
        response::scored_pairs(reply, "ZRANGE")
    }
}

impl std::fmt::Debug for ClusterClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClusterClient")
            .field("seeds", &self.cfg.seeds)
            .field("max_redirections", &self.cfg.max_redirections)
            .finish()
    }
}

fn key_with(key: &str, rest: &[Bytes]) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(1 + rest.len());
    args.push(Bytes::copy_from_slice(key.as_bytes()));
    args.extend(rest.iter().cloned());
    args
}
