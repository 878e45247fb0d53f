//! Bounded per-node connection pooling.

use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::core::client::Client;
use crate::core::config::RedisConfig;
use crate::proto::error::{Error, Result};
use crate::proto::frame::Value;

/// A bounded pool of reusable connections to one node.
///
/// The pool tracks every connection it owns — idle, checked out, or being
/// established — in a live count capped at the configured size. Idle
/// connections wait in a lock-free MPMC queue; when the pool is at capacity
/// and the queue is empty, checkouts park on a semaphore and are woken as
/// connections are returned or slots are freed by faults.
///
/// Wakeups are best-effort rather than strictly FIFO: every release adds a
/// permit whether or not anyone is parked yet, so a checkout that decides
/// to wait concurrently with a release still wakes and re-runs the loop. A
/// stale permit costs one extra loop iteration, never a missed connection,
/// and permits are bounded near the cap.
///
/// `ConnectionPool` is a cheap clone; all clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

struct PoolInner {
    cfg: RedisConfig,
    cap: usize,
    idle: ArrayQueue<Arc<Client>>,
    live_count: AtomicUsize,
    idle_sem: Semaphore,
    waiters: AtomicU32,
}

/// A connection checked out of a [`ConnectionPool`].
///
/// Must be given back through [`release`](PooledClient::release). Dropping
/// the guard without releasing — which is what happens when the borrowing
/// task is cancelled mid-command — returns the connection as faulty, since
/// a half-read reply would desynchronize its parser.
pub struct PooledClient {
    pool: Arc<PoolInner>,
    client: Option<Arc<Client>>,
}

/// Keeps the waiter count accurate when a parked checkout is cancelled.
struct WaiterGuard<'a> {
    waiters: &'a AtomicU32,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

impl ConnectionPool {
    /// Creates an empty pool for `cfg` holding at most `cap` connections.
    ///
    /// `cap` has a floor of 1.
    pub fn new(cfg: RedisConfig, cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            inner: Arc::new(PoolInner {
                cfg,
                cap,
                idle: ArrayQueue::new(cap),
                live_count: AtomicUsize::new(0),
                idle_sem: Semaphore::new(0),
                waiters: AtomicU32::new(0),
            }),
        }
    }

    /// The configuration connections are dialed with.
    pub fn config(&self) -> &RedisConfig {
        &self.inner.cfg
    }

    /// Connections currently owned by the pool, in any state.
    pub fn live_count(&self) -> usize {
        self.inner.live_count.load(Ordering::Acquire)
    }

    /// Connections parked in the idle queue.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.len()
    }

    /// Checkouts currently parked waiting for a connection.
    pub fn waiter_count(&self) -> u32 {
        self.inner.waiters.load(Ordering::Acquire)
    }

    /// Checks a connection out, dialing a new one if under the cap.
    ///
    /// Loops until success or a connect error: stale idle entries are
    /// discarded (freeing their slot and waking a waiter), a free slot is
    /// claimed with a compare-and-swap before dialing, and at capacity the
    /// caller parks until a connection comes back.
    pub async fn checkout(&self) -> Result<PooledClient> {
        let inner = &self.inner;
        loop {
            if let Some(client) = inner.idle.pop() {
                if client.is_idle() {
                    return Ok(PooledClient {
                        pool: Arc::clone(inner),
                        client: Some(client),
                    });
                }
                // stale entry: free its slot so a waiter can dial afresh
                inner.live_count.fetch_sub(1, Ordering::AcqRel);
                inner.wake_waiter();
                continue;
            }

            let live = inner.live_count.load(Ordering::Acquire);
            if live < inner.cap {
                if inner
                    .live_count
                    .compare_exchange(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    continue;
                }
                let client = Arc::new(Client::new(inner.cfg.clone()));
                if let Err(e) = client.connect().await {
                    inner.live_count.fetch_sub(1, Ordering::AcqRel);
                    inner.wake_waiter();
                    return Err(e);
                }
                debug!(addr = %inner.cfg.addr(), live = live + 1, "pool opened connection");
                return Ok(PooledClient {
                    pool: Arc::clone(inner),
                    client: Some(client),
                });
            }

            inner.waiters.fetch_add(1, Ordering::AcqRel);
            let _waiting = WaiterGuard {
                waiters: &inner.waiters,
            };
            match inner.idle_sem.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(Error::io("pool closed")),
            }
        }
    }

    /// Pre-warms the pool to its cap by dialing and parking connections.
    ///
    /// Stops at the first connect failure, which is returned; connections
    /// already opened stay in the pool.
    pub async fn connect_all(&self) -> Result<()> {
        let inner = &self.inner;
        loop {
            let live = inner.live_count.load(Ordering::Acquire);
            if live >= inner.cap {
                return Ok(());
            }
            if inner
                .live_count
                .compare_exchange(live, live + 1, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                continue;
            }
            let client = Arc::new(Client::new(inner.cfg.clone()));
            if let Err(e) = client.connect().await {
                inner.live_count.fetch_sub(1, Ordering::AcqRel);
                inner.wake_waiter();
                return Err(e);
            }
            if inner.idle.push(client).is_err() {
                inner.live_count.fetch_sub(1, Ordering::AcqRel);
            }
            inner.wake_waiter();
        }
    }

    /// Runs one command on a pooled connection.
    ///
    /// The connection is returned clean after success or a server error
    /// reply, and as faulty after I/O and protocol failures.
    pub async fn command<A: AsRef<[u8]>>(&self, cmd: &str, args: &[A]) -> Result<Value> {
        let pooled = self.checkout().await?;
        let result = pooled.client().command(cmd, args).await;
        match &result {
            Ok(_) => pooled.release(false),
            Err(e) => pooled.release(!e.is_server_reply()),
        }
        result
    }
}

impl PoolInner {
    fn give_back(&self, client: Arc<Client>, faulty: bool) {
        if faulty || !client.is_idle() {
            warn!(addr = %self.cfg.addr(), faulty, "pool dropped connection");
            self.live_count.fetch_sub(1, Ordering::AcqRel);
            self.wake_waiter();
            return;
        }
        if self.idle.push(client).is_err() {
            // cannot happen while live-count accounting holds: the queue is
            // sized to the cap
            self.live_count.fetch_sub(1, Ordering::AcqRel);
        }
        self.wake_waiter();
    }

    /// Releases one `idle_sem` permit.
    ///
    /// Unconditional with respect to the waiter count: a checkout may have
    /// passed its cap check without having registered yet, and must still
    /// be woken. A permit nobody is waiting for just makes the next waiter
    /// re-run the checkout loop; permits are capped at `cap` so stale ones
    /// stay bounded, and a waiter only ever parks with zero available.
    fn wake_waiter(&self) {
        if self.idle_sem.available_permits() < self.cap {
            self.idle_sem.add_permits(1);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("addr", &self.inner.cfg.addr())
            .field("cap", &self.inner.cap)
            .field("live", &self.live_count())
            .field("idle", &self.idle_count())
            .finish()
    }
}

impl PooledClient {
    /// The borrowed connection.
    pub fn client(&self) -> &Arc<Client> {
        self.client
            .as_ref()
            .expect("PooledClient used after release")
    }

    /// Returns the connection to its pool.
    ///
    /// Faulty or non-idle connections are dropped and their slot freed;
    /// healthy ones go back on the idle queue. Either way one parked waiter
    /// is woken.
    pub fn release(mut self, connection_faulty: bool) {
        if let Some(client) = self.client.take() {
            self.pool.give_back(client, connection_faulty);
        }
    }
}

impl Drop for PooledClient {
    fn drop(&mut self) {
        if let Some(client) = self.client.take() {
            self.pool.give_back(client, true);
        }
    }
}

impl std::ops::Deref for PooledClient {
    type Target = Client;

    fn deref(&self) -> &Self::Target {
        self.client()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// A server that answers `+OK` to every frame on every connection.
    async fn yes_server(listener: TcpListener) {
        loop {
            let (mut stream, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => return,
            };
            tokio::spawn(async move {
                let mut decoder = crate::proto::codec::Decoder::new();
                let mut chunk = vec![0u8; 4096];
                loop {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    decoder.feed(&chunk[..n]);
                    while decoder.next().unwrap().is_some() {
                        if stream.write_all(b"+OK\r\n").await.is_err() {
                            return;
                        }
                    }
                }
            });
        }
    }

    async fn pool_against_server(cap: usize) -> (ConnectionPool, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(yes_server(listener));
        let cfg = RedisConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        };
        (ConnectionPool::new(cfg, cap), server)
    }

    #[tokio::test]
    async fn test_checkout_reuses_idle_connection() {
        let (pool, server) = pool_against_server(2).await;

        let first = pool.checkout().await.unwrap();
        assert_eq!(pool.live_count(), 1);
        first.release(false);
        assert_eq!(pool.idle_count(), 1);

        let second = pool.checkout().await.unwrap();
        assert_eq!(pool.live_count(), 1, "idle connection must be reused");
        second.release(false);
        server.abort();
    }

    #[tokio::test]
    async fn test_live_count_never_exceeds_cap() {
        let (pool, server) = pool_against_server(2).await;

        let a = pool.checkout().await.unwrap();
        let b = pool.checkout().await.unwrap();
        assert_eq!(pool.live_count(), 2);

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let c = pool.checkout().await.unwrap();
                c.release(false);
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished(), "third checkout must park at the cap");
        assert_eq!(pool.live_count(), 2);

        a.release(false);
        waiter.await.unwrap();
        assert!(pool.live_count() <= 2);

        b.release(false);
        assert_eq!(pool.live_count(), pool.idle_count());
        server.abort();
    }

    #[tokio::test]
    async fn test_clean_release_wakes_parked_waiter() {
        let (pool, server) = pool_against_server(1).await;

        // a release that lands while the waiter is between its cap check
        // and its park must still wake it
        for _ in 0..100 {
            let held = pool.checkout().await.unwrap();
            let waiter = {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let c = pool.checkout().await.unwrap();
                    c.release(false);
                })
            };
            tokio::task::yield_now().await;
            held.release(false);
            tokio::time::timeout(Duration::from_secs(5), waiter)
                .await
                .expect("waiter must not be stranded by a clean release")
                .unwrap();
        }
        assert_eq!(pool.waiter_count(), 0);
        server.abort();
    }

    #[tokio::test]
    async fn test_faulty_release_frees_slot() {
        let (pool, server) = pool_against_server(1).await;

        let a = pool.checkout().await.unwrap();
        assert_eq!(pool.live_count(), 1);
        a.release(true);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.idle_count(), 0);

        // slot is free again
        let b = pool.checkout().await.unwrap();
        b.release(false);
        server.abort();
    }

    #[tokio::test]
    async fn test_drop_without_release_counts_as_faulty() {
        let (pool, server) = pool_against_server(1).await;

        let a = pool.checkout().await.unwrap();
        drop(a);
        assert_eq!(pool.live_count(), 0);
        assert_eq!(pool.idle_count(), 0);
        server.abort();
    }

    #[tokio::test]
    async fn test_connect_error_propagates_and_frees_slot() {
        // a listener that is immediately dropped leaves a port nothing
        // accepts on
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let cfg = RedisConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            connect_timeout_ms: 200,
            ..Default::default()
        };
        let pool = ConnectionPool::new(cfg, 2);
        assert!(pool.checkout().await.is_err());
        assert_eq!(pool.live_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_all_fills_pool() {
        let (pool, server) = pool_against_server(3).await;
        pool.connect_all().await.unwrap();
        assert_eq!(pool.live_count(), 3);
        assert_eq!(pool.idle_count(), 3);
        server.abort();
    }

    #[tokio::test]
    async fn test_waiter_progress_under_contention() {
        let (pool, server) = pool_against_server(2).await;
        pool.connect_all().await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    let c = pool.checkout().await.unwrap();
                    let reply = c.client().command("PING", &[] as &[&str]).await.unwrap();
                    assert_eq!(reply, Value::Simple("OK".into()));
                    c.release(false);
                }
            }));
        }
        for task in tasks {
            tokio::time::timeout(Duration::from_secs(10), task)
                .await
                .expect("waiters must make progress")
                .unwrap();
        }
        assert_eq!(pool.live_count(), pool.idle_count());
        server.abort();
    }

    #[tokio::test]
    async fn test_pool_command_releases_clean_on_server_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut chunk = vec![0u8; 4096];
            let mut decoder = crate::proto::codec::Decoder::new();
            loop {
                let n = match stream.read(&mut chunk).await {
                    Ok(0) | Err(_) => return,
                    Ok(n) => n,
                };
                decoder.feed(&chunk[..n]);
                while decoder.next().unwrap().is_some() {
                    stream.write_all(b"-ERR nope\r\n").await.unwrap();
                }
            }
        });

        let cfg = RedisConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            ..Default::default()
        };
        let pool = ConnectionPool::new(cfg, 1);
        let err = pool.command("GET", &["k"]).await.unwrap_err();
        assert!(err.is_server_reply());
        // server-reply errors keep the connection pooled
        assert_eq!(pool.live_count(), 1);
        assert_eq!(pool.idle_count(), 1);
        server.abort();
    }
}
