//! The single-node client.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::core::config::RedisConfig;
use crate::core::response;
use crate::proto::codec::{encode_command, Decoder};
use crate::proto::error::{Error, Result};
use crate::proto::frame::Value;

/// A client for a single Redis-compatible node.
///
/// One `Client` owns one TCP stream and one streaming parser. An operation
/// mutex serializes use: for each command the full request is written, then
/// exactly one reply is read, before the next command may begin. There is no
/// pipelining beyond that single in-flight command.
///
/// A client that observes an I/O or protocol error is poisoned: `connected`
/// drops to false and the stream is torn down. Poisoned clients are never
/// returned to a pool; callers reconnect or discard.
///
/// # Example
///
/// ```no_run
/// use shoal::{Client, RedisConfig};
///
/// #[tokio::main]
/// async fn main() -> shoal::Result<()> {
///     let client = Client::new(RedisConfig::default());
///     client.connect().await?;
///     client.set("greeting", "hello".into()).await?;
///     let value = client.get("greeting").await?;
///     assert_eq!(value.as_deref(), Some(&b"hello"[..]));
///     Ok(())
/// }
/// ```
pub struct Client {
    cfg: RedisConfig,
    io: Mutex<IoState>,
    connected: AtomicBool,
    in_flight: AtomicBool,
}

struct IoState {
    stream: Option<TcpStream>,
    decoder: Decoder,
}

/// Clears the in-flight flag on every exit path, including cancellation.
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

impl Client {
    /// Creates a disconnected client.
    ///
    /// Credentials are whitespace-trimmed here, once; see
    /// [`RedisConfig`](crate::RedisConfig).
    pub fn new(cfg: RedisConfig) -> Self {
        Self {
            cfg: cfg.normalized(),
            io: Mutex::new(IoState {
                stream: None,
                decoder: Decoder::new(),
            }),
            connected: AtomicBool::new(false),
            in_flight: AtomicBool::new(false),
        }
    }

    /// The connection settings this client was built with.
    pub fn config(&self) -> &RedisConfig {
        &self.cfg
    }

    /// Whether the underlying stream is believed usable.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Connected with no command in flight; the precondition for pooling.
    pub fn is_idle(&self) -> bool {
        self.connected.load(Ordering::Acquire) && !self.in_flight.load(Ordering::Acquire)
    }

    /// Opens the TCP stream and performs the AUTH/SELECT handshake.
    ///
    /// Connect establishment is bounded by `connect_timeout_ms`. When a
    /// password is configured, AUTH is sent first (two-argument ACL form if
    /// a username is present); `SELECT db` follows for non-zero databases.
    /// Any handshake failure tears the stream down and is returned as-is.
    /// Calling `connect` on an already-connected client is a no-op.
    pub async fn connect(&self) -> Result<()> {
        let mut io = self.io.lock().await;
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }

        let addr = self.cfg.addr();
        let stream =
            match tokio::time::timeout(self.cfg.connect_timeout(), TcpStream::connect(&addr))
                .await
            {
                Ok(Ok(stream)) => stream,
                Ok(Err(e)) => {
                    warn!(%addr, error = %e, "connect failed");
                    return Err(Error::io(format!("connect failed: {e}")));
                }
                Err(_) => {
                    warn!(%addr, "connect timed out");
                    return Err(Error::io("timeout"));
                }
            };
        let _ = stream.set_nodelay(true);

        io.stream = Some(stream);
        io.decoder = Decoder::new();
        self.connected.store(true, Ordering::Release);

        if let Err(e) = self.auth_and_select(&mut io).await {
            warn!(%addr, error = %e, "handshake failed");
            self.hard_close(&mut io);
            return Err(e);
        }

        debug!(%addr, db = self.cfg.db, "connected");
        Ok(())
    }

    /// Sends one command and reads one reply.
    ///
    /// A server error reply becomes `Err(Server)` and leaves the connection
    /// usable. A closed socket, short read, or exceeded deadline poisons the
    /// connection and becomes `Err(Io)`; a malformed reply poisons it with
    /// `Err(Protocol)`.
    pub async fn command<A: AsRef<[u8]>>(&self, cmd: &str, args: &[A]) -> Result<Value> {
        let mut io = self.io.lock().await;
        if !self.connected.load(Ordering::Acquire) {
            return Err(Error::io("not connected"));
        }

        self.in_flight.store(true, Ordering::Release);
        let _guard = InFlightGuard {
            flag: &self.in_flight,
        };

        self.send_and_read(&mut io, cmd, args).await
    }

    async fn auth_and_select(&self, io: &mut IoState) -> Result<()> {
        if let Some(password) = self.cfg.password.clone() {
            match self.cfg.username.clone() {
                Some(username) => {
                    self.send_and_read(io, "AUTH", &[username, password]).await?;
                }
                None => {
                    self.send_and_read(io, "AUTH", &[password]).await?;
                }
            }
        }
        if self.cfg.db != 0 {
            self.send_and_read(io, "SELECT", &[self.cfg.db.to_string()])
                .await?;
        }
        Ok(())
    }

    async fn send_and_read<A: AsRef<[u8]>>(
        &self,
        io: &mut IoState,
        cmd: &str,
        args: &[A],
    ) -> Result<Value> {
        let deadline = self.cfg.io_timeout();
        let frame = encode_command(cmd, args);

        {
            let stream = io
                .stream
                .as_mut()
                .ok_or_else(|| Error::io("not connected"))?;
            match tokio::time::timeout(deadline, stream.write_all(&frame)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    self.hard_close(io);
                    return Err(Error::io(format!("write failed: {e}")));
                }
                Err(_) => {
                    self.hard_close(io);
                    return Err(Error::io("timeout"));
                }
            }
        }

        let mut chunk = vec![0u8; 16 * 1024];
        loop {
            match io.decoder.next() {
                Ok(Some(Value::Error(message))) => return Err(Error::server(message)),
                Ok(Some(value)) => return Ok(value),
                Ok(None) => {}
                Err(e) => {
                    self.hard_close(io);
                    return Err(e);
                }
            }

            let stream = io
                .stream
                .as_mut()
                .ok_or_else(|| Error::io("not connected"))?;
            let n = match tokio::time::timeout(deadline, stream.read(&mut chunk)).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    self.hard_close(io);
                    return Err(Error::io(format!("read failed: {e}")));
                }
                Err(_) => {
                    self.hard_close(io);
                    return Err(Error::io("timeout"));
                }
            };
            if n == 0 {
                self.hard_close(io);
                return Err(Error::io("connection closed"));
            }
            io.decoder.feed(&chunk[..n]);
        }
    }

    fn hard_close(&self, io: &mut IoState) {
        self.connected.store(false, Ordering::Release);
        io.stream = None;
    }

    // Typed command surface. Shape mismatches map to
    // `Protocol "<OP>: unexpected type"`; absent bulks become `None`.

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
    ///
    /// Negative indexes count from the tail, as on the server.
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

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.cfg.addr())
            .field("connected", &self.is_connected())
            .finish()
    }
}

fn key_with(key: &str, rest: &[Bytes]) -> Vec<Bytes> {
    let mut args = Vec::with_capacity(1 + rest.len());
    args.push(Bytes::copy_from_slice(key.as_bytes()));
    args.extend(rest.iter().cloned());
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::codec::Encoder;
    use tokio::net::TcpListener;

    /// Accepts one connection and answers each decoded command with the next
    /// scripted reply.
    async fn one_shot_server(listener: TcpListener, replies: Vec<Value>) {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut decoder = Decoder::new();
        let mut chunk = vec![0u8; 4096];
        for reply in replies {
            loop {
                if decoder.next().unwrap().is_some() {
                    break;
                }
                let n = stream.read(&mut chunk).await.unwrap();
                if n == 0 {
                    return;
                }
                decoder.feed(&chunk[..n]);
            }
            let mut encoder = Encoder::new();
            encoder.encode(&reply);
            stream.write_all(&encoder.take()).await.unwrap();
        }
    }

    async fn client_for(listener: &TcpListener) -> Client {
        let addr = listener.local_addr().unwrap();
        Client::new(RedisConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            io_timeout_ms: 2000,
            connect_timeout_ms: 2000,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_command_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let server = tokio::spawn(one_shot_server(
            listener,
            vec![Value::Simple("PONG".into())],
        ));

        client.connect().await.unwrap();
        assert!(client.is_idle());
        let reply = client.command::<&str>("PING", &[]).await.unwrap();
        assert_eq!(reply, Value::Simple("PONG".into()));
        assert!(client.is_idle());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_auth_and_select_handshake() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut decoder = Decoder::new();
            let mut chunk = vec![0u8; 4096];
            let mut seen = Vec::new();
            while seen.len() < 2 {
                let n = stream.read(&mut chunk).await.unwrap();
                decoder.feed(&chunk[..n]);
                while let Some(frame) = decoder.next().unwrap() {
                    seen.push(frame);
                    stream.write_all(b"+OK\r\n").await.unwrap();
                }
            }
            seen
        });

        let client = Client::new(RedisConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            db: 3,
            username: Some("admin".to_string()),
            password: Some("  sw0rdfish ".to_string()),
            ..Default::default()
        });
        client.connect().await.unwrap();

        let seen = server.await.unwrap();
        let auth = seen[0].as_array().unwrap();
        assert_eq!(auth[0].as_str(), Some("AUTH"));
        assert_eq!(auth[1].as_str(), Some("admin"));
        assert_eq!(auth[2].as_str(), Some("sw0rdfish"));
        let select = seen[1].as_array().unwrap();
        assert_eq!(select[0].as_str(), Some("SELECT"));
        assert_eq!(select[1].as_str(), Some("3"));
    }

    #[tokio::test]
    async fn test_server_error_keeps_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let server = tokio::spawn(one_shot_server(
            listener,
            vec![
                Value::Error("ERR wrong type".into()),
                Value::Integer(1),
            ],
        ));

        client.connect().await.unwrap();
        let err = client.command("GET", &["k"]).await.unwrap_err();
        assert!(err.is_server_reply());
        assert_eq!(err.message(), "ERR wrong type");
        // still usable
        assert!(client.is_idle());
        let reply = client.command("EXISTS", &["k"]).await.unwrap();
        assert_eq!(reply, Value::Integer(1));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_closed_socket_poisons_connection() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = client_for(&listener).await;
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            drop(stream);
        });

        client.connect().await.unwrap();
        let err = client.command("GET", &["k"]).await.unwrap_err();
        assert!(err.is_io());
        assert_eq!(err.message(), "connection closed");
        assert!(!client.is_connected());
        assert!(!client.is_idle());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_deadline_is_io_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            // hold the socket open without answering
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            drop(stream);
        });

        let client = Client::new(RedisConfig {
            host: addr.ip().to_string(),
            port: addr.port(),
            io_timeout_ms: 50,
            ..Default::default()
        });
        client.connect().await.unwrap();
        let err = client.command("GET", &["k"]).await.unwrap_err();
        assert_eq!(err, Error::io("timeout"));
        assert!(!client.is_connected());
        server.abort();
    }

    #[tokio::test]
    async fn test_command_without_connect() {
        let client = Client::new(RedisConfig::default());
        let err = client.command("GET", &["k"]).await.unwrap_err();
        assert!(err.is_io());
    }
}
