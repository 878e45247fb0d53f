//! In-process scripted servers for integration tests.
//!
//! A [`MockNode`] binds first (so tests can reference its address while
//! wiring handlers), then serves connections with a handler that maps each
//! decoded command to a scripted [`Reply`]. Connections are handled
//! concurrently, which is what lets pool tests overlap slow commands.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use shoal::proto::codec::{Decoder, Encoder};
use shoal::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// What a handler tells the server to do with one command.
pub enum Reply {
    /// Encode and send the value.
    Value(Value),
    /// Sleep, then send; models slow blocking-style commands.
    Delayed(Duration, Value),
    /// Drop the connection without answering.
    Close,
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Value(Value::Simple("OK".to_string()))
    }

    pub fn bulk(data: &str) -> Self {
        Reply::Value(Value::Bulk(bytes::Bytes::copy_from_slice(data.as_bytes())))
    }

    pub fn error(text: impl Into<String>) -> Self {
        Reply::Value(Value::Error(text.into()))
    }
}

type Handler = Arc<dyn Fn(&[String]) -> Reply + Send + Sync>;

/// One scripted server endpoint.
pub struct MockNode {
    listener: Option<TcpListener>,
    host: String,
    port: u16,
    connections: Arc<AtomicUsize>,
}

impl MockNode {
    /// Binds to an ephemeral port without serving yet.
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        Self {
            listener: Some(listener),
            host: addr.ip().to_string(),
            port: addr.port(),
            connections: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn host(&self) -> String {
        self.host.clone()
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// `host:port`, as it appears in redirection messages.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Connections accepted so far.
    pub fn connection_count(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Starts serving; each decoded command is answered per the handler.
    ///
    /// The handler sees the command as lossy strings, name first.
    pub fn serve<F>(&mut self, handler: F)
    where
        F: Fn(&[String]) -> Reply + Send + Sync + 'static,
    {
        let listener = self.listener.take().expect("serve called twice");
        let handler: Handler = Arc::new(handler);
        let connections = Arc::clone(&self.connections);
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(handle_connection(stream, Arc::clone(&handler)));
            }
        });
    }
}

async fn handle_connection(mut stream: TcpStream, handler: Handler) {
    let mut decoder = Decoder::new();
    let mut chunk = vec![0u8; 4096];
    loop {
        let frame = loop {
            match decoder.next().unwrap() {
                Some(frame) => break frame,
                None => {
                    let n = match stream.read(&mut chunk).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => n,
                    };
                    decoder.feed(&chunk[..n]);
                }
            }
        };

        let command: Vec<String> = frame
            .as_array()
            .map(|items| {
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        let reply = match handler(&command) {
            Reply::Value(value) => value,
            Reply::Delayed(delay, value) => {
                tokio::time::sleep(delay).await;
                value
            }
            Reply::Close => return,
        };

        let mut encoder = Encoder::new();
        encoder.encode(&reply);
        if stream.write_all(&encoder.take()).await.is_err() {
            return;
        }
    }
}

/// A `[start, end, [host, port]]` range for a scripted CLUSTER SLOTS reply.
pub fn slots_range(start: i64, end: i64, host: &str, port: u16) -> Value {
    Value::Array(vec![
        Value::Integer(start),
        Value::Integer(end),
        Value::Array(vec![
            Value::Bulk(bytes::Bytes::copy_from_slice(host.as_bytes())),
            Value::Integer(i64::from(port)),
        ]),
    ])
}

/// An address with nothing listening on it.
pub async fn dead_addr() -> (String, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    (addr.ip().to_string(), addr.port())
}
