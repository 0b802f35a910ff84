//! The public transport: configuration, admission control, and the
//! connection pool shared by all exchanges.

use std::path::PathBuf;

use futures::stream::{FuturesUnordered, StreamExt};
use tracing::debug;

use crate::base::NetError;
use crate::http::request::Request;
use crate::http::response::Response;
use crate::socket::connectjob::ResolvePins;
use crate::socket::pool::ConnectionPool;
use crate::transport::exchange::Exchange;

/// Transport-wide settings. One value covers every exchange the transport
/// runs; per-request knobs live on `Request`.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Ceiling on concurrently open connections in `fetch_many`.
    pub max_open_sockets: usize,
    /// How many times one response signature (url, version, status, reason)
    /// may repeat before the exchange aborts as an endless loop.
    pub loop_threshold: u32,
    /// CA bundle for TLS peer verification; the system store applies when
    /// unset.
    pub ca_bundle: Option<PathBuf>,
    /// Host-to-address overrides consulted before DNS.
    pub resolve_pins: ResolvePins,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_open_sockets: 50,
            loop_threshold: 2,
            ca_bundle: None,
            resolve_pins: ResolvePins::new(),
        }
    }
}

/// Carries requests to completion.
pub trait Transport {
    /// Run one request. Transport failures are recorded on the response
    /// (see `Response::error` / `Response::into_result`), never panicked or
    /// silently dropped.
    fn fetch_one(&self, request: Request) -> impl std::future::Future<Output = Response> + Send;

    /// Run many requests concurrently, bounded by `max_concurrent` when
    /// given and the transport-wide `max_open_sockets` otherwise. Results
    /// are delivered through each request's hooks; the return value counts
    /// the exchanges that finished without error.
    fn fetch_many(
        &self,
        requests: Vec<Request>,
        max_concurrent: Option<usize>,
    ) -> impl std::future::Future<Output = usize> + Send;

    /// Drop all idle pooled connections.
    fn close(&self);
}

/// The socket-backed transport.
pub struct SocketTransport {
    config: TransportConfig,
    pool: ConnectionPool,
}

impl SocketTransport {
    pub fn new(config: TransportConfig) -> Self {
        Self { config, pool: ConnectionPool::new() }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Convenience: GET a URL and surface any transport error directly.
    pub async fn fetch(&self, url: impl AsRef<str>) -> Result<Response, NetError> {
        self.fetch_one(Request::new(url)).await.into_result()
    }

    /// Number of idle connections currently shelved for reuse.
    pub fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }
}

impl Default for SocketTransport {
    fn default() -> Self {
        Self::new(TransportConfig::default())
    }
}

impl Transport for SocketTransport {
    async fn fetch_one(&self, request: Request) -> Response {
        let exchange = Exchange { config: &self.config, pool: &self.pool };
        exchange.run(request).await
    }

    async fn fetch_many(&self, requests: Vec<Request>, max_concurrent: Option<usize>) -> usize {
        let total = requests.len();
        let window = max_concurrent.unwrap_or(self.config.max_open_sockets).max(1);
        let mut queue = requests.into_iter();
        let mut inflight = FuturesUnordered::new();
        let mut completed = 0usize;
        loop {
            // Admit work up to the connection budget; the rest waits its
            // turn, exactly one admission per completion.
            while inflight.len() < window {
                match queue.next() {
                    Some(request) => inflight.push(self.fetch_one(request)),
                    None => break,
                }
            }
            match inflight.next().await {
                Some(response) => {
                    if response.error().is_none() {
                        completed += 1;
                    }
                }
                None => break,
            }
        }
        debug!(total, completed, "batch finished");
        completed
    }

    fn close(&self) {
        self.pool.clear();
    }
}
