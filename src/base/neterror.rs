use thiserror::Error;

/// Transport error taxonomy.
///
/// Every fatal condition ends the exchange and is recorded on the response's
/// error slot; only connect failures are ever retried (up to the request's
/// retry budget).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NetError {
    /// TCP connect / DNS failure. Retryable up to `Request::try_times`.
    #[error("connect failed: {0}")]
    Connect(String),

    /// TLS negotiation failure. Never retried.
    #[error("TLS error: {0}")]
    Tls(String),

    /// Malformed status line, header, or chunk framing.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Wall-clock budget for the whole request exhausted.
    #[error("operation timed out after {0} ms")]
    Timeout(u64),

    /// Redirect count exceeded the per-chain-group maximum.
    #[error("maximum ({0}) redirects followed")]
    TooManyRedirects(u32),

    /// The same response signature repeated past the configured threshold.
    #[error("the request may be stuck in an endless loop")]
    EndlessLoop,

    /// Unsupported proxy scheme/auth, or the proxy rejected the handshake.
    #[error("proxy error: {0}")]
    Proxy(String),

    /// A user hook raised an error. Sibling exchanges are unaffected.
    #[error("aborted in {hook} hook: {message}")]
    Callback { hook: &'static str, message: String },

    /// A user hook asked to stop the exchange.
    #[error("request cancelled")]
    Cancelled,

    /// Read or write on an established connection failed.
    #[error("{0}")]
    Io(String),

    /// The peer closed the connection before the response completed.
    #[error("connection was closed by the remote host")]
    RemoteClosed,

    /// The request URL is missing or unparseable.
    #[error("invalid url: {0}")]
    InvalidUrl(String),

    /// Only Basic and Digest are supported for server auth, Basic for proxies.
    #[error("unsupported auth scheme: {0}")]
    UnsupportedAuth(String),

    /// Response status >= 400 with `allow_error` disabled.
    #[error("the requested URL returned error: {0}")]
    HttpStatus(u16),

    /// gzip/deflate body decoding failed.
    #[error("decode compressed response: {0}")]
    ContentDecoding(String),
}

impl NetError {
    /// Connect errors may be retried on a fresh socket; everything else ends
    /// the exchange immediately.
    pub fn is_retryable(&self) -> bool {
        matches!(self, NetError::Connect(_))
    }

    /// Errors that originate in user code rather than on the wire.
    pub fn is_callback_error(&self) -> bool {
        matches!(self, NetError::Callback { .. })
    }
}

impl From<std::io::Error> for NetError {
    fn from(err: std::io::Error) -> Self {
        NetError::Io(err.to_string())
    }
}
