//! An HTTP/1.x client engine built directly on sockets.
//!
//! No pre-built HTTP client sits underneath: request serialization,
//! response framing (chunked, length-delimited, and close-delimited
//! bodies), proxy tunneling (HTTP CONNECT, SOCKS4/4a/5), TLS negotiation,
//! redirects, Basic/Digest authentication, cookies, and connection reuse
//! are all implemented here against raw TCP streams.
//!
//! ```no_run
//! use wirefetch::{Request, SocketTransport, Transport, TransportConfig};
//!
//! # async fn demo() -> Result<(), wirefetch::NetError> {
//! let transport = SocketTransport::new(TransportConfig::default());
//! let response = transport
//!     .fetch_one(Request::new("http://example.com/").timeout_ms(10_000))
//!     .await
//!     .into_result()?;
//! println!("{} {}", response.status(), response.reason());
//! # Ok(())
//! # }
//! ```

pub mod base;
pub mod cookies;
pub mod http;
pub mod socket;
pub mod transport;

pub use base::NetError;
pub use cookies::{Cookie, CookieJar};
pub use http::{
    ByteStream, HeaderMap, HookAction, HttpVersion, Info, Method, Request, Response,
};
pub use socket::{ProxyKind, ProxySettings};
pub use transport::{SocketTransport, Transport, TransportConfig};
