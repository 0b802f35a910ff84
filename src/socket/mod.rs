//! Connection establishment, proxies, and reuse.

pub mod client;
pub mod connectjob;
pub mod pool;
pub mod proxy;
pub mod tunnel;

pub use client::{Connection, SocketKind};
pub use connectjob::ResolvePins;
pub use pool::ConnectionPool;
pub use proxy::{ProxyKind, ProxySettings};
