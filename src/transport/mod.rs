//! Exchange orchestration and the public transport surface.

pub(crate) mod context;
pub(crate) mod exchange;
pub mod scheduler;

pub use scheduler::{SocketTransport, Transport, TransportConfig};
