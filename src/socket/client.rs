//! An established connection, plain or TLS.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_boring::SslStream;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketKind {
    Tcp,
    Ssl,
}

enum Stream {
    Tcp(TcpStream),
    Ssl(SslStream<TcpStream>),
}

/// A ready-to-use transport connection.
pub struct Connection {
    stream: Stream,
    remote_addr: Option<SocketAddr>,
    reused: bool,
}

impl Connection {
    pub(crate) fn tcp(stream: TcpStream) -> Self {
        let remote_addr = stream.peer_addr().ok();
        Self { stream: Stream::Tcp(stream), remote_addr, reused: false }
    }

    pub(crate) fn tls(stream: SslStream<TcpStream>) -> Self {
        let remote_addr = stream.get_ref().peer_addr().ok();
        Self { stream: Stream::Ssl(stream), remote_addr, reused: false }
    }

    pub fn kind(&self) -> SocketKind {
        match self.stream {
            Stream::Tcp(_) => SocketKind::Tcp,
            Stream::Ssl(_) => SocketKind::Ssl,
        }
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Whether this connection came out of the pool rather than a fresh
    /// connect.
    pub fn was_reused(&self) -> bool {
        self.reused
    }

    pub(crate) fn mark_reused(&mut self) {
        self.reused = true;
    }

    pub async fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Tcp(s) => s.write(data).await,
            Stream::Ssl(s) => s.write(data).await,
        }
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Tcp(s) => s.read(buf).await,
            Stream::Ssl(s) => s.read(buf).await,
        }
    }

    pub async fn shutdown(&mut self) {
        let _ = match &mut self.stream {
            Stream::Tcp(s) => s.shutdown().await,
            Stream::Ssl(s) => s.shutdown().await,
        };
    }

    /// Non-destructive liveness probe for idle connections.
    ///
    /// An idle connection must have nothing to read: data would be a stray
    /// server push and a clean read of zero means the peer already closed.
    /// TLS connections probe the underlying TCP stream, so buffered
    /// post-handshake records also disqualify them.
    pub(crate) fn is_alive(&self) -> bool {
        let tcp = match &self.stream {
            Stream::Tcp(s) => s,
            Stream::Ssl(s) => s.get_ref(),
        };
        let mut probe = [0u8; 1];
        match tcp.try_read(&mut probe) {
            Ok(_) => false,
            Err(e) => e.kind() == io::ErrorKind::WouldBlock,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("kind", &self.kind())
            .field("remote_addr", &self.remote_addr)
            .field("reused", &self.reused)
            .finish()
    }
}
