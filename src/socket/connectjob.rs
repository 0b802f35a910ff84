//! Connection establishment: resolve, dial, tunnel, negotiate TLS.

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;

use boring::ssl::{SslConnector, SslMethod, SslVerifyMode};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use crate::base::NetError;
use crate::socket::client::Connection;
use crate::socket::proxy::{ProxyKind, ProxySettings};
use crate::socket::tunnel::{TunnelEvent, TunnelNegotiator};

/// Host-to-address overrides consulted before DNS.
pub type ResolvePins = HashMap<String, IpAddr>;

pub struct ConnectParams<'a> {
    pub host: &'a str,
    pub port: u16,
    pub tls: bool,
    pub ssl_verify: bool,
    pub ca_bundle: Option<&'a Path>,
    pub proxy: Option<&'a ProxySettings>,
    pub pins: &'a ResolvePins,
    /// Disable Nagle's algorithm after connecting.
    pub nodelay: bool,
}

/// Open a connection to the origin described by `params`, tunneling through
/// the proxy and negotiating TLS as needed.
pub async fn establish(params: ConnectParams<'_>) -> Result<Connection, NetError> {
    let (dial_host, dial_port) = match params.proxy {
        Some(proxy) => (proxy.host.as_str(), proxy.port),
        None => (params.host, params.port),
    };
    let addr = resolve(dial_host, dial_port, params.pins).await?;
    debug!(host = dial_host, %addr, "connecting");
    let mut tcp = TcpStream::connect(addr)
        .await
        .map_err(|e| NetError::Connect(format!("{}:{}: {}", dial_host, dial_port, e)))?;
    if params.nodelay {
        let _ = tcp.set_nodelay(true);
    }

    if let Some(proxy) = params.proxy {
        if proxy.needs_tunnel(params.tls) {
            // SOCKS4 wants a locally resolved address; when resolution fails
            // the negotiator downgrades to the 4a form on its own.
            let target_ipv4 = if proxy.kind == ProxyKind::Socks4 {
                resolve_v4(params.host, params.port, params.pins).await.ok()
            } else {
                None
            };
            let mut negotiator =
                TunnelNegotiator::new(proxy, params.host, params.port, target_ipv4);
            drive_tunnel(&mut tcp, &mut negotiator).await?;
            debug!(kind = ?proxy.kind, "tunnel established");
        }
    }

    if params.tls {
        let stream = handshake_tls(params, tcp).await?;
        Ok(Connection::tls(stream))
    } else {
        Ok(Connection::tcp(tcp))
    }
}

async fn resolve(host: &str, port: u16, pins: &ResolvePins) -> Result<SocketAddr, NetError> {
    if let Some(ip) = pins.get(host) {
        return Ok(SocketAddr::new(*ip, port));
    }
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, port));
    }
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| NetError::Connect(format!("resolve {}: {}", host, e)))?;
    addrs
        .next()
        .ok_or_else(|| NetError::Connect(format!("resolve {}: no addresses", host)))
}

/// SOCKS4 carries a raw IPv4 address, so the target must resolve locally.
async fn resolve_v4(host: &str, port: u16, pins: &ResolvePins) -> Result<Ipv4Addr, NetError> {
    match resolve(host, port, pins).await? {
        SocketAddr::V4(v4) => Ok(*v4.ip()),
        SocketAddr::V6(_) => Err(NetError::Proxy(format!(
            "socks4 cannot reach IPv6-only host {}",
            host
        ))),
    }
}

async fn drive_tunnel(
    tcp: &mut TcpStream,
    negotiator: &mut TunnelNegotiator,
) -> Result<(), NetError> {
    tcp.write_all(&negotiator.initial_message())
        .await
        .map_err(|e| NetError::Proxy(format!("tunnel write: {}", e)))?;
    let mut buf = [0u8; 1024];
    while !negotiator.is_established() {
        let n = tcp
            .read(&mut buf)
            .await
            .map_err(|e| NetError::Proxy(format!("tunnel read: {}", e)))?;
        if n == 0 {
            return Err(NetError::Proxy("proxy closed during handshake".into()));
        }
        match negotiator.feed(&buf[..n])? {
            TunnelEvent::Send(msg) => {
                tcp.write_all(&msg)
                    .await
                    .map_err(|e| NetError::Proxy(format!("tunnel write: {}", e)))?;
            }
            TunnelEvent::Established | TunnelEvent::NeedMore => {}
        }
    }
    Ok(())
}

async fn handshake_tls(
    params: ConnectParams<'_>,
    tcp: TcpStream,
) -> Result<tokio_boring::SslStream<TcpStream>, NetError> {
    let mut builder = SslConnector::builder(SslMethod::tls_client())
        .map_err(|e| NetError::Tls(e.to_string()))?;
    if let Some(ca) = params.ca_bundle {
        builder
            .set_ca_file(ca)
            .map_err(|e| NetError::Tls(format!("load ca bundle: {}", e)))?;
    }
    if !params.ssl_verify {
        builder.set_verify(SslVerifyMode::NONE);
    }
    let mut config = builder
        .build()
        .configure()
        .map_err(|e| NetError::Tls(e.to_string()))?;
    if !params.ssl_verify {
        config.set_verify_hostname(false);
    }
    tokio_boring::connect(config, params.host, tcp)
        .await
        .map_err(|e| NetError::Tls(format!("{:?}", e)))
}
