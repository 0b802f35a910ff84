//! Connection reuse and batch fetching.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use wirefetch::{Request, SocketTransport, Transport, TransportConfig};

use common::{plain_response, read_request};

fn transport() -> SocketTransport {
    SocketTransport::new(TransportConfig::default())
}

/// Serve any number of keep-alive requests per connection, counting distinct
/// connections accepted.
fn serve_keepalive(listener: TcpListener, connections: Arc<AtomicUsize>) {
    tokio::spawn(async move {
        loop {
            let (mut sock, _) = match listener.accept().await {
                Ok(pair) => pair,
                Err(_) => break,
            };
            connections.fetch_add(1, Ordering::SeqCst);
            tokio::spawn(async move {
                loop {
                    let request = read_request(&mut sock).await;
                    if request.is_empty() {
                        break;
                    }
                    let reply = plain_response(200, "OK", "", "pooled");
                    if sock.write_all(reply.as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
}

#[tokio::test]
async fn test_sequential_fetches_reuse_the_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    serve_keepalive(listener, Arc::clone(&connections));

    let transport = transport();
    let first = transport.fetch(&url).await.unwrap();
    assert!(!first.info().connection_reused);
    assert_eq!(transport.idle_connections(), 1);

    let second = transport.fetch(&url).await.unwrap();
    assert!(second.info().connection_reused);
    assert_eq!(connections.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_connection_close_prevents_pooling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        for _ in 0..2 {
            let (mut sock, _) = listener.accept().await.unwrap();
            read_request(&mut sock).await;
            let reply = plain_response(200, "OK", "Connection: close\r\n", "bye");
            sock.write_all(reply.as_bytes()).await.unwrap();
        }
    });
    let transport = transport();
    transport.fetch(&url).await.unwrap();
    assert_eq!(transport.idle_connections(), 0);
    let second = transport.fetch(&url).await.unwrap();
    assert!(!second.info().connection_reused);
}

#[tokio::test]
async fn test_close_delimited_response_prevents_pooling() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        read_request(&mut sock).await;
        sock.write_all(b"HTTP/1.1 200 OK\r\n\r\nimplicit end").await.unwrap();
    });
    let transport = transport();
    transport.fetch(&url).await.unwrap();
    assert_eq!(transport.idle_connections(), 0);
}

#[tokio::test]
async fn test_close_drops_idle_connections() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    serve_keepalive(listener, Arc::new(AtomicUsize::new(0)));
    let transport = transport();
    transport.fetch(&url).await.unwrap();
    assert_eq!(transport.idle_connections(), 1);
    transport.close();
    assert_eq!(transport.idle_connections(), 0);
}

#[tokio::test]
async fn test_fetch_many_completes_all() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    serve_keepalive(listener, Arc::new(AtomicUsize::new(0)));

    let requests: Vec<Request> = (0..20).map(|_| Request::new(&url)).collect();
    let completed = transport().fetch_many(requests, None).await;
    assert_eq!(completed, 20);
}

#[tokio::test]
async fn test_fetch_many_respects_connection_budget() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    serve_keepalive(listener, Arc::clone(&connections));

    let config = TransportConfig { max_open_sockets: 2, ..TransportConfig::default() };
    let requests: Vec<Request> = (0..10).map(|_| Request::new(&url)).collect();
    let completed = SocketTransport::new(config).fetch_many(requests, None).await;
    assert_eq!(completed, 10);
    // With an admission window of 2 the pool never needs more than a
    // handful of sockets for ten requests.
    assert!(connections.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn test_fetch_many_per_call_budget_overrides_config() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    let connections = Arc::new(AtomicUsize::new(0));
    serve_keepalive(listener, Arc::clone(&connections));

    // The wide transport-level ceiling is narrowed for this one call.
    let requests: Vec<Request> = (0..10).map(|_| Request::new(&url)).collect();
    let completed = transport().fetch_many(requests, Some(2)).await;
    assert_eq!(completed, 10);
    assert!(connections.load(Ordering::SeqCst) <= 4);
}

#[tokio::test]
async fn test_failed_sibling_does_not_disturb_batch() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}/", listener.local_addr().unwrap());
    serve_keepalive(listener, Arc::new(AtomicUsize::new(0)));

    let requests = vec![
        Request::new(&url),
        Request::new("http://127.0.0.1:1/"), // refused
        Request::new(&url),
    ];
    let completed = transport().fetch_many(requests, None).await;
    assert_eq!(completed, 2);
}
