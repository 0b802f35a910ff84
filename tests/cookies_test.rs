//! Cookie handling across redirect chains.

mod common;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use wirefetch::{Request, SocketTransport, Transport, TransportConfig};

use common::{plain_response, read_request};

fn transport() -> SocketTransport {
    SocketTransport::new(TransportConfig::default())
}

fn serve(
    listener: TcpListener,
    responder: impl Fn(&str, usize) -> String + Send + 'static,
    connections: usize,
) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        for index in 0..connections {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            sock.write_all(responder(&request, index).as_bytes())
                .await
                .unwrap();
            seen.push(request);
        }
        seen
    })
}

fn redirect_with_cookie(location: &str, set_cookie: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {}\r\nSet-Cookie: {}\r\n\
         Content-Length: 0\r\nConnection: close\r\n\r\n",
        location, set_cookie
    )
}

#[tokio::test]
async fn test_cookie_set_on_redirect_travels_to_next_hop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/login", listener.local_addr().unwrap());
    let server = serve(
        listener,
        |_, index| match index {
            0 => redirect_with_cookie("/home", "session=abc123; Path=/"),
            _ => plain_response(200, "OK", "", "welcome"),
        },
        2,
    );
    let response = transport().fetch(&base).await.unwrap();
    assert_eq!(response.body_string().as_deref(), Some("welcome"));
    let requests = server.await.unwrap();
    assert!(!requests[0].contains("Cookie:"));
    assert!(requests[1].contains("Cookie: session=abc123"));
}

#[tokio::test]
async fn test_multiple_set_cookie_headers_combine() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    let server = serve(
        listener,
        |_, index| match index {
            0 => "HTTP/1.1 302 Found\r\nLocation: /next\r\n\
                  Set-Cookie: a=1; Path=/\r\nSet-Cookie: b=2; Path=/\r\n\
                  Content-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
            _ => plain_response(200, "OK", "", "ok"),
        },
        2,
    );
    transport().fetch(&base).await.unwrap();
    let requests = server.await.unwrap();
    assert!(requests[1].contains("Cookie: a=1; b=2"));
}

#[tokio::test]
async fn test_expired_cookie_is_removed_mid_chain() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    let server = serve(
        listener,
        |_, index| match index {
            0 => redirect_with_cookie("/step2", "token=keepme; Path=/"),
            // Max-Age=0 deletes the cookie set one hop earlier.
            1 => redirect_with_cookie("/final", "token=gone; Path=/; Max-Age=0"),
            _ => plain_response(200, "OK", "", "done"),
        },
        3,
    );
    transport().fetch(&base).await.unwrap();
    let requests = server.await.unwrap();
    assert!(requests[1].contains("Cookie: token=keepme"));
    assert!(!requests[2].contains("Cookie:"));
}

#[tokio::test]
async fn test_auto_cookie_disabled() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    let server = serve(
        listener,
        |_, index| match index {
            0 => redirect_with_cookie("/next", "session=abc; Path=/"),
            _ => plain_response(200, "OK", "", "ok"),
        },
        2,
    );
    transport()
        .fetch_one(Request::new(&base).auto_cookie(false))
        .await
        .into_result()
        .unwrap();
    assert!(!server.await.unwrap()[1].contains("Cookie:"));
}

#[tokio::test]
async fn test_foreign_domain_cookie_is_rejected() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    let server = serve(
        listener,
        |_, index| match index {
            0 => redirect_with_cookie("/next", "stolen=1; Domain=evil.example; Path=/"),
            _ => plain_response(200, "OK", "", "ok"),
        },
        2,
    );
    transport().fetch(&base).await.unwrap();
    assert!(!server.await.unwrap()[1].contains("stolen"));
}

#[tokio::test]
async fn test_path_scoped_cookie_not_sent_elsewhere() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/shop/cart", listener.local_addr().unwrap());
    let server = serve(
        listener,
        |_, index| match index {
            // Cookie scoped under /shop, then redirect out of that subtree.
            0 => redirect_with_cookie("/account", "basket=3; Path=/shop"),
            _ => plain_response(200, "OK", "", "ok"),
        },
        2,
    );
    transport().fetch(&base).await.unwrap();
    assert!(!server.await.unwrap()[1].contains("basket"));
}
