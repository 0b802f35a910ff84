//! Redirect following against scripted servers.

mod common;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use wirefetch::{NetError, Request, SocketTransport, Transport, TransportConfig};

use common::{plain_response, read_request};

fn transport() -> SocketTransport {
    SocketTransport::new(TransportConfig::default())
}

/// Serve a sequence of connections; `responder` maps (request, index) to a
/// raw response. The handle resolves to the requests received.
fn serve_script(
    listener: TcpListener,
    responder: impl Fn(&str, usize) -> String + Send + 'static,
    connections: usize,
) -> tokio::task::JoinHandle<Vec<String>> {
    tokio::spawn(async move {
        let mut seen = Vec::new();
        for index in 0..connections {
            let (mut sock, _) = listener.accept().await.unwrap();
            let request = read_request(&mut sock).await;
            let response = responder(&request, index);
            sock.write_all(response.as_bytes()).await.unwrap();
            seen.push(request);
        }
        seen
    })
}

fn redirect_to(location: &str) -> String {
    format!(
        "HTTP/1.1 302 Found\r\nLocation: {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        location
    )
}

#[tokio::test]
async fn test_follows_relative_redirect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    let server = serve_script(
        listener,
        |_, index| match index {
            0 => redirect_to("/next"),
            _ => plain_response(200, "OK", "", "landed"),
        },
        2,
    );
    let response = transport().fetch(&base).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.body_string().as_deref(), Some("landed"));
    assert_eq!(response.info().redirect_count, 1);
    assert_eq!(response.urls()[0].len(), 2);

    let requests = server.await.unwrap();
    assert!(requests[1].starts_with("GET /next HTTP/1.1\r\n"));
    // The hop that redirected becomes the referrer.
    assert!(requests[1].contains(&format!("Referer: {}", base)));
}

#[tokio::test]
async fn test_same_origin_redirect_reuses_connection() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/old", listener.local_addr().unwrap());
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        let first = read_request(&mut sock).await;
        sock.write_all(b"HTTP/1.1 302 Found\r\nLocation: /new\r\nContent-Length: 0\r\n\r\n")
            .await
            .unwrap();
        // The keep-alive redirect keeps the socket; the follow-up hop
        // arrives on it.
        let second = read_request(&mut sock).await;
        sock.write_all(plain_response(200, "OK", "", "moved").as_bytes())
            .await
            .unwrap();
        (first, second)
    });
    let response = transport().fetch(&base).await.unwrap();
    assert_eq!(response.body_string().as_deref(), Some("moved"));
    assert!(response.info().connection_reused);
    let (first, second) = server.await.unwrap();
    assert!(first.starts_with("GET /old HTTP/1.1\r\n"));
    assert!(second.starts_with("GET /new HTTP/1.1\r\n"));
}

#[tokio::test]
async fn test_302_downgrades_post_to_get() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/submit", listener.local_addr().unwrap());
    let server = serve_script(
        listener,
        |_, index| match index {
            0 => redirect_to("/result"),
            _ => plain_response(200, "OK", "", "ok"),
        },
        2,
    );
    transport()
        .fetch_one(Request::post(&base).body_bytes(&b"payload"[..]))
        .await
        .into_result()
        .unwrap();
    let requests = server.await.unwrap();
    assert!(requests[0].starts_with("POST /submit"));
    let follow_up = &requests[1];
    assert!(follow_up.starts_with("GET /result HTTP/1.1\r\n"));
    assert!(!follow_up.contains("Content-Length"));
}

#[tokio::test]
async fn test_307_preserves_method_and_body() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/submit", listener.local_addr().unwrap());
    let server = serve_script(
        listener,
        |_, index| match index {
            0 => "HTTP/1.1 307 Temporary Redirect\r\nLocation: /retry\r\n\
                  Content-Length: 0\r\nConnection: close\r\n\r\n"
                .to_string(),
            _ => plain_response(200, "OK", "", "ok"),
        },
        2,
    );
    transport()
        .fetch_one(Request::post(&base).body_bytes(&b"payload"[..]))
        .await
        .into_result()
        .unwrap();
    let requests = server.await.unwrap();
    let follow_up = &requests[1];
    assert!(follow_up.starts_with("POST /retry HTTP/1.1\r\n"));
    assert!(follow_up.ends_with("payload"));
}

#[tokio::test]
async fn test_redirect_budget_exhausted() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/start", listener.local_addr().unwrap());
    // Every hop points somewhere new, so only the budget can stop it.
    serve_script(
        listener,
        |_, index| redirect_to(&format!("/hop{}", index)),
        4,
    );
    let response = transport()
        .fetch_one(Request::new(&base).max_redirects(3))
        .await;
    assert!(matches!(
        response.error(),
        Some(NetError::TooManyRedirects(3))
    ));
}

#[tokio::test]
async fn test_self_redirect_detected_as_loop() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/loop", listener.local_addr().unwrap());
    serve_script(listener, |_, _| redirect_to("/loop"), 5);
    let response = transport().fetch_one(Request::new(&base)).await;
    assert!(matches!(response.error(), Some(NetError::EndlessLoop)));
}

#[tokio::test]
async fn test_auto_redirect_disabled_returns_302() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    serve_script(listener, |_, _| redirect_to("/elsewhere"), 1);
    let response = transport()
        .fetch_one(Request::new(&base).auto_redirect(false))
        .await
        .into_result()
        .unwrap();
    assert_eq!(response.status(), 302);
    assert_eq!(response.header("Location"), Some("/elsewhere"));
}

#[tokio::test]
async fn test_redirect_hook_can_cancel() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}/", listener.local_addr().unwrap());
    serve_script(listener, |_, _| redirect_to("/elsewhere"), 1);
    let response = transport()
        .fetch_one(Request::new(&base).on_redirect(|_| wirefetch::HookAction::Cancel))
        .await;
    assert!(matches!(response.error(), Some(NetError::Cancelled)));
}
