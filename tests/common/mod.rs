//! Shared helpers for the mock-server integration tests.

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;

/// Read one full HTTP request (head plus any `Content-Length` body) off a
/// server-side socket. Panics on malformed input; these are tests.
pub async fn read_request(sock: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let n = sock.read(&mut tmp).await.unwrap();
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&tmp[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..pos]).to_string();
            let body_len = head
                .lines()
                .find_map(|l| l.to_ascii_lowercase().strip_prefix("content-length:").map(str::to_string))
                .and_then(|v| v.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= pos + 4 + body_len {
                break;
            }
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Format a simple response with a `Content-Length` body.
pub fn plain_response(status: u16, reason: &str, extra_headers: &str, body: &str) -> String {
    format!(
        "HTTP/1.1 {} {}\r\n{}Content-Length: {}\r\n\r\n{}",
        status,
        reason,
        extra_headers,
        body.len(),
        body
    )
}
