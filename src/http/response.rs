//! Response accumulation and bookkeeping.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::net::SocketAddr;
use std::path::Path;

use crate::base::NetError;
use crate::http::body::BodySink;
use crate::http::headers::HeaderMap;

/// Counters and timings recorded along an exchange.
#[derive(Debug, Clone, Default)]
pub struct Info {
    pub duration_ms: u64,
    pub connect_ms: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub redirect_count: u32,
    pub retry_count: u32,
    pub connection_reused: bool,
    pub remote_addr: Option<SocketAddr>,
}

/// The accumulating result of one exchange.
///
/// A response survives redirects and auth retries: each hop resets the head
/// fields and appends its URL to the current chain group. Hook-driven
/// restarts open a new chain group with a fresh redirect budget.
pub struct Response {
    status: u16,
    reason: String,
    version: String,
    headers: HeaderMap,
    content_type: Option<String>,
    charset: Option<String>,
    pub(crate) body: BodySink,
    pub(crate) error: Option<NetError>,
    pub(crate) info: Info,
    /// Visited URLs, grouped per restart.
    urls: Vec<Vec<String>>,
    /// Response signature occurrence counts, for endless-loop detection.
    loop_counts: HashMap<u64, u32>,
}

impl Response {
    pub(crate) fn new(body: BodySink) -> Self {
        Self {
            status: 0,
            reason: String::new(),
            version: String::new(),
            headers: HeaderMap::new(),
            content_type: None,
            charset: None,
            body,
            error: None,
            info: Info::default(),
            urls: vec![Vec::new()],
            loop_counts: HashMap::new(),
        }
    }

    /// Ingest one header line. The first line of a hop must be the status
    /// line; subsequent `Key: Value` lines land in the header map. Lines
    /// without a colon are ignored, as real servers do emit them.
    pub(crate) fn put_header_line(&mut self, line: &str) -> Result<(), NetError> {
        if self.status == 0 {
            return self.put_status_line(line);
        }
        let Some((key, value)) = line.split_once(':') else {
            return Ok(());
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            return Ok(());
        }
        self.headers.append(key, value);
        if key.eq_ignore_ascii_case("content-type") {
            self.put_content_type(value);
        }
        Ok(())
    }

    fn put_status_line(&mut self, line: &str) -> Result<(), NetError> {
        let mut parts = line.splitn(3, ' ');
        let version = parts.next().unwrap_or("");
        let code = parts.next().and_then(|c| c.parse::<u16>().ok());
        match (version.strip_prefix("HTTP/"), code) {
            (Some(v), Some(code)) if (100..600).contains(&code) => {
                self.version = v.to_string();
                self.status = code;
                self.reason = parts.next().unwrap_or("").to_string();
                Ok(())
            }
            _ => Err(NetError::Protocol(format!("malformed status line: {}", line))),
        }
    }

    fn put_content_type(&mut self, value: &str) {
        let mut segments = value.split(';');
        self.content_type = segments.next().map(|s| s.trim().to_ascii_lowercase());
        for segment in segments {
            if let Some((key, v)) = segment.split_once('=') {
                if key.trim().eq_ignore_ascii_case("charset") {
                    self.charset =
                        Some(v.trim().trim_matches('"').to_ascii_lowercase());
                }
            }
        }
    }

    /// Clear per-hop head state before following a redirect or retrying
    /// after an auth challenge. The URL joins the current chain group.
    pub(crate) fn reset_for_hop(&mut self, url: &str) {
        self.status = 0;
        self.reason.clear();
        self.version.clear();
        self.headers.clear();
        self.content_type = None;
        self.charset = None;
        if let Some(group) = self.urls.last_mut() {
            group.push(url.to_string());
        }
    }

    /// A hook-driven restart: new chain group, fresh redirect budget.
    pub(crate) fn reset_for_restart(&mut self, url: &str) {
        self.urls.push(Vec::new());
        self.loop_counts.clear();
        self.reset_for_hop(url);
    }

    /// Record the current hop signature and report whether it has now been
    /// seen more than `threshold` times, which marks a redirect/auth loop.
    pub(crate) fn may_loop(&mut self, url: &str, threshold: u32) -> bool {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        url.hash(&mut hasher);
        self.version.hash(&mut hasher);
        self.status.hash(&mut hasher);
        self.reason.hash(&mut hasher);
        let count = self.loop_counts.entry(hasher.finish()).or_insert(0);
        *count += 1;
        *count > threshold
    }

    /// When the server names no charset and the body looks like HTML, scan
    /// its head for a `charset=` declaration.
    pub(crate) fn sniff_charset(&mut self) {
        if self.charset.is_some() {
            return;
        }
        match self.content_type.as_deref() {
            Some("text/html") | Some("application/xhtml+xml") => {}
            _ => return,
        }
        let Some(bytes) = self.body_bytes() else { return };
        let head = &bytes[..bytes.len().min(1024)];
        let text = String::from_utf8_lossy(head).to_ascii_lowercase();
        if let Some(pos) = text.find("charset=") {
            let rest = &text[pos + "charset=".len()..];
            let value: String = rest
                .trim_start_matches(['"', '\''])
                .chars()
                .take_while(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
                .collect();
            if !value.is_empty() {
                self.charset = Some(value);
            }
        }
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// HTTP version of the final hop, e.g. `"1.1"`.
    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.first(key)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.content_type.as_deref()
    }

    pub fn charset(&self) -> Option<&str> {
        self.charset.as_deref()
    }

    pub fn info(&self) -> &Info {
        &self.info
    }

    /// Every URL visited, grouped per restart. The last entry of the last
    /// group is the URL that produced the final head.
    pub fn urls(&self) -> &[Vec<String>] {
        &self.urls
    }

    pub fn error(&self) -> Option<&NetError> {
        self.error.as_ref()
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.status > 0 && self.status < 400
    }

    /// Body bytes, when collected in memory. `None` for file targets.
    pub fn body_bytes(&self) -> Option<&[u8]> {
        match &self.body {
            BodySink::Memory(m) => Some(m.bytes()),
            BodySink::File(_) => None,
        }
    }

    /// Lossy UTF-8 view of an in-memory body.
    pub fn body_string(&self) -> Option<String> {
        self.body_bytes()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }

    /// Path the body was written to, for `save_to` requests.
    pub fn saved_path(&self) -> Option<&Path> {
        match &self.body {
            BodySink::File(f) => Some(f.path()),
            BodySink::Memory(_) => None,
        }
    }

    /// Convert into a hard result, surfacing any recorded transport error.
    pub fn into_result(mut self) -> Result<Self, NetError> {
        match self.error.take() {
            Some(err) => Err(err),
            None => Ok(self),
        }
    }
}

impl std::fmt::Debug for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("reason", &self.reason)
            .field("version", &self.version)
            .field("content_type", &self.content_type)
            .field("charset", &self.charset)
            .field("error", &self.error)
            .field("urls", &self.urls)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> Response {
        Response::new(BodySink::memory())
    }

    #[test]
    fn test_status_line_parsing() {
        let mut r = response();
        r.put_header_line("HTTP/1.1 301 Moved Permanently").unwrap();
        assert_eq!(r.status(), 301);
        assert_eq!(r.version(), "1.1");
        assert_eq!(r.reason(), "Moved Permanently");
    }

    #[test]
    fn test_malformed_status_line() {
        let mut r = response();
        assert!(r.put_header_line("garbage").is_err());
        assert!(response().put_header_line("HTTP/1.1 999999 huh").is_err());
    }

    #[test]
    fn test_content_type_and_charset_extraction() {
        let mut r = response();
        r.put_header_line("HTTP/1.1 200 OK").unwrap();
        r.put_header_line("Content-Type: Text/HTML; charset=UTF-8").unwrap();
        assert_eq!(r.content_type(), Some("text/html"));
        assert_eq!(r.charset(), Some("utf-8"));
    }

    #[test]
    fn test_colonless_lines_are_skipped() {
        let mut r = response();
        r.put_header_line("HTTP/1.1 200 OK").unwrap();
        r.put_header_line("this is not a header").unwrap();
        assert!(r.headers().is_empty());
    }

    #[test]
    fn test_hop_reset_keeps_url_groups() {
        let mut r = response();
        r.reset_for_hop("http://a/1");
        r.put_header_line("HTTP/1.1 302 Found").unwrap();
        r.reset_for_hop("http://a/2");
        assert_eq!(r.status(), 0);
        r.reset_for_restart("http://b/1");
        assert_eq!(r.urls().len(), 2);
        assert_eq!(r.urls()[0], vec!["http://a/1", "http://a/2"]);
        assert_eq!(r.urls()[1], vec!["http://b/1"]);
    }

    #[test]
    fn test_loop_detection_counts_signatures() {
        let mut r = response();
        r.put_header_line("HTTP/1.1 302 Found").unwrap();
        assert!(!r.may_loop("http://a/x", 2));
        assert!(!r.may_loop("http://a/x", 2));
        assert!(r.may_loop("http://a/x", 2));
        // Different target is a different signature.
        assert!(!r.may_loop("http://a/y", 2));
    }

    #[test]
    fn test_charset_sniffing_from_html() {
        let mut r = response();
        r.put_header_line("HTTP/1.1 200 OK").unwrap();
        r.put_header_line("Content-Type: text/html").unwrap();
        r.body
            .write_all(b"<html><head><meta charset=\"gb2312\"></head></html>")
            .unwrap();
        r.sniff_charset();
        assert_eq!(r.charset(), Some("gb2312"));
    }

    #[test]
    fn test_sniffing_skips_non_html() {
        let mut r = response();
        r.put_header_line("HTTP/1.1 200 OK").unwrap();
        r.put_header_line("Content-Type: application/json").unwrap();
        r.body.write_all(b"{\"charset=fake\":1}").unwrap();
        r.sniff_charset();
        assert_eq!(r.charset(), None);
    }

    #[test]
    fn test_into_result_surfaces_error() {
        let mut r = response();
        r.error = Some(NetError::RemoteClosed);
        assert!(matches!(r.into_result(), Err(NetError::RemoteClosed)));
        assert!(response().into_result().is_ok());
    }
}
