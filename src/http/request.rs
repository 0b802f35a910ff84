//! Request description and per-request tuning knobs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use url::form_urlencoded;
use url::Url;

use crate::base::NetError;
use crate::http::auth::Credentials;
use crate::http::body::{ByteStream, FileStream, MemoryStream};
use crate::http::headers::HeaderMap;
use crate::http::response::Response;
use crate::socket::proxy::ProxySettings;

/// Default cap on automatically followed redirects per chain group.
pub const DEFAULT_MAX_REDIRECTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Method {
    #[default]
    Get,
    Head,
    Post,
    Put,
    Patch,
    Delete,
    Options,
    Trace,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Patch => "PATCH",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Trace => "TRACE",
        }
    }

    pub fn is_head(&self) -> bool {
        matches!(self, Method::Head)
    }

    /// Whether a request body may accompany this method. GET, HEAD, and
    /// TRACE requests go out bodiless even when one was attached.
    pub fn allows_body(&self) -> bool {
        !matches!(self, Method::Get | Method::Head | Method::Trace)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HttpVersion {
    V10,
    #[default]
    V11,
}

impl HttpVersion {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpVersion::V10 => "HTTP/1.0",
            HttpVersion::V11 => "HTTP/1.1",
        }
    }
}

/// What a decision hook tells the transport to do next.
pub enum HookAction {
    /// Proceed normally.
    Continue,
    /// Abandon the current exchange and run this request in its place. The
    /// response resets and a fresh redirect budget applies.
    Restart(Box<Request>),
    /// Stop the exchange; the response carries `NetError::Cancelled`.
    Cancel,
    /// Stop the exchange with a hook-originated error message.
    Fail(String),
}

type Decision<T> = Arc<dyn Fn(&T) -> HookAction + Send + Sync>;
type LineDecision = Arc<dyn Fn(&str) -> HookAction + Send + Sync>;
type Progress = Arc<dyn Fn(u64, Option<u64>) + Send + Sync>;

/// Observation and control points along an exchange. Each fires for every
/// response in the chain, including redirects and auth challenges.
#[derive(Clone, Default)]
pub struct Hooks {
    /// One raw header line (status line included), before parsing.
    pub(crate) on_header_line: Option<LineDecision>,
    /// The response head is complete; body bytes have not been read.
    pub(crate) on_header: Option<Decision<Response>>,
    /// A redirect is about to be followed to this URL.
    pub(crate) on_redirect: Option<Decision<Url>>,
    /// The exchange finished; fires before the response is handed back.
    pub(crate) on_complete: Option<Decision<Response>>,
    /// Body bytes sent so far / total (if known).
    pub(crate) on_upload: Option<Progress>,
    /// Body bytes received so far / total (if known).
    pub(crate) on_download: Option<Progress>,
    /// The exchange failed. Purely observational.
    pub(crate) on_error: Option<Arc<dyn Fn(&NetError) + Send + Sync>>,
}

impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_header_line", &self.on_header_line.is_some())
            .field("on_header", &self.on_header.is_some())
            .field("on_redirect", &self.on_redirect.is_some())
            .field("on_complete", &self.on_complete.is_some())
            .field("on_upload", &self.on_upload.is_some())
            .field("on_download", &self.on_download.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// One HTTP request and everything governing how it is carried out.
pub struct Request {
    pub(crate) method: Method,
    pub(crate) url: Option<String>,
    pub(crate) version: HttpVersion,
    pub(crate) headers: HeaderMap,
    pub(crate) queries: Vec<(String, String)>,
    pub(crate) body: Option<Box<dyn ByteStream>>,
    pub(crate) credentials: Option<Credentials>,
    /// Send `Authorization: Basic` preemptively instead of waiting for a 401.
    pub(crate) always_auth: bool,
    pub(crate) proxy: Option<ProxySettings>,
    /// Wall-clock budget for the whole exchange in milliseconds; 0 disables.
    pub(crate) timeout_ms: u64,
    /// Extra connect attempts after the first connect failure.
    pub(crate) try_times: u32,
    pub(crate) max_redirects: u32,
    pub(crate) auto_redirect: bool,
    pub(crate) auto_referrer: bool,
    pub(crate) auto_cookie: bool,
    /// Treat status >= 400 as a normal response instead of an error.
    pub(crate) allow_error: bool,
    /// Advertise `Accept-Encoding: gzip, deflate` and decode the body.
    pub(crate) use_encoding: bool,
    pub(crate) ssl_verify: bool,
    /// Disable Nagle's algorithm on the connection. On by default.
    pub(crate) tcp_nodelay: bool,
    pub(crate) save_to: Option<PathBuf>,
    pub(crate) hooks: Hooks,
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::Get,
            url: None,
            version: HttpVersion::V11,
            headers: HeaderMap::new(),
            queries: Vec::new(),
            body: None,
            credentials: None,
            always_auth: false,
            proxy: None,
            timeout_ms: 0,
            try_times: 0,
            max_redirects: DEFAULT_MAX_REDIRECTS,
            auto_redirect: true,
            auto_referrer: true,
            auto_cookie: true,
            allow_error: false,
            use_encoding: false,
            ssl_verify: true,
            tcp_nodelay: true,
            save_to: None,
            hooks: Hooks::default(),
        }
    }
}

impl Request {
    pub fn new(url: impl AsRef<str>) -> Self {
        Self { url: Some(url.as_ref().to_string()), ..Self::default() }
    }

    pub fn get(url: impl AsRef<str>) -> Self {
        Self::new(url)
    }

    pub fn post(url: impl AsRef<str>) -> Self {
        Self { method: Method::Post, ..Self::new(url) }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn version(mut self, version: HttpVersion) -> Self {
        self.version = version;
        self
    }

    /// Append a header (repeatable keys accumulate).
    pub fn header(mut self, key: &str, value: impl Into<String>) -> Self {
        self.headers.append(key, value);
        self
    }

    /// Append a query parameter to whatever the URL already carries.
    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.queries.push((key.into(), value.into()));
        self
    }

    pub fn body_bytes(mut self, data: impl Into<Vec<u8>>) -> Self {
        self.body = Some(Box::new(MemoryStream::from_bytes(data)));
        self
    }

    /// Stream the request body from a file on disk.
    pub fn body_file(mut self, path: impl AsRef<Path>) -> Result<Self, NetError> {
        let stream = FileStream::open(path)?;
        self.body = Some(Box::new(stream));
        Ok(self)
    }

    pub fn body_stream(mut self, stream: Box<dyn ByteStream>) -> Self {
        self.body = Some(stream);
        self
    }

    pub fn auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials::new(username, password));
        self
    }

    pub fn always_auth(mut self, on: bool) -> Self {
        self.always_auth = on;
        self
    }

    pub fn proxy(mut self, spec: &str) -> Result<Self, NetError> {
        self.proxy = Some(ProxySettings::parse(spec)?);
        Ok(self)
    }

    pub fn timeout_ms(mut self, ms: u64) -> Self {
        self.timeout_ms = ms;
        self
    }

    /// Extra connect attempts on connect failure (0 means fail immediately).
    pub fn try_times(mut self, n: u32) -> Self {
        self.try_times = n;
        self
    }

    /// Cap on automatically followed redirects per chain; 0 means unlimited.
    pub fn max_redirects(mut self, n: u32) -> Self {
        self.max_redirects = n;
        self
    }

    pub fn auto_redirect(mut self, on: bool) -> Self {
        self.auto_redirect = on;
        self
    }

    pub fn auto_referrer(mut self, on: bool) -> Self {
        self.auto_referrer = on;
        self
    }

    pub fn auto_cookie(mut self, on: bool) -> Self {
        self.auto_cookie = on;
        self
    }

    pub fn allow_error(mut self, on: bool) -> Self {
        self.allow_error = on;
        self
    }

    pub fn use_encoding(mut self, on: bool) -> Self {
        self.use_encoding = on;
        self
    }

    /// Disable TLS certificate and hostname verification.
    pub fn danger_disable_ssl_verify(mut self) -> Self {
        self.ssl_verify = false;
        self
    }

    pub fn tcp_nodelay(mut self, on: bool) -> Self {
        self.tcp_nodelay = on;
        self
    }

    /// Write the response body to this file instead of memory.
    pub fn save_to(mut self, path: impl AsRef<Path>) -> Self {
        self.save_to = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn on_header_line(
        mut self,
        hook: impl Fn(&str) -> HookAction + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_header_line = Some(Arc::new(hook));
        self
    }

    pub fn on_header(
        mut self,
        hook: impl Fn(&Response) -> HookAction + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_header = Some(Arc::new(hook));
        self
    }

    pub fn on_redirect(
        mut self,
        hook: impl Fn(&Url) -> HookAction + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_redirect = Some(Arc::new(hook));
        self
    }

    pub fn on_complete(
        mut self,
        hook: impl Fn(&Response) -> HookAction + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_complete = Some(Arc::new(hook));
        self
    }

    pub fn on_upload(mut self, hook: impl Fn(u64, Option<u64>) + Send + Sync + 'static) -> Self {
        self.hooks.on_upload = Some(Arc::new(hook));
        self
    }

    pub fn on_download(
        mut self,
        hook: impl Fn(u64, Option<u64>) + Send + Sync + 'static,
    ) -> Self {
        self.hooks.on_download = Some(Arc::new(hook));
        self
    }

    pub fn on_error(mut self, hook: impl Fn(&NetError) + Send + Sync + 'static) -> Self {
        self.hooks.on_error = Some(Arc::new(hook));
        self
    }

    /// Parse and validate the request URL. Only `http` and `https` targets
    /// are accepted, and the host must be present.
    pub(crate) fn target(&self) -> Result<Url, NetError> {
        let raw = self
            .url
            .as_deref()
            .ok_or_else(|| NetError::InvalidUrl("no url set".into()))?;
        let url = Url::parse(raw)
            .map_err(|e| NetError::InvalidUrl(format!("{}: {}", raw, e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(NetError::InvalidUrl(format!(
                    "unsupported scheme: {}",
                    other
                )))
            }
        }
        if url.host_str().is_none() {
            return Err(NetError::InvalidUrl(format!("{}: host missing", raw)));
        }
        Ok(url)
    }

    /// Request target for the request line: path plus merged query string.
    pub(crate) fn request_target(&self, url: &Url) -> String {
        let mut target = url.path().to_string();
        let mut query = url.query().unwrap_or("").to_string();
        if !self.queries.is_empty() {
            let mut appended = form_urlencoded::Serializer::new(String::new());
            for (key, value) in &self.queries {
                appended.append_pair(key, value);
            }
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str(&appended.finish());
        }
        if !query.is_empty() {
            target.push('?');
            target.push_str(&query);
        }
        target
    }
}

impl std::fmt::Debug for Request {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("has_body", &self.body.is_some())
            .field("proxy", &self.proxy)
            .field("hooks", &self.hooks)
            .finish()
    }
}
