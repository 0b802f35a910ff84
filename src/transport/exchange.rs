//! One exchange: a request, its redirects, auth retries, and restarts,
//! driven to a final response.

use std::time::{Duration, Instant};

use tracing::{debug, warn};
use url::Url;

use crate::base::NetError;
use crate::cookies::CookieJar;
use crate::http::auth::{self, Credentials};
use crate::http::body::{BodySink, ByteStream};
use crate::http::headers::HeaderMap;
use crate::http::redirect;
use crate::http::request::{HookAction, Method, Request};
use crate::http::response::Response;
use crate::http::serializer::RequestSerializer;
use crate::socket::client::Connection;
use crate::socket::connectjob::{establish, ConnectParams};
use crate::socket::pool::{origin_key, ConnectionPool};
use crate::socket::proxy::{ProxyKind, ProxySettings};
use crate::transport::context::AttemptContext;
use crate::transport::scheduler::TransportConfig;

const READ_BUFFER: usize = 32 * 1024;

pub(crate) struct Exchange<'a> {
    pub config: &'a TransportConfig,
    pub pool: &'a ConnectionPool,
}

/// A live connection held between hops of one exchange, with the identity
/// it was established for. Redirects, auth retries, and restarts that stay
/// on the same origin pick it up instead of reconnecting.
struct CarriedConnection {
    conn: Connection,
    tls: bool,
    host: String,
    port: u16,
    proxy: Option<(ProxyKind, String, u16)>,
    poolable: bool,
    key: u64,
}

impl CarriedConnection {
    fn matches(&self, tls: bool, host: &str, port: u16, proxy: Option<&ProxySettings>) -> bool {
        let proxy_same = match (&self.proxy, proxy) {
            (None, None) => true,
            (Some((kind, h, p)), Some(s)) => *kind == s.kind && *h == s.host && *p == s.port,
            _ => false,
        };
        self.tls == tls && self.host == host && self.port == port && proxy_same
    }
}

impl Exchange<'_> {
    /// Run a request to completion. Errors land in the response's error
    /// slot rather than propagating, so one failed exchange never disturbs
    /// its siblings.
    pub async fn run(&self, mut request: Request) -> Response {
        let sink = match &request.save_to {
            Some(path) => match BodySink::file(path) {
                Ok(sink) => sink,
                Err(e) => {
                    let mut response = Response::new(BodySink::memory());
                    let err = NetError::from(e);
                    if let Some(hook) = &request.hooks.on_error {
                        hook(&err);
                    }
                    response.error = Some(err);
                    return response;
                }
            },
            None => BodySink::memory(),
        };
        let mut response = Response::new(sink);
        let started = Instant::now();
        let budget = request.timeout_ms;
        let result = if budget == 0 {
            self.drive(&mut request, &mut response).await
        } else {
            match tokio::time::timeout(
                Duration::from_millis(budget),
                self.drive(&mut request, &mut response),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(NetError::Timeout(budget)),
            }
        };
        response.info.duration_ms = started.elapsed().as_millis() as u64;
        if let Err(err) = result {
            warn!(error = %err, "exchange failed");
            if let Some(hook) = &request.hooks.on_error {
                hook(&err);
            }
            response.body.discard_on_abort();
            response.error = Some(err);
        }
        response
    }

    async fn drive(
        &self,
        request: &mut Request,
        response: &mut Response,
    ) -> Result<(), NetError> {
        let mut jar = CookieJar::new();
        let mut url = request.target()?;
        let mut body = request.body.take();
        let mut auth_header: Option<String> = None;
        let mut auth_retried = false;
        let mut redirects: u32 = 0;
        let mut carry: Option<CarriedConnection> = None;
        response.reset_for_hop(url.as_str());

        loop {
            let mut ctx = self
                .perform_hop(
                    request,
                    response,
                    &url,
                    body.take(),
                    auth_header.as_deref(),
                    &jar,
                    &mut carry,
                )
                .await?;
            let mut restart = ctx.restart.take();
            body = ctx.serializer.into_body();

            if restart.is_none() {
                let host = url.host_str().unwrap_or_default().to_string();
                if request.auto_cookie {
                    for line in response.headers().all("Set-Cookie") {
                        jar.ingest(line, &host);
                    }
                }
                let status = response.status();

                // One automatic retry answers a 401 challenge.
                if status == 401 && request.credentials.is_some() && !auth_retried {
                    if response.may_loop(url.as_str(), self.config.loop_threshold) {
                        return Err(NetError::EndlessLoop);
                    }
                    let challenge = response
                        .header("WWW-Authenticate")
                        .ok_or_else(|| {
                            NetError::Protocol("401 without WWW-Authenticate".into())
                        })?
                        .to_string();
                    let Some(creds) = request.credentials.as_ref() else {
                        return Err(NetError::HttpStatus(status));
                    };
                    let upload = source_bytes(&mut body)?;
                    let target = request.request_target(&url);
                    auth_header = Some(auth::answer_challenge(
                        &challenge,
                        creds,
                        request.method.as_str(),
                        &target,
                        upload.as_deref(),
                    )?);
                    auth_retried = true;
                    debug!(url = %url, "retrying with credentials");
                    response.body.truncate()?;
                    response.reset_for_hop(url.as_str());
                    continue;
                }

                if redirect::is_redirect(status) && request.auto_redirect {
                    if let Some(location) = response.header("Location").map(str::to_string)
                    {
                        if response.may_loop(url.as_str(), self.config.loop_threshold) {
                            return Err(NetError::EndlessLoop);
                        }
                        redirects += 1;
                        // A budget of zero means unlimited.
                        if request.max_redirects > 0 && redirects > request.max_redirects {
                            return Err(NetError::TooManyRedirects(request.max_redirects));
                        }
                        let next = redirect::resolve_location(&url, &location)?;
                        if let Some(hook) = request.hooks.on_redirect.clone() {
                            match hook(&next) {
                                HookAction::Continue => {}
                                HookAction::Restart(r) => restart = Some(r),
                                HookAction::Cancel => return Err(NetError::Cancelled),
                                HookAction::Fail(message) => {
                                    return Err(NetError::Callback {
                                        hook: "on_redirect",
                                        message,
                                    })
                                }
                            }
                        }
                        if restart.is_none() {
                            debug!(status, from = %url, to = %next, "following redirect");
                            if !redirect::preserves_method(status) {
                                request.method = Method::Get;
                                body = None;
                            }
                            if request.auto_referrer {
                                request.headers.set("Referer", url.as_str());
                            }
                            // Credentials never travel to a different host.
                            if next.host_str() != url.host_str() {
                                auth_header = None;
                            }
                            // A userinfo component on the target replaces the
                            // stored credentials.
                            if !next.username().is_empty() {
                                request.credentials = Some(Credentials::new(
                                    next.username(),
                                    next.password().unwrap_or(""),
                                ));
                                auth_retried = false;
                            }
                            response.info.redirect_count += 1;
                            response.body.truncate()?;
                            response.reset_for_hop(next.as_str());
                            url = next;
                            continue;
                        }
                    }
                }

                if restart.is_none() {
                    if status >= 400 && !request.allow_error {
                        return Err(NetError::HttpStatus(status));
                    }
                    response.sniff_charset();
                    if let Some(hook) = request.hooks.on_complete.clone() {
                        match hook(response) {
                            HookAction::Continue => {}
                            HookAction::Restart(r) => restart = Some(r),
                            HookAction::Cancel => return Err(NetError::Cancelled),
                            HookAction::Fail(message) => {
                                return Err(NetError::Callback {
                                    hook: "on_complete",
                                    message,
                                })
                            }
                        }
                    }
                }
            }

            match restart {
                Some(next_request) => {
                    *request = *next_request;
                    body = request.body.take();
                    url = request.target()?;
                    auth_header = None;
                    auth_retried = false;
                    redirects = 0;
                    response.body.truncate()?;
                    response.reset_for_restart(url.as_str());
                }
                None => {
                    request.body = body;
                    if let Some(mut carried) = carry.take() {
                        if carried.poolable && response.status() != 401 {
                            self.pool.checkin(carried.key, carried.conn);
                        } else {
                            carried.conn.shutdown().await;
                        }
                    }
                    return Ok(());
                }
            }
        }
    }

    /// One request/response round trip over one connection.
    #[allow(clippy::too_many_arguments)]
    async fn perform_hop(
        &self,
        request: &Request,
        response: &mut Response,
        url: &Url,
        body: Option<Box<dyn ByteStream>>,
        auth_header: Option<&str>,
        jar: &CookieJar,
        carry: &mut Option<CarriedConnection>,
    ) -> Result<AttemptContext, NetError> {
        let host = url
            .host_str()
            .ok_or_else(|| NetError::InvalidUrl(url.to_string()))?
            .to_string();
        let tls = url.scheme() == "https";
        let port = url.port_or_known_default().unwrap_or(if tls { 443 } else { 80 });
        // GET, HEAD, and TRACE never carry a body, whatever was attached.
        let body = if request.method.allows_body() { body } else { None };
        // An HTTP proxy relays plain requests in absolute-URI form; only TLS
        // targets get a CONNECT tunnel.
        let forward_proxy =
            matches!(&request.proxy, Some(p) if p.kind == ProxyKind::Http) && !tls;
        let poolable = !tls && request.credentials.is_none() && request.proxy.is_none();
        let key = origin_key(&host, port);

        let mut conn = match carry.take() {
            Some(c) if c.matches(tls, &host, port, request.proxy.as_ref()) && c.conn.is_alive() => {
                let mut conn = c.conn;
                conn.mark_reused();
                conn
            }
            other => {
                if let Some(mut c) = other {
                    c.conn.shutdown().await;
                }
                let pooled = if poolable { self.pool.checkout(key) } else { None };
                match pooled {
                    Some(conn) => conn,
                    None => {
                        self.connect_with_retries(request, response, &host, port, tls).await?
                    }
                }
            }
        };
        response.info.connection_reused = conn.was_reused();
        response.info.remote_addr = conn.remote_addr();

        let host_value = if (tls && port != 443) || (!tls && port != 80) {
            format!("{}:{}", host, port)
        } else {
            host.clone()
        };
        let headers = self.assemble_headers(request, url, &host_value, tls, auth_header, jar, forward_proxy);
        let target = if forward_proxy {
            format!("http://{}{}", host_value, request.request_target(url))
        } else {
            request.request_target(url)
        };

        let serializer = RequestSerializer::new(
            request.method.as_str(),
            &target,
            request.version.as_str(),
            &headers,
            body,
        )?;
        let mut ctx = AttemptContext::new(serializer);

        // Write until the request is fully serialized; short writes resume.
        let mut last_reported = 0u64;
        loop {
            let n = {
                let pending = ctx.serializer.pending()?;
                if pending.is_empty() {
                    break;
                }
                conn.write(pending).await.map_err(NetError::from)?
            };
            if n == 0 {
                return Err(NetError::RemoteClosed);
            }
            ctx.serializer.advance(n);
            response.info.bytes_sent += n as u64;
            if let Some(hook) = &request.hooks.on_upload {
                let (sent, total) = ctx.serializer.progress();
                if sent > last_reported {
                    last_reported = sent;
                    hook(sent, total);
                }
            }
        }

        let mut buf = vec![0u8; READ_BUFFER];
        while !ctx.complete && ctx.restart.is_none() {
            let n = conn.read(&mut buf).await.map_err(NetError::from)?;
            if n == 0 {
                let events = ctx.parser.finish_eof()?;
                ctx.apply_events(events, request, response)?;
                break;
            }
            response.info.bytes_received += n as u64;
            let events = ctx.parser.feed(&buf[..n])?;
            ctx.apply_events(events, request, response)?;
        }

        let close_requested = response
            .header("Connection")
            .map(|v| v.eq_ignore_ascii_case("close"))
            .unwrap_or(false)
            || response.version() == "1.0";
        let clean =
            ctx.complete && ctx.restart.is_none() && !ctx.eof_delimited && !close_requested;
        if clean {
            // Held for the next same-identity hop; the drive loop pools or
            // closes it once the exchange ends.
            *carry = Some(CarriedConnection {
                conn,
                tls,
                host,
                port,
                proxy: request.proxy.as_ref().map(|p| (p.kind, p.host.clone(), p.port)),
                poolable,
                key,
            });
        } else {
            conn.shutdown().await;
        }
        Ok(ctx)
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble_headers(
        &self,
        request: &Request,
        url: &Url,
        host_value: &str,
        tls: bool,
        auth_header: Option<&str>,
        jar: &CookieJar,
        forward_proxy: bool,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.set("Host", host_value);
        for (key, value) in request.headers.iter() {
            if key == "Host" {
                continue;
            }
            headers.append(key, value);
        }
        if !headers.contains("Accept") {
            headers.set("Accept", "*/*");
        }
        if !headers.contains("User-Agent") {
            headers.set(
                "User-Agent",
                concat!("wirefetch/", env!("CARGO_PKG_VERSION")),
            );
        }
        if request.use_encoding && !headers.contains("Accept-Encoding") {
            headers.set("Accept-Encoding", "gzip, deflate");
        }
        if request.auto_cookie {
            if let Some(host) = url.host_str() {
                if let Some(value) = jar.build(host, url.path(), tls) {
                    // A caller-supplied Cookie header and the jar combine.
                    match headers.first("Cookie").map(str::to_string) {
                        Some(existing) => {
                            headers.set("Cookie", format!("{}; {}", existing, value))
                        }
                        None => headers.set("Cookie", value),
                    }
                }
            }
        }
        match auth_header {
            Some(value) => headers.set("Authorization", value),
            None => {
                if request.always_auth {
                    if let Some(creds) = &request.credentials {
                        headers.set("Authorization", auth::basic(creds));
                    }
                }
            }
        }
        if forward_proxy {
            if let Some(proxy) = &request.proxy {
                if let Some(value) = proxy.basic_authorization() {
                    headers.set("Proxy-Authorization", value);
                }
            }
        }
        headers
    }

    /// Connect, retrying on connect-class failures up to the request's
    /// retry budget.
    async fn connect_with_retries(
        &self,
        request: &Request,
        response: &mut Response,
        host: &str,
        port: u16,
        tls: bool,
    ) -> Result<Connection, NetError> {
        let mut attempts_left = request.try_times;
        loop {
            let params = ConnectParams {
                host,
                port,
                tls,
                ssl_verify: request.ssl_verify,
                ca_bundle: self.config.ca_bundle.as_deref(),
                proxy: request.proxy.as_ref(),
                pins: &self.config.resolve_pins,
                nodelay: request.tcp_nodelay,
            };
            let started = Instant::now();
            match establish(params).await {
                Ok(conn) => {
                    response.info.connect_ms = started.elapsed().as_millis() as u64;
                    return Ok(conn);
                }
                Err(e) if e.is_retryable() && attempts_left > 0 => {
                    attempts_left -= 1;
                    response.info.retry_count += 1;
                    warn!(host, port, error = %e, "connect failed, retrying");
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Buffer a seekable upload source, leaving it rewound. Digest `auth-int`
/// needs the body hash before the retry goes out.
fn source_bytes(
    body: &mut Option<Box<dyn ByteStream>>,
) -> Result<Option<Vec<u8>>, NetError> {
    let Some(stream) = body.as_mut() else { return Ok(None) };
    if !stream.seekable() {
        return Ok(None);
    }
    stream.rewind()?;
    let mut out = Vec::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = stream.read(&mut buf)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    stream.rewind()?;
    Ok(Some(out))
}
