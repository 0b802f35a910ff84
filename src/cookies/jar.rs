//! Per-exchange cookie store.
//!
//! Parses `Set-Cookie` response lines and rebuilds the outgoing `Cookie`
//! header. Matching follows the original engine's rules rather than full
//! RFC 6265: a `Domain` attribute must name the responding host or a parent
//! of it, an attribute-less cookie binds to the exact host with no subdomain
//! matching, and a `secure` attribute is honored even when set over plain
//! HTTP (libcurl behavior).

use std::time::{SystemTime, UNIX_EPOCH};

use time::format_description::well_known::Rfc2822;
use time::OffsetDateTime;

/// One stored cookie.
///
/// Identity for replacement and removal is
/// `(name, path, domain, explicit_domain)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    /// True when the cookie carried a `Domain` attribute, enabling subdomain
    /// matching on `build`.
    pub explicit_domain: bool,
    pub path: String,
    /// Unix epoch seconds; `None` for session cookies.
    pub expires_at: Option<i64>,
    pub secure: bool,
}

impl Cookie {
    fn same_identity(&self, other: &Cookie) -> bool {
        self.name == other.name
            && self.path == other.path
            && self.domain == other.domain
            && self.explicit_domain == other.explicit_domain
    }

    /// `Max-Age=0` lands exactly on `now`, so the boundary counts as expired.
    fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// Cookie store scoped to one exchange (plus any redirects and restarts it
/// spawns).
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Vec<Cookie>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.cookies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
    }

    /// Ingest one `Set-Cookie` line received from `responding_host`.
    ///
    /// Returns false when the line is malformed or its `Domain` attribute
    /// does not cover the responding host.
    pub fn ingest(&mut self, set_cookie: &str, responding_host: &str) -> bool {
        self.ingest_at(set_cookie, responding_host, now_epoch())
    }

    fn ingest_at(&mut self, set_cookie: &str, responding_host: &str, now: i64) -> bool {
        let Some(mut cookie) = parse_set_cookie(set_cookie, responding_host, now) else {
            return false;
        };
        if cookie.is_expired(now) {
            // A past expiry deletes any matching entry instead of inserting.
            self.cookies.retain(|c| !c.same_identity(&cookie));
            return true;
        }
        if let Some(existing) = self.cookies.iter_mut().find(|c| c.same_identity(&cookie)) {
            std::mem::swap(existing, &mut cookie);
        } else {
            self.cookies.push(cookie);
        }
        true
    }

    /// Serialize the cookies applicable to a request as a `Cookie` header
    /// value (`name=value` pairs joined by `"; "`), or `None` when nothing
    /// matches.
    pub fn build(&self, host: &str, path: &str, secure: bool) -> Option<String> {
        self.build_at(host, path, secure, now_epoch())
    }

    fn build_at(&self, host: &str, path: &str, secure: bool, now: i64) -> Option<String> {
        let mut matched: Vec<(usize, &Cookie)> = self
            .cookies
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                if c.secure && !secure {
                    return false;
                }
                if c.is_expired(now) {
                    return false;
                }
                if !path.starts_with(&c.path) {
                    return false;
                }
                c.domain == host
                    || (c.explicit_domain && host.ends_with(&format!(".{}", c.domain)))
            })
            .collect();
        if matched.is_empty() {
            return None;
        }
        // Longest path first; insertion order breaks ties. On duplicate names
        // only the first-sorted entry survives, so the cookie bound deepest
        // in the tree wins.
        matched.sort_by(|(ai, a), (bi, b)| {
            b.path.len().cmp(&a.path.len()).then_with(|| ai.cmp(bi))
        });
        let mut pairs: Vec<(String, String)> = Vec::new();
        for (_, cookie) in matched {
            if pairs.iter().any(|(name, _)| *name == cookie.name) {
                continue;
            }
            pairs.push((cookie.name.clone(), cookie.value.clone()));
        }
        Some(
            pairs
                .into_iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect::<Vec<_>>()
                .join("; "),
        )
    }
}

fn now_epoch() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Parse one `Set-Cookie` line against the responding host.
fn parse_set_cookie(line: &str, responding_host: &str, now: i64) -> Option<Cookie> {
    let mut name = None;
    let mut value = String::new();
    let mut domain: Option<String> = None;
    let mut path = "/".to_string();
    let mut secure = false;
    let mut max_age: Option<i64> = None;
    let mut expires: Option<i64> = None;

    for item in line.split(';') {
        let mut parts = item.splitn(2, '=');
        let key = parts.next().unwrap_or("").trim_start().to_ascii_lowercase();
        let val = parts.next().map(|v| v.trim_end());
        if name.is_none() {
            // First segment must be the name=value pair.
            let val = val?;
            name = Some(key);
            value = val.to_string();
            continue;
        }
        match (key.as_str(), val) {
            ("secure", None) => secure = true,
            ("domain", Some(v)) => {
                let v = v.strip_prefix('.').unwrap_or(v);
                // The attribute must name the responding host or a parent
                // domain of it; anything else rejects the whole cookie.
                if v != responding_host
                    && !responding_host.ends_with(&format!(".{}", v))
                {
                    return None;
                }
                domain = Some(v.to_string());
            }
            ("path", Some(v)) => path = v.to_string(),
            ("max-age", Some(v)) => max_age = v.trim().parse::<i64>().ok().or(Some(0)),
            ("expires", Some(v)) => expires = parse_http_date(v),
            _ => {}
        }
    }

    let name = name?;
    // Max-Age wins over Expires whenever present, including Max-Age=0.
    let expires_at = match max_age {
        Some(age) => Some(now + age),
        None => expires,
    };
    let (domain, explicit_domain) = match domain {
        Some(d) => (d, true),
        None => (responding_host.to_string(), false),
    };
    Some(Cookie { name, value, domain, explicit_domain, path, expires_at, secure })
}

/// Parse the date formats seen in `Expires` attributes: RFC 2822
/// (`Tue, 15 Jan 2013 21:47:38 GMT`) and the legacy dashed variant
/// (`Tue, 15-Jan-2013 21:47:38 GMT`).
pub fn parse_http_date(s: &str) -> Option<i64> {
    let s = s.trim();
    // time's RFC 2822 parser wants a numeric zone, not the literal GMT.
    let normalized = match s.strip_suffix("GMT") {
        Some(head) => format!("{}+0000", head),
        None => s.to_string(),
    };
    if let Ok(dt) = OffsetDateTime::parse(&normalized, &Rfc2822) {
        return Some(dt.unix_timestamp());
    }
    // Legacy dashed date: turn the two date separators into spaces.
    let dashless = normalized.replacen('-', " ", 2);
    OffsetDateTime::parse(&dashless, &Rfc2822)
        .ok()
        .map(|dt| dt.unix_timestamp())
}
