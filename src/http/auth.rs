//! HTTP authentication: Basic everywhere, Digest (RFC 2617) for origin
//! servers. Proxies only ever get Basic.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use boring::hash::{hash, MessageDigest};
use zeroize::Zeroizing;

use crate::base::NetError;

/// Credentials attached to a request.
#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: Zeroizing::new(password.into()),
        }
    }

    fn password(&self) -> &str {
        &self.password
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// `Authorization: Basic ...` value.
pub fn basic(creds: &Credentials) -> String {
    let raw = Zeroizing::new(format!("{}:{}", creds.username, creds.password()));
    format!("Basic {}", BASE64.encode(raw.as_bytes()))
}

/// Build an `Authorization` value answering a `WWW-Authenticate` challenge.
///
/// `body` is the request body bytes, consulted only when the server insists
/// on `qop=auth-int`.
pub fn answer_challenge(
    challenge: &str,
    creds: &Credentials,
    method: &str,
    uri: &str,
    body: Option<&[u8]>,
) -> Result<String, NetError> {
    let challenge = challenge.trim();
    if let Some(params) = strip_scheme(challenge, "Digest") {
        let parsed = DigestChallenge::parse(params)?;
        parsed.answer(creds, method, uri, body, &random_cnonce()?)
    } else if strip_scheme(challenge, "Basic").is_some() {
        Ok(basic(creds))
    } else {
        let scheme = challenge.split_whitespace().next().unwrap_or("");
        Err(NetError::UnsupportedAuth(scheme.to_string()))
    }
}

fn strip_scheme<'a>(challenge: &'a str, scheme: &str) -> Option<&'a str> {
    match challenge.get(..scheme.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(scheme) => {
            Some(challenge[scheme.len()..].trim_start())
        }
        _ => None,
    }
}

#[derive(Debug, Default)]
struct DigestChallenge {
    realm: String,
    nonce: String,
    opaque: Option<String>,
    algorithm: Option<String>,
    qop: Vec<String>,
}

impl DigestChallenge {
    /// Parse the comma-separated `key=value` parameter list, unquoting
    /// values as needed.
    fn parse(params: &str) -> Result<Self, NetError> {
        let mut out = Self::default();
        for (key, value) in split_params(params) {
            match key.to_ascii_lowercase().as_str() {
                "realm" => out.realm = value,
                "nonce" => out.nonce = value,
                "opaque" => out.opaque = Some(value),
                "algorithm" => out.algorithm = Some(value),
                "qop" => {
                    out.qop = value.split(',').map(|s| s.trim().to_string()).collect()
                }
                _ => {}
            }
        }
        if out.nonce.is_empty() {
            return Err(NetError::Protocol("digest challenge without nonce".into()));
        }
        Ok(out)
    }

    fn answer(
        &self,
        creds: &Credentials,
        method: &str,
        uri: &str,
        body: Option<&[u8]>,
        cnonce: &str,
    ) -> Result<String, NetError> {
        let algorithm = self.algorithm.as_deref().unwrap_or("MD5");
        if !algorithm.eq_ignore_ascii_case("MD5")
            && !algorithm.eq_ignore_ascii_case("MD5-sess")
        {
            return Err(NetError::UnsupportedAuth(format!("Digest {}", algorithm)));
        }

        let mut ha1 = md5_hex(
            format!("{}:{}:{}", creds.username, self.realm, creds.password()).as_bytes(),
        )?;
        if algorithm.eq_ignore_ascii_case("MD5-sess") {
            ha1 = md5_hex(format!("{}:{}:{}", ha1, self.nonce, cnonce).as_bytes())?;
        }

        // Prefer plain auth when offered; fall back to auth-int, then to the
        // legacy no-qop computation.
        let qop = if self.qop.iter().any(|q| q == "auth") {
            Some("auth")
        } else if self.qop.iter().any(|q| q == "auth-int") {
            Some("auth-int")
        } else {
            None
        };

        let ha2 = match qop {
            Some("auth-int") => {
                let body_hash = md5_hex(body.unwrap_or_default())?;
                md5_hex(format!("{}:{}:{}", method, uri, body_hash).as_bytes())?
            }
            _ => md5_hex(format!("{}:{}", method, uri).as_bytes())?,
        };

        // The nonce is never reused across retries, so the count stays at 1.
        let nc = "00000001";
        let response = match qop {
            Some(qop) => md5_hex(
                format!("{}:{}:{}:{}:{}:{}", ha1, self.nonce, nc, cnonce, qop, ha2)
                    .as_bytes(),
            )?,
            None => md5_hex(format!("{}:{}:{}", ha1, self.nonce, ha2).as_bytes())?,
        };

        let mut header = format!(
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", uri=\"{}\"",
            creds.username, self.realm, self.nonce, uri
        );
        if let Some(qop) = qop {
            header.push_str(&format!(
                ", qop={}, nc={}, cnonce=\"{}\"",
                qop, nc, cnonce
            ));
        }
        header.push_str(&format!(", response=\"{}\"", response));
        if let Some(opaque) = &self.opaque {
            header.push_str(&format!(", opaque=\"{}\"", opaque));
        }
        if self.algorithm.is_some() {
            header.push_str(&format!(", algorithm={}", algorithm));
        }
        Ok(header)
    }
}

/// Split `a="x, y", b=z` style parameter lists, respecting quotes.
fn split_params(params: &str) -> Vec<(String, String)> {
    let mut out = Vec::new();
    let mut rest = params;
    while !rest.is_empty() {
        let Some(eq) = rest.find('=') else { break };
        let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
        let after = &rest[eq + 1..];
        let (value, remain) = if let Some(stripped) = after.strip_prefix('"') {
            match stripped.find('"') {
                Some(close) => (stripped[..close].to_string(), &stripped[close + 1..]),
                None => (stripped.to_string(), ""),
            }
        } else {
            match after.find(',') {
                Some(comma) => (after[..comma].trim().to_string(), &after[comma..]),
                None => (after.trim().to_string(), ""),
            }
        };
        if !key.is_empty() {
            out.push((key, value));
        }
        rest = remain.trim_start().trim_start_matches(',').trim_start();
    }
    out
}

fn md5_hex(data: &[u8]) -> Result<String, NetError> {
    let digest = hash(MessageDigest::md5(), data)
        .map_err(|e| NetError::Protocol(format!("md5: {}", e)))?;
    Ok(digest.iter().map(|b| format!("{:02x}", b)).collect())
}

fn random_cnonce() -> Result<String, NetError> {
    let mut bytes = [0u8; 8];
    boring::rand::rand_bytes(&mut bytes)
        .map_err(|e| NetError::Protocol(format!("rand: {}", e)))?;
    Ok(bytes.iter().map(|b| format!("{:02x}", b)).collect())
}
