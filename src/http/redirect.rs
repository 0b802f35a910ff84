//! Redirect target resolution and method rewriting.

use url::Url;

use crate::base::NetError;

/// Resolve a `Location` value against the URL that produced it.
///
/// Handles the full range servers actually send: absolute URLs,
/// scheme-relative (`//host/path`), root-relative (`/path`), and relative
/// references with `./` and `../` segments.
pub fn resolve_location(base: &Url, location: &str) -> Result<Url, NetError> {
    let location = location.trim();
    if location.is_empty() {
        return Err(NetError::Protocol("redirect with empty Location".into()));
    }
    base.join(location)
        .map_err(|e| NetError::InvalidUrl(format!("bad Location `{}`: {}", location, e)))
}

/// Whether a redirect status preserves the request method and body.
///
/// 307 and 308 forbid rewriting by definition; 300 is kept as-is because it
/// carries no canonical target semantics. Everything else (301, 302, 303)
/// downgrades to a body-less GET, matching what browsers and libcurl do.
pub fn preserves_method(status: u16) -> bool {
    matches!(status, 300 | 307 | 308)
}

/// Whether a status is a redirect the transport may follow automatically.
/// 304 is excluded: it is a cache validator, not a relocation.
pub fn is_redirect(status: u16) -> bool {
    (300..400).contains(&status) && status != 304
}
