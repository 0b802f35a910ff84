//! Ordered, multi-valued header map.
//!
//! Keys are canonicalized to `Title-Case` on insertion and compared
//! case-insensitively; repeated keys accumulate values in arrival order.

/// Canonicalize a header key: `content-type` becomes `Content-Type`.
pub fn canonical_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper = true;
    for c in key.trim().chars() {
        if upper {
            out.extend(c.to_uppercase());
        } else {
            out.extend(c.to_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderMap {
    entries: Vec<(String, Vec<String>)>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value, creating the key if absent.
    pub fn append(&mut self, key: &str, value: impl Into<String>) {
        let key = canonical_key(key);
        if let Some((_, values)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            values.push(value.into());
        } else {
            self.entries.push((key, vec![value.into()]));
        }
    }

    /// Replace all values for a key.
    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        let key = canonical_key(key);
        if let Some((_, values)) = self.entries.iter_mut().find(|(k, _)| *k == key) {
            values.clear();
            values.push(value.into());
        } else {
            self.entries.push((key, vec![value.into()]));
        }
    }

    pub fn remove(&mut self, key: &str) {
        let key = canonical_key(key);
        self.entries.retain(|(k, _)| *k != key);
    }

    pub fn contains(&self, key: &str) -> bool {
        let key = canonical_key(key);
        self.entries.iter().any(|(k, _)| *k == key)
    }

    /// First value for a key, if any.
    pub fn first(&self, key: &str) -> Option<&str> {
        let key = canonical_key(key);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }

    /// All values recorded for a key, in arrival order.
    pub fn all(&self, key: &str) -> &[String] {
        let key = canonical_key(key);
        self.entries
            .iter()
            .find(|(k, _)| *k == key)
            .map(|(_, values)| values.as_slice())
            .unwrap_or(&[])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .flat_map(|(k, values)| values.iter().map(move |v| (k.as_str(), v.as_str())))
    }

    pub fn len(&self) -> usize {
        self.entries.iter().map(|(_, v)| v.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("content-type"), "Content-Type");
        assert_eq!(canonical_key("SET-COOKIE"), "Set-Cookie");
        assert_eq!(canonical_key("x-request-id"), "X-Request-Id");
    }

    #[test]
    fn test_repeated_keys_accumulate() {
        let mut map = HeaderMap::new();
        map.append("set-cookie", "a=1");
        map.append("Set-Cookie", "b=2");
        assert_eq!(map.all("SET-COOKIE"), &["a=1".to_string(), "b=2".to_string()]);
        assert_eq!(map.first("set-cookie"), Some("a=1"));
    }

    #[test]
    fn test_set_replaces() {
        let mut map = HeaderMap::new();
        map.append("accept", "*/*");
        map.set("Accept", "text/html");
        assert_eq!(map.all("accept").len(), 1);
        assert_eq!(map.first("accept"), Some("text/html"));
    }

    #[test]
    fn test_iteration_preserves_order() {
        let mut map = HeaderMap::new();
        map.append("Host", "example.com");
        map.append("Accept", "*/*");
        let keys: Vec<_> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["Host", "Accept"]);
    }
}
