//! Multi-valued, case-insensitive header map.

use std::collections::BTreeMap;

pub const IDENTIFIER: &str = "Identifier";
pub const CONTENT_LENGTH: &str = "Content-Length";

/// Header names are stored in canonical form (`content-length` becomes
/// `Content-Length`), so lookups ignore case. Iteration is in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    entries: BTreeMap<String, Vec<String>>,
}

impl Header {
    pub fn new() -> Self {
        Self::default()
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&canonical_key(name))
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// All values for `name`; empty if absent.
    pub fn get_all(&self, name: &str) -> &[String] {
        self.entries
            .get(&canonical_key(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Replace all values for `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        self.entries.insert(canonical_key(name), vec![value.into()]);
    }

    /// Append a value for `name`.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(canonical_key(name))
            .or_default()
            .push(value.into());
    }

    pub fn remove(&mut self, name: &str) -> Option<Vec<String>> {
        self.entries.remove(&canonical_key(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&canonical_key(name))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Canonical MIME form: first letter and every letter following a hyphen
/// upper-cased, the rest lower-cased.
pub fn canonical_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper = true;
    for c in name.trim().chars() {
        if upper {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c.to_ascii_lowercase());
        }
        upper = c == '-';
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_key() {
        assert_eq!(canonical_key("content-length"), "Content-Length");
        assert_eq!(canonical_key("IDENTIFIER"), "Identifier");
        assert_eq!(canonical_key("x-request-TRACE"), "X-Request-Trace");
    }

    #[test]
    fn test_case_insensitive_lookup() {
        let mut header = Header::new();
        header.set("content-type", "application/json");
        assert_eq!(header.get("Content-Type"), Some("application/json"));
        assert_eq!(header.get("CONTENT-TYPE"), Some("application/json"));
        assert!(header.contains("content-TYPE"));
    }

    #[test]
    fn test_multi_value() {
        let mut header = Header::new();
        header.add("Accept", "a");
        header.add("accept", "b");
        assert_eq!(header.get("Accept"), Some("a"));
        assert_eq!(header.get_all("Accept"), &["a".to_string(), "b".to_string()]);

        header.set("Accept", "c");
        assert_eq!(header.get_all("Accept"), &["c".to_string()]);
    }

    #[test]
    fn test_missing() {
        let header = Header::new();
        assert_eq!(header.get("Identifier"), None);
        assert!(header.get_all("Identifier").is_empty());
        assert!(header.is_empty());
    }
}
