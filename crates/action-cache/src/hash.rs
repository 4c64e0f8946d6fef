use serde_json::json;
use sha2::{Digest, Sha256};

/// Cache key for an instruction on a page: sha256 hex of the canonical JSON of the
/// instruction, the URL and the sorted variable names.
pub fn cache_key<'a>(
    instruction: &str,
    url: &str,
    variable_keys: impl IntoIterator<Item = &'a str>,
) -> String {
    let mut keys: Vec<&str> = variable_keys.into_iter().collect();
    keys.sort_unstable();
    // serde_json objects are key-sorted, which keeps the encoding canonical
    let canonical = json!({
        "instruction": instruction,
        "url": url,
        "variableKeys": keys,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_ignore_variable_order() {
        let a = cache_key("log in", "https://example.com/login", ["user", "pass"]);
        let b = cache_key("log in", "https://example.com/login", ["pass", "user"]);
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        assert_ne!(a, cache_key("log in", "https://example.com/", ["pass", "user"]));
        assert_ne!(a, cache_key("log in", "https://example.com/login", ["user"]));
        assert_ne!(a, cache_key("Log in", "https://example.com/login", ["pass", "user"]));
    }
}
