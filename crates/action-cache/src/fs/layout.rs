use std::path::{Path, PathBuf};

const ENTRY_EXT: &str = "json";

pub fn entry_path(root: &Path, key: &str) -> PathBuf {
    root.join(format!("{key}.{ENTRY_EXT}"))
}

/// Cache key of a stored entry file, if `path` names one.
pub fn key_of(path: &Path) -> Option<String> {
    if path.extension().and_then(|ext| ext.to_str()) != Some(ENTRY_EXT) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    (stem.len() == 64 && stem.chars().all(|c| c.is_ascii_hexdigit())).then(|| stem.to_string())
}

/// Keys are produced by [`cache_key`](crate::cache_key); anything else could escape the root.
pub fn is_valid_key(key: &str) -> bool {
    key.len() == 64 && key.chars().all(|c| c.is_ascii_hexdigit())
}
