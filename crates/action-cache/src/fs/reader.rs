use std::io;
use std::path::Path;

use crate::errors::CacheError;
use crate::model::{CacheEntry, CACHE_VERSION};

/// `Ok(None)` when no document exists at `path`.
pub async fn read_entry(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };
    decode(&bytes).map(Some)
}

fn decode(bytes: &[u8]) -> Result<CacheEntry, CacheError> {
    let raw: serde_json::Value =
        serde_json::from_slice(bytes).map_err(|err| CacheError::Schema(err.to_string()))?;
    let version = raw.get("version").and_then(|v| v.as_u64());
    if version != Some(u64::from(CACHE_VERSION)) {
        return Err(CacheError::Schema(format!(
            "expected version {CACHE_VERSION}, found {}",
            version.map(|v| v.to_string()).unwrap_or_else(|| "none".into())
        )));
    }
    serde_json::from_value(raw).map_err(|err| CacheError::Schema(err.to_string()))
}
