use std::io;
use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;

use crate::model::CacheEntry;

pub async fn write_entry(path: PathBuf, entry: &CacheEntry) -> io::Result<PathBuf> {
    let data = serde_json::to_vec_pretty(entry)
        .map_err(|err| io::Error::new(io::ErrorKind::Other, err.to_string()))?;
    write_atomic(path, &data).await
}

pub async fn remove_file(path: &Path) -> io::Result<bool> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

async fn write_atomic(path: PathBuf, data: &[u8]) -> io::Result<PathBuf> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(&tmp)
        .await?;
    file.write_all(data).await?;
    file.sync_all().await?;
    drop(file);
    tokio::fs::rename(tmp, &path).await?;
    Ok(path)
}
