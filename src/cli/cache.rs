use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use pagewright::action_cache::{CacheListing, CacheStore, FileCacheStore};
use pagewright::EngineConfig;

use super::output::{emit, OutputFormat};

#[derive(Args)]
pub struct CacheArgs {
    /// Cache directory (defaults to the configured one)
    #[arg(long, value_name = "DIR")]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: CacheCommand,
}

#[derive(Subcommand)]
pub enum CacheCommand {
    /// List stored entries, newest first
    List,
    /// Print one entry
    Show {
        /// 64-character entry key
        key: String,
    },
    /// Remove one entry
    Remove { key: String },
    /// Remove every entry
    Clear,
}

pub async fn cmd_cache(args: CacheArgs, config: &EngineConfig, format: OutputFormat) -> Result<()> {
    let dir = args.dir.unwrap_or_else(|| config.cache_dir.clone());
    let store = FileCacheStore::new(dir);

    match args.command {
        CacheCommand::List => {
            let entries = store.list().await?;
            emit(format, &entries, |entries| render_listing(entries))?;
        }
        CacheCommand::Show { key } => {
            let entry = store
                .get(&key)
                .await?
                .with_context(|| format!("no cache entry {key} in {}", store.root().display()))?;
            let format = match format {
                OutputFormat::Human => OutputFormat::Json,
                other => other,
            };
            emit(format, &entry, |_| String::new())?;
        }
        CacheCommand::Remove { key } => {
            if !store.remove(&key).await? {
                bail!("no cache entry {key} in {}", store.root().display());
            }
            println!("removed {key}");
        }
        CacheCommand::Clear => {
            let removed = store.clear().await?;
            println!("removed {removed} entries from {}", store.root().display());
        }
    }
    Ok(())
}

fn render_listing(entries: &[CacheListing]) -> String {
    if entries.is_empty() {
        return "cache is empty".to_string();
    }
    entries
        .iter()
        .map(|entry| {
            format!(
                "{}  {}  {} step(s)  {:?} @ {}",
                entry.key.get(..12).unwrap_or(&entry.key),
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                entry.actions,
                entry.instruction,
                entry.url
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
