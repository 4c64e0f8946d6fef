//! Engine configuration: YAML file, lookup order and environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use action_cache::CachePolicy;
use action_primitives::TypingConfig;
use cdp_adapter::CdpConfig;
use perceiver_structural::SnapshotLimits;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::EngineError;

/// Project-local config path, checked after an explicit `--config`
pub const LOCAL_CONFIG: &str = "config/pagewright.yaml";

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct Timeouts {
    pub command_ms: u64,
    pub navigation_ms: u64,
    pub action_ms: u64,
    pub wait_ms: u64,
    /// Whole `act` call, replay or fresh
    pub act_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            command_ms: 30_000,
            navigation_ms: 30_000,
            action_ms: 30_000,
            wait_ms: 30_000,
            act_ms: 60_000,
        }
    }
}

impl Timeouts {
    pub fn navigation(&self) -> Duration {
        Duration::from_millis(self.navigation_ms)
    }

    pub fn action(&self) -> Duration {
        Duration::from_millis(self.action_ms)
    }

    pub fn wait(&self) -> Duration {
        Duration::from_millis(self.wait_ms)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub cdp: CdpConfig,
    pub cache_enabled: bool,
    pub self_heal: bool,
    pub cache_dir: PathBuf,
    pub timeouts: Timeouts,
    /// Default shadow piercing for selectors
    pub pierce_shadow: bool,
    pub typing: TypingConfig,
    pub snapshot: SnapshotLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cdp: CdpConfig::default(),
            cache_enabled: true,
            self_heal: true,
            cache_dir: default_cache_dir(),
            timeouts: Timeouts::default(),
            pierce_shadow: true,
            typing: TypingConfig::default(),
            snapshot: SnapshotLimits::default(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".pagewright"))
        .join("pagewright")
        .join("act-cache")
}

/// `dirs::config_dir()/pagewright/config.yaml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("pagewright").join("config.yaml"))
}

impl EngineConfig {
    /// Loads the first config found: `explicit`, then [`LOCAL_CONFIG`], then the user config
    /// directory, then defaults. An explicit path that does not exist is an error. Environment
    /// overrides are applied last.
    pub async fn load(explicit: Option<&Path>) -> Result<Self, EngineError> {
        let mut config = match Self::locate(explicit)? {
            Some(path) => Self::from_file(&path).await?,
            None => {
                debug!("No config file found, using defaults");
                Self::default()
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok());
        config.cdp.default_deadline_ms = config.timeouts.command_ms;
        Ok(config)
    }

    fn locate(explicit: Option<&Path>) -> Result<Option<PathBuf>, EngineError> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(EngineError::Config(format!(
                    "config file {} does not exist",
                    path.display()
                )));
            }
            return Ok(Some(path.to_path_buf()));
        }
        let local = PathBuf::from(LOCAL_CONFIG);
        if local.exists() {
            return Ok(Some(local));
        }
        Ok(user_config_path().filter(|path| path.exists()))
    }

    pub async fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = tokio::fs::read_to_string(path).await.map_err(|err| {
            EngineError::Config(format!("failed to read {}: {}", path.display(), err))
        })?;
        let config = Self::from_yaml(&content)
            .map_err(|err| EngineError::Config(format!("{}: {}", path.display(), err)))?;
        info!("Loaded configuration from: {}", path.display());
        Ok(config)
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml::Error> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(content)
    }

    /// Applies `PAGEWRIGHT_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("PAGEWRIGHT_WS_URL").filter(|v| !v.trim().is_empty()) {
            self.cdp.websocket_url = Some(url.trim().to_string());
        }
        if let Some(dir) = lookup("PAGEWRIGHT_CACHE_DIR").filter(|v| !v.trim().is_empty()) {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Some(flag) = lookup("PAGEWRIGHT_SELF_HEAL").and_then(|v| parse_flag(&v)) {
            self.self_heal = flag;
        }
        if let Some(flag) = lookup("PAGEWRIGHT_HEADLESS").and_then(|v| parse_flag(&v)) {
            self.cdp.headless = flag;
        }
        if let Some(chrome) = lookup("PAGEWRIGHT_CHROME").filter(|v| !v.trim().is_empty()) {
            self.cdp.executable = PathBuf::from(chrome);
        }
    }

    pub fn cache_policy(&self) -> CachePolicy {
        CachePolicy {
            enabled: self.cache_enabled,
            self_heal: self.self_heal,
            dir: self.cache_dir.clone(),
            timeout_ms: self.timeouts.act_ms,
        }
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn yaml_fills_missing_fields_with_defaults() {
        let config = EngineConfig::from_yaml(
            r#"
self_heal: false
cache_dir: /tmp/pw-cache
timeouts:
  act_ms: 5000
snapshot:
  max_depth: 8
cdp:
  websocket_url: ws://127.0.0.1:9222/devtools/browser/abc
"#,
        )
        .unwrap();
        assert!(!config.self_heal);
        assert!(config.cache_enabled);
        assert!(config.pierce_shadow);
        assert_eq!(config.timeouts.act_ms, 5000);
        assert_eq!(config.timeouts.navigation_ms, 30_000);
        assert_eq!(config.snapshot.max_depth, 8);
        assert_eq!(config.snapshot.max_children, 200);
        assert_eq!(
            config.cdp.websocket_url.as_deref(),
            Some("ws://127.0.0.1:9222/devtools/browser/abc")
        );

        let policy = config.cache_policy();
        assert_eq!(policy.dir, PathBuf::from("/tmp/pw-cache"));
        assert_eq!(policy.timeout(), Duration::from_secs(5));
        assert!(!policy.self_heal);

        assert!(EngineConfig::from_yaml("").is_ok());
        assert!(EngineConfig::from_yaml("timeouts: [1, 2]").is_err());
    }

    #[test]
    fn environment_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("PAGEWRIGHT_WS_URL", " ws://10.0.0.2:9222/devtools/browser/x "),
            ("PAGEWRIGHT_CACHE_DIR", "/var/cache/pw"),
            ("PAGEWRIGHT_SELF_HEAL", "off"),
            ("PAGEWRIGHT_HEADLESS", "maybe"),
        ]
        .into_iter()
        .collect();

        let mut config = EngineConfig::default();
        let headless = config.cdp.headless;
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string()));
        assert_eq!(
            config.cdp.websocket_url.as_deref(),
            Some("ws://10.0.0.2:9222/devtools/browser/x")
        );
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/pw"));
        assert!(!config.self_heal);
        // unparseable flags leave the value alone
        assert_eq!(config.cdp.headless, headless);
    }

    #[tokio::test]
    async fn explicit_paths_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope.yaml");
        assert!(matches!(
            EngineConfig::load(Some(&missing)).await,
            Err(EngineError::Config(_))
        ));

        let path = dir.path().join("pagewright.yaml");
        std::fs::write(&path, "pierce_shadow: false\n").unwrap();
        let config = EngineConfig::from_file(&path).await.unwrap();
        assert!(!config.pierce_shadow);
    }
}
