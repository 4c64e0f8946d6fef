use anyhow::Result;
use pagewright::config::{user_config_path, LOCAL_CONFIG};
use pagewright::EngineConfig;

pub async fn cmd_info(config: &EngineConfig) -> Result<()> {
    println!("Pagewright");
    println!("==========");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Build Date: {}", env!("BUILD_DATE"));
    println!("Git Commit: {} ({})", env!("GIT_HASH"), env!("GIT_BRANCH"));
    println!();

    println!("Configuration:");
    println!("- Local Config: {LOCAL_CONFIG}");
    if let Some(path) = user_config_path() {
        println!("- User Config: {}", path.display());
    }
    match &config.cdp.websocket_url {
        Some(url) => println!("- Browser: attach to {url}"),
        None => println!(
            "- Browser: launch {} (headless: {})",
            config.cdp.executable.display(),
            config.cdp.headless
        ),
    }
    println!(
        "- Cache: {} (enabled: {}, self-heal: {})",
        config.cache_dir.display(),
        config.cache_enabled,
        config.self_heal
    );
    println!("- Pierce Shadow: {}", config.pierce_shadow);
    println!(
        "- Timeouts: command {}ms, navigation {}ms, action {}ms, act {}ms",
        config.timeouts.command_ms,
        config.timeouts.navigation_ms,
        config.timeouts.action_ms,
        config.timeouts.act_ms
    );
    println!(
        "- Snapshot Limits: depth {}, children {}, nodes {}",
        config.snapshot.max_depth, config.snapshot.max_children, config.snapshot.max_nodes
    );
    Ok(())
}
