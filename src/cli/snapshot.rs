use anyhow::{Context, Result};
use clap::Args;
use pagewright::perceiver_structural::{ElementFilter, ElementQuery};
use pagewright::{Engine, EngineConfig};

use super::output::{emit, OutputFormat};

#[derive(Args)]
pub struct SnapshotArgs {
    /// Browser websocket endpoint to attach to instead of launching Chrome
    #[arg(long, value_name = "URL")]
    pub ws_url: Option<String>,

    /// Navigate the active page here first
    #[arg(long)]
    pub url: Option<String>,

    /// Override the snapshot depth limit
    #[arg(long)]
    pub max_depth: Option<usize>,

    /// List interactive elements instead of the accessibility tree
    #[arg(long)]
    pub interactive: bool,

    /// Element type for --interactive (button, input, link, select, textarea, all)
    #[arg(long, default_value = "all")]
    pub element_type: ElementFilter,

    #[arg(long, default_value_t = 1)]
    pub page: usize,

    #[arg(long, default_value_t = 20)]
    pub page_size: usize,

    /// Print Prometheus metrics to stderr when done
    #[arg(long)]
    pub metrics: bool,
}

pub async fn cmd_snapshot(
    args: SnapshotArgs,
    mut config: EngineConfig,
    format: OutputFormat,
) -> Result<()> {
    if let Some(url) = args.ws_url {
        config.cdp.websocket_url = Some(url);
    }
    if let Some(depth) = args.max_depth {
        config.snapshot.max_depth = depth;
    }

    let engine = Engine::launch(config).await.context("failed to start the browser")?;
    let query = ElementQuery {
        page: args.page,
        page_size: args.page_size,
        element_type: args.element_type,
        start_index: None,
    };
    let result = run(&engine, args.url.as_deref(), args.interactive, query, format).await;
    engine.shutdown().await;
    if args.metrics {
        eprint!("{}", pagewright::metrics::render()?);
    }
    result
}

async fn run(
    engine: &Engine,
    url: Option<&str>,
    interactive: bool,
    query: ElementQuery,
    format: OutputFormat,
) -> Result<()> {
    let page = match engine.active_page() {
        Ok(page) => page,
        Err(_) => engine.new_page("about:blank", false).await?,
    };
    if let Some(url) = url {
        engine.navigate(&page, url).await?;
    }

    if interactive {
        let listing = engine.interactive_elements(&page, &query).await?;
        emit(format, &listing, |listing| listing.to_markdown())
    } else {
        let snapshot = engine.snapshot(&page).await?;
        let format = match format {
            OutputFormat::Human => OutputFormat::Json,
            other => other,
        };
        emit(format, &snapshot, |_| String::new())
    }
}
