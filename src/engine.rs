//! The engine facade: one browser connection plus the resolution, action, snapshot and cache
//! layers configured together.

use std::future::Future;
use std::sync::Arc;

use action_cache::{ActCache, ActRequest, ActResult, ActionPlanner, PageActionExecutor};
use action_locator::{install_piercer, Locator};
use action_primitives::{
    screenshot_with_masks, ActionPrimitives, ActionReport, ClickOptions, DefaultActionPrimitives,
    ExecCtx, Target, TypeOptions,
};
use cdp_adapter::{CdpAdapter, Page, PageId, ScreenshotOptions};
use chrono::Utc;
use perceiver_structural::{
    ElementPage, ElementQuery, Snapshot, StructuralPerceiver, StructuralPerceiverImpl,
};
use tokio::task::JoinHandle;
use tracing::Instrument;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::errors::EngineError;
use crate::logging::{EngineLogger, LogLevel, LogRecord, TracingLogger};

pub struct Engine {
    id: String,
    config: EngineConfig,
    adapter: Arc<CdpAdapter>,
    perceiver: Arc<StructuralPerceiverImpl>,
    perceiver_events: JoinHandle<()>,
    primitives: Arc<DefaultActionPrimitives>,
    cache: ActCache,
    logger: Arc<dyn EngineLogger>,
    span: tracing::Span,
}

impl Engine {
    /// Connects to the browser described by `config.cdp` and installs the shadow piercer.
    pub async fn launch(config: EngineConfig) -> Result<Self, EngineError> {
        Self::launch_with_logger(config, Arc::new(TracingLogger)).await
    }

    pub async fn launch_with_logger(
        config: EngineConfig,
        logger: Arc<dyn EngineLogger>,
    ) -> Result<Self, EngineError> {
        crate::metrics::register_metrics();
        let (bus, _) = cdp_adapter::event_bus(1024);
        let adapter = Arc::new(CdpAdapter::new(config.cdp.clone(), bus));
        let engine = Self::with_adapter(config, adapter, logger);
        engine
            .in_span(async {
                engine.adapter.start().await?;
                install_piercer(&engine.adapter).await?;
                engine.log(LogLevel::Info, "lifecycle", "engine started");
                Ok::<_, EngineError>(())
            })
            .await?;
        Ok(engine)
    }

    /// Wraps an adapter that is already running. Must be called inside a tokio runtime.
    pub fn with_adapter(
        config: EngineConfig,
        adapter: Arc<CdpAdapter>,
        logger: Arc<dyn EngineLogger>,
    ) -> Self {
        let id = Uuid::new_v4().simple().to_string();
        let span = tracing::info_span!("engine", engine_id = %id);
        let perceiver = Arc::new(StructuralPerceiverImpl::new(config.snapshot));
        let perceiver_events = perceiver.follow_events(adapter.subscribe());
        let primitives = Arc::new(DefaultActionPrimitives::new(config.typing.clone()));
        let cache = ActCache::with_file_store(config.cache_policy());
        Self {
            id,
            config,
            adapter,
            perceiver,
            perceiver_events,
            primitives,
            cache,
            logger,
            span,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<CdpAdapter> {
        &self.adapter
    }

    pub fn cache(&self) -> &ActCache {
        &self.cache
    }

    pub fn perceiver(&self) -> &StructuralPerceiverImpl {
        &self.perceiver
    }

    pub fn primitives(&self) -> Arc<dyn ActionPrimitives> {
        self.primitives.clone()
    }

    fn log(&self, level: LogLevel, category: &str, message: impl Into<String>) {
        self.logger.log(LogRecord {
            engine_id: self.id.clone(),
            level,
            category: category.to_string(),
            message: message.into(),
            timestamp: Utc::now(),
        });
    }

    async fn in_span<T, F>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        work.instrument(self.span.clone()).await
    }

    pub fn active_page(&self) -> Result<Arc<Page>, EngineError> {
        self.adapter
            .active_page()
            .ok_or_else(|| EngineError::NoPage("no page is active".into()))
    }

    /// Opens a tab. A background tab leaves the active page unchanged.
    pub async fn new_page(&self, url: &str, background: bool) -> Result<Arc<Page>, EngineError> {
        self.in_span(async {
            let page = self.adapter.new_page(url, background).await?;
            let placement = if background { "background" } else { "foreground" };
            self.log(LogLevel::Info, "pages", format!("opened {} ({placement})", page.id()));
            Ok::<_, EngineError>(page)
        })
        .await
    }

    pub async fn switch_to(&self, page: &PageId) -> Result<(), EngineError> {
        self.in_span(async {
            self.adapter.bring_to_front(page).await?;
            self.log(LogLevel::Info, "pages", format!("switched to {page}"));
            Ok::<_, EngineError>(())
        })
        .await
    }

    /// Closes `page`; focus falls back to the most recently active page still open.
    pub async fn close_page(&self, page: &PageId) -> Result<(), EngineError> {
        self.in_span(async {
            self.adapter.close_page(page).await?;
            self.perceiver.invalidate(page);
            self.log(LogLevel::Info, "pages", format!("closed {page}"));
            Ok::<_, EngineError>(())
        })
        .await
    }

    pub async fn navigate(&self, page: &Arc<Page>, url: &str) -> Result<(), EngineError> {
        self.in_span(async {
            self.log(LogLevel::Info, "navigation", format!("navigating {} to {}", page.id(), url));
            let result = page.navigate(url, self.config.timeouts.navigation()).await;
            self.perceiver.invalidate(page.id());
            if let Err(err) = &result {
                self.log(LogLevel::Warn, "navigation", format!("navigation failed: {err}"));
            }
            result.map_err(EngineError::from)
        })
        .await
    }

    /// Locator on the main frame of `page`, using the configured piercing and wait timeout.
    pub fn locator(&self, page: &Arc<Page>, selector: &str) -> Result<Locator, EngineError> {
        Ok(Locator::parse(page.clone(), selector)?
            .with_pierce_shadow(self.config.pierce_shadow)
            .with_timeout(self.config.timeouts.wait()))
    }

    pub fn exec_ctx(&self, page: &Arc<Page>) -> ExecCtx {
        ExecCtx::new(page.clone(), self.config.timeouts.action())
    }

    pub async fn click(
        &self,
        page: &Arc<Page>,
        selector: &str,
    ) -> Result<ActionReport, EngineError> {
        self.in_span(async {
            let target = Target::Locator(self.locator(page, selector)?);
            let report = self
                .primitives
                .click(&self.exec_ctx(page), &target, &ClickOptions::default())
                .await?;
            self.log(LogLevel::Debug, "action", format!("clicked {selector}"));
            Ok::<_, EngineError>(report)
        })
        .await
    }

    /// Replaces the value of the element at `selector` with `text`, which may use the
    /// `{Key}` grammar.
    pub async fn fill(
        &self,
        page: &Arc<Page>,
        selector: &str,
        text: &str,
    ) -> Result<ActionReport, EngineError> {
        self.in_span(async {
            let target = Target::Locator(self.locator(page, selector)?);
            let report = self
                .primitives
                .type_text(&self.exec_ctx(page), &target, text, &TypeOptions::default())
                .await?;
            self.log(
                LogLevel::Debug,
                "action",
                format!("typed {} chars into {selector}", text.chars().count()),
            );
            Ok::<_, EngineError>(report)
        })
        .await
    }

    pub async fn snapshot(&self, page: &Arc<Page>) -> Result<Snapshot, EngineError> {
        self.in_span(async {
            let snapshot = self.perceiver.snapshot(page).await?;
            if let Some(reason) = &snapshot.truncation_reason {
                self.log(LogLevel::Warn, "snapshot", format!("snapshot truncated: {reason}"));
            }
            Ok::<_, EngineError>(snapshot)
        })
        .await
    }

    pub async fn interactive_elements(
        &self,
        page: &Arc<Page>,
        query: &ElementQuery,
    ) -> Result<ElementPage, EngineError> {
        self.in_span(async {
            let listing = self.perceiver.interactive_elements(page, query).await?;
            Ok::<_, EngineError>(listing)
        })
        .await
    }

    /// PNG of `page` with every element matching `masks` covered.
    pub async fn screenshot(
        &self,
        page: &Arc<Page>,
        masks: &[&str],
    ) -> Result<Vec<u8>, EngineError> {
        self.in_span(async {
            let locators = masks
                .iter()
                .map(|selector| self.locator(page, selector))
                .collect::<Result<Vec<_>, EngineError>>()?;
            let png = screenshot_with_masks(page, &locators, &ScreenshotOptions::default()).await?;
            Ok::<_, EngineError>(png)
        })
        .await
    }

    /// Runs `request` on `page` through the action cache.
    pub async fn act(
        &self,
        page: &Arc<Page>,
        request: &ActRequest,
        planner: &dyn ActionPlanner,
    ) -> Result<ActResult, EngineError> {
        self.in_span(async {
            let executor = PageActionExecutor::new(page.clone())
                .with_primitives(self.primitives())
                .with_step_timeout(self.config.timeouts.action());
            let result = self.cache.act(request, &executor, planner).await;
            match &result {
                Ok(outcome) => self.log(
                    if outcome.success { LogLevel::Info } else { LogLevel::Warn },
                    "act",
                    format!(
                        "{} ({}): {}",
                        request.instruction,
                        outcome.cache_status.as_str(),
                        outcome.message
                    ),
                ),
                Err(err) => self.log(
                    LogLevel::Error,
                    "act",
                    format!("{}: {}", request.instruction, err),
                ),
            }
            result.map_err(EngineError::from)
        })
        .await
    }

    pub async fn shutdown(&self) {
        self.in_span(async {
            self.perceiver_events.abort();
            self.adapter.shutdown().await;
            self.log(LogLevel::Info, "lifecycle", "engine stopped");
        })
        .await
    }
}
