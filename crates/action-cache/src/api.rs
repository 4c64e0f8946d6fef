use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{debug, info, warn};

use crate::errors::CacheError;
use crate::hash::cache_key;
use crate::metrics;
use crate::model::{ActRequest, ActResult, CacheEntry, CacheStatus, CachedAction, PlannedRun};
use crate::policy::CachePolicy;
use crate::store::{CacheResult, CacheStore, FileCacheStore};

/// Performs one stored step against the page.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &CachedAction) -> Result<(), CacheError>;
}

/// The planning layer that decides actions from a natural-language instruction.
#[async_trait]
pub trait ActionPlanner: Send + Sync {
    /// Finds a replacement for a replayed step that failed with `error`. `failed` carries the
    /// variable values already substituted.
    async fn resolve_step(
        &self,
        instruction: &str,
        failed: &CachedAction,
        error: &CacheError,
    ) -> Result<CachedAction, CacheError>;

    /// Plans and runs `instruction` from scratch.
    async fn plan_and_execute(
        &self,
        instruction: &str,
        variables: &BTreeMap<String, String>,
    ) -> Result<PlannedRun, CacheError>;
}

/// Replays stored action sequences for repeated instructions and falls back to the planner
/// on a miss.
pub struct ActCache {
    store: Arc<dyn CacheStore>,
    policy: CachePolicy,
}

impl ActCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: CachePolicy) -> Self {
        Self { store, policy }
    }

    /// Cache backed by a [`FileCacheStore`] rooted at `policy.dir`.
    pub fn with_file_store(policy: CachePolicy) -> Self {
        let store = Arc::new(FileCacheStore::new(policy.dir.clone()));
        Self::new(store, policy)
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Runs `request`, replaying a stored sequence when one matches.
    ///
    /// The whole path is bounded by the request timeout (or the policy default). On expiry the
    /// in-flight work is dropped and `CacheError::Timeout` is returned; browser-side effects
    /// already dispatched are not rolled back.
    pub async fn act(
        &self,
        request: &ActRequest,
        executor: &dyn ActionExecutor,
        planner: &dyn ActionPlanner,
    ) -> CacheResult<ActResult> {
        if request.instruction.trim().is_empty() {
            return Err(CacheError::InvalidRequest("instruction is empty".into()));
        }
        let timeout = request.timeout.unwrap_or_else(|| self.policy.timeout());
        let started = Instant::now();

        let outcome = tokio::time::timeout(timeout, self.act_inner(request, executor, planner)).await;
        match outcome {
            Ok(Ok(result)) => {
                metrics::record_act(result.cache_status);
                info!(
                    target: "action-cache",
                    status = result.cache_status.as_str(),
                    success = result.success,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "act finished"
                );
                Ok(result)
            }
            Ok(Err(err)) => Err(err),
            Err(_) => {
                metrics::record_timeout();
                let ms = timeout.as_millis() as u64;
                warn!(target: "action-cache", instruction = %request.instruction, "act abandoned after {}ms", ms);
                Err(CacheError::Timeout(ms))
            }
        }
    }

    async fn act_inner(
        &self,
        request: &ActRequest,
        executor: &dyn ActionExecutor,
        planner: &dyn ActionPlanner,
    ) -> CacheResult<ActResult> {
        if !self.policy.enabled {
            let run = planner
                .plan_and_execute(&request.instruction, &request.variables)
                .await?;
            return Ok(ActResult::from_run(run));
        }

        let key = cache_key(
            &request.instruction,
            &request.url,
            request.variables.keys().map(String::as_str),
        );
        match self.lookup(&key, request).await? {
            Some(entry) => self.replay(&key, entry, request, executor, planner).await,
            None => self.run_fresh(&key, request, planner).await,
        }
    }

    /// A stored entry usable for `request`, or `None` for any kind of miss.
    async fn lookup(&self, key: &str, request: &ActRequest) -> CacheResult<Option<CacheEntry>> {
        let entry = match self.store.get(key).await {
            Ok(Some(entry)) => entry,
            Ok(None) => return Ok(None),
            Err(err) if err.is_schema() => {
                metrics::record_schema_miss();
                warn!(target: "action-cache", %key, "Ignoring cache entry: {}", err);
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        if entry.variable_keys != request.variable_keys() {
            debug!(target: "action-cache", %key, "Variable keys differ from the stored entry");
            return Ok(None);
        }
        let missing: Vec<String> = entry
            .actions
            .iter()
            .flat_map(|action| action.placeholders())
            .filter(|name| !request.variables.contains_key(name))
            .collect();
        if !missing.is_empty() {
            debug!(target: "action-cache", %key, ?missing, "Stored entry needs unsupplied variables");
            return Ok(None);
        }
        Ok(Some(entry))
    }

    async fn replay(
        &self,
        key: &str,
        entry: CacheEntry,
        request: &ActRequest,
        executor: &dyn ActionExecutor,
        planner: &dyn ActionPlanner,
    ) -> CacheResult<ActResult> {
        debug!(target: "action-cache", %key, steps = entry.actions.len(), "Replaying cached actions");
        let total = entry.actions.len();
        let mut performed = Vec::with_capacity(total);

        for (step, template) in entry.actions.iter().enumerate() {
            let concrete = template.substitute(&request.variables);
            let err = match executor.execute(&concrete).await {
                Ok(()) => {
                    performed.push(template.clone());
                    continue;
                }
                Err(err) => err,
            };

            let healed = if self.policy.self_heal {
                self.heal(&request.instruction, template, &concrete, &err, executor, planner)
                    .await
            } else {
                Err(err)
            };
            match healed {
                Ok(action) => performed.push(action),
                Err(err) => {
                    metrics::record_replay_failure();
                    warn!(target: "action-cache", %key, step = step + 1, "Cached replay failed: {}", err);
                    return Ok(ActResult {
                        success: false,
                        message: format!("cached action {}/{} failed: {}", step + 1, total, err),
                        action_description: entry.action_description,
                        actions: performed,
                        cache_status: CacheStatus::Hit,
                    });
                }
            }
        }

        let drifted = performed != entry.actions;
        if drifted {
            let updated = CacheEntry {
                actions: performed.clone(),
                timestamp: Utc::now(),
                ..entry.clone()
            };
            if let Err(err) = self.store.put(key, &updated).await {
                warn!(target: "action-cache", %key, "Failed to persist healed actions: {}", err);
            }
        }

        Ok(ActResult {
            success: true,
            message: entry.message,
            action_description: entry.action_description,
            actions: performed,
            cache_status: if drifted {
                CacheStatus::Healed
            } else {
                CacheStatus::Hit
            },
        })
    }

    /// Asks the planner for a replacement step and runs it. Returns the replacement in stored
    /// form, with placeholders kept when the planner left the arguments unchanged.
    async fn heal(
        &self,
        instruction: &str,
        template: &CachedAction,
        concrete: &CachedAction,
        error: &CacheError,
        executor: &dyn ActionExecutor,
        planner: &dyn ActionPlanner,
    ) -> CacheResult<CachedAction> {
        info!(target: "action-cache", selector = %concrete.selector, "Re-resolving failed step: {}", error);
        let mut replacement = planner.resolve_step(instruction, concrete, error).await?;
        executor.execute(&replacement).await?;
        metrics::record_healed_step();
        if replacement.arguments == concrete.arguments {
            replacement.arguments = template.arguments.clone();
        }
        Ok(replacement)
    }

    async fn run_fresh(
        &self,
        key: &str,
        request: &ActRequest,
        planner: &dyn ActionPlanner,
    ) -> CacheResult<ActResult> {
        let run = planner
            .plan_and_execute(&request.instruction, &request.variables)
            .await?;
        if run.success && !run.actions.is_empty() {
            let entry = CacheEntry::new(request, &run);
            if let Err(err) = self.store.put(key, &entry).await {
                warn!(target: "action-cache", %key, "Failed to store planned actions: {}", err);
            }
        }
        Ok(ActResult::from_run(run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const URL: &str = "https://shop.example/login";

    /// Executes anything whose selector is not listed as broken.
    #[derive(Default)]
    struct ScriptedExecutor {
        broken: HashSet<String>,
        executed: Mutex<Vec<CachedAction>>,
    }

    impl ScriptedExecutor {
        fn breaking(selectors: &[&str]) -> Self {
            Self {
                broken: selectors.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn executed(&self) -> Vec<CachedAction> {
            self.executed.lock().clone()
        }
    }

    #[async_trait]
    impl ActionExecutor for ScriptedExecutor {
        async fn execute(&self, action: &CachedAction) -> Result<(), CacheError> {
            if self.broken.contains(&action.selector) {
                return Err(CacheError::Action(format!("no element matches '{}'", action.selector)));
            }
            self.executed.lock().push(action.clone());
            Ok(())
        }
    }

    struct ScriptedPlanner {
        run: PlannedRun,
        heal_to: Option<String>,
        delay: Duration,
        plans: AtomicUsize,
        heals: AtomicUsize,
    }

    impl ScriptedPlanner {
        fn new(actions: Vec<CachedAction>) -> Self {
            Self {
                run: PlannedRun {
                    success: true,
                    message: "logged in".into(),
                    action_description: "fill the form and submit".into(),
                    actions,
                },
                heal_to: None,
                delay: Duration::ZERO,
                plans: AtomicUsize::new(0),
                heals: AtomicUsize::new(0),
            }
        }

        fn healing_to(mut self, selector: &str) -> Self {
            self.heal_to = Some(selector.to_string());
            self
        }
    }

    #[async_trait]
    impl ActionPlanner for ScriptedPlanner {
        async fn resolve_step(
            &self,
            _instruction: &str,
            failed: &CachedAction,
            _error: &CacheError,
        ) -> Result<CachedAction, CacheError> {
            self.heals.fetch_add(1, Ordering::SeqCst);
            match &self.heal_to {
                Some(selector) => Ok(CachedAction {
                    selector: selector.clone(),
                    ..failed.clone()
                }),
                None => Err(CacheError::Planner("nothing similar on the page".into())),
            }
        }

        async fn plan_and_execute(
            &self,
            _instruction: &str,
            _variables: &BTreeMap<String, String>,
        ) -> Result<PlannedRun, CacheError> {
            self.plans.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok(self.run.clone())
        }
    }

    fn login_actions() -> Vec<CachedAction> {
        vec![
            CachedAction::new("#user", "fill")
                .with_arguments(["%username%"])
                .with_description("Username field"),
            CachedAction::new("#submit", "click").with_description("Sign in button"),
        ]
    }

    fn request(user: &str) -> ActRequest {
        ActRequest::new("sign in", URL).with_variable("username", user)
    }

    fn cache(dir: &std::path::Path, self_heal: bool) -> ActCache {
        ActCache::with_file_store(CachePolicy {
            dir: dir.to_path_buf(),
            self_heal,
            ..CachePolicy::default()
        })
    }

    fn key() -> String {
        cache_key("sign in", URL, ["username"])
    }

    #[tokio::test]
    async fn a_miss_is_planned_and_stored_then_replayed() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), true);
        let planner = ScriptedPlanner::new(login_actions());
        let executor = ScriptedExecutor::default();

        let first = cache.act(&request("ada"), &executor, &planner).await.unwrap();
        assert_eq!(first.cache_status, CacheStatus::Miss);
        assert!(first.success);
        assert_eq!(planner.plans.load(Ordering::SeqCst), 1);
        assert!(executor.executed().is_empty());

        let stored = cache.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(stored.variable_keys, vec!["username"]);
        assert_eq!(stored.actions[0].arguments, vec!["%username%"]);

        let second = cache.act(&request("grace"), &executor, &planner).await.unwrap();
        assert_eq!(second.cache_status, CacheStatus::Hit);
        assert!(second.success);
        assert_eq!(second.message, "logged in");
        assert_eq!(planner.plans.load(Ordering::SeqCst), 1);

        let executed = executor.executed();
        assert_eq!(executed.len(), 2);
        assert_eq!(executed[0].arguments, vec!["grace"]);
        assert_eq!(executed[1].selector, "#submit");
        // replay without drift leaves the entry alone
        let after = cache.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(after.timestamp, stored.timestamp);
    }

    #[tokio::test]
    async fn corrupted_selectors_are_healed_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), true);
        let planner = ScriptedPlanner::new(login_actions()).healing_to("#submit");
        cache
            .act(&request("ada"), &ScriptedExecutor::default(), &planner)
            .await
            .unwrap();

        let mut corrupted = cache.store().get(&key()).await.unwrap().unwrap();
        corrupted.actions[1].selector = "#submit-that-no-longer-exists".into();
        cache.store().put(&key(), &corrupted).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        let executor = ScriptedExecutor::breaking(&["#submit-that-no-longer-exists"]);
        let result = cache.act(&request("ada"), &executor, &planner).await.unwrap();
        assert!(result.success);
        assert_eq!(result.cache_status, CacheStatus::Healed);
        assert_eq!(planner.heals.load(Ordering::SeqCst), 1);
        assert_eq!(executor.executed().len(), 2);

        let repaired = cache.store().get(&key()).await.unwrap().unwrap();
        assert_eq!(repaired.actions[1].selector, "#submit");
        assert_eq!(repaired.actions[0].arguments, vec!["%username%"]);
        assert!(repaired.timestamp > corrupted.timestamp);
    }

    #[tokio::test]
    async fn without_self_heal_the_first_failure_stops_replay() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), false);
        let planner = ScriptedPlanner::new(login_actions()).healing_to("#user");
        cache
            .act(&request("ada"), &ScriptedExecutor::default(), &planner)
            .await
            .unwrap();

        let executor = ScriptedExecutor::breaking(&["#user"]);
        let result = cache.act(&request("ada"), &executor, &planner).await.unwrap();
        assert!(!result.success);
        assert_eq!(result.cache_status, CacheStatus::Hit);
        assert!(result.message.starts_with("cached action 1/2 failed"));
        assert!(executor.executed().is_empty());
        assert_eq!(planner.heals.load(Ordering::SeqCst), 0);
        assert_eq!(planner.plans.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_heals_report_failure_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), true);
        let planner = ScriptedPlanner::new(login_actions());
        cache
            .act(&request("ada"), &ScriptedExecutor::default(), &planner)
            .await
            .unwrap();
        let before = cache.store().get(&key()).await.unwrap().unwrap();

        let executor = ScriptedExecutor::breaking(&["#submit"]);
        let result = cache.act(&request("ada"), &executor, &planner).await.unwrap();
        assert!(!result.success);
        assert!(result.message.contains("nothing similar on the page"));
        assert_eq!(result.actions.len(), 1);
        assert_eq!(cache.store().get(&key()).await.unwrap().unwrap(), before);
    }

    #[tokio::test]
    async fn mismatched_or_broken_entries_are_misses() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), true);
        let planner = ScriptedPlanner::new(login_actions());
        let executor = ScriptedExecutor::default();

        std::fs::write(dir.path().join(format!("{}.json", key())), b"{\"version\": 7}").unwrap();
        let result = cache.act(&request("ada"), &executor, &planner).await.unwrap();
        assert_eq!(result.cache_status, CacheStatus::Miss);
        assert_eq!(cache.store().get(&key()).await.unwrap().unwrap().version, 1);

        // an entry whose keys differ from the request's is never replayed
        let mut skewed = cache.store().get(&key()).await.unwrap().unwrap();
        skewed.variable_keys = vec!["email".into()];
        cache.store().put(&key(), &skewed).await.unwrap();
        let again = cache.act(&request("ada"), &executor, &planner).await.unwrap();
        assert_eq!(again.cache_status, CacheStatus::Miss);
        assert_eq!(planner.plans.load(Ordering::SeqCst), 2);
        assert!(executor.executed().is_empty());
    }

    #[tokio::test]
    async fn slow_runs_time_out() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), true);
        let mut planner = ScriptedPlanner::new(login_actions());
        planner.delay = Duration::from_secs(5);

        let request = request("ada").with_timeout(Duration::from_millis(50));
        let err = cache
            .act(&request, &ScriptedExecutor::default(), &planner)
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::Timeout(50)));
        assert!(cache.store().get(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn a_disabled_cache_always_plans() {
        let dir = tempfile::tempdir().unwrap();
        let cache = ActCache::with_file_store(CachePolicy {
            enabled: false,
            dir: dir.path().to_path_buf(),
            ..CachePolicy::default()
        });
        let planner = ScriptedPlanner::new(login_actions());
        for _ in 0..2 {
            let result = cache
                .act(&request("ada"), &ScriptedExecutor::default(), &planner)
                .await
                .unwrap();
            assert_eq!(result.cache_status, CacheStatus::Miss);
        }
        assert_eq!(planner.plans.load(Ordering::SeqCst), 2);
        assert!(cache.store().list().await.unwrap().is_empty());
        assert!(cache
            .act(&ActRequest::new("  ", URL), &ScriptedExecutor::default(), &planner)
            .await
            .is_err());
    }
}
