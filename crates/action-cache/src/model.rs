use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Schema version written into every cache document
pub const CACHE_VERSION: u32 = 1;

/// One replayable step. `arguments` may hold `%name%` placeholders that are filled from the
/// request variables at replay time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAction {
    pub selector: String,
    pub method: String,
    #[serde(default)]
    pub arguments: Vec<String>,
    #[serde(default)]
    pub description: String,
}

impl CachedAction {
    pub fn new(selector: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            method: method.into(),
            arguments: Vec::new(),
            description: String::new(),
        }
    }

    pub fn with_arguments<I, S>(mut self, arguments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.arguments = arguments.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Copy with every `%name%` in the arguments replaced by its variable value.
    ///
    /// Each argument is scanned once, so a value that itself contains `%other%` is kept as is.
    pub fn substitute(&self, variables: &BTreeMap<String, String>) -> CachedAction {
        let mut action = self.clone();
        for argument in action.arguments.iter_mut() {
            *argument = fill(argument, variables);
        }
        action
    }

    /// Names of the `%name%` placeholders used in the arguments.
    pub fn placeholders(&self) -> Vec<String> {
        let mut names = Vec::new();
        for argument in &self.arguments {
            let mut rest = argument.as_str();
            while let Some(open) = rest.find('%') {
                let tail = &rest[open + 1..];
                let Some(close) = tail.find('%') else { break };
                let name = &tail[..close];
                if !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
                    names.push(name.to_string());
                    rest = &tail[close + 1..];
                } else {
                    rest = tail;
                }
            }
        }
        names
    }
}

fn fill(template: &str, variables: &BTreeMap<String, String>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('%') {
        out.push_str(&rest[..open]);
        let tail = &rest[open + 1..];
        let value = tail
            .find('%')
            .and_then(|close| variables.get(&tail[..close]).map(|value| (close, value)));
        match value {
            Some((close, value)) => {
                out.push_str(value);
                rest = &tail[close + 1..];
            }
            None => {
                out.push('%');
                rest = tail;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Document stored per cache key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub version: u32,
    pub instruction: String,
    pub url: String,
    /// Sorted
    pub variable_keys: Vec<String>,
    pub actions: Vec<CachedAction>,
    pub message: String,
    pub action_description: String,
    pub timestamp: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(request: &ActRequest, run: &PlannedRun) -> Self {
        Self {
            version: CACHE_VERSION,
            instruction: request.instruction.clone(),
            url: request.url.clone(),
            variable_keys: request.variable_keys(),
            actions: run.actions.clone(),
            message: run.message.clone(),
            action_description: run.action_description.clone(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ActRequest {
    pub instruction: String,
    pub url: String,
    pub variables: BTreeMap<String, String>,
    /// Overrides the policy timeout for this call
    #[serde(skip)]
    pub timeout: Option<Duration>,
}

impl ActRequest {
    pub fn new(instruction: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            instruction: instruction.into(),
            url: url.into(),
            ..Self::default()
        }
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn variable_keys(&self) -> Vec<String> {
        // BTreeMap keys are already sorted
        self.variables.keys().cloned().collect()
    }
}

/// Outcome of a fresh planner run.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlannedRun {
    pub success: bool,
    pub message: String,
    pub action_description: String,
    /// Performed steps, with variable values still as `%name%` placeholders
    pub actions: Vec<CachedAction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    Hit,
    Miss,
    /// Replayed from the cache after at least one step was re-resolved
    Healed,
}

impl CacheStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
            CacheStatus::Healed => "healed",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActResult {
    pub success: bool,
    pub message: String,
    pub action_description: String,
    pub actions: Vec<CachedAction>,
    pub cache_status: CacheStatus,
}

impl ActResult {
    pub fn from_run(run: PlannedRun) -> Self {
        Self {
            success: run.success,
            message: run.message,
            action_description: run.action_description,
            actions: run.actions,
            cache_status: CacheStatus::Miss,
        }
    }
}

/// Summary row for listing stored entries.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheListing {
    pub key: String,
    pub instruction: String,
    pub url: String,
    pub actions: usize,
    pub timestamp: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholders_are_filled_from_variables() {
        let action = CachedAction::new("#email", "fill").with_arguments(["%user%@%domain%"]);
        assert_eq!(action.placeholders(), vec!["user", "domain"]);

        let mut vars = BTreeMap::new();
        vars.insert("user".to_string(), "ada".to_string());
        vars.insert("domain".to_string(), "example.com".to_string());
        let filled = action.substitute(&vars);
        assert_eq!(filled.arguments, vec!["ada@example.com"]);
        assert_eq!(filled.selector, "#email");

        let literal = CachedAction::new("#discount", "fill").with_arguments(["50% off"]);
        assert!(literal.placeholders().is_empty());
    }

    #[test]
    fn substituted_values_are_not_expanded_again() {
        let mut vars = BTreeMap::new();
        vars.insert("a".to_string(), "100%b%off".to_string());
        vars.insert("b".to_string(), "SECRET".to_string());

        let action = CachedAction::new("#promo", "fill").with_arguments(["%a%", "%b% and %a%", "50% %missing% %b%"]);
        let filled = action.substitute(&vars);
        assert_eq!(
            filled.arguments,
            vec!["100%b%off", "SECRET and 100%b%off", "50% %missing% SECRET"]
        );
    }
}
