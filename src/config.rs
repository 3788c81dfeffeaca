//! Compiler configuration.
//!
//! ## Environment
//!
//! [`CompilerConfig::from_env`] starts from defaults and overrides:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `PROMPT_KERNEL_TOKEN_BUDGET` | `token_budget` |
//! | `PROMPT_KERNEL_RESERVED_OUTPUT_TOKENS` | `reserved_output_tokens` |
//! | `PROMPT_KERNEL_TOLERATE_DUPLICATES` | `tolerate_duplicate_ids` |
//! | `PROMPT_KERNEL_CYCLE_POLICY` | `cycle_policy` (`reject` / `drop_cyclic`) |
//! | `PROMPT_KERNEL_TRACE` | `trace` |
//! | `PROMPT_KERNEL_SECTION_HEADERS` | `section_headers` |
//! | `PROMPT_KERNEL_CACHE_ENTRIES` | `cache.max_entries` |
//! | `PROMPT_KERNEL_CACHE_ENABLED` | `cache.enabled` |
//!
//! Unparsable values are logged and the default is kept.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Default token budget when the context does not carry one.
pub const DEFAULT_TOKEN_BUDGET: i64 = 128_000;

/// Default number of tokens held back for the model's output.
pub const DEFAULT_RESERVED_OUTPUT_TOKENS: i64 = 4_096;

/// What to do when the atom set contains a dependency cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Fail the compilation with a `CycleError`.
    #[default]
    Reject,
    /// Drop cycle members and their dependents, compile the rest.
    DropCyclic,
}

impl FromStr for CyclePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "drop_cyclic" | "drop" => Ok(Self::DropCyclic),
            other => Err(format!("unknown cycle policy: {other}")),
        }
    }
}

/// Configuration for the compilation cache.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum number of compiled prompts kept.
    pub max_entries: usize,
    /// Whether to enable the cache.
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_024,
            enabled: true,
        }
    }
}

/// Compiler configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompilerConfig {
    /// Budget used when the context does not set one.
    pub token_budget: i64,
    /// Tokens subtracted from every budget for the model's output.
    pub reserved_output_tokens: i64,
    /// Keep the first of several atoms sharing an ID instead of failing.
    pub tolerate_duplicate_ids: bool,
    /// Cycle handling.
    pub cycle_policy: CyclePolicy,
    /// Log full resolved orders and category groups at debug level.
    pub trace: bool,
    /// Render a header line per category group.
    pub section_headers: bool,
    /// Cache settings.
    pub cache: CacheConfig,
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self {
            token_budget: DEFAULT_TOKEN_BUDGET,
            reserved_output_tokens: DEFAULT_RESERVED_OUTPUT_TOKENS,
            tolerate_duplicate_ids: true,
            cycle_policy: CyclePolicy::Reject,
            trace: false,
            section_headers: false,
            cache: CacheConfig::default(),
        }
    }
}

impl CompilerConfig {
    /// Load from `PROMPT_KERNEL_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from any key lookup (environment, test map, ...).
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        override_from(&lookup, "PROMPT_KERNEL_TOKEN_BUDGET", &mut config.token_budget);
        override_from(
            &lookup,
            "PROMPT_KERNEL_RESERVED_OUTPUT_TOKENS",
            &mut config.reserved_output_tokens,
        );
        override_from(
            &lookup,
            "PROMPT_KERNEL_TOLERATE_DUPLICATES",
            &mut config.tolerate_duplicate_ids,
        );
        override_from(&lookup, "PROMPT_KERNEL_CYCLE_POLICY", &mut config.cycle_policy);
        override_from(&lookup, "PROMPT_KERNEL_TRACE", &mut config.trace);
        override_from(&lookup, "PROMPT_KERNEL_SECTION_HEADERS", &mut config.section_headers);
        override_from(&lookup, "PROMPT_KERNEL_CACHE_ENTRIES", &mut config.cache.max_entries);
        override_from(&lookup, "PROMPT_KERNEL_CACHE_ENABLED", &mut config.cache.enabled);

        config
    }

    /// Parse from JSON. Missing fields take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Budget available to atoms for a context budget.
    ///
    /// May be zero or negative, which fits nothing.
    pub fn effective_budget(&self, context_budget: Option<i64>) -> i64 {
        context_budget
            .unwrap_or(self.token_budget)
            .saturating_sub(self.reserved_output_tokens)
    }
}

fn override_from<F, T>(lookup: &F, key: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(raw) = lookup(key) else {
        return;
    };
    match raw.trim().parse::<T>() {
        Ok(value) => *slot = value,
        Err(_) => tracing::warn!(key, value = %raw, "Ignoring unparsable config value"),
    }
}
