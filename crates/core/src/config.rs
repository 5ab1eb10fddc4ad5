use std::env;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_FEATURE_TTL_MS, DEFAULT_HISTORY_LENGTH};

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

/// Read a profiled env var: tries {PROFILE}_{KEY} first, falls back to {KEY}.
fn profiled_env_opt(profile: &str, key: &str) -> Option<String> {
    if !profile.is_empty() {
        let prefixed = format!("{}_{}", profile, key);
        if let Some(v) = env_opt(&prefixed) {
            return Some(v);
        }
    }
    env_opt(key)
}

fn profiled_env_or(profile: &str, key: &str, default: &str) -> String {
    profiled_env_opt(profile, key).unwrap_or_else(|| default.to_string())
}

fn profiled_env_i64(profile: &str, key: &str, default: i64) -> i64 {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn profiled_env_usize(profile: &str, key: &str, default: usize) -> usize {
    profiled_env_opt(profile, key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

// ── Engine config ─────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Active profile name (empty = default).
    pub profile: String,
    /// Lifetime of a feature value when its metadata has no `ttl`.
    pub default_feature_ttl_ms: i64,
    /// History length of a feature when its metadata has no `history`.
    pub default_history_length: usize,
    /// `tracing_subscriber::EnvFilter` directive.
    pub log_filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            profile: String::new(),
            default_feature_ttl_ms: DEFAULT_FEATURE_TTL_MS,
            default_history_length: DEFAULT_HISTORY_LENGTH,
            log_filter: "info".to_string(),
        }
    }
}

impl EngineConfig {
    /// Build config from environment variables (call `load_dotenv()` first).
    /// Profile is read from `TWINSIGHT_PROFILE`. When set (e.g. `PROD`),
    /// every key is first looked up as `{PROFILE}_{KEY}`, falling back to `{KEY}`.
    pub fn from_env() -> Self {
        let profile = env_or("TWINSIGHT_PROFILE", "").to_uppercase();
        Self::for_profile(&profile)
    }

    /// Build config for a specific named profile (empty string = default).
    pub fn for_profile(profile: &str) -> Self {
        let p = profile.to_uppercase();
        let p = p.as_str();
        Self {
            profile: p.to_string(),
            default_feature_ttl_ms: profiled_env_i64(p, "FEATURE_TTL_MS", DEFAULT_FEATURE_TTL_MS),
            default_history_length: profiled_env_usize(
                p,
                "FEATURE_HISTORY_LENGTH",
                DEFAULT_HISTORY_LENGTH,
            ),
            log_filter: profiled_env_or(p, "TWINSIGHT_LOG", "info"),
        }
    }

    pub fn profile_label(&self) -> &str {
        if self.profile.is_empty() { "default" } else { &self.profile }
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded (profile: {}):", self.profile_label());
        tracing::info!("  features:    ttl_ms={}, history={}", self.default_feature_ttl_ms, self.default_history_length);
        tracing::info!("  logging:     filter={}", self.log_filter);
    }
}
