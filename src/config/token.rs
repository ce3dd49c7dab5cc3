use serde::{Deserialize, Serialize};

/// Token-pool tuning knobs (`token` table in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TokenConfig {
    /// Consecutive upstream failures before an active token starts cooling.
    /// TOML: `token.fail_threshold`. Default: `3`.
    #[serde(default = "default_fail_threshold")]
    pub fail_threshold: u32,

    /// Cooldown duration in seconds once the fail threshold is hit.
    /// TOML: `token.cooldown_secs`. Default: `1800`.
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    /// Staleness TTL for the in-memory pool snapshot; `reload_if_stale`
    /// re-reads the persisted payload once this many seconds have elapsed.
    /// TOML: `token.reload_ttl_secs`. Default: `60`.
    #[serde(default = "default_reload_ttl_secs")]
    pub reload_ttl_secs: u64,

    /// Concurrency bound for the account-settings remediation pipeline.
    /// TOML: `token.nsfw_refresh_concurrency`. Default: `10`.
    #[serde(default = "default_nsfw_refresh_concurrency")]
    pub nsfw_refresh_concurrency: usize,

    /// Retry budget per token for the remediation pipeline (attempts = retries + 1).
    /// TOML: `token.nsfw_refresh_retries`. Default: `3`.
    #[serde(default = "default_nsfw_refresh_retries")]
    pub nsfw_refresh_retries: usize,

    /// Batch size for admin fan-out operations (bulk probe / asset sweeps).
    /// TOML: `token.admin_batch_size`. Default: `10`.
    #[serde(default = "default_admin_batch_size")]
    pub admin_batch_size: usize,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            fail_threshold: default_fail_threshold(),
            cooldown_secs: default_cooldown_secs(),
            reload_ttl_secs: default_reload_ttl_secs(),
            nsfw_refresh_concurrency: default_nsfw_refresh_concurrency(),
            nsfw_refresh_retries: default_nsfw_refresh_retries(),
            admin_batch_size: default_admin_batch_size(),
        }
    }
}

fn default_fail_threshold() -> u32 {
    3
}

fn default_cooldown_secs() -> u64 {
    1800
}

fn default_reload_ttl_secs() -> u64 {
    60
}

fn default_nsfw_refresh_concurrency() -> usize {
    10
}

fn default_nsfw_refresh_retries() -> usize {
    3
}

fn default_admin_batch_size() -> usize {
    10
}
