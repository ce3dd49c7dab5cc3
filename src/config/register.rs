use serde::{Deserialize, Serialize};

/// Upstream account-settings endpoints and browser-session knobs
/// (`register` table in config.toml).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RegisterConfig {
    /// Terms-of-service acceptance endpoint.
    #[serde(default = "default_accept_tos_url")]
    pub accept_tos_url: String,

    /// Birth-date attestation endpoint.
    #[serde(default = "default_birth_date_url")]
    pub birth_date_url: String,

    /// NSFW-content opt-in endpoint.
    #[serde(default = "default_nsfw_url")]
    pub nsfw_url: String,

    /// Browser-impersonation profile forwarded with every settings call.
    /// TOML: `register.impersonate`. Default: `chrome120`.
    #[serde(default = "default_impersonate")]
    pub impersonate: String,

    /// Optional anti-bot clearance cookie attached to settings calls.
    /// TOML: `register.cf_clearance`. Default: empty.
    #[serde(default)]
    pub cf_clearance: String,

    /// Per-call timeout in seconds for settings requests.
    /// TOML: `register.timeout_secs`. Default: `15`.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RegisterConfig {
    fn default() -> Self {
        Self {
            accept_tos_url: default_accept_tos_url(),
            birth_date_url: default_birth_date_url(),
            nsfw_url: default_nsfw_url(),
            impersonate: default_impersonate(),
            cf_clearance: String::new(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_accept_tos_url() -> String {
    "https://grok.com/rest/auth/accept-tos".to_string()
}

fn default_birth_date_url() -> String {
    "https://grok.com/rest/auth/set-birth-date".to_string()
}

fn default_nsfw_url() -> String {
    "https://grok.com/rest/users/update-user-settings".to_string()
}

fn default_impersonate() -> String {
    "chrome120".to_string()
}

fn default_timeout_secs() -> u64 {
    15
}
