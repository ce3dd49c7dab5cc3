mod actor;

pub use actor::{StoreActorHandle, spawn};

/// Storage key for the persisted token-pool payload.
pub const TOKENS_KEY: &str = "tokens";

/// Storage key for API-key definitions.
pub const API_KEYS_KEY: &str = "api_keys";

/// Storage key prefix for per-day API-key usage buckets.
pub const API_KEY_USAGE_PREFIX: &str = "api_key_usage";
