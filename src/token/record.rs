use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Health state of a single credential. `Active` is the only selectable state;
/// `Cooling` becomes selectable again once its deadline elapses; `Invalid` and
/// `Disabled` are excluded until manual re-activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenStatus {
    Active,
    Cooling,
    // Legacy payloads used "expired" for the same state.
    #[serde(alias = "expired")]
    Invalid,
    Disabled,
}

impl Default for TokenStatus {
    fn default() -> Self {
        TokenStatus::Active
    }
}

/// One credential plus its health/usage bookkeeping. Mutated only through
/// `TokenManagerHandle`; the remediation pipeline touches status fields alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    /// Normalized session credential. Invariant: never `sso=`-prefixed.
    pub token: String,

    #[serde(default)]
    pub status: TokenStatus,

    /// Remaining chat-class allowance. Meaningful only when `quota_known`.
    #[serde(default = "unknown_quota")]
    pub quota: i64,

    #[serde(default)]
    pub quota_known: bool,

    /// Independent allowance for the heavy request class.
    #[serde(default = "unknown_quota")]
    pub heavy_quota: i64,

    #[serde(default)]
    pub heavy_quota_known: bool,

    #[serde(default)]
    pub fail_count: u64,

    #[serde(default)]
    pub use_count: u64,

    /// Failures since the last success; drives the cooling threshold without
    /// disturbing the monotonic `fail_count` diagnostic.
    #[serde(default)]
    pub fail_streak: u32,

    /// Free-text annotation, no behavioral effect.
    #[serde(default)]
    pub note: String,

    /// Last server-side asset purge for this credential, epoch milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_asset_clear_at: Option<i64>,

    /// Deadline after which a cooling token is selectable again.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cooling_until: Option<DateTime<Utc>>,

    /// Unknown persisted fields, carried losslessly across partial updates.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TokenRecord {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: normalize_token(&token.into()),
            status: TokenStatus::Active,
            quota: unknown_quota(),
            quota_known: false,
            heavy_quota: unknown_quota(),
            heavy_quota_known: false,
            fail_count: 0,
            use_count: 0,
            fail_streak: 0,
            note: String::new(),
            last_asset_clear_at: None,
            cooling_until: None,
            extra: Map::new(),
        }
    }

    /// Relevant quota counter for a class-specific check: `(value, known)`.
    pub fn quota_for(&self, heavy: bool) -> (i64, bool) {
        if heavy {
            (self.heavy_quota, self.heavy_quota_known)
        } else {
            (self.quota, self.quota_known)
        }
    }

    /// True when the relevant quota is explicitly known to be exhausted.
    pub fn quota_exhausted(&self, heavy: bool) -> bool {
        let (value, known) = self.quota_for(heavy);
        known && value <= 0
    }
}

/// `-1` means unlimited/unknown; `quota_known` distinguishes "explicitly 0".
fn unknown_quota() -> i64 {
    -1
}

/// Strip the cookie-style `sso=` prefix the upstream sometimes supplies.
/// Stored tokens are always the bare value.
pub fn normalize_token(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix("sso=")
        .unwrap_or(trimmed)
        .trim()
        .to_string()
}

/// Tier label derived from the pool name; never independently settable.
pub fn token_type_for_pool(pool_name: &str) -> &'static str {
    if pool_name.trim() == "ssoSuper" {
        "ssoSuper"
    } else {
        "sso"
    }
}

/// Persisted entry shape: legacy payloads store bare credential strings,
/// current ones store full objects. Normalized into `TokenRecord` on ingestion
/// and never carried past this boundary.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TokenEntry {
    Full(TokenRecord),
    Bare(String),
}

impl TokenEntry {
    /// Normalize either shape into a record; empty tokens yield `None`.
    pub fn into_record(self) -> Option<TokenRecord> {
        match self {
            TokenEntry::Bare(raw) => {
                let token = normalize_token(&raw);
                if token.is_empty() {
                    return None;
                }
                Some(TokenRecord::new(token))
            }
            TokenEntry::Full(mut record) => {
                record.token = normalize_token(&record.token);
                if record.token.is_empty() {
                    return None;
                }
                if !record.quota_known && record.quota >= 0 {
                    // Partial payloads may carry a bare quota value; a
                    // non-negative number is an explicit setting.
                    record.quota_known = true;
                }
                Some(record)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bare_entry_strips_sso_prefix() {
        let entry: TokenEntry = serde_json::from_value(json!("sso=tok-1")).expect("entry");
        let record = entry.into_record().expect("record");
        assert_eq!(record.token, "tok-1");
        assert_eq!(record.status, TokenStatus::Active);
        assert!(!record.quota_known);
        assert_eq!(record.quota, -1);
    }

    #[test]
    fn full_entry_preserves_unknown_fields() {
        let entry: TokenEntry = serde_json::from_value(json!({
            "token": "sso=tok-2",
            "status": "cooling",
            "quota": 7,
            "quota_known": true,
            "custom_field": {"nested": true}
        }))
        .expect("entry");
        let record = entry.into_record().expect("record");
        assert_eq!(record.token, "tok-2");
        assert_eq!(record.status, TokenStatus::Cooling);
        assert_eq!(record.quota, 7);
        assert!(record.quota_known);
        assert_eq!(record.extra.get("custom_field"), Some(&json!({"nested": true})));

        let out = serde_json::to_value(&record).expect("serialize");
        assert_eq!(out.get("custom_field"), Some(&json!({"nested": true})));
    }

    #[test]
    fn legacy_expired_status_maps_to_invalid() {
        let entry: TokenEntry = serde_json::from_value(json!({
            "token": "tok-3",
            "status": "expired"
        }))
        .expect("entry");
        let record = entry.into_record().expect("record");
        assert_eq!(record.status, TokenStatus::Invalid);
    }

    #[test]
    fn empty_entries_are_dropped() {
        let entry: TokenEntry = serde_json::from_value(json!("   ")).expect("entry");
        assert!(entry.into_record().is_none());
    }

    #[test]
    fn quota_exhaustion_requires_known_flag() {
        let mut record = TokenRecord::new("tok-4");
        record.quota = 0;
        record.quota_known = false;
        assert!(!record.quota_exhausted(false));

        record.quota_known = true;
        assert!(record.quota_exhausted(false));
        assert!(!record.quota_exhausted(true));
    }

    #[test]
    fn token_type_follows_pool_name() {
        assert_eq!(token_type_for_pool("ssoSuper"), "ssoSuper");
        assert_eq!(token_type_for_pool("ssoBasic"), "sso");
        assert_eq!(token_type_for_pool("anything"), "sso");
    }
}
