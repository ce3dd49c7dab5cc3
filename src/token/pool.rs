use super::record::{TokenRecord, TokenStatus, normalize_token};
use crate::models::RequestClass;
use chrono::{DateTime, Duration, Utc};

pub const BASIC_POOL: &str = "ssoBasic";
pub const SUPER_POOL: &str = "ssoSuper";

/// Ordered tier of credentials. Order within a pool is the declaration order of
/// the persisted payload and acts as the selection tie-break.
#[derive(Debug, Clone)]
pub struct Pool {
    pub name: String,
    pub records: Vec<TokenRecord>,
}

impl Pool {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            records: Vec::new(),
        }
    }
}

/// Aggregate status counts for the metrics surface.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct PoolSnapshot {
    pub total: usize,
    pub active: usize,
    pub cooling: usize,
    pub invalid: usize,
    pub disabled: usize,
    pub chat_quota: i64,
    pub total_calls: u64,
}

/// Core pool logic for credential selection and usage accounting
/// (no IO, no locks). All wall-clock decisions take `now` explicitly so the
/// transition rules stay unit-testable.
#[derive(Debug, Clone, Default)]
pub struct PoolSet {
    pools: Vec<Pool>,
}

impl PoolSet {
    pub fn new(pools: Vec<Pool>) -> Self {
        Self { pools }
    }

    pub fn pools(&self) -> &[Pool] {
        &self.pools
    }

    /// Pick an eligible token for the request class, applying lazy
    /// cooldown-expiry transitions as candidates are visited. Among eligible
    /// candidates the lowest `use_count` wins; ties keep pool-then-order
    /// traversal preference. Returns `None` on exhaustion; callers surface a
    /// retryable rate-limit condition, never a fatal error.
    pub fn select(&mut self, class: RequestClass, now: DateTime<Utc>) -> Option<String> {
        let heavy = class == RequestClass::Heavy;
        let mut best: Option<(u64, String)> = None;

        for pool in &mut self.pools {
            if heavy && pool.name != SUPER_POOL {
                continue;
            }
            for record in &mut pool.records {
                expire_cooldown(record, now);

                if record.status != TokenStatus::Active {
                    continue;
                }
                if record.quota_exhausted(heavy) {
                    continue;
                }

                let better = match &best {
                    Some((use_count, _)) => record.use_count < *use_count,
                    None => true,
                };
                if better {
                    best = Some((record.use_count, record.token.clone()));
                }
            }
        }

        best.map(|(_, token)| token)
    }

    /// Usage accounting after an upstream call attempt. `is_usage=false` marks
    /// a probe that must not move counters or quotas. `use_count` counts
    /// attempted calls, success or not. Returns `false` when the token is not
    /// present in any pool.
    #[allow(clippy::too_many_arguments)]
    pub fn sync_usage(
        &mut self,
        token: &str,
        class: RequestClass,
        success: bool,
        consume_on_fail: bool,
        is_usage: bool,
        fail_threshold: u32,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        let heavy = class == RequestClass::Heavy;
        let needle = normalize_token(token);
        let Some(record) = self.find_mut(&needle) else {
            return false;
        };

        if is_usage {
            record.use_count += 1;
        }

        if success {
            record.fail_streak = 0;
            if is_usage {
                consume_quota(record, heavy);
            }
            return true;
        }

        record.fail_count += 1;
        record.fail_streak += 1;
        if consume_on_fail && is_usage {
            // Upstream already charged the account for the failed attempt.
            consume_quota(record, heavy);
        }
        if record.status == TokenStatus::Active && record.fail_streak >= fail_threshold {
            record.status = TokenStatus::Cooling;
            record.cooling_until = Some(now + cooldown);
        }
        true
    }

    /// Transition a record into the "account fully provisioned" state. Only
    /// status bookkeeping moves; quota and usage counters are untouched, so
    /// repeated calls are idempotent.
    pub fn mark_settings_success(&mut self, token: &str) -> bool {
        let needle = normalize_token(token);
        let Some(record) = self.find_mut(&needle) else {
            return false;
        };
        if record.status == TokenStatus::Invalid {
            record.status = TokenStatus::Active;
            record.fail_streak = 0;
        }
        true
    }

    /// Permanently exclude a token from selection, recording the reason for
    /// diagnostics. Returns `false` when the token is gone (race against an
    /// administrative replacement).
    pub fn set_invalid(&mut self, token: &str, reason: &str) -> bool {
        let needle = normalize_token(token);
        let Some(record) = self.find_mut(&needle) else {
            return false;
        };
        record.status = TokenStatus::Invalid;
        record.cooling_until = None;
        record.note = reason.to_string();
        true
    }

    /// Housekeeping timestamp update after a server-side asset purge.
    pub fn mark_asset_clear(&mut self, token: &str, now: DateTime<Utc>) -> bool {
        let needle = normalize_token(token);
        let Some(record) = self.find_mut(&needle) else {
            return false;
        };
        record.last_asset_clear_at = Some(now.timestamp_millis());
        true
    }

    /// Unique tokens in pool-then-order traversal order.
    pub fn all_tokens(&self) -> Vec<String> {
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();
        for pool in &self.pools {
            for record in &pool.records {
                if seen.insert(record.token.clone()) {
                    out.push(record.token.clone());
                }
            }
        }
        out
    }

    pub fn snapshot(&self) -> PoolSnapshot {
        let mut snap = PoolSnapshot::default();
        for pool in &self.pools {
            for record in &pool.records {
                snap.total += 1;
                snap.total_calls += record.use_count;
                match record.status {
                    TokenStatus::Active => {
                        snap.active += 1;
                        if record.quota_known && record.quota > 0 {
                            snap.chat_quota += record.quota;
                        }
                    }
                    TokenStatus::Cooling => snap.cooling += 1,
                    TokenStatus::Invalid => snap.invalid += 1,
                    TokenStatus::Disabled => snap.disabled += 1,
                }
            }
        }
        snap
    }

    /// Record snapshot by (normalized) token, across all pools.
    pub fn find(&self, token: &str) -> Option<&TokenRecord> {
        let needle = normalize_token(token);
        self.pools
            .iter()
            .flat_map(|pool| pool.records.iter())
            .find(|record| record.token == needle)
    }

    fn find_mut(&mut self, normalized: &str) -> Option<&mut TokenRecord> {
        self.pools
            .iter_mut()
            .flat_map(|pool| pool.records.iter_mut())
            .find(|record| record.token == normalized)
    }
}

fn expire_cooldown(record: &mut TokenRecord, now: DateTime<Utc>) {
    if record.status != TokenStatus::Cooling {
        return;
    }
    match record.cooling_until {
        Some(deadline) if deadline <= now => {
            record.status = TokenStatus::Active;
            record.cooling_until = None;
            record.fail_streak = 0;
        }
        // A cooling record without a deadline has nothing to wait for.
        None => {
            record.status = TokenStatus::Active;
            record.fail_streak = 0;
        }
        _ => {}
    }
}

fn consume_quota(record: &mut TokenRecord, heavy: bool) {
    if heavy {
        if record.heavy_quota_known && record.heavy_quota > 0 {
            record.heavy_quota -= 1;
        }
    } else if record.quota_known && record.quota > 0 {
        record.quota -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::record::TokenRecord;

    fn record(token: &str) -> TokenRecord {
        TokenRecord::new(token)
    }

    fn pools(basic: Vec<TokenRecord>, elevated: Vec<TokenRecord>) -> PoolSet {
        PoolSet::new(vec![
            Pool {
                name: BASIC_POOL.to_string(),
                records: basic,
            },
            Pool {
                name: SUPER_POOL.to_string(),
                records: elevated,
            },
        ])
    }

    #[test]
    fn exhausted_known_quota_is_never_selected() {
        let mut exhausted = record("tok-a");
        exhausted.quota = 0;
        exhausted.quota_known = true;

        let mut set = pools(vec![exhausted, record("tok-b")], vec![]);
        assert_eq!(
            set.select(RequestClass::Chat, Utc::now()),
            Some("tok-b".to_string())
        );
    }

    #[test]
    fn unknown_zero_quota_stays_selectable() {
        let mut unset = record("tok-a");
        unset.quota = 0;
        unset.quota_known = false;

        let mut set = pools(vec![unset], vec![]);
        assert_eq!(
            set.select(RequestClass::Chat, Utc::now()),
            Some("tok-a".to_string())
        );
    }

    #[test]
    fn elapsed_cooldown_becomes_eligible_in_same_call() {
        let now = Utc::now();
        let mut cooling = record("tok-a");
        cooling.status = TokenStatus::Cooling;
        cooling.cooling_until = Some(now - Duration::seconds(1));

        let mut set = pools(vec![cooling], vec![]);
        assert_eq!(set.select(RequestClass::Chat, now), Some("tok-a".to_string()));
        assert_eq!(set.pools()[0].records[0].status, TokenStatus::Active);
    }

    #[test]
    fn unelapsed_cooldown_stays_blocked() {
        let now = Utc::now();
        let mut cooling = record("tok-a");
        cooling.status = TokenStatus::Cooling;
        cooling.cooling_until = Some(now + Duration::seconds(600));

        let mut set = pools(vec![cooling], vec![]);
        assert_eq!(set.select(RequestClass::Chat, now), None);
    }

    #[test]
    fn lowest_use_count_wins() {
        let mut busy = record("tok-busy");
        busy.use_count = 5;
        let mut idle = record("tok-idle");
        idle.use_count = 2;

        let mut set = pools(vec![busy, idle], vec![]);
        assert_eq!(
            set.select(RequestClass::Chat, Utc::now()),
            Some("tok-idle".to_string())
        );
    }

    #[test]
    fn use_count_tie_prefers_pool_declaration_order() {
        let mut set = pools(vec![record("tok-basic")], vec![record("tok-super")]);
        assert_eq!(
            set.select(RequestClass::Chat, Utc::now()),
            Some("tok-basic".to_string())
        );
    }

    #[test]
    fn heavy_class_only_consults_super_pool() {
        let mut set = pools(vec![record("tok-basic")], vec![record("tok-super")]);
        assert_eq!(
            set.select(RequestClass::Heavy, Utc::now()),
            Some("tok-super".to_string())
        );

        let mut basic_only = pools(vec![record("tok-basic")], vec![]);
        assert_eq!(basic_only.select(RequestClass::Heavy, Utc::now()), None);
    }

    #[test]
    fn invalid_and_disabled_are_skipped() {
        let mut invalid = record("tok-a");
        invalid.status = TokenStatus::Invalid;
        let mut disabled = record("tok-b");
        disabled.status = TokenStatus::Disabled;

        let mut set = pools(vec![invalid, disabled], vec![]);
        assert_eq!(set.select(RequestClass::Chat, Utc::now()), None);
    }

    #[test]
    fn use_count_counts_attempts() {
        let now = Utc::now();
        let mut set = pools(vec![record("tok-a")], vec![]);

        set.sync_usage("tok-a", RequestClass::Chat, true, false, true, 3, Duration::seconds(60), now);
        set.sync_usage("tok-a", RequestClass::Chat, false, false, true, 3, Duration::seconds(60), now);

        let rec = &set.pools()[0].records[0];
        assert_eq!(rec.use_count, 2);
        assert_eq!(rec.fail_count, 1);
    }

    #[test]
    fn probe_sync_moves_no_counters() {
        let now = Utc::now();
        let mut set = pools(vec![record("tok-a")], vec![]);

        set.sync_usage("tok-a", RequestClass::Chat, true, false, false, 3, Duration::seconds(60), now);

        let rec = &set.pools()[0].records[0];
        assert_eq!(rec.use_count, 0);
        assert_eq!(rec.quota, -1);
    }

    #[test]
    fn known_quota_decrements_on_success_and_on_charged_failure() {
        let now = Utc::now();
        let mut funded = record("tok-a");
        funded.quota = 5;
        funded.quota_known = true;
        let mut set = pools(vec![funded], vec![]);

        set.sync_usage("tok-a", RequestClass::Chat, true, false, true, 3, Duration::seconds(60), now);
        assert_eq!(set.pools()[0].records[0].quota, 4);

        // consume_on_fail: the upstream already charged the account.
        set.sync_usage("tok-a", RequestClass::Chat, false, true, true, 3, Duration::seconds(60), now);
        assert_eq!(set.pools()[0].records[0].quota, 3);

        set.sync_usage("tok-a", RequestClass::Chat, false, false, true, 3, Duration::seconds(60), now);
        assert_eq!(set.pools()[0].records[0].quota, 3);
    }

    #[test]
    fn heavy_usage_consumes_heavy_quota_only() {
        let now = Utc::now();
        let mut elevated = record("tok-s");
        elevated.quota = 5;
        elevated.quota_known = true;
        elevated.heavy_quota = 2;
        elevated.heavy_quota_known = true;
        let mut set = pools(vec![], vec![elevated]);

        set.sync_usage("tok-s", RequestClass::Heavy, true, false, true, 3, Duration::seconds(60), now);

        let rec = &set.pools()[1].records[0];
        assert_eq!(rec.heavy_quota, 1);
        assert_eq!(rec.quota, 5);
    }

    #[test]
    fn fail_streak_threshold_starts_cooling() {
        let now = Utc::now();
        let mut set = pools(vec![record("tok-a")], vec![]);

        for _ in 0..3 {
            set.sync_usage("tok-a", RequestClass::Chat, false, false, true, 3, Duration::seconds(60), now);
        }

        let rec = &set.pools()[0].records[0];
        assert_eq!(rec.status, TokenStatus::Cooling);
        assert_eq!(rec.cooling_until, Some(now + Duration::seconds(60)));
    }

    #[test]
    fn success_resets_the_streak_but_not_fail_count() {
        let now = Utc::now();
        let mut set = pools(vec![record("tok-a")], vec![]);

        set.sync_usage("tok-a", RequestClass::Chat, false, false, true, 3, Duration::seconds(60), now);
        set.sync_usage("tok-a", RequestClass::Chat, false, false, true, 3, Duration::seconds(60), now);
        set.sync_usage("tok-a", RequestClass::Chat, true, false, true, 3, Duration::seconds(60), now);
        set.sync_usage("tok-a", RequestClass::Chat, false, false, true, 3, Duration::seconds(60), now);

        let rec = &set.pools()[0].records[0];
        assert_eq!(rec.status, TokenStatus::Active);
        assert_eq!(rec.fail_count, 3);
        assert_eq!(rec.fail_streak, 1);
    }

    #[test]
    fn sync_usage_for_unknown_token_reports_not_found() {
        let now = Utc::now();
        let mut set = pools(vec![record("tok-a")], vec![]);
        assert!(!set.sync_usage("tok-missing", RequestClass::Chat, true, false, true, 3, Duration::seconds(60), now));
    }

    #[test]
    fn mark_settings_success_is_idempotent() {
        let mut invalid = record("tok-a");
        invalid.status = TokenStatus::Invalid;
        invalid.use_count = 9;
        invalid.quota = 4;
        invalid.quota_known = true;
        let mut set = pools(vec![invalid], vec![]);

        assert!(set.mark_settings_success("tok-a"));
        assert!(set.mark_settings_success("tok-a"));

        let rec = &set.pools()[0].records[0];
        assert_eq!(rec.status, TokenStatus::Active);
        assert_eq!(rec.use_count, 9);
        assert_eq!(rec.quota, 4);
        assert!(!set.mark_settings_success("tok-missing"));
    }

    #[test]
    fn set_invalid_records_reason() {
        let mut set = pools(vec![record("tok-a")], vec![]);
        assert!(set.set_invalid("sso=tok-a", "account_settings_refresh_failed step=tos"));

        let rec = &set.pools()[0].records[0];
        assert_eq!(rec.status, TokenStatus::Invalid);
        assert!(rec.note.contains("step=tos"));
        assert!(!set.set_invalid("tok-missing", "x"));
    }

    #[test]
    fn all_tokens_walks_pools_in_order_and_dedupes() {
        let mut set = pools(
            vec![record("tok-a"), record("tok-b")],
            vec![record("tok-c"), record("tok-a")],
        );
        assert_eq!(set.all_tokens(), vec!["tok-a", "tok-b", "tok-c"]);
        // Traversal is read-only.
        assert_eq!(set.pools()[0].records.len(), 2);
    }

    #[test]
    fn snapshot_counts_statuses() {
        let mut cooling = record("tok-b");
        cooling.status = TokenStatus::Cooling;
        let mut invalid = record("tok-c");
        invalid.status = TokenStatus::Invalid;
        let mut funded = record("tok-a");
        funded.quota = 10;
        funded.quota_known = true;
        funded.use_count = 4;

        let set = pools(vec![funded, cooling], vec![invalid]);
        let snap = set.snapshot();
        assert_eq!(snap.total, 3);
        assert_eq!(snap.active, 1);
        assert_eq!(snap.cooling, 1);
        assert_eq!(snap.invalid, 1);
        assert_eq!(snap.chat_quota, 10);
        assert_eq!(snap.total_calls, 4);
    }
}
