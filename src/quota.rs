use crate::config::CONFIG;
use crate::error::CastorError;
use crate::models::{RequestClass, class_for};
use crate::store::{API_KEY_USAGE_PREFIX, API_KEYS_KEY, StoreActorHandle};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tokio::sync::Mutex;
use tracing::warn;

const USAGE_BUCKETS: [&str; 4] = ["chat_used", "heavy_used", "image_used", "video_used"];

/// One configured API key with per-day class limits (`-1` = unlimited).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKeyRow {
    pub key: String,

    #[serde(default)]
    pub name: String,

    #[serde(default = "default_active")]
    pub is_active: bool,

    #[serde(default = "unlimited")]
    pub chat_limit: i64,

    #[serde(default = "unlimited")]
    pub heavy_limit: i64,

    #[serde(default = "unlimited")]
    pub image_limit: i64,

    #[serde(default = "unlimited")]
    pub video_limit: i64,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_active() -> bool {
    true
}

fn unlimited() -> i64 {
    -1
}

impl ApiKeyRow {
    fn limit_for(&self, bucket: &str) -> i64 {
        match bucket {
            "chat_used" => self.chat_limit,
            "heavy_used" => self.heavy_limit,
            "image_used" => self.image_limit,
            "video_used" => self.video_limit,
            _ => -1,
        }
    }
}

/// Usage increments for one request: `(bucket, amount)` pairs plus the label
/// reported when any bucket is full.
pub fn buckets_for(model: &str, image_count: Option<i64>) -> (Vec<(&'static str, i64)>, &'static str) {
    match class_for(model) {
        // Heavy calls ride on a chat conversation, so both buckets charge.
        RequestClass::Heavy => (vec![("heavy_used", 1), ("chat_used", 1)], "heavy/chat"),
        RequestClass::Video => (vec![("video_used", 1)], "video"),
        // Image via the chat endpoint usually yields two images.
        RequestClass::Image => (vec![("image_used", image_count.unwrap_or(2).max(1))], "image"),
        RequestClass::Chat => (vec![("chat_used", 1)], "chat"),
    }
}

/// Check-then-apply against one key's daily usage map. All buckets are checked
/// before any is charged, so a multi-bucket request never half-applies.
fn try_consume(usage: &mut Map<String, Value>, row: &ApiKeyRow, incs: &[(&str, i64)]) -> bool {
    for (bucket, inc) in incs {
        let limit = row.limit_for(bucket);
        let used = usage.get(*bucket).and_then(Value::as_i64).unwrap_or(0);
        if limit >= 0 && used + inc > limit {
            return false;
        }
    }
    for (bucket, inc) in incs {
        let used = usage.get(*bucket).and_then(Value::as_i64).unwrap_or(0);
        usage.insert(bucket.to_string(), json!(used + inc));
    }
    usage.insert(
        "updated_at".to_string(),
        json!(Utc::now().timestamp_millis()),
    );
    true
}

/// Per-API-key daily quota bookkeeping over the blob store. The mutex spans
/// each read-check-apply-write cycle; usage lives in one blob per UTC day.
pub struct ApiKeyManager {
    store: StoreActorHandle,
    usage_lock: Mutex<()>,
}

impl ApiKeyManager {
    pub fn new(store: StoreActorHandle) -> Self {
        Self {
            store,
            usage_lock: Mutex::new(()),
        }
    }

    pub async fn list_keys(&self) -> Result<Vec<ApiKeyRow>, CastorError> {
        let Some(payload) = self.store.get(API_KEYS_KEY).await? else {
            return Ok(Vec::new());
        };
        let Some(rows) = payload.as_array() else {
            return Ok(Vec::new());
        };
        Ok(rows
            .iter()
            .filter_map(|raw| serde_json::from_value::<ApiKeyRow>(raw.clone()).ok())
            .filter(|row| !row.key.trim().is_empty())
            .collect())
    }

    async fn find_key(&self, key: &str) -> Result<Option<ApiKeyRow>, CastorError> {
        Ok(self.list_keys().await?.into_iter().find(|row| row.key == key))
    }

    /// Charge a request against a key's daily buckets, rejecting with the
    /// quota error when any bucket would overflow. The admin key and keys
    /// unknown to the store are exempt (auth already gates unknown keys).
    pub async fn enforce_daily_quota(
        &self,
        api_key: &str,
        model: &str,
        image_count: Option<i64>,
    ) -> Result<(), CastorError> {
        let key = api_key.trim();
        if key.is_empty() || key == CONFIG.basic.castor_key.trim() {
            return Ok(());
        }

        let Some(row) = self.find_key(key).await? else {
            return Ok(());
        };
        if !row.is_active {
            return Ok(());
        }

        let (incs, bucket_name) = buckets_for(model, image_count);

        let day = Utc::now().format("%Y-%m-%d").to_string();
        let usage_key = format!("{API_KEY_USAGE_PREFIX}:{day}");

        let _guard = self.usage_lock.lock().await;
        let mut day_map = match self.store.get(&usage_key).await? {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        let mut usage = match day_map.get(key) {
            Some(Value::Object(map)) => map.clone(),
            _ => empty_usage(),
        };

        if !try_consume(&mut usage, &row, &incs) {
            return Err(CastorError::DailyQuotaExceeded {
                bucket: bucket_name.to_string(),
            });
        }

        day_map.insert(key.to_string(), Value::Object(usage));
        if let Err(e) = self.store.put(&usage_key, Value::Object(day_map)).await {
            // Serving beats perfect accounting; the next write catches up.
            warn!("daily usage save failed: {e}");
        }
        Ok(())
    }

    /// Usage blob for a UTC day, for the admin metrics surface.
    pub async fn usage_for_day(&self, day: &str) -> Result<Value, CastorError> {
        let usage_key = format!("{API_KEY_USAGE_PREFIX}:{day}");
        Ok(self
            .store
            .get(&usage_key)
            .await?
            .unwrap_or_else(|| json!({})))
    }
}

fn empty_usage() -> Map<String, Value> {
    let mut map = Map::new();
    for bucket in USAGE_BUCKETS {
        map.insert(bucket.to_string(), json!(0));
    }
    map
}
