use crate::config::CONFIG;
use crate::error::CastorError;
use crate::register::{normalize_sso_token, refresh_account_settings_for_tokens};
use crate::server::router::CastorState;
use crate::token::TokenRecord;
use axum::{
    Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::Utc;
use futures::future::join_all;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{info, warn};

pub fn router() -> Router<CastorState> {
    Router::new()
        .route("/api/v1/admin/tokens", get(get_tokens).post(update_tokens))
        .route("/api/v1/admin/tokens/refresh", post(probe_tokens))
        .route("/api/v1/admin/tokens/nsfw/refresh", post(refresh_settings))
        .route("/api/v1/admin/tokens/asset-clear", post(asset_clear))
        .route("/api/v1/admin/metrics", get(metrics))
}

async fn get_tokens(State(state): State<CastorState>) -> Result<Json<Value>, CastorError> {
    Ok(Json(state.tokens.list_tokens().await?))
}

/// Replace the whole token payload. Only tokens absent from the previous
/// payload get a background account-settings refresh; survivors are already
/// provisioned.
async fn update_tokens(
    State(state): State<CastorState>,
    Json(payload): Json<Value>,
) -> Result<Json<Value>, CastorError> {
    let added = state.tokens.replace_payload(payload).await?;

    let concurrency = CONFIG.token.nsfw_refresh_concurrency;
    let retries = CONFIG.token.nsfw_refresh_retries;
    let triggered = added.len();

    if !added.is_empty() {
        let manager = state.tokens.clone();
        state.background.spawn("account-settings-refresh", async move {
            match refresh_account_settings_for_tokens(manager, added, None, None).await {
                Ok(report) => info!(
                    total = report.summary.total,
                    success = report.summary.success,
                    failed = report.summary.failed,
                    invalidated = report.summary.invalidated,
                    "background account-settings refresh finished"
                ),
                Err(e) => warn!("background account-settings refresh failed: {e}"),
            }
        });
    }

    Ok(Json(json!({
        "status": "success",
        "message": "Token updated",
        "nsfw_refresh": {
            "mode": "background",
            "triggered": triggered,
            "concurrency": concurrency,
            "retries": retries,
        },
    })))
}

#[derive(Debug, Deserialize, Default)]
struct TokenSelection {
    #[serde(default)]
    token: Option<String>,

    #[serde(default)]
    tokens: Option<Vec<String>>,

    #[serde(default)]
    all: bool,

    #[serde(default)]
    concurrency: Option<usize>,

    #[serde(default)]
    retries: Option<usize>,
}

impl TokenSelection {
    fn explicit_tokens(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let singles = self.token.iter().cloned();
        let batch = self.tokens.clone().unwrap_or_default();
        for raw in singles.chain(batch) {
            let normalized = normalize_sso_token(&raw);
            if normalized.is_empty() || !seen.insert(normalized.clone()) {
                continue;
            }
            out.push(normalized);
        }
        out
    }
}

/// Status probe sweep: no counters move, no quota is consumed. Bounded the
/// same way the remediation pipeline is.
async fn probe_tokens(
    State(state): State<CastorState>,
    Json(selection): Json<TokenSelection>,
) -> Result<Json<Value>, CastorError> {
    let tokens = selection.explicit_tokens();
    if tokens.is_empty() {
        return Err(CastorError::BadRequest("No tokens provided".to_string()));
    }

    let semaphore = Arc::new(Semaphore::new(CONFIG.token.admin_batch_size.max(1)));
    let jobs = tokens.into_iter().map(|token| {
        let manager = state.tokens.clone();
        let semaphore = semaphore.clone();
        async move {
            let _permit = semaphore.acquire().await.expect("semaphore closed");
            let lookup = manager.find_token(&token).await;
            (token, lookup)
        }
    });

    // One failed lookup must not discard its siblings; every token gets an
    // entry, error or not.
    let mut results = serde_json::Map::new();
    for (token, lookup) in join_all(jobs).await {
        results.insert(token, probe_entry(lookup));
    }

    Ok(Json(json!({ "status": "success", "results": Value::Object(results) })))
}

fn probe_entry(lookup: Result<Option<TokenRecord>, CastorError>) -> Value {
    match lookup {
        Ok(Some(record)) => json!({
            "found": true,
            "status": record.status,
            "quota": record.quota,
            "heavy_quota": record.heavy_quota,
            "use_count": record.use_count,
            "fail_count": record.fail_count,
        }),
        Ok(None) => json!({ "found": false }),
        Err(e) => json!({ "found": false, "error": e.to_string() }),
    }
}

/// Full tos/birth/nsfw provisioning for selected tokens, or every token in
/// pool traversal order when `all` is set. Runs inline and reports the batch
/// outcome.
async fn refresh_settings(
    State(state): State<CastorState>,
    Json(selection): Json<TokenSelection>,
) -> Result<Json<Value>, CastorError> {
    let tokens = if selection.all {
        state.tokens.all_tokens().await?
    } else {
        selection.explicit_tokens()
    };
    if tokens.is_empty() {
        return Err(CastorError::BadRequest("No tokens provided".to_string()));
    }

    let report = refresh_account_settings_for_tokens(
        state.tokens.clone(),
        tokens,
        selection.concurrency,
        selection.retries,
    )
    .await?;

    Ok(Json(json!({
        "status": "success",
        "summary": report.summary,
        "failed": report.failed,
    })))
}

#[derive(Debug, Deserialize)]
struct AssetClearRequest {
    token: String,
}

async fn asset_clear(
    State(state): State<CastorState>,
    Json(request): Json<AssetClearRequest>,
) -> Result<Json<Value>, CastorError> {
    let updated = state.tokens.mark_asset_clear(&request.token).await?;
    if !updated {
        return Err(CastorError::BadRequest("Token not found".to_string()));
    }
    Ok(Json(json!({ "status": "success", "updated": true })))
}

async fn metrics(State(state): State<CastorState>) -> Result<Json<Value>, CastorError> {
    let snapshot = state.tokens.snapshot().await?;
    let day = Utc::now().format("%Y-%m-%d").to_string();
    let usage = state.api_keys.usage_for_day(&day).await?;

    Ok(Json(json!({
        "tokens": snapshot,
        "api_key_usage": { "day": day, "usage": usage },
    })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn probe_entry_reports_record_fields() {
        let mut record = TokenRecord::new("tok-a");
        record.use_count = 3;
        let entry = probe_entry(Ok(Some(record)));
        assert_eq!(entry["found"], json!(true));
        assert_eq!(entry["use_count"], json!(3));
    }

    #[test]
    fn probe_entry_marks_missing_tokens() {
        let entry = probe_entry(Ok(None));
        assert_eq!(entry, json!({ "found": false }));
    }

    #[test]
    fn probe_entry_carries_per_token_errors() {
        let entry = probe_entry(Err(CastorError::RactorError("mailbox closed".to_string())));
        assert_eq!(entry["found"], json!(false));
        assert!(entry["error"].as_str().unwrap().contains("mailbox closed"));
    }
}
