use super::gateway::{GrokSettingsClient, SettingsGateway};
use super::parse_sso_pair;
use crate::config::CONFIG;
use crate::error::CastorError;
use crate::token::TokenManagerHandle;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::warn;

/// Which provisioning step a token failed on. `Exception` covers transport
/// errors that never produced a step response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RemediationStep {
    Parse,
    Tos,
    Birth,
    Nsfw,
    Exception,
}

impl RemediationStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemediationStep::Parse => "parse",
            RemediationStep::Tos => "tos",
            RemediationStep::Birth => "birth",
            RemediationStep::Nsfw => "nsfw",
            RemediationStep::Exception => "exception",
        }
    }
}

/// Manager surface the retry driver needs. A seam so the pipeline is testable
/// without a running actor.
#[async_trait]
pub trait TokenLifecycle: Send + Sync {
    async fn mark_account_settings_success(&self, token: &str, save: bool)
    -> Result<bool, CastorError>;
    async fn set_token_invalid(&self, token: &str, reason: &str, save: bool)
    -> Result<bool, CastorError>;
    async fn commit(&self) -> Result<(), CastorError>;
}

/// The production lifecycle: straight delegation to the token-manager actor.
pub struct TokenManagerLifecycle {
    manager: TokenManagerHandle,
}

impl TokenManagerLifecycle {
    pub fn new(manager: TokenManagerHandle) -> Self {
        Self { manager }
    }
}

#[async_trait]
impl TokenLifecycle for TokenManagerLifecycle {
    async fn mark_account_settings_success(
        &self,
        token: &str,
        save: bool,
    ) -> Result<bool, CastorError> {
        self.manager.mark_account_settings_success(token, save).await
    }

    async fn set_token_invalid(
        &self,
        token: &str,
        reason: &str,
        save: bool,
    ) -> Result<bool, CastorError> {
        self.manager.set_token_invalid(token, reason, save).await
    }

    async fn commit(&self) -> Result<(), CastorError> {
        self.manager.commit().await
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub total: usize,
    pub success: usize,
    pub failed: usize,
    pub invalidated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshFailure {
    pub token: String,
    pub attempts: usize,
    pub step: RemediationStep,
    pub error: String,
    pub invalidated: bool,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RefreshReport {
    pub summary: RefreshSummary,
    pub failed: Vec<RefreshFailure>,
}

enum AttemptOutcome {
    Ok,
    Failed(RemediationStep, String),
}

/// Drives full tos -> birth -> nsfw provisioning for a batch of tokens with a
/// bounded-concurrency retry loop. Every retry restarts from the first step;
/// exhaustion invalidates the token. All lifecycle writes are deferred and
/// flushed with a single commit at the end of the batch.
pub struct AccountSettingsRefresher {
    gateway: Arc<dyn SettingsGateway>,
    lifecycle: Arc<dyn TokenLifecycle>,
}

impl AccountSettingsRefresher {
    pub fn new(gateway: Arc<dyn SettingsGateway>, lifecycle: Arc<dyn TokenLifecycle>) -> Self {
        Self { gateway, lifecycle }
    }

    async fn apply_once(&self, token: &str) -> AttemptOutcome {
        let Some((sso, mut sso_rw)) = parse_sso_pair(token) else {
            return AttemptOutcome::Failed(RemediationStep::Parse, "missing sso".to_string());
        };
        if sso.is_empty() {
            return AttemptOutcome::Failed(RemediationStep::Parse, "missing sso".to_string());
        }
        if sso_rw.is_empty() {
            sso_rw = sso.clone();
        }

        let steps: [(RemediationStep, &str); 3] = [
            (RemediationStep::Tos, "accept_tos failed"),
            (RemediationStep::Birth, "set_birth_date failed"),
            (RemediationStep::Nsfw, "enable_nsfw failed"),
        ];
        for (step, fallback) in steps {
            let result = match step {
                RemediationStep::Tos => self.gateway.accept_tos(&sso, &sso_rw).await,
                RemediationStep::Birth => self.gateway.set_birth_date(&sso, &sso_rw).await,
                RemediationStep::Nsfw => self.gateway.enable_nsfw(&sso, &sso_rw).await,
                _ => unreachable!(),
            };
            match result {
                Ok(response) if response.ok => {}
                Ok(response) => {
                    return AttemptOutcome::Failed(step, response.describe_failure(fallback));
                }
                Err(e) => {
                    return AttemptOutcome::Failed(RemediationStep::Exception, e.to_string());
                }
            }
        }
        AttemptOutcome::Ok
    }

    async fn run_one(&self, token: String, retries: usize) -> Result<usize, RefreshFailure> {
        let max_attempts = retries + 1;
        let mut last_step = RemediationStep::Exception;
        let mut last_error = "unknown error".to_string();

        for attempt in 1..=max_attempts {
            match self.apply_once(&token).await {
                AttemptOutcome::Ok => {
                    match self
                        .lifecycle
                        .mark_account_settings_success(&token, false)
                        .await
                    {
                        Ok(true) => {}
                        Ok(false) => warn!(
                            token = %truncate(&token),
                            "settings refresh succeeded but token not found"
                        ),
                        Err(e) => warn!(
                            token = %truncate(&token),
                            "settings refresh success mark failed: {e}"
                        ),
                    }
                    return Ok(attempt);
                }
                AttemptOutcome::Failed(step, error) => {
                    last_step = step;
                    last_error = error;
                }
            }
        }

        let reason = format!(
            "account_settings_refresh_failed step={} attempts={} error={}",
            last_step.as_str(),
            max_attempts,
            last_error
        );
        let invalidated = match self.lifecycle.set_token_invalid(&token, &reason, false).await {
            Ok(flag) => flag,
            Err(e) => {
                warn!(token = %truncate(&token), "token invalidation failed: {e}");
                false
            }
        };

        Err(RefreshFailure {
            token,
            attempts: max_attempts,
            step: last_step,
            error: last_error,
            invalidated,
        })
    }

    pub async fn refresh_tokens(
        &self,
        tokens: impl IntoIterator<Item = String>,
        concurrency: usize,
        retries: usize,
    ) -> RefreshReport {
        let mut unique: Vec<String> = Vec::new();
        let mut seen = std::collections::HashSet::new();
        for raw in tokens {
            let Some((sso, _)) = parse_sso_pair(&raw) else {
                continue;
            };
            if sso.is_empty() || !seen.insert(sso.clone()) {
                continue;
            }
            unique.push(sso);
        }

        if unique.is_empty() {
            return RefreshReport::default();
        }

        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let jobs = unique.iter().cloned().map(|token| {
            let semaphore = semaphore.clone();
            async move {
                // The permit spans every attempt for this token; the bound is
                // on in-flight tokens, not in-flight HTTP calls.
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                self.run_one(token, retries).await
            }
        });
        let results = join_all(jobs).await;

        if let Err(e) = self.lifecycle.commit().await {
            warn!("settings refresh commit failed: {e}");
        }

        let mut report = RefreshReport::default();
        report.summary.total = unique.len();
        for result in results {
            match result {
                Ok(_) => report.summary.success += 1,
                Err(failure) => {
                    report.summary.failed += 1;
                    if failure.invalidated {
                        report.summary.invalidated += 1;
                    }
                    report.failed.push(failure);
                }
            }
        }
        report
    }
}

fn truncate(token: &str) -> String {
    token.chars().take(10).collect()
}

/// Production entry point: real gateway, real manager, config defaults unless
/// the caller overrides them.
pub async fn refresh_account_settings_for_tokens(
    manager: TokenManagerHandle,
    tokens: Vec<String>,
    concurrency: Option<usize>,
    retries: Option<usize>,
) -> Result<RefreshReport, CastorError> {
    let gateway = Arc::new(GrokSettingsClient::new(CONFIG.register.clone())?);
    let lifecycle = Arc::new(TokenManagerLifecycle::new(manager));
    let refresher = AccountSettingsRefresher::new(gateway, lifecycle);
    Ok(refresher
        .refresh_tokens(
            tokens,
            concurrency.unwrap_or(CONFIG.token.nsfw_refresh_concurrency),
            retries.unwrap_or(CONFIG.token.nsfw_refresh_retries),
        )
        .await)
}
