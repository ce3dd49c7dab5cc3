use crate::config::RegisterConfig;
use crate::error::CastorError;
use async_trait::async_trait;
use chrono::{Datelike, Utc};
use rand::Rng;
use serde_json::{Value, json};
use std::time::Duration;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Outcome of one provisioning step. `ok` is the only field drivers branch on;
/// the rest feeds failure-reason formatting.
#[derive(Debug, Clone, Default)]
pub struct StepResponse {
    pub ok: bool,
    pub status_code: Option<u16>,
    pub response_text: String,
    pub error: Option<String>,
}

impl StepResponse {
    pub fn success(status_code: u16, response_text: String) -> Self {
        Self {
            ok: true,
            status_code: Some(status_code),
            response_text,
            error: None,
        }
    }

    pub fn http_failure(status_code: u16, response_text: String) -> Self {
        Self {
            ok: false,
            status_code: Some(status_code),
            response_text,
            error: Some(format!("HTTP {status_code}")),
        }
    }

    /// Human-readable failure reason: explicit error, else HTTP status, else
    /// body text, else the step-specific fallback.
    pub fn describe_failure(&self, fallback: &str) -> String {
        if let Some(error) = self.error.as_deref() {
            let error = error.trim();
            if !error.is_empty() {
                return error.to_string();
            }
        }
        if let Some(code) = self.status_code {
            return format!("HTTP {code}");
        }
        let text = self.response_text.trim();
        if !text.is_empty() {
            return text.to_string();
        }
        fallback.to_string()
    }
}

/// The three upstream account-settings calls, in their mandated order. A
/// transport-level `Err` is accounted as its own remediation step.
#[async_trait]
pub trait SettingsGateway: Send + Sync {
    async fn accept_tos(&self, sso: &str, sso_rw: &str) -> Result<StepResponse, CastorError>;
    async fn set_birth_date(&self, sso: &str, sso_rw: &str) -> Result<StepResponse, CastorError>;
    async fn enable_nsfw(&self, sso: &str, sso_rw: &str) -> Result<StepResponse, CastorError>;
}

/// A plausible adult birth date: age 20-40, day capped at 28 so every month is
/// valid, fixed time component the upstream expects.
pub fn generate_random_birthdate() -> String {
    let mut rng = rand::rng();
    let age: i32 = rng.random_range(20..=40);
    let year = Utc::now().year() - age;
    let month: u32 = rng.random_range(1..=12);
    let day: u32 = rng.random_range(1..=28);
    format!("{year}-{month:02}-{day:02}T16:00:00.000Z")
}

/// The browser identity matching an impersonation profile. Only the Chrome
/// line is known today; unknown profiles fall back to it.
fn user_agent_for_profile(profile: &str) -> &'static str {
    match profile.trim() {
        "" | "chrome120" => DEFAULT_USER_AGENT,
        _ => DEFAULT_USER_AGENT,
    }
}

/// reqwest-backed gateway against the Grok settings endpoints. Every call
/// carries the session cookie pair and, when configured, the anti-bot
/// clearance cookie.
pub struct GrokSettingsClient {
    client: reqwest::Client,
    cfg: RegisterConfig,
}

impl GrokSettingsClient {
    pub fn new(cfg: RegisterConfig) -> Result<Self, CastorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .user_agent(user_agent_for_profile(&cfg.impersonate))
            .build()?;
        Ok(Self { client, cfg })
    }

    fn cookie_header(&self, sso: &str, sso_rw: &str) -> String {
        let mut header = format!("sso={sso}; sso-rw={sso_rw}");
        let clearance = self.cfg.cf_clearance.trim();
        if !clearance.is_empty() {
            header.push_str("; cf_clearance=");
            header.push_str(clearance);
        }
        header
    }

    async fn post_step(
        &self,
        url: &str,
        sso: &str,
        sso_rw: &str,
        body: &Value,
    ) -> Result<StepResponse, CastorError> {
        if sso.is_empty() {
            return Ok(StepResponse {
                ok: false,
                error: Some("missing sso".to_string()),
                ..Default::default()
            });
        }
        let sso_rw = if sso_rw.is_empty() { sso } else { sso_rw };

        let response = self
            .client
            .post(url)
            .header("content-type", "application/json")
            .header("origin", "https://grok.com")
            .header("referer", "https://grok.com/")
            .header("cookie", self.cookie_header(sso, sso_rw))
            .json(body)
            .send()
            .await?;

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        if status == 200 {
            Ok(StepResponse::success(status, text))
        } else {
            Ok(StepResponse::http_failure(status, text))
        }
    }
}

#[async_trait]
impl SettingsGateway for GrokSettingsClient {
    async fn accept_tos(&self, sso: &str, sso_rw: &str) -> Result<StepResponse, CastorError> {
        self.post_step(&self.cfg.accept_tos_url, sso, sso_rw, &json!({}))
            .await
    }

    async fn set_birth_date(&self, sso: &str, sso_rw: &str) -> Result<StepResponse, CastorError> {
        let body = json!({ "birthDate": generate_random_birthdate() });
        self.post_step(&self.cfg.birth_date_url, sso, sso_rw, &body)
            .await
    }

    async fn enable_nsfw(&self, sso: &str, sso_rw: &str) -> Result<StepResponse, CastorError> {
        let body = json!({ "userSettings": { "enableNsfwContent": true } });
        self.post_step(&self.cfg.nsfw_url, sso, sso_rw, &body).await
    }
}
