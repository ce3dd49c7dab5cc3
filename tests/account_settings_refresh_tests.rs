use async_trait::async_trait;
use castor::error::CastorError;
use castor::register::{
    AccountSettingsRefresher, SettingsGateway, StepResponse, TokenManagerLifecycle,
};
use castor::token::TokenStatus;
use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::collections::HashSet;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::SystemTime;
use tokio::fs;

/// Gateway that succeeds for every step except tokens listed as broken.
struct SelectiveGateway {
    broken: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl SelectiveGateway {
    fn respond(&self, step: &str, sso: &str) -> Result<StepResponse, CastorError> {
        self.calls.lock().unwrap().push(format!("{step}:{sso}"));
        if self.broken.contains(sso) {
            return Ok(StepResponse {
                ok: false,
                status_code: Some(403),
                response_text: String::new(),
                error: Some("forbidden".to_string()),
            });
        }
        Ok(StepResponse::success(200, String::new()))
    }
}

#[async_trait]
impl SettingsGateway for SelectiveGateway {
    async fn accept_tos(&self, sso: &str, _sso_rw: &str) -> Result<StepResponse, CastorError> {
        self.respond("tos", sso)
    }

    async fn set_birth_date(&self, sso: &str, _sso_rw: &str) -> Result<StepResponse, CastorError> {
        self.respond("birth", sso)
    }

    async fn enable_nsfw(&self, sso: &str, _sso_rw: &str) -> Result<StepResponse, CastorError> {
        self.respond("nsfw", sso)
    }
}

#[tokio::test]
async fn test_refresh_pipeline_against_live_token_actor() {
    let tmp_dir = std::env::temp_dir();
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    let db_file_name = format!("test_refresh_{}.sqlite", hasher.finish());
    let db_path = tmp_dir.join(db_file_name);
    let database_url = format!("sqlite:{}", db_path.to_str().unwrap());

    let store = castor::store::spawn(&database_url).await;
    let manager = castor::token::spawn(store.clone()).await;

    // One token that starts invalid (it will be restored), one that the
    // upstream rejects on every attempt.
    let payload = json!({
        "ssoBasic": [
            { "token": "tok-good", "status": "invalid" },
            "tok-bad",
        ],
        "ssoSuper": [],
    });
    manager.replace_payload(payload).await.unwrap();

    let gateway = Arc::new(SelectiveGateway {
        broken: HashSet::from(["tok-bad".to_string()]),
        calls: Mutex::new(Vec::new()),
    });
    let lifecycle = Arc::new(TokenManagerLifecycle::new(manager.clone()));
    let refresher = AccountSettingsRefresher::new(gateway.clone(), lifecycle);

    let report = refresher
        .refresh_tokens(
            vec!["sso=tok-good".to_string(), "tok-bad".to_string()],
            2,
            1,
        )
        .await;

    assert_eq!(report.summary.total, 2);
    assert_eq!(report.summary.success, 1);
    assert_eq!(report.summary.failed, 1);
    assert_eq!(report.summary.invalidated, 1);
    assert_eq!(report.failed[0].token, "tok-bad");
    assert_eq!(report.failed[0].attempts, 2);

    // The broken token only ever reached the first step.
    let calls = gateway.calls.lock().unwrap().clone();
    assert_eq!(
        calls.iter().filter(|c| c.as_str() == "tos:tok-bad").count(),
        2
    );
    assert!(!calls.iter().any(|c| c.as_str() == "birth:tok-bad"));

    // Lifecycle writes were committed: a reload sees both transitions.
    manager.reload().await.unwrap();
    let good = manager.find_token("tok-good").await.unwrap().expect("record");
    assert_eq!(good.status, TokenStatus::Active);

    let bad = manager.find_token("tok-bad").await.unwrap().expect("record");
    assert_eq!(bad.status, TokenStatus::Invalid);
    assert!(bad.note.contains("account_settings_refresh_failed"));
    assert!(bad.note.contains("attempts=2"));

    let _ = fs::remove_file(&db_path).await;
}
