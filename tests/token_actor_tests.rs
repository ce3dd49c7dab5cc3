use serde_json::json;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;
use tokio::fs;

#[tokio::test]
async fn test_token_actor_baseline() {
    let tmp_dir = std::env::temp_dir();
    let mut hasher = DefaultHasher::new();
    SystemTime::now().hash(&mut hasher);
    let db_file_name = format!("test_tokens_{}.sqlite", hasher.finish());
    let db_path = tmp_dir.join(db_file_name);
    let database_url = format!("sqlite:{}", db_path.to_str().unwrap());

    let store = castor::store::spawn(&database_url).await;
    let manager = castor::token::spawn(store.clone()).await;

    // 1. First boot seeds the canonical empty payload and selection exhausts.
    let listing = manager.list_tokens().await.unwrap();
    assert_eq!(listing, json!({ "ssoBasic": [], "ssoSuper": [] }));
    assert!(manager.select_token("grok-4").await.is_err());

    // 2. Replace the payload; every token counts as added on first write.
    let payload = json!({
        "ssoBasic": ["sso=tok-basic", { "token": "tok-extra", "use_count": 5 }],
        "ssoSuper": ["tok-super"],
    });
    let added = manager.replace_payload(payload).await.unwrap();
    assert_eq!(added, vec!["tok-basic", "tok-extra", "tok-super"]);

    // 3. Selection prefers the lowest use_count; heavy routes to the super pool.
    let picked = manager.select_token("grok-4").await.unwrap();
    assert!(picked == "tok-basic" || picked == "tok-super");
    assert_ne!(picked, "tok-extra");

    let heavy = manager.select_token("grok-4-heavy").await.unwrap();
    assert_eq!(heavy, "tok-super");

    // 4. Usage accounting persists: a successful attempt bumps use_count.
    manager
        .sync_usage("tok-basic", "grok-4", true, false, true)
        .await;
    let record = manager
        .find_token("tok-basic")
        .await
        .unwrap()
        .expect("record");
    assert_eq!(record.use_count, 1);

    // 5. A valid-JSON but non-object payload is rejected outright and the
    // existing inventory survives untouched.
    assert!(manager.replace_payload(json!([])).await.is_err());
    assert!(manager.replace_payload(json!("x")).await.is_err());
    let listing = manager.list_tokens().await.unwrap();
    let basic = listing["ssoBasic"].as_array().unwrap();
    assert_eq!(basic.len(), 2);

    // 6. Replacing with an overlapping payload reports only the new token.
    let next_payload = json!({
        "ssoBasic": ["tok-basic", "tok-new"],
        "ssoSuper": ["tok-super"],
    });
    let added = manager.replace_payload(next_payload).await.unwrap();
    assert_eq!(added, vec!["tok-new"]);

    // 7. Deferred invalidation is invisible to storage until commit.
    let updated = manager
        .set_token_invalid("tok-new", "account_settings_refresh_failed step=tos", false)
        .await
        .unwrap();
    assert!(updated);
    manager.commit().await.unwrap();

    // A reload from storage must observe the committed status.
    manager.reload().await.unwrap();
    let record = manager.find_token("tok-new").await.unwrap().expect("record");
    assert_eq!(record.status, castor::token::TokenStatus::Invalid);
    assert!(record.note.contains("step=tos"));

    // 8. Settings success restores the invalid token to rotation.
    let restored = manager
        .mark_account_settings_success("tok-new", true)
        .await
        .unwrap();
    assert!(restored);
    let record = manager.find_token("tok-new").await.unwrap().expect("record");
    assert_eq!(record.status, castor::token::TokenStatus::Active);

    // 9. Traversal order: basic pool before super pool.
    let all = manager.all_tokens().await.unwrap();
    assert_eq!(all, vec!["tok-basic", "tok-new", "tok-super"]);

    // 10. Snapshot counts reflect the pool contents.
    let snapshot = manager.snapshot().await.unwrap();
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.active, 3);
    assert_eq!(snapshot.invalid, 0);

    let _ = fs::remove_file(&db_path).await;
}
