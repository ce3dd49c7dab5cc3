use super::ops;
use super::pool::{PoolSet, PoolSnapshot};
use super::record::TokenRecord;
use crate::config::CONFIG;
use crate::error::CastorError;
use crate::models::class_for;
use crate::store::{StoreActorHandle, TOKENS_KEY};
use chrono::{Duration, Utc};
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde_json::Value;
use std::time::Instant;
use tracing::{info, warn};

/// Messages handled by the token-manager actor. Serial handling makes every
/// select/reload/replace an atomic step against the in-memory pool state.
#[derive(Debug)]
pub enum TokenActorMessage {
    /// Pick a token for the model's request class. `None` means exhaustion.
    SelectToken(String, RpcReplyPort<Option<String>>),

    /// Usage accounting after an upstream attempt; persists fail-soft.
    SyncUsage {
        token: String,
        model: String,
        success: bool,
        consume_on_fail: bool,
        is_usage: bool,
    },

    /// Replace in-memory state from storage.
    Reload(RpcReplyPort<Result<(), CastorError>>),

    /// Reload only when the in-memory snapshot is older than the TTL.
    ReloadIfStale(RpcReplyPort<Result<(), CastorError>>),

    /// Replace the stored payload wholesale; replies with tokens that are new
    /// relative to the previous payload.
    ReplacePayload(Value, RpcReplyPort<Result<Vec<String>, CastorError>>),

    MarkAssetClear(String, RpcReplyPort<bool>),

    /// Record snapshot for one token, for admin probes.
    FindToken(String, RpcReplyPort<Option<TokenRecord>>),

    /// Provisioning succeeded for a token. `save=false` defers persistence to
    /// the next `Commit`.
    MarkSettingsSuccess {
        token: String,
        save: bool,
        reply: RpcReplyPort<bool>,
    },

    SetInvalid {
        token: String,
        reason: String,
        save: bool,
        reply: RpcReplyPort<bool>,
    },

    /// Flush deferred mutations to storage.
    Commit(RpcReplyPort<Result<(), CastorError>>),

    /// Full payload in persisted shape, for the admin listing.
    ListTokens(RpcReplyPort<Value>),

    /// Unique tokens in pool-then-order traversal order.
    AllTokens(RpcReplyPort<Vec<String>>),

    Snapshot(RpcReplyPort<PoolSnapshot>),
}

/// Handle for interacting with the token-manager actor.
#[derive(Clone)]
pub struct TokenManagerHandle {
    actor: ActorRef<TokenActorMessage>,
}

impl TokenManagerHandle {
    /// Select a token for a model, or fail with the retryable exhaustion error.
    pub async fn select_token(&self, model: &str) -> Result<String, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::SelectToken, model.to_string())
            .map_err(|e| CastorError::RactorError(format!("SelectToken RPC failed: {e}")))?
            .ok_or(CastorError::NoAvailableToken)
    }

    pub async fn sync_usage(
        &self,
        token: &str,
        model: &str,
        success: bool,
        consume_on_fail: bool,
        is_usage: bool,
    ) {
        let _ = ractor::cast!(
            self.actor,
            TokenActorMessage::SyncUsage {
                token: token.to_string(),
                model: model.to_string(),
                success,
                consume_on_fail,
                is_usage,
            }
        );
    }

    pub async fn reload(&self) -> Result<(), CastorError> {
        ractor::call!(self.actor, TokenActorMessage::Reload)
            .map_err(|e| CastorError::RactorError(format!("Reload RPC failed: {e}")))?
    }

    pub async fn reload_if_stale(&self) -> Result<(), CastorError> {
        ractor::call!(self.actor, TokenActorMessage::ReloadIfStale)
            .map_err(|e| CastorError::RactorError(format!("ReloadIfStale RPC failed: {e}")))?
    }

    /// Replace the persisted payload; returns the tokens not present before.
    pub async fn replace_payload(&self, payload: Value) -> Result<Vec<String>, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::ReplacePayload, payload)
            .map_err(|e| CastorError::RactorError(format!("ReplacePayload RPC failed: {e}")))?
    }

    pub async fn find_token(&self, token: &str) -> Result<Option<TokenRecord>, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::FindToken, token.to_string())
            .map_err(|e| CastorError::RactorError(format!("FindToken RPC failed: {e}")))
    }

    pub async fn mark_asset_clear(&self, token: &str) -> Result<bool, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::MarkAssetClear, token.to_string())
            .map_err(|e| CastorError::RactorError(format!("MarkAssetClear RPC failed: {e}")))
    }

    pub async fn mark_account_settings_success(
        &self,
        token: &str,
        save: bool,
    ) -> Result<bool, CastorError> {
        ractor::call!(
            self.actor,
            |reply| TokenActorMessage::MarkSettingsSuccess {
                token: token.to_string(),
                save,
                reply,
            }
        )
        .map_err(|e| CastorError::RactorError(format!("MarkSettingsSuccess RPC failed: {e}")))
    }

    pub async fn set_token_invalid(
        &self,
        token: &str,
        reason: &str,
        save: bool,
    ) -> Result<bool, CastorError> {
        ractor::call!(
            self.actor,
            |reply| TokenActorMessage::SetInvalid {
                token: token.to_string(),
                reason: reason.to_string(),
                save,
                reply,
            }
        )
        .map_err(|e| CastorError::RactorError(format!("SetInvalid RPC failed: {e}")))
    }

    pub async fn commit(&self) -> Result<(), CastorError> {
        ractor::call!(self.actor, TokenActorMessage::Commit)
            .map_err(|e| CastorError::RactorError(format!("Commit RPC failed: {e}")))?
    }

    pub async fn list_tokens(&self) -> Result<Value, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::ListTokens)
            .map_err(|e| CastorError::RactorError(format!("ListTokens RPC failed: {e}")))
    }

    pub async fn all_tokens(&self) -> Result<Vec<String>, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::AllTokens)
            .map_err(|e| CastorError::RactorError(format!("AllTokens RPC failed: {e}")))
    }

    pub async fn snapshot(&self) -> Result<PoolSnapshot, CastorError> {
        ractor::call!(self.actor, TokenActorMessage::Snapshot)
            .map_err(|e| CastorError::RactorError(format!("Snapshot RPC failed: {e}")))
    }
}

struct TokenActorState {
    store: StoreActorHandle,
    pools: PoolSet,
    dirty: bool,
    loaded_at: Instant,
    fail_threshold: u32,
    cooldown: Duration,
    reload_ttl: std::time::Duration,
}

struct TokenActor;

#[ractor::async_trait]
impl Actor for TokenActor {
    type Msg = TokenActorMessage;
    type State = TokenActorState;
    type Arguments = StoreActorHandle;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        store: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let pools = load_pools(&store)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("token payload load failed: {e}")))?;

        let snap = pools.snapshot();
        info!(
            total = snap.total,
            active = snap.active,
            cooling = snap.cooling,
            invalid = snap.invalid,
            "TokenActor initialized"
        );

        let cfg = &CONFIG.token;
        Ok(TokenActorState {
            store,
            pools,
            dirty: false,
            loaded_at: Instant::now(),
            fail_threshold: cfg.fail_threshold,
            cooldown: Duration::seconds(cfg.cooldown_secs as i64),
            reload_ttl: std::time::Duration::from_secs(cfg.reload_ttl_secs),
        })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            TokenActorMessage::SelectToken(model, reply) => {
                let class = class_for(&model);
                let picked = state.pools.select(class, Utc::now());
                match &picked {
                    Some(token) => info!(
                        model,
                        class = class.as_str(),
                        token = %redact(token),
                        "token selected"
                    ),
                    None => warn!(model, class = class.as_str(), "token pool exhausted"),
                }
                let _ = reply.send(picked);
            }

            TokenActorMessage::SyncUsage {
                token,
                model,
                success,
                consume_on_fail,
                is_usage,
            } => {
                let class = class_for(&model);
                let found = state.pools.sync_usage(
                    &token,
                    class,
                    success,
                    consume_on_fail,
                    is_usage,
                    state.fail_threshold,
                    state.cooldown,
                    Utc::now(),
                );
                if !found {
                    warn!(token = %redact(&token), "sync_usage for unknown token ignored");
                    return Ok(());
                }
                save_fail_soft(state).await;
            }

            TokenActorMessage::Reload(reply) => {
                let _ = reply.send(reload(state).await);
            }

            TokenActorMessage::ReloadIfStale(reply) => {
                let res = if state.loaded_at.elapsed() >= state.reload_ttl {
                    reload(state).await
                } else {
                    Ok(())
                };
                let _ = reply.send(res);
            }

            TokenActorMessage::ReplacePayload(payload, reply) => {
                let _ = reply.send(replace_payload(state, payload).await);
            }

            TokenActorMessage::FindToken(token, reply) => {
                let _ = reply.send(state.pools.find(&token).cloned());
            }

            TokenActorMessage::MarkAssetClear(token, reply) => {
                let found = state.pools.mark_asset_clear(&token, Utc::now());
                if found {
                    save_fail_soft(state).await;
                }
                let _ = reply.send(found);
            }

            TokenActorMessage::MarkSettingsSuccess { token, save, reply } => {
                let found = state.pools.mark_settings_success(&token);
                if found {
                    if save {
                        save_fail_soft(state).await;
                    } else {
                        state.dirty = true;
                    }
                }
                let _ = reply.send(found);
            }

            TokenActorMessage::SetInvalid {
                token,
                reason,
                save,
                reply,
            } => {
                let found = state.pools.set_invalid(&token, &reason);
                if found {
                    warn!(token = %redact(&token), reason, "token invalidated");
                    if save {
                        save_fail_soft(state).await;
                    } else {
                        state.dirty = true;
                    }
                }
                let _ = reply.send(found);
            }

            TokenActorMessage::Commit(reply) => {
                let res = save(state).await;
                if res.is_ok() {
                    state.dirty = false;
                }
                let _ = reply.send(res);
            }

            TokenActorMessage::ListTokens(reply) => {
                let _ = reply.send(ops::pools_to_payload(state.pools.pools()));
            }

            TokenActorMessage::AllTokens(reply) => {
                let _ = reply.send(state.pools.all_tokens());
            }

            TokenActorMessage::Snapshot(reply) => {
                let _ = reply.send(state.pools.snapshot());
            }
        }
        Ok(())
    }
}

async fn load_pools(store: &StoreActorHandle) -> Result<PoolSet, CastorError> {
    let payload = match store.get(TOKENS_KEY).await? {
        Some(value) => value,
        None => {
            // First boot: seed storage so admin reads see the canonical shape.
            let empty = ops::empty_payload();
            store.put(TOKENS_KEY, empty.clone()).await?;
            empty
        }
    };
    Ok(PoolSet::new(ops::payload_to_pools(&payload)))
}

/// Read-then-swap. Deferred mutations are flushed first so a reload cannot
/// silently drop them.
async fn reload(state: &mut TokenActorState) -> Result<(), CastorError> {
    if state.dirty {
        save(state).await?;
        state.dirty = false;
    }
    state.pools = load_pools(&state.store).await?;
    state.loaded_at = Instant::now();
    Ok(())
}

async fn replace_payload(
    state: &mut TokenActorState,
    payload: Value,
) -> Result<Vec<String>, CastorError> {
    // A non-object body would normalize to the empty default pools and wipe
    // the whole inventory; reject it before anything is persisted.
    if !payload.is_object() {
        return Err(CastorError::BadRequest(
            "token payload must be a JSON object".to_string(),
        ));
    }
    let old = ops::pools_to_payload(state.pools.pools());
    let added = ops::added_tokens(&old, &payload);

    let pools = PoolSet::new(ops::payload_to_pools(&payload));
    state
        .store
        .put(TOKENS_KEY, ops::pools_to_payload(pools.pools()))
        .await?;
    state.pools = pools;
    state.dirty = false;
    state.loaded_at = Instant::now();

    info!(added = added.len(), "token payload replaced");
    Ok(added)
}

async fn save(state: &TokenActorState) -> Result<(), CastorError> {
    state
        .store
        .put(TOKENS_KEY, ops::pools_to_payload(state.pools.pools()))
        .await
}

async fn save_fail_soft(state: &mut TokenActorState) {
    if let Err(e) = save(state).await {
        // Keep serving from memory; the next successful save catches up.
        state.dirty = true;
        warn!("token payload save failed: {e}");
    } else {
        state.dirty = false;
    }
}

/// Tokens are credentials; only a short prefix ever reaches the logs.
fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(8).collect();
    format!("{prefix}…")
}

/// Spawn the token-manager actor and return a cloneable handle.
pub async fn spawn(store: StoreActorHandle) -> TokenManagerHandle {
    let (actor, _jh) = Actor::spawn(Some("TokenActor".to_string()), TokenActor, store)
        .await
        .expect("failed to spawn TokenActor");
    TokenManagerHandle { actor }
}
