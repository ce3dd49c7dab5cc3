use crate::error::CastorError;
use chrono::Utc;
use ractor::{Actor, ActorProcessingErr, ActorRef, RpcReplyPort};
use serde_json::Value;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use std::{str::FromStr, time::Duration};
use tracing::info;

const SQLITE_INIT: &str = r#"
CREATE TABLE IF NOT EXISTS kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
"#;

/// Messages handled by the blob-store actor. All payload access is serialized
/// through this actor, which doubles as the exclusive section around
/// read-modify-write cycles of whole blobs.
#[derive(Debug)]
pub enum StoreActorMessage {
    /// Fetch the JSON blob stored under a key, if any.
    Get(String, RpcReplyPort<Result<Option<Value>, CastorError>>),

    /// Store a JSON blob under a key, replacing any previous value.
    Put(String, Value, RpcReplyPort<Result<(), CastorError>>),
}

#[derive(Clone)]
pub struct StoreActorHandle {
    actor: ActorRef<StoreActorMessage>,
}

impl StoreActorHandle {
    pub async fn get(&self, key: &str) -> Result<Option<Value>, CastorError> {
        ractor::call!(self.actor, StoreActorMessage::Get, key.to_string())
            .map_err(|e| CastorError::RactorError(format!("Store Get RPC failed: {e}")))?
    }

    pub async fn put(&self, key: &str, value: Value) -> Result<(), CastorError> {
        ractor::call!(self.actor, StoreActorMessage::Put, key.to_string(), value)
            .map_err(|e| CastorError::RactorError(format!("Store Put RPC failed: {e}")))?
    }
}

struct StoreActorState {
    pool: SqlitePool,
}

struct StoreActor;

#[ractor::async_trait]
impl Actor for StoreActor {
    type Msg = StoreActorMessage;
    type State = StoreActorState;
    type Arguments = String;

    async fn pre_start(
        &self,
        _myself: ActorRef<Self::Msg>,
        database_url: Self::Arguments,
    ) -> Result<Self::State, ActorProcessingErr> {
        let connect_opts = SqliteConnectOptions::from_str(database_url.as_str())
            .map_err(|e| ActorProcessingErr::from(format!("invalid database url: {e}")))?
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5))
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .connect_with(connect_opts)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("store connect failed: {e}")))?;

        apply_schema(&pool)
            .await
            .map_err(|e| ActorProcessingErr::from(format!("store schema init failed: {e}")))?;

        info!("StoreActor initialized");
        Ok(StoreActorState { pool })
    }

    async fn handle(
        &self,
        _myself: ActorRef<Self::Msg>,
        message: Self::Msg,
        state: &mut Self::State,
    ) -> Result<(), ActorProcessingErr> {
        match message {
            StoreActorMessage::Get(key, reply) => {
                let res = self.get(&state.pool, &key).await;
                let _ = reply.send(res);
            }
            StoreActorMessage::Put(key, value, reply) => {
                let res = self.put(&state.pool, &key, value).await;
                let _ = reply.send(res);
            }
        }
        Ok(())
    }
}

impl StoreActor {
    async fn get(&self, pool: &SqlitePool, key: &str) -> Result<Option<Value>, CastorError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(pool)
            .await?;

        match row {
            Some((raw,)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, pool: &SqlitePool, key: &str, value: Value) -> Result<(), CastorError> {
        let raw = serde_json::to_string(&value)?;
        sqlx::query(
            r#"
            INSERT INTO kv (key, value, updated_at)
            VALUES (?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(raw)
        .bind(Utc::now().to_rfc3339())
        .execute(pool)
        .await?;
        Ok(())
    }
}

/// Spawn the blob-store actor and return a cloneable handle.
pub async fn spawn(database_url: &str) -> StoreActorHandle {
    let (actor, _jh) = ractor::Actor::spawn(
        Some("StoreActor".to_string()),
        StoreActor,
        database_url.to_string(),
    )
    .await
    .expect("failed to spawn StoreActor");

    StoreActorHandle { actor }
}

async fn apply_schema(pool: &SqlitePool) -> Result<(), CastorError> {
    for stmt in SQLITE_INIT.split(';') {
        let s = stmt.trim();
        if s.is_empty() {
            continue;
        }
        sqlx::query(s).execute(pool).await?;
    }
    Ok(())
}
