use crate::error::CastorError;
use crate::models::MODEL_REGISTRY;
use crate::server::guards::auth::ApiKeyIdentity;
use crate::server::router::CastorState;
use axum::{
    Extension, Json, Router,
    extract::State,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::warn;

pub fn router() -> Router<CastorState> {
    Router::new()
        .route("/v1/models", get(list_models))
        .route("/v1/chat/completions", post(chat_completions))
}

async fn list_models() -> Json<Value> {
    let data: Vec<Value> = MODEL_REGISTRY
        .iter()
        .map(|m| {
            json!({
                "id": m.model_id,
                "object": "model",
                "owned_by": "castor",
            })
        })
        .collect();
    Json(json!({ "object": "list", "data": data }))
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionRequest {
    model: String,
    #[serde(default)]
    messages: Vec<ChatMessage>,
}

/// One user-visible prompt from the OpenAI message list. Upstream takes a
/// single message string, so the history is flattened.
fn flatten_messages(messages: &[ChatMessage]) -> String {
    if let [only] = messages {
        return only.content.clone();
    }
    messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.content))
        .collect::<Vec<_>>()
        .join("\n")
}

async fn chat_completions(
    State(state): State<CastorState>,
    Extension(identity): Extension<ApiKeyIdentity>,
    Json(request): Json<ChatCompletionRequest>,
) -> Result<Json<Value>, CastorError> {
    state
        .api_keys
        .enforce_daily_quota(&identity.key, &request.model, None)
        .await?;

    // A stale snapshot only costs selection fairness; keep serving on failure.
    if let Err(e) = state.tokens.reload_if_stale().await {
        warn!("pool staleness reload failed: {e}");
    }

    let token = state.tokens.select_token(&request.model).await?;
    let prompt = flatten_messages(&request.messages);

    match state
        .chat_client
        .complete(&token, &request.model, &prompt)
        .await
    {
        Ok(reply) => {
            state
                .tokens
                .sync_usage(&token, &request.model, true, false, true)
                .await;
            Ok(Json(completion_body(&request.model, &reply.content)))
        }
        Err(e) => {
            state
                .tokens
                .sync_usage(&token, &request.model, false, false, true)
                .await;
            Err(e)
        }
    }
}

fn completion_body(model: &str, content: &str) -> Value {
    json!({
        "id": format!("chatcmpl-{}", Utc::now().timestamp_millis()),
        "object": "chat.completion",
        "created": Utc::now().timestamp(),
        "model": model,
        "choices": [{
            "index": 0,
            "message": { "role": "assistant", "content": content },
            "finish_reason": "stop",
        }],
        "usage": { "prompt_tokens": 0, "completion_tokens": 0, "total_tokens": 0 },
    })
}
