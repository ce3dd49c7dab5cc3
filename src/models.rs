use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

/// Request classes gate which quota counter a call consumes and which pools a
/// selection is allowed to touch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestClass {
    Chat,
    Heavy,
    Image,
    Video,
}

impl RequestClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestClass::Chat => "chat",
            RequestClass::Heavy => "heavy",
            RequestClass::Image => "image",
            RequestClass::Video => "video",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelInfo {
    pub model_id: &'static str,
    pub class: RequestClass,
}

impl ModelInfo {
    pub fn is_image(&self) -> bool {
        self.class == RequestClass::Image
    }

    pub fn is_video(&self) -> bool {
        self.class == RequestClass::Video
    }
}

/// Static model catalog; unknown model ids fall back to the chat class at the
/// selection boundary so new upstream aliases keep working.
pub static MODEL_REGISTRY: LazyLock<Vec<ModelInfo>> = LazyLock::new(|| {
    vec![
        ModelInfo {
            model_id: "grok-3",
            class: RequestClass::Chat,
        },
        ModelInfo {
            model_id: "grok-4",
            class: RequestClass::Chat,
        },
        ModelInfo {
            model_id: "grok-4-mini",
            class: RequestClass::Chat,
        },
        ModelInfo {
            model_id: "grok-4-heavy",
            class: RequestClass::Heavy,
        },
        ModelInfo {
            model_id: "grok-imagine-1.0",
            class: RequestClass::Image,
        },
        ModelInfo {
            model_id: "grok-imagine-1.0-video",
            class: RequestClass::Video,
        },
    ]
});

pub fn get_model(model_id: &str) -> Option<&'static ModelInfo> {
    MODEL_REGISTRY.iter().find(|m| m.model_id == model_id)
}

/// Resolve the request class for a model id; unknown ids are treated as chat.
pub fn class_for(model_id: &str) -> RequestClass {
    get_model(model_id).map(|m| m.class).unwrap_or(RequestClass::Chat)
}
