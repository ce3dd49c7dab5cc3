mod chat;

pub use chat::{ChatReply, GrokChatClient};
