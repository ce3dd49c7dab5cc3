pub mod admin;
pub mod openai;
