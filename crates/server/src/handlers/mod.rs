//! HTTP request handlers for API endpoints.

pub mod chat;
pub mod health;
pub mod models;

pub use chat::handle_chat_completion;
pub use health::{handle_health, handle_root};
pub use models::{get_model, list_models};
