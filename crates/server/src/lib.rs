//! # chatrelay-server
//!
//! OpenAI-compatible HTTP front end for the completion relay: model listing,
//! chat completions, and SSE streaming.

pub mod config;
pub mod error;
pub mod handlers;
pub mod logging;
pub mod middleware;
pub mod server;
pub mod state;
pub mod streaming;

pub use config::{AppConfig, Args, LogFormat};
pub use error::ApiError;
pub use server::{create_router, run_server};
pub use state::AppState;
