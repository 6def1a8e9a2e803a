pub mod client;
pub mod config;

pub use client::OpenAiClient;
pub use config::{ConfigError, OpenAiConfig, OpenAiFileConfig};
