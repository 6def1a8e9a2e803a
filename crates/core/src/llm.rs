//! Contract between the relay and an upstream completion provider.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new<S: Into<String>>(role: Role, content: S) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
    pub fn user<S: Into<String>>(s: S) -> Self {
        Self::new(Role::User, s)
    }
    pub fn assistant<S: Into<String>>(s: S) -> Self {
        Self::new(Role::Assistant, s)
    }
    pub fn system<S: Into<String>>(s: S) -> Self {
        Self::new(Role::System, s)
    }
}

/// Sampling options forwarded verbatim to the provider.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ChatOpts {
    pub model: String,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub n: Option<u32>,
}

/// One parsed event of an upstream stream.
#[derive(Clone, Debug, PartialEq)]
pub enum ChatDelta {
    RoleStart(Role),
    Text(String),
    Finish(Option<String>),
    Usage {
        prompt_tokens: Option<u32>,
        completion_tokens: Option<u32>,
    },
}

#[derive(Clone, Debug, PartialEq)]
pub struct Completion {
    pub text: String,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ChatResult {
    pub choices: Vec<Completion>,
    pub prompt_tokens: Option<u32>,
    pub completion_tokens: Option<u32>,
}

impl ChatResult {
    /// Single-choice result, the common shape for `n` unset.
    pub fn text<S: Into<String>>(text: S, finish_reason: Option<&str>) -> Self {
        Self {
            choices: vec![Completion {
                text: text.into(),
                finish_reason: finish_reason.map(str::to_string),
            }],
            prompt_tokens: None,
            completion_tokens: None,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("auth error: {0}")] Auth(String),
    #[error("rate limit: {0}")] RateLimit(String),
    #[error("timeout: {0}")] Timeout(String),
    #[error("network: {0}")] Network(String),
    #[error("decode: {0}")] Decode(String),
    #[error("protocol: {0}")] Protocol(String),
    #[error("other: {0}")] Other(String),
}

pub type ChatStream = Pin<Box<dyn Stream<Item = Result<ChatDelta, ChatError>> + Send + 'static>>;

/// An upstream completion provider.
///
/// `stream_chat` resolves once the provider has accepted the request, so
/// connection and status failures surface before the first delta. The
/// returned stream owns the connection; dropping it closes the connection.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError>;
    async fn stream_chat(&self, msgs: Vec<Message>, opts: ChatOpts) -> Result<ChatStream, ChatError>;
}
