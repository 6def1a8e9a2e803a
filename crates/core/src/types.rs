//! Client-facing request and response shapes (OpenAI-compatible).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::llm::{Message, Role};

pub type ChatMessage = Message;

fn model_object() -> String {
    "model".to_string()
}

fn default_owner() -> String {
    "chatrelay".to_string()
}

/// A model exposed by the catalog.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Model {
    pub id: String,
    #[serde(default = "model_object")]
    pub object: String,
    #[serde(default)]
    pub created: u64,
    #[serde(default = "default_owner")]
    pub owned_by: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    /// Provider-side model name; the catalog id is sent when unset.
    #[serde(default, skip_serializing)]
    pub upstream_model: Option<String>,
}

impl Model {
    pub fn new<S: Into<String>>(id: S) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            object: model_object(),
            created: 0,
            owned_by: default_owner(),
            metadata: BTreeMap::new(),
            upstream_model: None,
        }
    }

    pub fn with_upstream<S: Into<String>>(mut self, name: S) -> Self {
        self.upstream_model = Some(name.into());
        self
    }

    pub fn upstream_name(&self) -> &str {
        self.upstream_model.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    #[serde(default)]
    pub stream: bool,
}

impl ChatCompletionRequest {
    pub fn new<S: Into<String>>(model: S, messages: Vec<ChatMessage>) -> Self {
        Self {
            model: model.into(),
            messages,
            max_tokens: None,
            temperature: None,
            top_p: None,
            n: None,
            stream: false,
        }
    }

    pub fn streaming(mut self) -> Self {
        self.stream = true;
        self
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    Stop,
    Length,
    Error,
}

impl FinishReason {
    /// Maps a provider finish reason onto the relay's three outcomes.
    pub fn from_upstream(reason: Option<&str>) -> Self {
        match reason {
            Some("length") => FinishReason::Length,
            Some("error") => FinishReason::Error,
            _ => FinishReason::Stop,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    pub index: u32,
    pub message: ChatMessage,
    pub finish_reason: FinishReason,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn from_counts(prompt: Option<u32>, completion: Option<u32>) -> Option<Self> {
        if prompt.is_none() && completion.is_none() {
            return None;
        }
        let prompt_tokens = prompt.unwrap_or(0);
        let completion_tokens = completion.unwrap_or(0);
        Some(Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens.saturating_add(completion_tokens),
        })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<Role>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    pub index: u32,
    pub delta: ChunkDelta,
    pub finish_reason: Option<FinishReason>,
}

/// One incremental piece of a streaming completion. Always one choice.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
    pub id: String,
    pub object: String,
    pub created: u64,
    pub model: String,
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    pub fn new(
        id: &str,
        created: u64,
        model: &str,
        delta: ChunkDelta,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        Self {
            id: id.to_string(),
            object: "chat.completion.chunk".to_string(),
            created,
            model: model.to_string(),
            choices: vec![ChunkChoice {
                index: 0,
                delta,
                finish_reason,
            }],
        }
    }

    pub fn delta(&self) -> Option<&ChunkDelta> {
        self.choices.first().map(|c| &c.delta)
    }

    pub fn content(&self) -> Option<&str> {
        self.delta().and_then(|d| d.content.as_deref())
    }

    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.choices.first().and_then(|c| c.finish_reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_defaults_stream_false() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "default",
            "messages": [{"role": "user", "content": "hi"}]
        }))
        .unwrap();
        assert!(!req.stream);
        assert_eq!(req.messages[0].role, Role::User);
        assert_eq!(req.max_tokens, None);
    }

    #[test]
    fn unknown_role_is_rejected() {
        let res = serde_json::from_value::<ChatCompletionRequest>(json!({
            "model": "default",
            "messages": [{"role": "tool", "content": "hi"}]
        }));
        assert!(res.is_err());
    }

    #[test]
    fn model_hides_upstream_name() {
        let m = Model::new("default").with_upstream("gpt-4o-mini");
        let v = serde_json::to_value(&m).unwrap();
        assert_eq!(v["id"], "default");
        assert_eq!(v["object"], "model");
        assert!(v.get("upstream_model").is_none());
        assert_eq!(m.upstream_name(), "gpt-4o-mini");
    }

    #[test]
    fn finish_reason_mapping() {
        assert_eq!(FinishReason::from_upstream(Some("length")), FinishReason::Length);
        assert_eq!(FinishReason::from_upstream(Some("error")), FinishReason::Error);
        assert_eq!(FinishReason::from_upstream(Some("content_filter")), FinishReason::Stop);
        assert_eq!(FinishReason::from_upstream(None), FinishReason::Stop);
    }

    #[test]
    fn terminal_chunk_serializes_without_content() {
        let c = ChatCompletionChunk::new("id-1", 7, "default", ChunkDelta::default(), Some(FinishReason::Stop));
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["object"], "chat.completion.chunk");
        assert_eq!(v["choices"][0]["finish_reason"], "stop");
        assert!(v["choices"][0]["delta"].get("content").is_none());
    }

    #[test]
    fn usage_total_saturates() {
        let u = Usage::from_counts(Some(u32::MAX), Some(1)).unwrap();
        assert_eq!(u.total_tokens, u32::MAX);
        assert_eq!(u.completion_tokens, 1);
        assert_eq!(Usage::from_counts(None, None), None);
        assert_eq!(Usage::from_counts(Some(3), None).unwrap().total_tokens, 3);
    }
}
