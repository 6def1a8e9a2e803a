//! The completion relay: validates chat requests, forwards them to the
//! upstream provider, and maps provider output back into client shapes.
//!
//! Validation always runs before the upstream is contacted. Streaming
//! output is pull-driven: each poll of a [`ChunkStream`] pulls at most one
//! delta from the provider, and dropping the stream drops the provider
//! connection with it.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;

use futures::{Stream, StreamExt};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::ModelCatalog;
use crate::error::{RelayError, Result};
use crate::llm::{ChatDelta, ChatError, ChatOpts, ChatStream, Message, ModelClient, Role};
use crate::types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, Choice, ChunkDelta,
    FinishReason, Model, Usage,
};

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send + 'static>>;

#[derive(Clone)]
pub struct CompletionRelay {
    catalog: Arc<ModelCatalog>,
    upstream: Arc<dyn ModelClient>,
}

impl CompletionRelay {
    pub fn new(catalog: Arc<ModelCatalog>, upstream: Arc<dyn ModelClient>) -> Self {
        Self { catalog, upstream }
    }

    pub fn catalog(&self) -> &ModelCatalog {
        &self.catalog
    }

    /// Checks a request against the catalog and the sampling bounds.
    /// Returns the catalog entry the request targets.
    pub fn validate(&self, req: &ChatCompletionRequest) -> Result<&Model> {
        let model = self
            .catalog
            .get_model(&req.model)
            .map_err(|_| RelayError::InvalidModel(req.model.clone()))?;
        if req.messages.is_empty() {
            return Err(RelayError::InvalidRequest(
                "messages must contain at least one message".into(),
            ));
        }
        if req.max_tokens == Some(0) {
            return Err(RelayError::InvalidRequest("max_tokens must be positive".into()));
        }
        if let Some(t) = req.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(RelayError::InvalidRequest(format!(
                    "temperature must be between 0 and 2, got {t}"
                )));
            }
        }
        if let Some(p) = req.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(RelayError::InvalidRequest(format!(
                    "top_p must be between 0 and 1, got {p}"
                )));
            }
        }
        match req.n {
            Some(0) => {
                return Err(RelayError::InvalidRequest("n must be positive".into()));
            }
            Some(n) if n > 1 && req.stream => {
                return Err(RelayError::InvalidRequest(
                    "n greater than 1 is not supported for streaming".into(),
                ));
            }
            _ => {}
        }
        Ok(model)
    }

    pub async fn generate(&self, req: ChatCompletionRequest) -> Result<ChatCompletionResponse> {
        let started = Instant::now();
        let request_id = new_request_id();
        let model = self.validate(&req).map_err(|e| {
            warn!(target: "relay", request_id = %request_id, model = %req.model, error = %e, "completion rejected");
            e
        })?;
        let opts = chat_opts(model, &req);
        info!(
            target: "relay",
            request_id = %request_id,
            model = %req.model,
            upstream_model = %opts.model,
            stream = false,
            messages = req.messages.len(),
            "completion start"
        );

        let result = match self.upstream.send_chat(&req.messages, &opts).await {
            Ok(r) => r,
            Err(e) => {
                error!(
                    target: "relay",
                    request_id = %request_id,
                    model = %req.model,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "completion failed"
                );
                return Err(e.into());
            }
        };
        if result.choices.is_empty() {
            error!(target: "relay", request_id = %request_id, model = %req.model, "provider returned no choices");
            return Err(ChatError::Protocol("provider returned no choices".into()).into());
        }

        let bytes: usize = result.choices.iter().map(|c| c.text.len()).sum();
        let usage = Usage::from_counts(result.prompt_tokens, result.completion_tokens);
        let choices = result
            .choices
            .into_iter()
            .enumerate()
            .map(|(i, c)| Choice {
                index: i as u32,
                message: Message::assistant(c.text),
                finish_reason: FinishReason::from_upstream(c.finish_reason.as_deref()),
            })
            .collect::<Vec<_>>();

        info!(
            target: "relay",
            request_id = %request_id,
            model = %req.model,
            choices = choices.len(),
            bytes,
            prompt_tokens = usage.map(|u| u.prompt_tokens),
            completion_tokens = usage.map(|u| u.completion_tokens),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "completion done"
        );

        Ok(ChatCompletionResponse {
            id: request_id,
            object: "chat.completion".to_string(),
            created: unix_now(),
            model: req.model,
            choices,
            usage,
        })
    }

    /// Validates eagerly and opens the provider stream before returning, so
    /// rejections and connection failures never look like a started stream.
    pub async fn generate_stream(&self, req: ChatCompletionRequest) -> Result<ChunkStream> {
        let started = Instant::now();
        let request_id = new_request_id();
        let model = self.validate(&req).map_err(|e| {
            warn!(target: "relay", request_id = %request_id, model = %req.model, error = %e, "stream rejected");
            e
        })?;
        let opts = chat_opts(model, &req);
        info!(
            target: "relay",
            request_id = %request_id,
            model = %req.model,
            upstream_model = %opts.model,
            stream = true,
            messages = req.messages.len(),
            "completion start"
        );

        let upstream = match self.upstream.stream_chat(req.messages, opts).await {
            Ok(s) => s,
            Err(e) => {
                error!(
                    target: "relay",
                    request_id = %request_id,
                    model = %req.model,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    error = %e,
                    "stream open failed"
                );
                return Err(e.into());
            }
        };

        let log = StreamLog::new(request_id, req.model, started);
        Ok(relay_chunks(upstream, log))
    }
}

fn relay_chunks(mut upstream: ChatStream, mut log: StreamLog) -> ChunkStream {
    let created = unix_now();
    let s = async_stream::stream! {
        let id = log.request_id.clone();
        let model = log.model.clone();
        let mut role_sent = false;
        loop {
            match upstream.next().await {
                Some(Ok(ChatDelta::Text(text))) => {
                    log.record_text(&text);
                    let delta = ChunkDelta {
                        role: (!role_sent).then_some(Role::Assistant),
                        content: Some(text),
                    };
                    role_sent = true;
                    yield Ok(ChatCompletionChunk::new(&id, created, &model, delta, None));
                }
                Some(Ok(ChatDelta::Finish(reason))) => {
                    let reason = FinishReason::from_upstream(reason.as_deref());
                    log.complete(reason);
                    yield Ok(ChatCompletionChunk::new(&id, created, &model, ChunkDelta::default(), Some(reason)));
                    drain_usage(&mut upstream, &mut log).await;
                    break;
                }
                Some(Ok(ChatDelta::Usage { prompt_tokens, completion_tokens })) => {
                    log.record_usage(prompt_tokens, completion_tokens);
                }
                Some(Ok(ChatDelta::RoleStart(_))) => {}
                Some(Err(e)) => {
                    log.fail(e.clone());
                    yield Err(RelayError::Upstream(e));
                    break;
                }
                None => {
                    log.complete(FinishReason::Stop);
                    yield Ok(ChatCompletionChunk::new(&id, created, &model, ChunkDelta::default(), Some(FinishReason::Stop)));
                    break;
                }
            }
        }
    };
    Box::pin(s)
}

/// Reads what the provider sends after its finish marker. Providers report
/// streamed token usage in a trailing event; nothing here reaches the client.
async fn drain_usage(upstream: &mut ChatStream, log: &mut StreamLog) {
    while let Some(item) = upstream.next().await {
        match item {
            Ok(ChatDelta::Usage { prompt_tokens, completion_tokens }) => {
                log.record_usage(prompt_tokens, completion_tokens);
            }
            Ok(ChatDelta::Finish(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(target: "relay", request_id = %log.request_id, error = %e, "error after finish ignored");
                break;
            }
        }
    }
}

enum Outcome {
    Completed(FinishReason),
    Failed(ChatError),
}

/// Per-stream accounting, reported once when the stream is dropped.
/// A stream dropped without an outcome was cancelled by its consumer.
struct StreamLog {
    request_id: String,
    model: String,
    started: Instant,
    chunks: usize,
    bytes: usize,
    prompt_tokens: Option<u32>,
    completion_tokens: Option<u32>,
    outcome: Option<Outcome>,
}

impl StreamLog {
    fn new(request_id: String, model: String, started: Instant) -> Self {
        Self {
            request_id,
            model,
            started,
            chunks: 0,
            bytes: 0,
            prompt_tokens: None,
            completion_tokens: None,
            outcome: None,
        }
    }

    fn record_text(&mut self, text: &str) {
        self.chunks += 1;
        self.bytes += text.len();
    }

    fn record_usage(&mut self, prompt: Option<u32>, completion: Option<u32>) {
        self.prompt_tokens = prompt.or(self.prompt_tokens);
        self.completion_tokens = completion.or(self.completion_tokens);
    }

    fn complete(&mut self, reason: FinishReason) {
        self.outcome = Some(Outcome::Completed(reason));
    }

    fn fail(&mut self, err: ChatError) {
        self.outcome = Some(Outcome::Failed(err));
    }
}

impl Drop for StreamLog {
    fn drop(&mut self) {
        let elapsed_ms = self.started.elapsed().as_millis() as u64;
        match &self.outcome {
            Some(Outcome::Completed(reason)) => info!(
                target: "relay",
                request_id = %self.request_id,
                model = %self.model,
                chunks = self.chunks,
                bytes = self.bytes,
                prompt_tokens = self.prompt_tokens,
                completion_tokens = self.completion_tokens,
                finish_reason = ?reason,
                elapsed_ms,
                "stream done"
            ),
            Some(Outcome::Failed(e)) => error!(
                target: "relay",
                request_id = %self.request_id,
                model = %self.model,
                chunks = self.chunks,
                bytes = self.bytes,
                elapsed_ms,
                error = %e,
                "stream failed"
            ),
            None => info!(
                target: "relay",
                request_id = %self.request_id,
                model = %self.model,
                chunks = self.chunks,
                bytes = self.bytes,
                elapsed_ms,
                "stream cancelled"
            ),
        }
    }
}

fn chat_opts(model: &Model, req: &ChatCompletionRequest) -> ChatOpts {
    ChatOpts {
        model: model.upstream_name().to_string(),
        temperature: req.temperature,
        top_p: req.top_p,
        max_tokens: req.max_tokens,
        n: req.n,
    }
}

fn new_request_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4())
}

fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
