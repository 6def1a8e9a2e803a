//! Scriptable in-process upstream for tests and offline runs.
//!
//! Every call and every stream pull is counted, and each stream reports a
//! close when dropped, so callers can assert on connection handling.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use async_trait::async_trait;
use futures::Stream;

use crate::llm::{ChatDelta, ChatError, ChatOpts, ChatResult, ChatStream, Message, ModelClient, Role};

#[derive(Debug, Default)]
pub struct MockStats {
    calls: AtomicUsize,
    pulls: AtomicUsize,
    closes: AtomicUsize,
    last_opts: Mutex<Option<ChatOpts>>,
}

impl MockStats {
    /// Number of `send_chat` plus `stream_chat` invocations.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
    /// Number of times any stream was polled for its next delta.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
    pub fn last_opts(&self) -> Option<ChatOpts> {
        self.last_opts.lock().ok().and_then(|g| g.clone())
    }

    fn record_call(&self, opts: &ChatOpts) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Ok(mut g) = self.last_opts.lock() {
            *g = Some(opts.clone());
        }
    }
}

#[derive(Clone, Debug)]
enum Script {
    Fixed {
        reply: String,
        fragments: Vec<String>,
    },
    Echo,
}

#[derive(Clone, Debug)]
pub struct MockUpstream {
    script: Script,
    finish: Option<String>,
    usage: Option<(u32, u32)>,
    fail_call: Option<ChatError>,
    fail_after: Option<(usize, ChatError)>,
    stats: Arc<MockStats>,
}

impl Default for MockUpstream {
    fn default() -> Self {
        Self::new()
    }
}

impl MockUpstream {
    /// Replies "This is a test" and streams it as three fragments.
    pub fn new() -> Self {
        Self {
            script: Script::Fixed {
                reply: "This is a test".into(),
                fragments: vec!["This ".into(), "is ".into(), "a test".into()],
            },
            finish: None,
            usage: None,
            fail_call: None,
            fail_after: None,
            stats: Arc::new(MockStats::default()),
        }
    }

    /// Repeats the last user message back, streamed word by word.
    pub fn echo() -> Self {
        Self {
            script: Script::Echo,
            ..Self::new()
        }
    }

    pub fn with_reply<S: Into<String>>(mut self, reply: S) -> Self {
        if let Script::Fixed { reply: r, .. } = &mut self.script {
            *r = reply.into();
        }
        self
    }

    pub fn with_fragments<I, S>(mut self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        if let Script::Fixed { fragments: f, .. } = &mut self.script {
            *f = fragments.into_iter().map(Into::into).collect();
        }
        self
    }

    /// Emit an explicit finish marker after the last fragment.
    pub fn with_finish<S: Into<String>>(mut self, reason: S) -> Self {
        self.finish = Some(reason.into());
        self
    }

    /// Report token counts; streams send them after the finish marker.
    pub fn with_usage(mut self, prompt_tokens: u32, completion_tokens: u32) -> Self {
        self.usage = Some((prompt_tokens, completion_tokens));
        self
    }

    /// Fail every call before any output.
    pub fn failing(mut self, err: ChatError) -> Self {
        self.fail_call = Some(err);
        self
    }

    /// Fail a stream after `n` fragments have been delivered.
    pub fn failing_after(mut self, n: usize, err: ChatError) -> Self {
        self.fail_after = Some((n, err));
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        self.stats.clone()
    }

    fn reply_for(&self, msgs: &[Message]) -> String {
        match &self.script {
            Script::Fixed { reply, .. } => reply.clone(),
            Script::Echo => last_user(msgs),
        }
    }

    fn fragments_for(&self, msgs: &[Message]) -> Vec<String> {
        match &self.script {
            Script::Fixed { fragments, .. } => fragments.clone(),
            Script::Echo => split_words(&last_user(msgs)),
        }
    }
}

fn last_user(msgs: &[Message]) -> String {
    msgs.iter()
        .rev()
        .find(|m| m.role == Role::User)
        .map(|m| m.content.clone())
        .unwrap_or_default()
}

fn split_words(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    for ch in s.chars() {
        cur.push(ch);
        if ch.is_whitespace() {
            out.push(std::mem::take(&mut cur));
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

#[async_trait]
impl ModelClient for MockUpstream {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError> {
        self.stats.record_call(opts);
        if let Some(e) = &self.fail_call {
            return Err(e.clone());
        }
        let text = self.reply_for(msgs);
        let n = opts.n.unwrap_or(1).max(1) as usize;
        let mut result = ChatResult::text(text, Some(self.finish.as_deref().unwrap_or("stop")));
        let first = result.choices[0].clone();
        result.choices.resize(n, first);
        if let Some((p, c)) = self.usage {
            result.prompt_tokens = Some(p);
            result.completion_tokens = Some(c);
        }
        Ok(result)
    }

    async fn stream_chat(&self, msgs: Vec<Message>, opts: ChatOpts) -> Result<ChatStream, ChatError> {
        self.stats.record_call(&opts);
        if let Some(e) = &self.fail_call {
            return Err(e.clone());
        }
        let mut items: VecDeque<Result<ChatDelta, ChatError>> = self
            .fragments_for(&msgs)
            .into_iter()
            .map(|f| Ok(ChatDelta::Text(f)))
            .collect();
        if let Some((n, e)) = &self.fail_after {
            items.truncate(*n);
            items.push_back(Err(e.clone()));
        } else {
            if let Some(reason) = &self.finish {
                items.push_back(Ok(ChatDelta::Finish(Some(reason.clone()))));
            }
            if let Some((p, c)) = self.usage {
                items.push_back(Ok(ChatDelta::Usage {
                    prompt_tokens: Some(p),
                    completion_tokens: Some(c),
                }));
            }
        }
        Ok(Box::pin(MockStream {
            items,
            stats: self.stats.clone(),
        }))
    }
}

struct MockStream {
    items: VecDeque<Result<ChatDelta, ChatError>>,
    stats: Arc<MockStats>,
}

impl Stream for MockStream {
    type Item = Result<ChatDelta, ChatError>;

    fn poll_next(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.stats.pulls.fetch_add(1, Ordering::SeqCst);
        Poll::Ready(self.items.pop_front())
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}
