use crate::openai::config::OpenAiConfig;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use relay_core::llm::{
    ChatDelta, ChatError, ChatOpts, ChatResult, ChatStream, Completion, Message, ModelClient, Role,
};
use reqwest::{header, Client, StatusCode};
use serde::Serialize;
use std::time::Instant;
use tokio::time::Duration;
use tracing::{debug, error, info};

#[derive(Clone)]
pub struct OpenAiClient {
    http: Client,
    cfg: OpenAiConfig,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: &'a [Message],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
}

#[derive(Serialize)]
struct StreamOptions {
    include_usage: bool,
}

impl<'a> ChatBody<'a> {
    fn new(msgs: &'a [Message], opts: &'a ChatOpts, stream: bool) -> Self {
        Self {
            model: &opts.model,
            messages: msgs,
            stream,
            temperature: opts.temperature,
            top_p: opts.top_p,
            max_tokens: opts.max_tokens,
            n: opts.n,
            stream_options: stream.then_some(StreamOptions { include_usage: true }),
        }
    }
}

impl OpenAiClient {
    pub fn new(cfg: OpenAiConfig) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::AUTHORIZATION,
            header::HeaderValue::from_str(&format!("Bearer {}", cfg.api_key))?,
        );
        // No client-wide timeout: it would also cut off long streams.
        let mut builder = Client::builder()
            .default_headers(headers)
            .use_rustls_tls()
            .pool_idle_timeout(Duration::from_secs(30))
            .connect_timeout(cfg.connect_timeout);
        if let Some(p) = &cfg.proxy {
            builder = builder.proxy(reqwest::Proxy::all(p)?);
        }
        let http = builder.build()?;
        Ok(Self { http, cfg })
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn send_chat(&self, msgs: &[Message], opts: &ChatOpts) -> Result<ChatResult, ChatError> {
        let url = self.cfg.endpoint("chat/completions");
        debug!(target:"providers::openai","chat request model={} url={}", opts.model, url);
        let resp = self
            .http
            .post(url)
            .timeout(self.cfg.timeout)
            .json(&ChatBody::new(msgs, opts, false))
            .send()
            .await
            .map_err(map_reqwest_err)?;
        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.ok();
            error!(target:"providers::openai","chat non-200 status={} body={:?}", status, body);
            return Err(map_status_err(status, body));
        }
        let v: serde_json::Value = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                ChatError::Timeout(e.to_string())
            } else {
                ChatError::Decode(e.to_string())
            }
        })?;
        parse_chat_result(&v)
    }

    async fn stream_chat(&self, msgs: Vec<Message>, opts: ChatOpts) -> Result<ChatStream, ChatError> {
        let url = self.cfg.endpoint("chat/completions");
        info!(target:"providers::openai","start chat stream model={} url={}", opts.model, url);
        let send = self
            .http
            .post(url)
            .json(&ChatBody::new(&msgs, &opts, true))
            .send();
        let s = sse_stream(send, self.cfg.stream_idle_timeout).await?;
        Ok(Box::pin(s))
    }
}

async fn sse_stream(
    send_fut: impl std::future::Future<Output = Result<reqwest::Response, reqwest::Error>>,
    idle: Duration,
) -> Result<impl Stream<Item = Result<ChatDelta, ChatError>> + Send + 'static, ChatError> {
    let resp = tokio::time::timeout(idle, send_fut)
        .await
        .map_err(|_| ChatError::Timeout("no response from upstream".into()))?
        .map_err(map_reqwest_err)?;
    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.ok();
        error!(target:"providers::openai","chat stream non-200 status={} body={:?}", status, body);
        return Err(map_status_err(status, body));
    }
    let mut stream = resp.bytes_stream();
    let mut buf = bytes::BytesMut::new();
    let s = async_stream::stream! {
        let mut last = Instant::now();
        'outer: loop {
            // Drain complete events before reading more bytes.
            while let Some(pos) = find_event_boundary(&buf) {
                let ev = buf.split_to(pos).freeze();
                let _ = if buf.starts_with(b"\r\n\r\n") { buf.split_to(4) } else { buf.split_to(2) };
                match parse_chat_sse_event(&ev) {
                    Ok(SseEvent::Deltas(deltas)) => {
                        for d in deltas { yield Ok(d); }
                    }
                    Ok(SseEvent::Done) => { yield Ok(ChatDelta::Finish(None)); break 'outer; }
                    Err(e) => { yield Err(e); break 'outer; }
                }
            }
            match tokio::time::timeout(idle, stream.next()).await {
                Ok(Some(Ok(b))) => {
                    buf.extend_from_slice(&b);
                    last = Instant::now();
                }
                Ok(Some(Err(e))) => { yield Err(map_reqwest_err(e)); break 'outer; }
                Ok(None) => {
                    if !buf.iter().all(u8::is_ascii_whitespace) {
                        debug!(target:"providers::openai","stream closed with {} unterminated bytes", buf.len());
                    }
                    break 'outer;
                }
                Err(_) => {
                    yield Err(ChatError::Timeout(format!("stream idle for {:?}", last.elapsed())));
                    break 'outer;
                }
            }
        }
    };
    Ok(s)
}

fn map_reqwest_err(e: reqwest::Error) -> ChatError {
    if e.is_timeout() {
        ChatError::Timeout(e.to_string())
    } else if e.is_request() || e.is_connect() {
        ChatError::Network(e.to_string())
    } else {
        ChatError::Other(e.to_string())
    }
}

fn map_status_err(status: StatusCode, body: Option<String>) -> ChatError {
    let s = format!("{} {}", status.as_u16(), body.unwrap_or_default());
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Auth(s),
        StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(s),
        StatusCode::NOT_FOUND => ChatError::Protocol(s),
        s_ if s_.is_server_error() => ChatError::Network(s),
        _ => ChatError::Other(s),
    }
}

fn parse_chat_result(v: &serde_json::Value) -> Result<ChatResult, ChatError> {
    let Some(choices) = v["choices"].as_array() else {
        return Err(ChatError::Decode("response has no choices array".into()));
    };
    let choices = choices
        .iter()
        .map(|c| Completion {
            text: c["message"]["content"].as_str().unwrap_or("").to_string(),
            finish_reason: c["finish_reason"].as_str().map(str::to_string),
        })
        .collect();
    Ok(ChatResult {
        choices,
        prompt_tokens: token_count(&v["usage"]["prompt_tokens"]),
        completion_tokens: token_count(&v["usage"]["completion_tokens"]),
    })
}

/// Counts beyond `u32` clamp rather than wrap.
fn token_count(v: &serde_json::Value) -> Option<u32> {
    v.as_u64().map(|n| u32::try_from(n).unwrap_or(u32::MAX))
}

fn find_event_boundary(buf: &bytes::BytesMut) -> Option<usize> {
    let crlf = twoway::find_bytes(buf, b"\r\n\r\n");
    let lf = twoway::find_bytes(buf, b"\n\n");
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[derive(Debug, PartialEq)]
enum SseEvent {
    Deltas(Vec<ChatDelta>),
    Done,
}

fn parse_chat_sse_event(ev: &bytes::Bytes) -> Result<SseEvent, ChatError> {
    let s = std::str::from_utf8(ev).map_err(|e| ChatError::Decode(e.to_string()))?;
    let mut data_lines = Vec::new();
    for line in s.lines() {
        if let Some(rest) = line.strip_prefix("data:") {
            data_lines.push(rest.trim_start());
        }
    }
    if data_lines.is_empty() {
        return Ok(SseEvent::Deltas(Vec::new()));
    }
    if data_lines.len() == 1 && data_lines[0].trim_end() == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let json_text = data_lines.join("\n");
    let v: serde_json::Value =
        serde_json::from_str(&json_text).map_err(|e| ChatError::Decode(e.to_string()))?;
    if let Some(msg) = v["error"]["message"].as_str() {
        return Err(ChatError::Protocol(msg.to_string()));
    }

    let mut out = Vec::new();
    let choice = &v["choices"][0];
    let content = choice["delta"]["content"].as_str().unwrap_or("");
    if let Some(role) = choice["delta"]["role"].as_str() {
        if content.is_empty() {
            let r = match role {
                "user" => Role::User,
                "system" => Role::System,
                _ => Role::Assistant,
            };
            out.push(ChatDelta::RoleStart(r));
        }
    }
    if !content.is_empty() {
        out.push(ChatDelta::Text(content.to_string()));
    }
    // Usage before Finish: consumers may stop reading at the finish marker.
    if v["usage"].is_object() {
        out.push(ChatDelta::Usage {
            prompt_tokens: token_count(&v["usage"]["prompt_tokens"]),
            completion_tokens: token_count(&v["usage"]["completion_tokens"]),
        });
    }
    if let Some(fr) = choice["finish_reason"].as_str() {
        out.push(ChatDelta::Finish(Some(fr.to_string())));
    }
    Ok(SseEvent::Deltas(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev(s: &str) -> bytes::Bytes {
        bytes::Bytes::copy_from_slice(s.as_bytes())
    }

    #[test]
    fn parses_content_delta() {
        let got = parse_chat_sse_event(&ev(
            r#"data: {"choices":[{"index":0,"delta":{"content":"Hel"},"finish_reason":null}]}"#,
        ))
        .unwrap();
        assert_eq!(got, SseEvent::Deltas(vec![ChatDelta::Text("Hel".into())]));
    }

    #[test]
    fn role_only_delta_is_role_start() {
        let got = parse_chat_sse_event(&ev(
            r#"data: {"choices":[{"index":0,"delta":{"role":"assistant","content":""}}]}"#,
        ))
        .unwrap();
        assert_eq!(got, SseEvent::Deltas(vec![ChatDelta::RoleStart(Role::Assistant)]));
    }

    #[test]
    fn finish_reason_becomes_finish() {
        let got = parse_chat_sse_event(&ev(
            r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"length"}]}"#,
        ))
        .unwrap();
        assert_eq!(got, SseEvent::Deltas(vec![ChatDelta::Finish(Some("length".into()))]));
    }

    #[test]
    fn done_sentinel() {
        assert_eq!(parse_chat_sse_event(&ev("data: [DONE]")).unwrap(), SseEvent::Done);
    }

    #[test]
    fn comments_are_ignored() {
        assert_eq!(
            parse_chat_sse_event(&ev(": keep-alive")).unwrap(),
            SseEvent::Deltas(vec![])
        );
    }

    #[test]
    fn bad_json_is_decode_error() {
        assert!(matches!(
            parse_chat_sse_event(&ev("data: {nope")),
            Err(ChatError::Decode(_))
        ));
    }

    #[test]
    fn inline_error_is_protocol_error() {
        let got = parse_chat_sse_event(&ev(r#"data: {"error":{"message":"overloaded"}}"#));
        assert_eq!(got, Err(ChatError::Protocol("overloaded".into())));
    }

    #[test]
    fn boundary_prefers_earliest_separator() {
        let buf = bytes::BytesMut::from(&b"data: a\n\ndata: b\r\n\r\n"[..]);
        assert_eq!(find_event_boundary(&buf), Some(7));
    }

    #[test]
    fn status_mapping() {
        assert!(matches!(map_status_err(StatusCode::UNAUTHORIZED, None), ChatError::Auth(_)));
        assert!(matches!(
            map_status_err(StatusCode::TOO_MANY_REQUESTS, None),
            ChatError::RateLimit(_)
        ));
        assert!(matches!(map_status_err(StatusCode::BAD_GATEWAY, None), ChatError::Network(_)));
        assert!(matches!(map_status_err(StatusCode::NOT_FOUND, None), ChatError::Protocol(_)));
        assert_eq!(
            map_status_err(StatusCode::BAD_REQUEST, Some("bad".into())),
            ChatError::Other("400 bad".into())
        );
    }

    #[test]
    fn unset_options_are_omitted() {
        let msgs = [Message::user("hi")];
        let opts = ChatOpts {
            model: "m".into(),
            temperature: Some(0.5),
            ..Default::default()
        };
        let v = serde_json::to_value(ChatBody::new(&msgs, &opts, false)).unwrap();
        assert_eq!(
            v,
            serde_json::json!({
                "model": "m",
                "messages": [{"role": "user", "content": "hi"}],
                "stream": false,
                "temperature": 0.5
            })
        );
    }

    #[test]
    fn streaming_body_requests_usage() {
        let msgs = [Message::user("hi")];
        let opts = ChatOpts {
            model: "m".into(),
            ..Default::default()
        };
        let v = serde_json::to_value(ChatBody::new(&msgs, &opts, true)).unwrap();
        assert_eq!(v["stream"], true);
        assert_eq!(v["stream_options"]["include_usage"], true);
    }

    #[test]
    fn usage_precedes_finish_in_one_event() {
        let got = parse_chat_sse_event(&ev(
            r#"data: {"choices":[{"index":0,"delta":{},"finish_reason":"stop"}],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        ))
        .unwrap();
        assert_eq!(
            got,
            SseEvent::Deltas(vec![
                ChatDelta::Usage { prompt_tokens: Some(3), completion_tokens: Some(2) },
                ChatDelta::Finish(Some("stop".into())),
            ])
        );
    }

    #[test]
    fn usage_only_event_has_no_choices() {
        let got = parse_chat_sse_event(&ev(
            r#"data: {"choices":[],"usage":{"prompt_tokens":3,"completion_tokens":2}}"#,
        ))
        .unwrap();
        assert_eq!(
            got,
            SseEvent::Deltas(vec![ChatDelta::Usage { prompt_tokens: Some(3), completion_tokens: Some(2) }])
        );
    }

    #[test]
    fn oversized_token_counts_clamp() {
        let v = serde_json::json!({
            "choices": [{"message": {"content": "x"}}],
            "usage": {"prompt_tokens": 5_000_000_000u64, "completion_tokens": 1}
        });
        let r = parse_chat_result(&v).unwrap();
        assert_eq!(r.prompt_tokens, Some(u32::MAX));
        assert_eq!(r.completion_tokens, Some(1));
    }

    #[test]
    fn parses_full_result() {
        let v = serde_json::json!({
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "hi"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 5, "completion_tokens": 1, "total_tokens": 6}
        });
        let r = parse_chat_result(&v).unwrap();
        assert_eq!(r.choices[0].text, "hi");
        assert_eq!(r.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(r.prompt_tokens, Some(5));
        assert_eq!(r.completion_tokens, Some(1));
    }
}
