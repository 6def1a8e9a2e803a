//! Server-Sent Events framing for chat completion chunks.
//!
//! - each chunk is sent as `data: {json}\n\n`
//! - a clean finish ends with `data: [DONE]\n\n`
//! - a failure after the stream started is sent as `event: error` and the
//!   stream ends without `[DONE]`
//!
//! Dropping the response (client disconnect) drops the relay stream and with
//! it the upstream connection.

use std::convert::Infallible;

use axum::response::sse::{Event, KeepAlive, Sse};
use futures::{Stream, StreamExt};
use relay_core::ChunkStream;

use crate::error::ApiError;

pub fn sse_response(mut chunks: ChunkStream) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let stream = async_stream::stream! {
        while let Some(item) = chunks.next().await {
            match item {
                Ok(chunk) => match serde_json::to_string(&chunk) {
                    Ok(json) => yield Ok(Event::default().data(json)),
                    Err(e) => {
                        tracing::error!(error = %e, "failed to encode chunk");
                        return;
                    }
                },
                Err(e) => {
                    let body = ApiError(e).body();
                    yield Ok(Event::default().event("error").data(body.to_string()));
                    return;
                }
            }
        }
        yield Ok(Event::default().data("[DONE]"));
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
