//! Chat completion handler (streaming and non-streaming).

use axum::{
    extract::{rejection::JsonRejection, State},
    response::{IntoResponse, Response},
    Json,
};
use relay_core::ChatCompletionRequest;

use crate::{error::ApiError, state::AppState, streaming::sse_response};

/// `POST /v1/chat/completions`
///
/// With `stream: true` the relay validates and opens the upstream stream
/// before the SSE response starts, so rejections still get a plain JSON
/// error and a proper status code.
pub async fn handle_chat_completion(
    State(state): State<AppState>,
    payload: Result<Json<ChatCompletionRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(req) = payload?;

    if req.stream {
        let chunks = state.relay.generate_stream(req).await?;
        return Ok(sse_response(chunks).into_response());
    }

    let response = state.relay.generate(req).await?;
    Ok(Json(response).into_response())
}
