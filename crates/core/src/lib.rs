pub mod catalog;
pub mod error;
pub mod llm;
pub mod mock;
pub mod relay;
pub mod types;

pub use catalog::ModelCatalog;
pub use error::{RelayError, Result};
pub use relay::{ChunkStream, CompletionRelay};
pub use types::{
    ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, Choice,
    ChunkDelta, FinishReason, Model, Usage,
};
