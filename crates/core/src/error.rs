use thiserror::Error;

use crate::llm::ChatError;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("the model '{0}' does not exist")]
    InvalidModel(String),

    #[error("model '{0}' not found")]
    NotFound(String),

    #[error("upstream error: {0}")]
    Upstream(#[from] ChatError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Short label used in structured log events.
    pub fn kind(&self) -> &'static str {
        match self {
            RelayError::InvalidRequest(_) => "invalid_request",
            RelayError::InvalidModel(_) => "invalid_model",
            RelayError::NotFound(_) => "not_found",
            RelayError::Upstream(_) => "upstream",
            RelayError::Internal(_) => "internal",
        }
    }
}

pub type Result<T, E = RelayError> = std::result::Result<T, E>;
