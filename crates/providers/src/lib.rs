//! Upstream completion providers.

pub mod openai;
