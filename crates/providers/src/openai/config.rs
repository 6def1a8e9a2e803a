use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("OPENAI_API_KEY not set")]
    MissingApiKey,
    #[error("invalid upstream base_url '{0}': {1}")]
    InvalidBaseUrl(String, String),
}

/// The `[upstream]` table of the config file. Every key is optional.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct OpenAiFileConfig {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub timeout_ms: Option<u64>,
    pub connect_timeout_ms: Option<u64>,
    pub stream_idle_timeout_ms: Option<u64>,
    pub proxy: Option<String>,
}

#[derive(Clone, Debug)]
pub struct OpenAiConfig {
    pub api_key: String,
    pub base_url: String,
    /// Bound on a whole non-streaming call.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    /// Longest allowed gap between bytes of a streamed reply.
    pub stream_idle_timeout: Duration,
    pub proxy: Option<String>,
}

impl OpenAiConfig {
    /// Environment wins over the file; `lookup` stands in for the process env.
    pub fn from_sources<F>(file: &OpenAiFileConfig, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_key = lookup("OPENAI_API_KEY")
            .or_else(|| file.api_key.clone())
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::MissingApiKey)?;
        let base_url = lookup("OPENAI_BASE_URL")
            .or_else(|| file.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Url::parse(&base_url)
            .map_err(|e| ConfigError::InvalidBaseUrl(base_url.clone(), e.to_string()))?;

        let proxy = file
            .proxy
            .clone()
            .or_else(|| lookup("HTTPS_PROXY"))
            .or_else(|| lookup("HTTP_PROXY"));

        Ok(OpenAiConfig {
            api_key,
            base_url,
            timeout: Duration::from_millis(file.timeout_ms.unwrap_or(60_000)),
            connect_timeout: Duration::from_millis(file.connect_timeout_ms.unwrap_or(10_000)),
            stream_idle_timeout: Duration::from_millis(
                file.stream_idle_timeout_ms.unwrap_or(300_000),
            ),
            proxy,
        })
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let m: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| m.get(k).cloned()
    }

    #[test]
    fn env_overrides_file() {
        let file = OpenAiFileConfig {
            api_key: Some("file-key".into()),
            base_url: Some("http://file.local/v1".into()),
            timeout_ms: Some(5_000),
            ..Default::default()
        };
        let cfg = OpenAiConfig::from_sources(&file, env_of(&[("OPENAI_API_KEY", "env-key")])).unwrap();
        assert_eq!(cfg.api_key, "env-key");
        assert_eq!(cfg.base_url, "http://file.local/v1");
        assert_eq!(cfg.timeout, Duration::from_secs(5));
        assert_eq!(cfg.stream_idle_timeout, Duration::from_secs(300));
    }

    #[test]
    fn missing_key_is_an_error() {
        let err = OpenAiConfig::from_sources(&OpenAiFileConfig::default(), env_of(&[])).unwrap_err();
        assert_eq!(err, ConfigError::MissingApiKey);
    }

    #[test]
    fn rejects_bad_base_url() {
        let err = OpenAiConfig::from_sources(
            &OpenAiFileConfig::default(),
            env_of(&[("OPENAI_API_KEY", "k"), ("OPENAI_BASE_URL", "not a url")]),
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBaseUrl(..)));
    }

    #[test]
    fn endpoint_joins_without_double_slash() {
        let cfg = OpenAiConfig::from_sources(
            &OpenAiFileConfig::default(),
            env_of(&[("OPENAI_API_KEY", "k"), ("OPENAI_BASE_URL", "http://x.local/v1/")]),
        )
        .unwrap();
        assert_eq!(cfg.endpoint("chat/completions"), "http://x.local/v1/chat/completions");
    }
}
