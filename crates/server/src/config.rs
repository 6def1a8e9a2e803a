//! Startup configuration.
//!
//! Sources, lowest precedence first: built-in defaults, the TOML config
//! file, environment variables, command-line flags. The result is built
//! once in `main` and shared read-only afterwards.

use std::{
    env, fs,
    net::SocketAddr,
    path::{Path, PathBuf},
};

use clap::Parser;
use directories::BaseDirs;
use providers::openai::{ConfigError as UpstreamConfigError, OpenAiConfig, OpenAiFileConfig};
use relay_core::Model;
use serde::Deserialize;
use thiserror::Error;

#[derive(Parser, Debug, Default)]
#[command(name = "chatrelay")]
#[command(about = "OpenAI-compatible chat completion relay", long_about = None)]
pub struct Args {
    /// Path to the TOML config file
    #[arg(short, long, env = "CHATRELAY_CONFIG")]
    pub config: Option<PathBuf>,

    /// Listen address, e.g. 0.0.0.0:8000
    #[arg(short, long, env = "CHATRELAY_BIND")]
    pub bind: Option<String>,

    /// Log level or filter directive: trace, debug, info, warn, error
    #[arg(long, env = "LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Answer from an in-process echo model instead of a real provider
    #[arg(long, env = "CHATRELAY_MOCK_UPSTREAM")]
    pub mock_upstream: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid bind address '{0}'")]
    InvalidBind(String),
    #[error(transparent)]
    Upstream(#[from] UpstreamConfigError),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub app_name: Option<String>,
    pub version: Option<String>,
    pub environment: Option<String>,
    pub bind: Option<String>,
    pub allowed_origins: Option<Vec<String>>,
    pub allowed_hosts: Option<Vec<String>>,
    pub log_level: Option<String>,
    pub log_format: Option<LogFormat>,
    pub log_dir: Option<PathBuf>,
    pub upstream: OpenAiFileConfig,
    pub models: Vec<Model>,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub app_name: String,
    pub version: String,
    pub environment: String,
    pub bind: SocketAddr,
    pub allowed_origins: Vec<String>,
    /// Accepted `Host` header values; not enforced in the `test` environment.
    pub allowed_hosts: Vec<String>,
    pub log_level: String,
    pub log_format: LogFormat,
    pub log_dir: Option<PathBuf>,
    /// `None` when running against the in-process mock.
    pub upstream: Option<OpenAiConfig>,
    pub models: Vec<Model>,
}

impl AppConfig {
    pub fn load(args: &Args) -> Result<Self, ConfigError> {
        let file = match &args.config {
            Some(path) => read_file(path)?,
            None => match default_config_path() {
                Some(path) if path.exists() => read_file(&path)?,
                _ => FileConfig::default(),
            },
        };
        Self::resolve(file, args, |k| env::var(k).ok())
    }

    pub fn resolve<F>(file: FileConfig, args: &Args, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_str = args
            .bind
            .clone()
            .or(file.bind)
            .unwrap_or_else(|| "127.0.0.1:8000".to_string());
        let bind = bind_str
            .parse()
            .map_err(|_| ConfigError::InvalidBind(bind_str.clone()))?;

        let allowed_origins = lookup("ALLOWED_ORIGINS")
            .map(|s| split_list(&s))
            .or(file.allowed_origins)
            .unwrap_or_else(|| vec!["http://localhost:3000".to_string()]);
        let allowed_hosts = lookup("ALLOWED_HOSTS")
            .map(|s| split_list(&s))
            .or(file.allowed_hosts)
            .unwrap_or_else(|| split_list("localhost,127.0.0.1,host.docker.internal"));

        let upstream = if args.mock_upstream {
            None
        } else {
            Some(OpenAiConfig::from_sources(&file.upstream, &lookup)?)
        };

        let models = if file.models.is_empty() {
            let mut m = Model::new("default");
            m.display_name = "Default".to_string();
            vec![m]
        } else {
            file.models
        };

        Ok(AppConfig {
            app_name: lookup("APP_NAME")
                .or(file.app_name)
                .unwrap_or_else(|| "Chatbot API".to_string()),
            version: file
                .version
                .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string()),
            environment: lookup("ENVIRONMENT")
                .or(file.environment)
                .unwrap_or_else(|| "development".to_string()),
            bind,
            allowed_origins,
            allowed_hosts,
            log_level: args
                .log_level
                .clone()
                .or(file.log_level)
                .unwrap_or_else(|| "info".to_string()),
            log_format: file.log_format.unwrap_or_default(),
            log_dir: file.log_dir,
            upstream,
            models,
        })
    }

    pub fn enforces_hosts(&self) -> bool {
        self.environment != "test"
    }

    pub fn redirects_to_https(&self) -> bool {
        self.environment == "production"
    }
}

fn read_file(path: &Path) -> Result<FileConfig, ConfigError> {
    let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(toml::from_str(&text)?)
}

pub fn default_config_path() -> Option<PathBuf> {
    let base = BaseDirs::new()?;
    Some(base.config_dir().join("chatrelay").join("config.toml"))
}

fn split_list(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
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

    const SAMPLE: &str = r#"
app_name = "Relay"
bind = "0.0.0.0:9000"
log_format = "json"
allowed_origins = ["https://app.example.com"]

[upstream]
base_url = "http://localhost:11434/v1"
api_key = "file-key"
timeout_ms = 1500

[[models]]
id = "default"
display_name = "Default"
owned_by = "acme"
upstream_model = "gpt-4o-mini"
metadata = { tier = "free" }

[[models]]
id = "agent"
"#;

    #[test]
    fn file_values_are_used() {
        let file: FileConfig = toml::from_str(SAMPLE).unwrap();
        let cfg = AppConfig::resolve(file, &Args::default(), env_of(&[])).unwrap();
        assert_eq!(cfg.app_name, "Relay");
        assert_eq!(cfg.bind, "0.0.0.0:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.log_format, LogFormat::Json);
        assert_eq!(cfg.allowed_origins, vec!["https://app.example.com"]);
        let up = cfg.upstream.unwrap();
        assert_eq!(up.api_key, "file-key");
        assert_eq!(up.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.models.len(), 2);
        assert_eq!(cfg.models[0].upstream_name(), "gpt-4o-mini");
        assert_eq!(cfg.models[0].metadata["tier"], "free");
        assert_eq!(cfg.models[1].object, "model");
    }

    #[test]
    fn env_and_flags_override_file() {
        let file: FileConfig = toml::from_str(SAMPLE).unwrap();
        let args = Args {
            bind: Some("127.0.0.1:7000".into()),
            log_level: Some("debug".into()),
            ..Default::default()
        };
        let cfg = AppConfig::resolve(
            file,
            &args,
            env_of(&[
                ("APP_NAME", "Env Relay"),
                ("ALLOWED_ORIGINS", "http://a.test, http://b.test"),
                ("OPENAI_API_KEY", "env-key"),
            ]),
        )
        .unwrap();
        assert_eq!(cfg.app_name, "Env Relay");
        assert_eq!(cfg.bind.port(), 7000);
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.allowed_origins, vec!["http://a.test", "http://b.test"]);
        assert_eq!(cfg.upstream.unwrap().api_key, "env-key");
    }

    #[test]
    fn defaults_without_file() {
        let args = Args {
            mock_upstream: true,
            ..Default::default()
        };
        let cfg = AppConfig::resolve(FileConfig::default(), &args, env_of(&[])).unwrap();
        assert_eq!(cfg.app_name, "Chatbot API");
        assert_eq!(cfg.environment, "development");
        assert_eq!(cfg.bind.port(), 8000);
        assert!(cfg.upstream.is_none());
        assert_eq!(cfg.models.len(), 1);
        assert_eq!(cfg.models[0].id, "default");
        assert_eq!(
            cfg.allowed_hosts,
            vec!["localhost", "127.0.0.1", "host.docker.internal"]
        );
        assert!(cfg.enforces_hosts());
        assert!(!cfg.redirects_to_https());
    }

    #[test]
    fn environment_gates_host_checks() {
        let args = Args {
            mock_upstream: true,
            ..Default::default()
        };
        let test_env = AppConfig::resolve(FileConfig::default(), &args, env_of(&[("ENVIRONMENT", "test")])).unwrap();
        assert!(!test_env.enforces_hosts());
        let prod = AppConfig::resolve(
            FileConfig::default(),
            &args,
            env_of(&[("ENVIRONMENT", "production"), ("ALLOWED_HOSTS", "api.example.com")]),
        )
        .unwrap();
        assert!(prod.enforces_hosts());
        assert!(prod.redirects_to_https());
        assert_eq!(prod.allowed_hosts, vec!["api.example.com"]);
    }

    #[test]
    fn missing_api_key_fails_without_mock() {
        let err = AppConfig::resolve(FileConfig::default(), &Args::default(), env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::Upstream(UpstreamConfigError::MissingApiKey)));
    }

    #[test]
    fn bad_bind_is_rejected() {
        let args = Args {
            bind: Some("nowhere".into()),
            mock_upstream: true,
            ..Default::default()
        };
        let err = AppConfig::resolve(FileConfig::default(), &args, env_of(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBind(_)));
    }
}
