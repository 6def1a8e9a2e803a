use std::sync::Arc;

use anyhow::Context;
use chatrelay_server::{config::default_config_path, AppConfig, AppState, Args};
use clap::Parser;
use providers::openai::OpenAiClient;
use relay_core::{llm::ModelClient, mock::MockUpstream, CompletionRelay, ModelCatalog};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let config = AppConfig::load(&args).context("load configuration")?;
    let _log_guard = chatrelay_server::logging::init(&config)?;

    let config_file = args
        .config
        .clone()
        .or_else(|| default_config_path().filter(|p| p.exists()));
    tracing::info!(
        app = %config.app_name,
        version = %config.version,
        environment = %config.environment,
        config_file = ?config_file,
        models = config.models.len(),
        "starting"
    );

    let upstream: Arc<dyn ModelClient> = match &config.upstream {
        Some(cfg) => {
            tracing::info!(base_url = %cfg.base_url, "using OpenAI-compatible upstream");
            Arc::new(OpenAiClient::new(cfg.clone())?)
        }
        None => {
            tracing::warn!("using in-process echo upstream");
            Arc::new(MockUpstream::echo())
        }
    };

    let catalog = Arc::new(ModelCatalog::new(config.models.clone()));
    let relay = CompletionRelay::new(catalog, upstream);
    let addr = config.bind;
    chatrelay_server::run_server(AppState::new(relay, config), addr).await
}
