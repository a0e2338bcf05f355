use anyhow::Result;
use std::sync::Arc;
use taskforge::{
    api::{ApiServer, AppState},
    config::Config,
    llm::{HttpLlmClient, LlmClient},
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting Taskforge orchestration core");

    let config = Config::load()?;
    let llm: Arc<dyn LlmClient> = Arc::new(HttpLlmClient::new(config.llm.clone())?);
    let state = AppState::build(&config, llm)?;
    let server = ApiServer::new(config, state.clone());

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                tracing::error!("API server failed: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, cancelling running executions");
            state.coordinator.cancel_all().await;
        }
    }

    Ok(())
}
