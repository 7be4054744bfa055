use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use nl_sql_agent::agent::SqlAgent;
use nl_sql_agent::config::{AppConfig, CliArgs};
use nl_sql_agent::llm::LlmManager;
use nl_sql_agent::util::logging::init_tracing;
use nl_sql_agent::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    init_tracing(&config.log_level, config.json_logs);

    let data_dir = PathBuf::from(&config.data_dir);
    if !data_dir.exists() {
        info!("Creating data directory: {}", config.data_dir);
        std::fs::create_dir_all(&data_dir)?;
    }

    info!("Initializing language model backend: {}", config.llm.backend);
    let model = LlmManager::from_config(&config.llm)?;

    info!("Opening databases in {}", data_dir.display());
    let agent = SqlAgent::new(&config, model).await?;
    info!("Known databases: {}", agent.databases().join(", "));

    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, agent));

    info!("Starting server on {}:{}", web_config.host, web_config.port);
    if let Err(e) = web::run_server(web_config, app_state).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server stopped gracefully");
    Ok(())
}
