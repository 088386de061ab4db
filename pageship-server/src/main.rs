use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pageship::config::Config;
use pageship::github::GithubClient;
use pageship::llm::LlmClient;
use pageship::notifier::Notifier;
use pageship::pipeline::Pipeline;
use pageship::provisioner::Provisioner;
use pageship::web::{self, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // JSON logs in production (PAGESHIP_LOG_JSON=1), human-readable otherwise
    let json_logs = std::env::var("PAGESHIP_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("pageship=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let config = Config::parse();

    let generator = LlmClient::new(config.api_key.clone())
        .with_model(&config.model)
        .with_max_tokens(config.max_tokens);
    let provisioner = Provisioner::new(Arc::new(GithubClient::new(config.github())?))
        .with_pages_settle(config.pages_settle());
    let notifier = Notifier::new(config.notifier());
    let pipeline = Pipeline::new(
        config.secret.clone(),
        Arc::new(generator),
        provisioner,
        notifier,
    );

    let app = web::router(AppState {
        pipeline: Arc::new(pipeline),
    });

    tracing::info!(
        listen = %config.listen,
        owner = %config.github_username,
        model = %config.model,
        "Starting pageship"
    );
    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
