use std::sync::Arc;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use whattowatch::{
    db::{create_pool, run_migrations, PgEmbeddingRepository},
    services::{providers::OpenAiEmbeddingProvider, EmbeddingWorker},
    Config,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("whattowatch=info,embedding_worker=info")),
        )
        .init();

    let config = Config::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let repository = Arc::new(PgEmbeddingRepository::new(pool));
    let provider = OpenAiEmbeddingProvider::new(
        config.openai_api_key.clone(),
        config.openai_base_url.clone(),
        config.http_timeout(),
    )?;

    let worker = EmbeddingWorker::new(
        repository.clone(),
        repository,
        Arc::new(provider),
        config.worker(),
    );
    let (task, handle) = worker.start();

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");
    handle.shutdown().await;
    task.await?;

    Ok(())
}
