//! Worker pool entrypoint: wires the capabilities this crate can ground
//! (Postgres job store, Redis queue, OpenAI embeddings + vision parsing)
//! and runs the pool until SIGINT/SIGTERM.

use std::sync::Arc;

use anyhow::{Context, Result};
use pipeline::capabilities::local::{LocalFileReader, MagicByteTranscoder};
use pipeline::capabilities::openai_adapters::{OpenAiEmbedder, OpenAiVisionParser};
use pipeline::capabilities::unconfigured::{UnconfiguredPdfRenderer, UnconfiguredResumeStore};
use pipeline::queue::redis::RedisQueue;
use pipeline::store::postgres::PostgresJobStore;
use pipeline::worker::Capabilities;
use pipeline::{Config, WorkerPool};
use sqlx::postgres::PgPoolOptions;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,pipeline=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing::info!(
        worker_count = config.worker_count,
        "starting resume pipeline worker pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.worker_count as u32 + 2)
        .connect(&config.database_url)
        .await
        .context("failed to connect to postgres")?;

    let store = Arc::new(PostgresJobStore::new(pool));
    let queue = Arc::new(
        RedisQueue::connect(&config.redis_url, "resume-jobs")
            .await
            .context("failed to connect to redis")?,
    );

    let openai = openai_client::OpenAIClient::new(config.openai_api_key.clone());
    let caps = Arc::new(Capabilities {
        file_reader: Arc::new(LocalFileReader),
        pdf_renderer: Arc::new(UnconfiguredPdfRenderer),
        vision_parser: Arc::new(OpenAiVisionParser::new(openai.clone(), "gpt-4o")),
        image_transcoder: Arc::new(MagicByteTranscoder),
        embedder: Arc::new(OpenAiEmbedder::new(
            openai,
            "text-embedding-3-small",
            config.embedding_dim,
        )),
        resume_store: Arc::new(UnconfiguredResumeStore),
    });

    let worker_pool = Arc::new(WorkerPool::new(store, queue, caps, &config));

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
        shutdown_signal.cancel();
    });

    worker_pool.run(shutdown).await;

    tracing::info!("resume pipeline worker pool stopped");
    Ok(())
}
