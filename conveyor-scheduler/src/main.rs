use anyhow::{Context, Result};
use sqlx::PgPool;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use conveyor_scheduler::config::Config;
use conveyor_scheduler::repository::PgRepository;
use conveyor_scheduler::service::{HttpBuildDispatcher, Repositories, Scheduler};
use conveyor_scheduler::{api, db};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "conveyor_scheduler=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Conveyor Scheduler...");

    let config = Config::from_env()?;
    config.validate()?;
    info!(
        "Loaded configuration: executor_url={}, tick_interval={:?}",
        config.executor_url, config.tick_interval
    );

    info!("Connecting to database...");
    let pool = connect_with_retry(&config.database_url).await?;
    info!("Database connection pool created");

    db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;

    let repository = Arc::new(PgRepository::new(pool.clone()));
    let dispatcher = Arc::new(HttpBuildDispatcher::new(config.executor_url.clone()));
    let scheduler = Scheduler::new(
        config.clone(),
        Repositories::shared(repository),
        dispatcher,
    );

    let scheduler_handle = tokio::spawn(async move { scheduler.run().await });

    // Build router with all API endpoints
    let app = api::create_router(pool);

    info!("Listening on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;

    let served = axum::serve(listener, app).await;

    scheduler_handle.abort();
    if let Err(e) = &served {
        error!("Server error: {}", e);
    }
    served.context("Failed to start server")
}

/// Connect to the database with retry logic and exponential backoff
///
/// The database may not accept connections yet when the scheduler starts
/// (common in container environments).
async fn connect_with_retry(database_url: &str) -> Result<PgPool> {
    const MAX_RETRIES: u32 = 10;
    const INITIAL_DELAY_MS: u64 = 500;
    const MAX_DELAY_MS: u64 = 30_000;

    let mut attempt = 0;
    let mut delay_ms = INITIAL_DELAY_MS;

    loop {
        attempt += 1;

        match db::create_pool(database_url).await {
            Ok(pool) => {
                if attempt > 1 {
                    info!("Connected to database after {} attempt(s)", attempt);
                }
                return Ok(pool);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    error!("Failed to connect to database after {} attempts", MAX_RETRIES);
                    return Err(anyhow::anyhow!("Failed to create database pool: {}", e));
                }

                warn!(
                    "Failed to connect to database (attempt {}/{}): {}",
                    attempt, MAX_RETRIES, e
                );
                warn!("Retrying in {} ms...", delay_ms);

                tokio::time::sleep(Duration::from_millis(delay_ms)).await;

                // Exponential backoff with cap
                delay_ms = (delay_ms * 2).min(MAX_DELAY_MS);
            }
        }
    }
}
