//! Simple Bank - HTTP server
//!
//! Serves the account, transfer and user API. Verify-email tasks are
//! enqueued in Redis; when SMTP credentials are configured the server also
//! runs a task processor, otherwise tasks wait for the `worker` binary.

use std::net::SocketAddr;
use std::sync::Arc;

use simple_bank::api::{self, AppState};
use simple_bank::mail::SmtpSender;
use simple_bank::runtime::{init_tracing, shutdown_signal};
use simple_bank::store::PgStore;
use simple_bank::worker::{
    ProcessorConfig, RedisBroker, SendVerifyEmailHandler, TaskDistributor, TaskProcessor,
    TASK_SEND_VERIFY_EMAIL,
};
use simple_bank::{db, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.is_production());
    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;

    tracing::info!("Starting Simple Bank server");
    tracing::info!("Connecting to database...");

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;

    if !db::check_schema(&pool).await? {
        tracing::error!("Database schema is not complete. Please run migrations.");
        return Err(anyhow::anyhow!("Database schema incomplete"));
    }
    tracing::info!("Database connected successfully");

    let store = Arc::new(PgStore::new(pool.clone()));
    let broker = Arc::new(RedisBroker::from_url(&config.redis_url)?);
    if let Err(e) = broker.ping().await {
        // Users can still be created; their verification emails are lost.
        tracing::warn!(error = %e, redis_url = %config.redis_url, "Task broker unreachable");
    }

    let processor = match &config.email {
        Some(email) => {
            let mailer = Arc::new(SmtpSender::new(email)?);
            let handler = SendVerifyEmailHandler::new(
                store.clone(),
                mailer,
                config.verify_email_base_url.clone(),
            );
            let processor_config = ProcessorConfig {
                concurrency: config.worker_concurrency,
                ..ProcessorConfig::default()
            };
            Some(
                TaskProcessor::with_config(broker.clone(), processor_config)
                    .handle(TASK_SEND_VERIFY_EMAIL, Arc::new(handler))
                    .start(),
            )
        }
        None => {
            tracing::warn!("Email sender not configured, task processing left to the worker");
            None
        }
    };

    let state = AppState::new(store.clone(), store)
        .with_distributor(TaskDistributor::new(broker))
        .with_transfer_timeout(config.transfer_timeout);
    let app = api::build_router(state);

    tracing::info!("Listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Cleanup
    tracing::info!("Server shutting down...");
    if let Some(processor) = processor {
        processor.shutdown().await;
    }
    pool.close().await;
    tracing::info!("Database connections closed. Goodbye!");

    Ok(())
}
