//! Simple Bank - task worker
//!
//! Processes verify-email tasks from Redis until Ctrl+C or SIGTERM, then
//! waits for in-flight tasks before exiting.

use std::sync::Arc;

use simple_bank::mail::SmtpSender;
use simple_bank::runtime::{init_tracing, shutdown_signal};
use simple_bank::store::PgStore;
use simple_bank::worker::{
    ProcessorConfig, RedisBroker, SendVerifyEmailHandler, TaskProcessor, TASK_SEND_VERIFY_EMAIL,
};
use simple_bank::{db, Config};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(config.is_production());

    let email = config.require_email()?;
    let mailer = Arc::new(SmtpSender::new(email)?);

    let pool = db::connect(&config.database_url, config.database_max_connections).await?;
    db::verify_connection(&pool).await?;

    let broker = Arc::new(RedisBroker::from_url(&config.redis_url)?);
    broker.ping().await?;

    let handler = SendVerifyEmailHandler::new(
        Arc::new(PgStore::new(pool.clone())),
        mailer,
        config.verify_email_base_url.clone(),
    );
    let processor_config = ProcessorConfig {
        concurrency: config.worker_concurrency,
        ..ProcessorConfig::default()
    };
    let processor = TaskProcessor::with_config(broker, processor_config)
        .handle(TASK_SEND_VERIFY_EMAIL, Arc::new(handler))
        .start();

    tracing::info!(redis_url = %config.redis_url, "Worker started");

    shutdown_signal().await;

    processor.shutdown().await;
    pool.close().await;
    tracing::info!("Worker stopped");

    Ok(())
}
