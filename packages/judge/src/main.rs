use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use common::judge_job::JudgeRequest;
use common::retry::{RetryDecision, RetryTracker, spawn_cleanup_task};
use judge::dispatcher::{DispatchSettings, Dispatcher};
use judge::execution::HttpExecutionService;
use judge::notify::MqNotifier;
use judge::pool::WorkerPool;
use judge::recovery::run_stuck_detector;
use judge::store::SeaOrmStore;
use judge::{DispatchLimiter, JudgeAppConfig, Orchestrator, OrchestratorSettings, WorkerError};
use mq::{BroccoliError, BrokerMessage, Mq, MqConfig, init_mq};
use sea_orm::{Database, DatabaseConnection};
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const RETRY_CLEANUP_INTERVAL: Duration = Duration::from_secs(300);
const RETRY_MAX_AGE: Duration = Duration::from_secs(3600);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let config = JudgeAppConfig::load().context("Failed to load config")?;
    info!("Judge starting: {}", config.worker.id);

    let (mq, db, service) = connect(&config)
        .await
        .context("Failed to connect collaborators")?;
    let mq = Arc::new(mq);

    info!(
        request_queue = %config.mq.request_queue,
        notification_queue = %config.mq.notification_queue,
        execution_url = %config.execution.base_url,
        global_limit = config.dispatch.global_limit,
        per_submission_limit = config.dispatch.per_submission_limit,
        "Collaborators connected"
    );

    let dispatcher = Dispatcher::new(
        Arc::new(service),
        DispatchLimiter::new(config.dispatch.global_limit),
        DispatchSettings {
            per_submission_limit: config.dispatch.per_submission_limit,
            retry: config.dispatch.retry_policy(),
            safety_margin: config.execution.safety_margin(),
        },
    );
    let orchestrator = Arc::new(Orchestrator::new(
        Arc::new(SeaOrmStore::new(db)),
        Arc::new(MqNotifier::new(
            Arc::clone(&mq),
            config.mq.notification_queue.clone(),
        )),
        dispatcher,
        OrchestratorSettings::from_config(&config),
    ));
    let pool = Arc::new(WorkerPool::spawn(
        Arc::clone(&orchestrator),
        config.worker.pool_size,
        config.worker.pool_size * 2,
    ));

    let flusher = Arc::clone(&orchestrator);
    let flush_interval = Duration::from_secs(config.persistence.flush_interval_secs);
    let _flush_handle = tokio::spawn(async move {
        let mut interval = tokio::time::interval(flush_interval);
        loop {
            interval.tick().await;
            flusher.flush_pending().await;
        }
    });

    let _stuck_handle = tokio::spawn(run_stuck_detector(
        Arc::clone(&orchestrator),
        Duration::from_secs(config.judging.stuck_scan_interval_secs),
    ));

    let retry_tracker = Arc::new(Mutex::new(RetryTracker::new(
        config.persistence.retry_policy(),
    )));
    let _cleanup_handle = spawn_cleanup_task(
        Arc::clone(&retry_tracker),
        RETRY_CLEANUP_INTERVAL,
        RETRY_MAX_AGE,
    );

    let result = mq
        .process_messages(
            &config.mq.request_queue,
            Some(config.worker.pool_size),
            None,
            move |message: BrokerMessage<JudgeRequest>| {
                let pool = Arc::clone(&pool);
                let retry_tracker = Arc::clone(&retry_tracker);
                async move { process_request(message.payload, &pool, &retry_tracker).await }
            },
        )
        .await;

    if let Err(e) = result {
        error!(error = %e, "Judge stopped unexpectedly");
    }

    Ok(())
}

async fn connect(
    config: &JudgeAppConfig,
) -> Result<(Mq, DatabaseConnection, HttpExecutionService), WorkerError> {
    let mq = init_mq(MqConfig {
        url: config.mq.url.clone(),
        pool_size: config.mq.pool_size,
    })
    .await?;
    let db = Database::connect(&config.database.url).await?;
    let service = HttpExecutionService::new(&config.execution)?;
    Ok((mq, db, service))
}

/// Judge one request, retrying transient store failures. A result that could
/// not be written stays cached in the orchestrator, so a retry only rewrites it.
async fn process_request(
    request: JudgeRequest,
    pool: &WorkerPool,
    retry_tracker: &Mutex<RetryTracker<i32>>,
) -> Result<(), BroccoliError> {
    let submission_id = request.submission_id;
    info!(
        submission_id,
        request_id = %request.request_id,
        "Received judge request"
    );

    loop {
        let ticket = match pool.enqueue(submission_id).await {
            Ok(Some(ticket)) => ticket,
            Ok(None) => return Ok(()),
            Err(e) => return Err(BroccoliError::Job(e.to_string())),
        };

        let error = match ticket.wait().await {
            Some(Ok(_)) => {
                retry_tracker.lock().await.clear(&submission_id);
                return Ok(());
            }
            Some(Err(e)) if !e.is_retryable() => {
                retry_tracker.lock().await.clear(&submission_id);
                return Ok(());
            }
            Some(Err(e)) => e.to_string(),
            None => "worker stopped before finishing".to_string(),
        };

        let decision = retry_tracker
            .lock()
            .await
            .record_failure(&submission_id, &error);
        match decision {
            RetryDecision::Retry { attempt, delay } => {
                warn!(
                    submission_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %error,
                    "Retrying judge request"
                );
                tokio::time::sleep(delay).await;
            }
            RetryDecision::Exhausted { history } => {
                error!(
                    submission_id,
                    retry_count = history.len(),
                    error = %error,
                    "Max retries exhausted, dropping judge request"
                );
                return Ok(());
            }
        }
    }
}
