//! Finalize notification hook, called once per judged submission.

use std::sync::Arc;

use async_trait::async_trait;
use common::judge_result::SubmissionJudged;
use mq::Mq;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("Failed to publish notification: {0}")]
    Publish(String),

    #[error("Notification receiver closed")]
    Closed,
}

#[async_trait]
pub trait JudgeNotifier: Send + Sync {
    async fn submission_judged(&self, event: &SubmissionJudged) -> Result<(), NotifyError>;
}

/// Publishes [`SubmissionJudged`] to the notification queue.
pub struct MqNotifier {
    mq: Arc<Mq>,
    queue: String,
}

impl MqNotifier {
    pub fn new(mq: Arc<Mq>, queue: impl Into<String>) -> Self {
        Self {
            mq,
            queue: queue.into(),
        }
    }
}

#[async_trait]
impl JudgeNotifier for MqNotifier {
    async fn submission_judged(&self, event: &SubmissionJudged) -> Result<(), NotifyError> {
        self.mq
            .publish(&self.queue, None, event, None)
            .await
            .map_err(|e| NotifyError::Publish(e.to_string()))?;

        info!(
            submission_id = event.submission_id,
            status = %event.status,
            queue = %self.queue,
            "Published judged notification"
        );
        Ok(())
    }
}

/// Forwards notifications to an in-process receiver.
pub struct ChannelNotifier {
    tx: mpsc::UnboundedSender<SubmissionJudged>,
}

impl ChannelNotifier {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubmissionJudged>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl JudgeNotifier for ChannelNotifier {
    async fn submission_judged(&self, event: &SubmissionJudged) -> Result<(), NotifyError> {
        self.tx.send(event.clone()).map_err(|_| NotifyError::Closed)
    }
}
