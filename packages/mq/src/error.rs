use thiserror::Error;

#[derive(Debug, Error)]
pub enum MqError {
    #[error("Broker connection failed: {0}")]
    Connection(String),
}

impl From<broccoli_queue::error::BroccoliError> for MqError {
    fn from(e: broccoli_queue::error::BroccoliError) -> Self {
        MqError::Connection(e.to_string())
    }
}
