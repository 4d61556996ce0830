pub mod error;
pub mod models;

pub use error::MqError;
pub use models::{BroccoliError, BrokerMessage, MqConfig, MqQueue, init_mq};

pub type Mq = MqQueue;
