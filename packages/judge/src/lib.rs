pub mod aggregator;
pub mod collector;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod execution;
pub mod limiter;
pub mod notify;
pub mod orchestrator;
pub mod pool;
pub mod recovery;
pub mod state;
pub mod store;

pub use config::JudgeAppConfig;
pub use error::{JudgeError, TransitionError, WorkerError};
pub use execution::{ExecutionError, ExecutionService, RunHandle, RunRequest, RunResult};
pub use limiter::DispatchLimiter;
pub use orchestrator::{Orchestrator, OrchestratorSettings};
pub use pool::{JudgeTicket, WorkerPool};
pub use store::{SubmissionBundle, SubmissionStore};
