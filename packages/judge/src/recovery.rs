use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info};

use crate::orchestrator::Orchestrator;

/// Periodically fail submissions that no judge will finish.
pub async fn run_stuck_detector(orchestrator: Arc<Orchestrator>, scan_interval: Duration) {
    info!(
        scan_interval_secs = scan_interval.as_secs(),
        "Starting stuck submission detector"
    );

    let mut interval = tokio::time::interval(scan_interval);
    loop {
        interval.tick().await;

        match orchestrator.recover_stuck().await {
            Ok(0) => {}
            Ok(failed) => info!(failed, "Recovered stuck submissions"),
            Err(e) => error!(error = %e, "Stuck submission detection failed"),
        }
    }
}
