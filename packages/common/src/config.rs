use serde::Deserialize;

/// App-level MQ configuration shared by the API layer and the judge.
#[derive(Debug, Deserialize, Clone)]
pub struct MqAppConfig {
    /// Redis connection URL. Default: "redis://localhost:6379".
    #[serde(default = "default_mq_url")]
    pub url: String,
    /// Connection pool size. Default: 5.
    #[serde(default = "default_mq_pool_size")]
    pub pool_size: u8,
    /// Queue carrying judge requests (API publishes, judge consumes). Default: "judge_requests".
    #[serde(default = "default_request_queue")]
    pub request_queue: String,
    /// Queue carrying finalize notifications (judge publishes, API consumes).
    /// Default: "submission_judged".
    #[serde(default = "default_notification_queue")]
    pub notification_queue: String,
}

fn default_mq_url() -> String {
    "redis://localhost:6379".into()
}
fn default_mq_pool_size() -> u8 {
    5
}
fn default_request_queue() -> String {
    "judge_requests".into()
}
fn default_notification_queue() -> String {
    "submission_judged".into()
}

impl Default for MqAppConfig {
    fn default() -> Self {
        Self {
            url: default_mq_url(),
            pool_size: default_mq_pool_size(),
            request_queue: default_request_queue(),
            notification_queue: default_notification_queue(),
        }
    }
}
