use crate::errors::Result;
use crate::metrics::FORWARD_RETRIES_TOTAL;
use std::future::Future;
use std::time::Duration;
use telemetry::TelemetryRecord;
use thiserror::Error;
use tracing::{debug, info, warn};

const SINK_PATH: &str = "/api/data";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ForwardError {
    #[error("sink unreachable: {0}")]
    Unreachable(String),

    #[error("sink rejected record with status {0}")]
    Rejected(u16),
}

impl ForwardError {
    /// Transport failures and server-side errors may succeed on a later
    /// attempt; a client error means the record itself was refused.
    pub fn is_retryable(&self) -> bool {
        match self {
            ForwardError::Unreachable(_) => true,
            ForwardError::Rejected(status) => *status >= 500 || *status == 429,
        }
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// A single attempt, no retry
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2_u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(2000),
        }
    }
}

/// Delivers a decoded record to the sink
pub trait Forward: Send + Sync + 'static {
    fn forward(
        &self,
        record: &TelemetryRecord,
    ) -> impl Future<Output = std::result::Result<(), ForwardError>> + Send;
}

/// Runs `op` until it succeeds, fails with a non-retryable error or the
/// policy's attempts are exhausted.
pub async fn with_retry<F, Fut>(
    policy: &RetryPolicy,
    mut op: F,
) -> std::result::Result<(), ForwardError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = std::result::Result<(), ForwardError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        match op().await {
            Ok(()) => {
                if attempt > 1 {
                    info!("Record forwarded on attempt {}", attempt);
                }
                return Ok(());
            }
            Err(e) => {
                if attempt >= max_attempts || !e.is_retryable() {
                    return Err(e);
                }

                let backoff = policy.backoff(attempt);
                warn!(
                    "Forward failed (attempt {}/{}): {}. Retrying in {:?}...",
                    attempt, max_attempts, e, backoff
                );
                FORWARD_RETRIES_TOTAL.inc();
                tokio::time::sleep(backoff).await;
            }
        }
    }
}

/// Forwards records as JSON to the sink's `POST /api/data`
#[derive(Debug, Clone)]
pub struct HttpForwarder {
    client: reqwest::Client,
    endpoint: String,
    policy: RetryPolicy,
}

impl HttpForwarder {
    pub fn new(sink_url: &str, timeout: Duration, policy: RetryPolicy) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .pool_max_idle_per_host(16)
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}{}", sink_url.trim_end_matches('/'), SINK_PATH),
            policy,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_once(&self, record: &TelemetryRecord) -> std::result::Result<(), ForwardError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(record)
            .send()
            .await
            .map_err(|e| ForwardError::Unreachable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Sink accepted record from {}", record.emitter_id);
            Ok(())
        } else {
            Err(ForwardError::Rejected(status.as_u16()))
        }
    }
}

impl Forward for HttpForwarder {
    fn forward(
        &self,
        record: &TelemetryRecord,
    ) -> impl Future<Output = std::result::Result<(), ForwardError>> + Send {
        with_retry(&self.policy, move || self.send_once(record))
    }
}
