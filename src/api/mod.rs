use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::models::{ApiSettings, DateWindow, TranscriptRef};

pub mod transcript_client;
pub use transcript_client::TranscriptApiClient;

/// Errors surfaced by the transcript source adapter. All of them are treated
/// as transient by the orchestrator's retry loop.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("request failed with status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("transcript for event {event_id} has no download link")]
    MissingDownloadLink { event_id: String },
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Black-box transcript source. Backed by the vendor API in production;
/// tests substitute scripted implementations.
#[async_trait]
pub trait TranscriptSource: Send + Sync {
    /// List transcripts for one company within the date window.
    async fn fetch_transcripts(
        &self,
        ticker: &str,
        window: DateWindow,
    ) -> Result<Vec<TranscriptRef>, ApiError>;

    /// Fetch the raw XML document for one transcript.
    async fn download(&self, transcript: &TranscriptRef) -> Result<Vec<u8>, ApiError>;
}

/// Bounded retry with fixed or exponential backoff, capped.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub use_exponential_backoff: bool,
    pub max_backoff_delay: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &ApiSettings) -> Self {
        Self {
            max_retries: settings.max_retries.max(1),
            retry_delay: Duration::from_secs_f64(settings.retry_delay.max(0.0)),
            use_exponential_backoff: settings.use_exponential_backoff,
            max_backoff_delay: Duration::from_secs_f64(settings.max_backoff_delay.max(0.0)),
        }
    }

    /// Delay before retrying after the given zero-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if self.use_exponential_backoff {
            self.retry_delay
                .saturating_mul(2u32.saturating_pow(attempt))
                .min(self.max_backoff_delay)
        } else {
            self.retry_delay
        }
    }
}

/// Fixed pacing between vendor calls to respect the source's rate limit.
pub struct RateLimiter {
    delay: Duration,
}

impl RateLimiter {
    pub fn new(delay_secs: f64) -> Self {
        Self {
            delay: Duration::from_secs_f64(delay_secs.max(0.0)),
        }
    }

    pub async fn wait(&self) {
        tokio::time::sleep(self.delay).await;
    }
}
