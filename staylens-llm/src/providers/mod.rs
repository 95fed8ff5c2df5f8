//! Analysis provider implementations
//!
//! HTTP clients for hosted language models, each implementing
//! [`crate::AnalysisProvider`]. Shared here: request pacing and the
//! mapping of transport failures onto [`AnalysisError`].

pub mod anthropic;
pub mod openai;

pub use anthropic::{AnthropicAnalysisProvider, AnthropicClient};
pub use openai::{OpenAIAnalysisProvider, OpenAIClient};

use staylens_core::{AnalysisError, StaylensError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, SemaphorePermit};
use tokio::time::Instant;

// ============================================================================
// RATE LIMITING
// ============================================================================

/// Caps concurrent requests and spaces them at least `60s / rpm` apart.
#[derive(Debug)]
pub struct RateLimiter {
    permits: Arc<Semaphore>,
    last_request: AtomicU64,
    min_interval_ms: u64,
    start_time: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_minute: u32) -> Self {
        let rpm = requests_per_minute.max(1);
        Self {
            permits: Arc::new(Semaphore::new(rpm as usize)),
            last_request: AtomicU64::new(0),
            min_interval_ms: (60_000 / rpm as u64).max(10),
            start_time: Instant::now(),
        }
    }

    /// Minimum spacing between two requests.
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    /// Wait for a permit and for the minimum interval to pass. The permit
    /// must be held for the duration of the request.
    pub async fn acquire(&self, provider: &str) -> Result<SemaphorePermit<'_>, StaylensError> {
        let permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| request_failed(provider, 0, format!("Rate limiter error: {}", e)))?;

        let now_ms = self.start_time.elapsed().as_millis() as u64;
        let last_ms = self.last_request.load(Ordering::Relaxed);
        let elapsed = now_ms.saturating_sub(last_ms);

        if last_ms > 0 && elapsed < self.min_interval_ms {
            tokio::time::sleep(Duration::from_millis(self.min_interval_ms - elapsed)).await;
        }

        self.last_request
            .store(self.start_time.elapsed().as_millis().max(1) as u64, Ordering::Relaxed);
        Ok(permit)
    }
}

// ============================================================================
// ERROR HELPERS
// ============================================================================

pub(crate) fn request_failed(provider: &str, status: u16, message: impl Into<String>) -> StaylensError {
    let message = message.into();
    StaylensError::Analysis(if status == 0 {
        AnalysisError::ExternalService {
            provider: provider.to_string(),
            message,
        }
    } else {
        AnalysisError::RequestFailed {
            provider: provider.to_string(),
            status,
            message,
        }
    })
}

pub(crate) fn rate_limited(provider: &str, retry_after_ms: u64) -> StaylensError {
    StaylensError::Analysis(AnalysisError::RateLimited {
        provider: provider.to_string(),
        retry_after_ms,
    })
}

pub(crate) fn invalid_response(provider: &str, reason: impl Into<String>) -> StaylensError {
    StaylensError::Analysis(AnalysisError::MalformedResponse {
        provider: provider.to_string(),
        reason: reason.into(),
    })
}

/// Map a reqwest transport error; timeouts get their own variant.
pub(crate) fn transport_failed(provider: &str, err: reqwest::Error, timeout: Duration) -> StaylensError {
    if err.is_timeout() {
        StaylensError::Analysis(AnalysisError::Timeout {
            provider: provider.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        })
    } else {
        request_failed(provider, 0, format!("HTTP request failed: {}", err))
    }
}

pub(crate) fn parse_retry_after_ms(headers: &reqwest::header::HeaderMap) -> Option<u64> {
    headers
        .get("retry-after")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|seconds| seconds.is_finite() && *seconds >= 0.0)
        .map(|seconds| (seconds * 1000.0) as u64)
}
