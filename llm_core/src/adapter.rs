use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::Result;
use crate::provider::{ChatMessage, DeltaStream, GenerationProvider};

/// Retry policy applied to the whole generation call, never mid-stream.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            base_backoff: Duration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Exponential backoff before the given retry (0-based attempt that failed).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Generation Stream Adapter: a provider plus retry and cancellation.
#[derive(Clone)]
pub struct GenerationAdapter {
    provider: Arc<dyn GenerationProvider>,
    retry: RetryPolicy,
}

impl GenerationAdapter {
    pub fn new(provider: Arc<dyn GenerationProvider>) -> Self {
        Self {
            provider,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Open the delta stream, retrying establishment failures.
    pub async fn open(&self, prompt: &str, history: &[ChatMessage]) -> Result<DeltaStream> {
        self.open_attempt(prompt, history, 0).await
    }

    async fn open_attempt(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        mut attempt: u32,
    ) -> Result<DeltaStream> {
        loop {
            match self.provider.stream_generate(prompt, history).await {
                Ok(stream) => {
                    if attempt > 0 {
                        info!(
                            provider = self.provider.name(),
                            attempt,
                            "generation call established after retry"
                        );
                    }
                    return Ok(stream);
                }
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        error = %e,
                        "generation call failed, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Like [`open`](Self::open), but the returned stream ends as soon as
    /// `cancel` fires. Dropping the stream aborts the upstream request.
    pub async fn open_cancellable(
        &self,
        prompt: &str,
        history: &[ChatMessage],
        cancel: CancellationToken,
    ) -> Result<DeltaStream> {
        let stream = self.open(prompt, history).await?;
        Ok(stream
            .take_until(async move { cancel.cancelled().await })
            .boxed())
    }

    /// Complete, non-streaming generation used by the fallback path.
    pub async fn generate_full(&self, prompt: &str, history: &[ChatMessage]) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.provider.generate(prompt, history).await {
                Ok(reply) => return Ok(reply),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        provider = self.provider.name(),
                        attempt,
                        error = %e,
                        "full generation failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
