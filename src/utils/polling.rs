/// Polling utilities for waiting on conditions, with or without a timeout
use anyhow::Result;
use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Attempts between "still waiting" progress lines
const PROGRESS_EVERY: u32 = 6;

/// Configuration for polling operations
pub struct PollingConfig {
    /// `None` waits until the condition holds or the operator interrupts
    pub timeout: Option<Duration>,
    pub interval: Duration,
    pub description: String,
}

impl PollingConfig {
    /// Create a new polling configuration
    pub fn new(
        timeout: Option<Duration>,
        interval: Duration,
        description: impl Into<String>,
    ) -> Self {
        Self {
            timeout,
            interval,
            description: description.into(),
        }
    }

    /// Poll until condition is met or timeout
    ///
    /// The condition function should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    pub async fn poll<F, Fut, T>(&self, mut condition: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            if let Some(value) = condition().await? {
                info!("✓ {}", self.description);
                return Ok(value);
            }
            attempts += 1;

            if let Some(timeout) = self.timeout {
                if start.elapsed() > timeout {
                    anyhow::bail!(
                        "Timeout after {} seconds: {}",
                        timeout.as_secs(),
                        self.description
                    );
                }
            }

            if attempts % PROGRESS_EVERY == 0 {
                info!(
                    "Still waiting ({}s): {}",
                    start.elapsed().as_secs(),
                    self.description
                );
            } else {
                debug!("{}: attempt {} not ready", self.description, attempts);
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Poll until condition returns Ok(true) or timeout
    ///
    /// Simplified version for boolean conditions
    pub async fn poll_until<F, Fut>(&self, mut condition: F) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll(|| {
            let fut = condition();
            async move { Ok(if fut.await? { Some(()) } else { None }) }
        })
        .await
    }
}
