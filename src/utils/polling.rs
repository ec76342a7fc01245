/// Polling utilities for waiting on conditions with timeout
use anyhow::Result;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::info;

use crate::error::KubeForgeError;

/// State of a poll after one sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Polling,
    Ready,
    TimedOut,
}

impl PollState {
    /// Transition taken after sampling the condition at `elapsed`.
    ///
    /// A satisfied sample always wins, so the last sample before the
    /// deadline can still report Ready.
    pub fn next(ready: bool, elapsed: Duration, timeout: Duration) -> Self {
        if ready {
            PollState::Ready
        } else if elapsed > timeout {
            PollState::TimedOut
        } else {
            PollState::Polling
        }
    }
}

/// Configuration for polling operations
#[derive(Debug, Clone)]
pub struct PollingConfig {
    pub timeout: Duration,
    pub interval: Duration,
    pub description: String,
}

impl PollingConfig {
    /// Create a new polling configuration
    pub fn new(timeout_secs: u64, interval_secs: u64, description: impl Into<String>) -> Self {
        Self {
            timeout: Duration::from_secs(timeout_secs),
            interval: Duration::from_secs(interval_secs),
            description: description.into(),
        }
    }

    /// Poll until condition is met or timeout
    ///
    /// The condition function should return:
    /// - Ok(Some(T)) when condition is met (returns T)
    /// - Ok(None) when condition is not yet met (continues polling)
    /// - Err(e) when an error occurs (stops polling and returns error)
    ///
    /// Time is read from the tokio clock, so paused-time tests drive the
    /// deadline without sleeping for real.
    pub async fn poll<F, Fut, T>(&self, condition: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Option<T>>>,
    {
        info!("{}...", self.description);

        let start = Instant::now();

        loop {
            let sample = condition().await?;
            let state = PollState::next(sample.is_some(), start.elapsed(), self.timeout);

            match (state, sample) {
                (PollState::Ready, Some(value)) => {
                    info!("✓ {}", self.description);
                    return Ok(value);
                }
                (PollState::TimedOut, _) => {
                    return Err(KubeForgeError::Timeout {
                        what: self.description.clone(),
                        secs: self.timeout.as_secs(),
                    }
                    .into());
                }
                _ => {
                    info!(
                        "{}... ({} seconds elapsed)",
                        self.description,
                        start.elapsed().as_secs()
                    );
                }
            }

            tokio::time::sleep(self.interval).await;
        }
    }

    /// Poll until condition returns Ok(true) or timeout
    ///
    /// Simplified version for boolean conditions
    pub async fn poll_until<F, Fut>(&self, condition: F) -> Result<()>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        self.poll(|| {
            let fut = condition();
            async move { Ok(fut.await?.then_some(())) }
        })
        .await
    }
}
