//! Waits for uploaded media to finish server-side processing.

use std::time::Duration;

use tokio::time::Instant;

use crate::api::MediaApi;
use crate::config::{DEFAULT_MAX_WAIT, DEFAULT_POLL_INTERVAL};
use crate::error::{MediaSightError, Result};
use crate::media::{MediaHandle, MediaState};

/// Polls a handle's remote state until it is ready, failed, or out of time.
#[derive(Debug, Clone, Copy)]
pub struct JobPoller {
    interval: Duration,
    max_wait: Duration,
}

impl Default for JobPoller {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, DEFAULT_MAX_WAIT)
    }
}

impl JobPoller {
    /// Creates a poller. A zero interval is raised to one millisecond.
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(1)),
            max_wait,
        }
    }

    /// Delay between state queries.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Total time allowed before giving up.
    pub fn max_wait(&self) -> Duration {
        self.max_wait
    }

    /// Queries `handle` until it reaches a terminal state.
    ///
    /// A handle that is already `Ready` is returned without contacting the
    /// API. Transport errors and 429/5xx responses are logged and retried on
    /// the next tick; anything else aborts.
    pub async fn wait_until_ready<A>(&self, api: &A, mut handle: MediaHandle) -> Result<MediaHandle>
    where
        A: MediaApi + ?Sized,
    {
        let start = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            match handle.state {
                MediaState::Ready => {
                    tracing::info!(
                        file = %handle.id(),
                        attempts,
                        elapsed = ?start.elapsed(),
                        "media ready"
                    );
                    return Ok(handle);
                }
                MediaState::Failed => {
                    return Err(MediaSightError::ProcessingFailed {
                        id: handle.id().to_string(),
                        message: "the provider reported state FAILED".to_string(),
                    });
                }
                MediaState::Uploading | MediaState::Processing => {}
            }

            let elapsed = start.elapsed();
            if elapsed >= self.max_wait {
                return Err(MediaSightError::Timeout(self.max_wait));
            }

            attempts += 1;
            match api.fetch_state(&handle).await {
                Ok(state) => {
                    tracing::debug!(
                        file = %handle.id(),
                        %state,
                        attempt = attempts,
                        "polled media state"
                    );
                    handle.state = state;
                    if state.is_terminal() {
                        continue;
                    }
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(
                        file = %handle.id(),
                        attempt = attempts,
                        error = %e,
                        "state query failed, retrying"
                    );
                }
                Err(e) => return Err(e),
            }

            let remaining = self.max_wait.saturating_sub(start.elapsed());
            if remaining.is_zero() {
                continue;
            }
            tokio::time::sleep(self.interval.min(remaining)).await;
        }
    }
}
