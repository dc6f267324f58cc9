use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

use super::{estimator::PresenceEstimator, loop_worker::validation_loop};

/// Owns the periodic validation task. At most one runs at a time.
pub struct ValidationController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl Default for ValidationController {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Returns false when a loop is already running or `period` is zero.
    pub fn start(&mut self, estimator: PresenceEstimator, period: Duration) -> bool {
        if self.handle.is_some() || period.is_zero() {
            return false;
        }

        let cancel_token = CancellationToken::new();
        let handle = tokio::spawn(validation_loop(estimator, period, cancel_token.clone()));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        true
    }

    /// Safe to call when nothing is running.
    pub async fn stop(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("validation loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}
