use tokio::time::{Duration, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::estimator::PresenceEstimator;

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_debug, log_info};

/// Polls the device heartbeat every `period` until cancelled.
///
/// The first tick fires immediately, so starting the loop doubles as an
/// on-demand check.
pub async fn validation_loop(
    estimator: PresenceEstimator,
    period: Duration,
    cancel_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let active = estimator.check_now().await;
                log_debug!("validation tick for {}: active={active}", estimator.device_id());
            }
            _ = cancel_token.cancelled() => {
                log_info!("validation loop for {} shutting down", estimator.device_id());
                break;
            }
        }
    }
}
