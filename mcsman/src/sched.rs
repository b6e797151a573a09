//! One structured runner for all periodic loops. Each loop is an interval
//! plus a tick function plus a cancellation token; tick errors are logged
//! and never kill the loop, and cancellation is observed every tick.

use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub async fn run_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    token: CancellationToken,
    mut tick: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = anyhow::Result<()>>,
{
    let mut timer = tokio::time::interval(interval);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // First interval tick fires immediately; skip it so the loop waits a
    // full interval before the first pass, like a plain ticker.
    timer.tick().await;
    loop {
        tokio::select! {
            _ = token.cancelled() => return,
            _ = timer.tick() => {
                if let Err(err) = tick().await {
                    warn!(loop_name = name, error = %format!("{err:#}"), "periodic task failed");
                }
            }
        }
    }
}
