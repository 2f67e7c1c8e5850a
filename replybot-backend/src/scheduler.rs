//! Fixed-interval driver for pipeline runs.

use crate::error::RunError;
use crate::models::RunStats;
use std::future::Future;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::{interval, MissedTickBehavior};

/// Call `run` every `every` until `shutdown` fires. The first run starts
/// immediately. Runs never overlap: a run that outlasts the interval is
/// followed straight away by the next one, and the ticks it missed are
/// dropped. Shutdown wins over a pending tick. Returns the number of runs
/// started.
pub async fn run_scheduler<F, Fut>(every: Duration, mut shutdown: oneshot::Receiver<()>, mut run: F) -> u64
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<RunStats, RunError>>,
{
    log::info!("[scheduler] Started, polling every {}s", every.as_secs());

    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut runs = 0;

    loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                log::info!("[scheduler] Received shutdown signal");
                break;
            }
            _ = ticker.tick() => {
                runs += 1;
                match run().await {
                    Ok(stats) => log::debug!("[scheduler] Run {} complete ({})", runs, stats),
                    Err(RunError::AlreadyRunning) => {
                        log::warn!("[scheduler] Run {} skipped: previous run still active", runs)
                    }
                    Err(e) => log::error!("[scheduler] Run {} aborted: {}", runs, e),
                }
            }
        }
    }

    log::info!("[scheduler] Stopped after {} runs", runs);
    runs
}
