use std::time::Duration;

use logdog_types::TickReport;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::manager::LogSetManager;
use crate::unwind;

/// Drives ticks on a fixed interval until cancelled
///
/// Each tick runs to completion on the calling task. Cancellation is only
/// observed while waiting between ticks, so a handler that blocks delays
/// shutdown until the tick it belongs to returns. Handlers that must not
/// stall the loop should be wrapped to run on their own thread.
#[derive(Clone, Debug)]
pub struct Scheduler {
    interval: Duration,
}

impl Scheduler {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Interval in (possibly fractional) seconds
    pub fn from_secs_f64(secs: f64) -> Result<Self> {
        if !secs.is_finite() || secs <= 0.0 {
            return Err(EngineError::InvalidInterval(secs));
        }
        Ok(Self::new(Duration::from_secs_f64(secs)))
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tick `manager` every interval until `cancel` fires
    pub async fn run(&self, manager: &mut LogSetManager, cancel: CancellationToken) -> u64 {
        self.run_with(cancel, || manager.process()).await
    }

    /// Call `on_tick` every interval until `cancel` fires.
    ///
    /// A panicking tick is logged with the backtrace of the panic and the
    /// loop carries on. Returns the number
    /// of ticks run.
    pub async fn run_with<F>(&self, cancel: CancellationToken, mut on_tick: F) -> u64
    where
        F: FnMut() -> TickReport,
    {
        tracing::info!(interval = ?self.interval, "start watch");
        let mut ticks = 0;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = tokio::time::sleep(self.interval) => {}
            }

            ticks += 1;
            match unwind::catch(&mut on_tick) {
                Ok(report) => {
                    tracing::debug!(tick = report.tick, lines = report.lines_read, "tick complete");
                }
                Err(panic) => {
                    tracing::error!(tick = ticks, "tick failed: {}", panic);
                }
            }
        }

        tracing::warn!(ticks, "exit");
        ticks
    }
}
