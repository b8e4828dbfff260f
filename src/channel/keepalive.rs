//! Periodic liveness probe for an open connection.
//!
//! The ticker only decides *when* to probe. It hands each tick to a callback
//! that forwards it to the connection owner, which sends the `ping` frame if
//! the connection is still open. Missing `pong` replies are not treated as a
//! failure; the transport's own close and error events decide liveness.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Default interval between `ping` frames.
pub const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Running ping ticker. Stops when cancelled or dropped.
#[derive(Debug)]
pub struct KeepAliveTicker {
    interval: Duration,
    task: JoinHandle<()>,
}

impl KeepAliveTicker {
    /// Starts ticking every `interval`, first tick one interval from now.
    ///
    /// The ticker stops on its own once `tick` returns `false`.
    pub fn start<F>(interval: Duration, mut tick: F) -> Self
    where
        F: FnMut() -> bool + Send + 'static,
    {
        let period = interval.max(Duration::from_millis(1));
        let task = tokio::spawn(async move {
            let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
            ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticks.tick().await;
                if !tick() {
                    break;
                }
            }
        });
        Self {
            interval: period,
            task,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }

    pub fn cancel(self) {
        self.task.abort();
    }
}

impl Drop for KeepAliveTicker {
    fn drop(&mut self) {
        self.task.abort();
    }
}
