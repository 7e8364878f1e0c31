use crate::error::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What a guarded tick did.
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome<T> {
    Ran(T),
    /// A previous tick was still running.
    Skipped,
}

/// Lets at most one tick run at a time; a second caller is turned away, not queued.
#[derive(Debug, Default, Clone)]
pub struct SingleFlight {
    running: Arc<Mutex<()>>,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another holder is still inside.
    pub fn try_enter(&self) -> Option<OwnedMutexGuard<()>> {
        self.running.clone().try_lock_owned().ok()
    }
}

/// Background work driven on a fixed period.
#[async_trait]
pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;
    async fn run_once(&self) -> Result<()>;
}

/// Drives `task` every `period` until `shutdown` fires.
///
/// Ticks that fall behind are skipped rather than bunched up. Errors are logged
/// and the next tick retries. Cancellation is only observed between ticks, so a
/// tick in progress always gets to persist its state.
pub async fn run_periodic(task: Arc<dyn PeriodicTask>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    tracing::info!(task = task.name(), period_secs = period.as_secs(), "Periodic task started");

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => {
                let span = tracing::info_span!("tick", task = task.name());
                if let Err(e) = task.run_once().instrument(span).await {
                    tracing::error!(task = task.name(), error = %e, "Periodic task failed");
                }
            }
        }
    }
    tracing::info!(task = task.name(), "Periodic task stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counter {
        runs: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl PeriodicTask for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn run_once(&self) -> Result<()> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(crate::error::NotifyError::Gateway("boom".to_string()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_single_flight_turns_away_second_caller() {
        let guard = SingleFlight::new();
        let held = guard.try_enter();
        assert!(held.is_some());
        assert!(guard.clone().try_enter().is_none());
        drop(held);
        assert!(guard.try_enter().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_runs_until_cancelled_and_survives_errors() {
        let task = Arc::new(Counter {
            runs: AtomicUsize::new(0),
            fail: true,
        });
        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(run_periodic(
            task.clone(),
            Duration::from_secs(60),
            shutdown.clone(),
        ));

        tokio::time::sleep(Duration::from_secs(150)).await;
        shutdown.cancel();
        handle.await.unwrap();
        assert_eq!(task.runs.load(Ordering::SeqCst), 3);
    }
}
