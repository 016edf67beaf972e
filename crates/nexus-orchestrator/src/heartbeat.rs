use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TickOutcome {
    Continue,
    Stop,
}

/// Periodic watchdog task. Stopping is synchronous and idempotent; dropping
/// the handle stops the task.
#[derive(Debug)]
pub(crate) struct HeartbeatHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl HeartbeatHandle {
    /// Runs `on_tick` every `period`, starting one period from now.
    pub(crate) fn spawn<F>(period: Duration, mut on_tick: F) -> Self
    where
        F: FnMut() -> TickOutcome + Send + 'static,
    {
        let period = period.max(Duration::from_millis(1));
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if on_tick() == TickOutcome::Stop {
                            break;
                        }
                    }
                    _ = &mut shutdown_rx => break,
                }
            }
        });
        Self {
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        }
    }

    pub(crate) fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use super::{HeartbeatHandle, TickOutcome};

    #[tokio::test(start_paused = true)]
    async fn functional_ticks_until_stopped() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let mut handle = HeartbeatHandle::spawn(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickOutcome::Continue
        });

        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);

        handle.stop();
        handle.stop();
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn unit_stop_outcome_ends_the_loop() {
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        let _handle = HeartbeatHandle::spawn(Duration::from_secs(1), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickOutcome::Stop
        });

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(ticks.load(Ordering::SeqCst), 1);
    }
}
