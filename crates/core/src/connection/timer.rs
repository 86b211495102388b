//! Cancelable timers that deliver messages instead of blocking.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, sleep, MissedTickBehavior};

/// Handle to a scheduled delivery. Dropping it cancels the timer.
#[derive(Debug)]
pub struct TimerHandle {
    task: Option<JoinHandle<()>>,
}

impl TimerHandle {
    /// Delivers `msg()` immediately and then every `period`.
    pub fn repeating<M, F>(period: Duration, tx: mpsc::UnboundedSender<M>, msg: F) -> Self
    where
        M: Send + 'static,
        F: Fn() -> M + Send + 'static,
    {
        let task = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if tx.send(msg()).is_err() {
                    break;
                }
            }
        });
        Self { task: Some(task) }
    }

    /// Delivers `msg` once after `delay`.
    pub fn once<M>(delay: Duration, tx: mpsc::UnboundedSender<M>, msg: M) -> Self
    where
        M: Send + 'static,
    {
        let task = tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(msg);
        });
        Self { task: Some(task) }
    }

    /// Stops future deliveries. Safe to call more than once.
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.is_finished())
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeating_fires_immediately_then_periodically() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = TimerHandle::repeating(Duration::from_secs(3), tx, || "tick");

        settle().await;
        assert_eq!(rx.try_recv().ok(), Some("tick"));
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(3)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some("tick"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_once_fires_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _timer = TimerHandle::once(Duration::from_secs(5), tx, 7u32);
        settle().await;

        tokio::time::advance(Duration::from_millis(4999)).await;
        settle().await;
        assert!(rx.try_recv().is_err());

        tokio::time::advance(Duration::from_millis(1)).await;
        settle().await;
        assert_eq!(rx.try_recv().ok(), Some(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_idempotent_and_stops_delivery() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut timer = TimerHandle::once(Duration::from_secs(1), tx, ());

        timer.cancel();
        timer.cancel();
        assert!(!timer.is_active());

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let timer = TimerHandle::once(Duration::from_secs(1), tx, ());
        drop(timer);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(rx.try_recv().is_err());
    }
}
