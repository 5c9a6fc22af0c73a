//! Retry Backoff Timer
//!
//! A single cancellable one-shot timer. At most one is armed at a time.

use chrono::{DateTime, Utc};
use std::time::Duration;
use tokio::task::JoinHandle;

/// Armed timer bookkeeping
struct ScheduledRetry {
    generation: u64,
    fires_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

/// One-shot retry timer
pub struct RetryTimer {
    delay: Duration,
    scheduled: Option<ScheduledRetry>,
    next_generation: u64,
}

impl RetryTimer {
    /// Create an idle timer with a fixed delay
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            scheduled: None,
            next_generation: 0,
        }
    }

    /// Delay between arming and firing
    pub fn delay(&self) -> Duration {
        self.delay
    }

    /// Whether a timer is armed and has not been acknowledged
    pub fn is_running(&self) -> bool {
        self.scheduled.is_some()
    }

    /// When the armed timer fires
    pub fn fires_at(&self) -> Option<DateTime<Utc>> {
        self.scheduled.as_ref().map(|s| s.fires_at)
    }

    /// Arm the timer; `on_fire` receives the generation to pass to [`fired`]
    ///
    /// Any previously armed timer is stopped first. Must be called from
    /// within a tokio runtime.
    ///
    /// [`fired`]: RetryTimer::fired
    pub fn start<F>(&mut self, on_fire: F) -> DateTime<Utc>
    where
        F: FnOnce(u64) + Send + 'static,
    {
        self.stop();

        self.next_generation += 1;
        let generation = self.next_generation;
        let delay = self.delay;

        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            on_fire(generation);
        });

        let fires_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());

        self.scheduled = Some(ScheduledRetry {
            generation,
            fires_at,
            handle,
        });

        fires_at
    }

    /// Cancel an armed timer
    pub fn stop(&mut self) {
        if let Some(scheduled) = self.scheduled.take() {
            scheduled.handle.abort();
        }
    }

    /// Acknowledge a fire, returning to idle
    ///
    /// Returns false for a stale generation: a timer that fired after it
    /// was stopped or replaced.
    pub fn fired(&mut self, generation: u64) -> bool {
        match &self.scheduled {
            Some(scheduled) if scheduled.generation == generation => {
                self.scheduled = None;
                true
            }
            _ => false,
        }
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_delay() {
        let mut timer = RetryTimer::new(Duration::from_secs(15));
        assert_eq!(timer.delay(), Duration::from_secs(15));
        let (tx, mut rx) = mpsc::unbounded_channel();

        timer.start(move |generation| {
            let _ = tx.send(generation);
        });
        assert!(timer.is_running());

        tokio::time::sleep(Duration::from_secs(14)).await;
        assert!(rx.try_recv().is_err());

        let generation = rx.recv().await.unwrap();
        assert!(timer.fired(generation));
        assert!(!timer.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels() {
        let mut timer = RetryTimer::new(Duration::from_secs(15));
        let (tx, mut rx) = mpsc::unbounded_channel::<u64>();

        timer.start(move |generation| {
            let _ = tx.send(generation);
        });
        timer.stop();
        assert!(!timer.is_running());

        tokio::time::sleep(Duration::from_secs(30)).await;
        // sender dropped with the aborted task
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_generation_ignored() {
        let mut timer = RetryTimer::new(Duration::from_secs(1));
        let (tx, mut rx) = mpsc::unbounded_channel();

        let first_tx = tx.clone();
        timer.start(move |generation| {
            let _ = first_tx.send(generation);
        });
        let stale = rx.recv().await.unwrap();

        // restarted before the first fire was acknowledged
        timer.start(move |generation| {
            let _ = tx.send(generation);
        });

        assert!(!timer.fired(stale));
        assert!(timer.is_running());

        let current = rx.recv().await.unwrap();
        assert!(timer.fired(current));
    }
}
