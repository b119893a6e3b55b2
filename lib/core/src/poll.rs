//! Fixed-interval polling.
//!
//! The remote service has no push channel, so everything the client shows is
//! discovered by asking again on a timer. A [`Poller`] runs its tick
//! immediately, then once per interval, until it is cancelled or dropped.
//! A tick that fails is the tick's own business: the loop keeps firing.

use crate::task::ScopedTask;
use std::future::Future;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::trace;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// A cancellable repeating timer driving an async tick.
#[derive(Debug)]
pub struct Poller {
    task: ScopedTask,
    interval: Duration,
}

impl Poller {
    /// Starts polling. The first tick runs right away.
    ///
    /// Ticks never overlap: the next one is scheduled only after the current
    /// one completes, and ticks missed while a slow request was in flight are
    /// delayed rather than fired in a burst.
    pub fn spawn<F, Fut>(name: &'static str, interval: Duration, tick: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::spawn_child(name, interval, &CancellationToken::new(), tick)
    }

    /// Like [`spawn`](Self::spawn), but the poller is also cancelled the
    /// moment `parent` is.
    pub fn spawn_child<F, Fut>(
        name: &'static str,
        interval: Duration,
        parent: &CancellationToken,
        mut tick: F,
    ) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let task = ScopedTask::spawn_child(name, parent, move |_| async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut ticks: u64 = 0;
            loop {
                ticker.tick().await;
                ticks = ticks.wrapping_add(1);
                trace!(poller = name, ticks, "poll tick");
                tick().await;
            }
        });

        Self { task, interval }
    }

    /// The configured interval between ticks.
    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stops the timer and aborts any in-flight tick. Idempotent.
    pub fn cancel(&self) {
        self.task.cancel();
    }

    /// Returns true once the poller has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.task.is_cancelled()
    }

    /// Cancels the poller and waits for its task to wind down.
    pub async fn shutdown(self) {
        self.task.cancel();
        self.task.join().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_poller(interval: Duration) -> (Poller, Arc<AtomicUsize>) {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let poller = Poller::spawn("test", interval, move || {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        (poller, count)
    }

    #[tokio::test]
    async fn first_tick_is_immediate() {
        let (poller, count) = counting_poller(Duration::from_secs(60));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
        poller.shutdown().await;
    }

    #[tokio::test]
    async fn keeps_ticking_on_interval() {
        let (poller, count) = counting_poller(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(110)).await;
        assert!(count.load(Ordering::SeqCst) >= 3);
        poller.shutdown().await;
    }

    #[tokio::test]
    async fn no_ticks_after_cancel() {
        let (poller, count) = counting_poller(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(35)).await;
        poller.cancel();
        poller.cancel();
        let seen = count.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(count.load(Ordering::SeqCst), seen);
        assert!(poller.is_cancelled());
    }

    #[tokio::test]
    async fn zero_interval_is_clamped() {
        let (poller, _count) = counting_poller(Duration::ZERO);
        assert_eq!(poller.interval(), MIN_INTERVAL);
        poller.shutdown().await;
    }

    #[tokio::test]
    async fn cancelling_the_parent_stops_the_poller() {
        let parent = CancellationToken::new();
        let poller = Poller::spawn_child("child", Duration::from_millis(10), &parent, || async {});
        assert!(!poller.is_cancelled());
        parent.cancel();
        assert!(poller.is_cancelled());
        poller.shutdown().await;
    }
}
