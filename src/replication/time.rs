use tokio::time::Instant;

#[cfg(test)]
use tokio::sync::watch;
#[cfg(test)]
use tokio::time::Duration;

/// Clock is how the leader reads time and waits out error backoff.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;

    /// Returns once `now()` is at or past `deadline`.
    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone, Debug, Default)]
pub struct RealClock;

#[async_trait::async_trait]
impl Clock for RealClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        tokio::time::sleep_until(deadline).await;
    }
}

/// A clock that only moves when the returned controller says so. Every clone observes the same
/// time.
#[cfg(test)]
pub(crate) fn mocked_clock() -> (MockClock, MockClockController) {
    let (tx, rx) = watch::channel(Instant::now());
    (MockClock { now_rx: rx }, MockClockController { now_tx: tx })
}

#[cfg(test)]
#[derive(Clone)]
pub(crate) struct MockClock {
    now_rx: watch::Receiver<Instant>,
}

#[cfg(test)]
#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.now_rx.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.now_rx.borrow() < deadline {
            if self.now_rx.changed().await.is_err() {
                // Controller gone, time is frozen for good.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(test)]
pub(crate) struct MockClockController {
    now_tx: watch::Sender<Instant>,
}

#[cfg(test)]
impl MockClockController {
    /// Moves every `MockClock` forward and wakes sleepers whose deadline has passed. Step in
    /// increments smaller than the backoff being observed.
    pub(crate) fn advance(&mut self, duration: Duration) {
        let now = *self.now_tx.borrow() + duration;
        let _ = self.now_tx.send(now);
    }
}
