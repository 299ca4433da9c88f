use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Time source for the worker's bounded wait loops.
#[async_trait(?Send)]
pub trait Clock {
    fn now(&self) -> Instant;
    async fn sleep(&self, duration: Duration);
}

pub struct TokioClock;

#[async_trait(?Send)]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Virtual clock: `sleep` returns immediately and advances `now`.
#[cfg(test)]
pub struct FakeClock {
    start: Instant,
    elapsed: std::cell::Cell<Duration>,
    sleeps: std::cell::RefCell<Vec<Duration>>,
}

#[cfg(test)]
impl Default for FakeClock {
    fn default() -> Self {
        Self {
            start: Instant::now(),
            elapsed: std::cell::Cell::new(Duration::ZERO),
            sleeps: std::cell::RefCell::new(Vec::new()),
        }
    }
}

#[cfg(test)]
impl FakeClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed.get()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.borrow().clone()
    }
}

#[cfg(test)]
#[async_trait(?Send)]
impl Clock for FakeClock {
    fn now(&self) -> Instant {
        self.start + self.elapsed.get()
    }

    async fn sleep(&self, duration: Duration) {
        self.elapsed.set(self.elapsed.get() + duration);
        self.sleeps.borrow_mut().push(duration);
    }
}
