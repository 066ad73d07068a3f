use tokio::sync::watch;
use tokio::time::{Duration, Instant};

/// Clock is what scheduled tasks sleep on. Tests swap in `MockClock` to step time by hand.
#[async_trait::async_trait]
pub trait Clock: Clone + Send + Sync + 'static {
    fn now(&self) -> Instant;
    async fn sleep_until(&mut self, deadline: Instant);
}

#[derive(Copy, Clone, Default)]
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

/// A clock for tests, and the controller that moves it.
pub fn mocked_clock() -> (MockClock, MockClockController) {
    let (tx, rx) = watch::channel(Instant::now());
    (MockClock { now: rx }, MockClockController { now: tx })
}

/// A clock that only moves when its controller says so.
#[derive(Clone)]
pub struct MockClock {
    now: watch::Receiver<Instant>,
}

#[async_trait::async_trait]
impl Clock for MockClock {
    fn now(&self) -> Instant {
        *self.now.borrow()
    }

    async fn sleep_until(&mut self, deadline: Instant) {
        while *self.now.borrow() < deadline {
            if self.now.changed().await.is_err() {
                // Controller is gone, time will never reach the deadline.
                std::future::pending::<()>().await;
            }
        }
    }
}

pub struct MockClockController {
    now: watch::Sender<Instant>,
}

impl MockClockController {
    /// Step in increments no larger than the intervals under test: a sleeper only promises to
    /// wake up at or after its deadline, not exactly on it.
    pub fn advance(&mut self, duration: Duration) {
        let next = *self.now.borrow() + duration;
        self.now.send_replace(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sleeper_wakes_once_deadline_passes() {
        // -- setup --
        let (mut clock, mut controller) = mocked_clock();
        let deadline = clock.now() + Duration::from_secs(10);
        let sleeper = tokio::spawn(async move { clock.sleep_until(deadline).await });

        // -- execute & verify --
        controller.advance(Duration::from_secs(9));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!sleeper.is_finished());

        controller.advance(Duration::from_secs(1));
        tokio::time::timeout(Duration::from_secs(1), sleeper)
            .await
            .expect("sleeper should wake")
            .unwrap();
    }
}
