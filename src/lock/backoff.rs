use tokio::time::Duration;

/// Backoff walks a fixed schedule of delays, then stays on the last one.
pub struct Backoff<'a> {
    schedule: &'a [Duration],
    attempt: usize,
}

impl<'a> Backoff<'a> {
    pub fn new(schedule: &'a [Duration]) -> Self {
        Backoff { schedule, attempt: 0 }
    }

    pub fn next_delay(&mut self) -> Duration {
        let index = self.attempt.min(self.schedule.len().saturating_sub(1));
        self.attempt += 1;
        self.schedule.get(index).copied().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escalates_then_caps() {
        let schedule = [Duration::from_millis(1), Duration::from_millis(10), Duration::from_millis(100)];
        let mut backoff = Backoff::new(&schedule);

        let delays: Vec<u128> = (0..5).map(|_| backoff.next_delay().as_millis()).collect();
        assert_eq!(delays, vec![1, 10, 100, 100, 100]);
    }

    #[test]
    fn empty_schedule_never_waits() {
        let mut backoff = Backoff::new(&[]);
        assert_eq!(backoff.next_delay(), Duration::ZERO);
    }
}
