use std::time::{Duration, Instant};

pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    Idle,
    Armed { due: Instant },
}

/// Single process-wide flush timer.
///
/// `arm` schedules a zero-delay tick so every patch queued in the same host turn lands in one
/// flush. Arming while armed is a no-op. There is no cancel: a flush over an empty queue does nothing.
#[derive(Debug)]
pub struct DebounceScheduler {
    state: TimerState,
    retry_delay: Duration,
    retries: u32,
}

impl Default for DebounceScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_RETRY_DELAY)
    }
}

impl DebounceScheduler {
    pub fn new(retry_delay: Duration) -> Self {
        Self { state: TimerState::Idle, retry_delay, retries: 0 }
    }

    pub fn state(&self) -> TimerState {
        self.state
    }

    pub fn is_armed(&self) -> bool {
        matches!(self.state, TimerState::Armed { .. })
    }

    pub fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    pub fn set_retry_delay(&mut self, delay: Duration) {
        self.retry_delay = delay;
    }

    /// Consecutive not-ready retries since the last successful fire.
    pub fn retries(&self) -> u32 {
        self.retries
    }

    /// Arms a zero-delay tick. Returns `true` if the timer was idle.
    pub fn arm(&mut self, now: Instant) -> bool {
        self.arm_after(now, Duration::ZERO)
    }

    /// Re-arms with the retry delay because the scene surface was not ready.
    pub fn arm_retry(&mut self, now: Instant) -> bool {
        let armed = self.arm_after(now, self.retry_delay);
        if armed {
            self.retries = self.retries.saturating_add(1);
        }
        armed
    }

    /// Fires the timer if it is due, returning it to idle.
    pub fn poll(&mut self, now: Instant) -> bool {
        match self.state {
            TimerState::Armed { due } if now >= due => {
                self.state = TimerState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Called after a flush actually ran against a ready surface.
    pub fn mark_flushed(&mut self) {
        self.retries = 0;
    }

    fn arm_after(&mut self, now: Instant, delay: Duration) -> bool {
        if self.is_armed() {
            return false;
        }
        self.state = TimerState::Armed { due: now + delay };
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_delay_tick_fires_on_next_poll() {
        let mut scheduler = DebounceScheduler::default();
        let now = Instant::now();
        assert!(scheduler.arm(now));
        assert!(scheduler.poll(now));
        assert!(!scheduler.poll(now));
        assert_eq!(scheduler.state(), TimerState::Idle);
    }

    #[test]
    fn rearming_while_armed_is_noop() {
        let mut scheduler = DebounceScheduler::default();
        let now = Instant::now();
        assert!(scheduler.arm(now));
        assert!(!scheduler.arm(now + Duration::from_millis(5)));
        assert_eq!(scheduler.state(), TimerState::Armed { due: now });
    }

    #[test]
    fn retry_waits_for_delay() {
        let mut scheduler = DebounceScheduler::new(Duration::from_millis(100));
        let now = Instant::now();
        assert!(scheduler.arm_retry(now));
        assert!(!scheduler.poll(now + Duration::from_millis(50)));
        assert!(scheduler.poll(now + Duration::from_millis(100)));
        assert_eq!(scheduler.retries(), 1);
        scheduler.mark_flushed();
        assert_eq!(scheduler.retries(), 0);
    }
}
