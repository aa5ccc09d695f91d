use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

/// Monotonic time source in seconds.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Seconds since construction, backed by `Instant`.
#[derive(Clone, Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> f64 {
        self.origin.elapsed().as_secs_f64()
    }
}

/// Hand-driven clock for tests and offline replay.
#[derive(Debug, Default)]
pub struct ManualClock {
    bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Self {
        Self {
            bits: AtomicU64::new(start.to_bits()),
        }
    }

    pub fn set(&self, t: f64) {
        self.bits.store(t.to_bits(), Ordering::SeqCst);
    }

    pub fn advance(&self, dt: f64) {
        self.set(self.now() + dt);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::SeqCst))
    }
}

/// Periodic waiter that absorbs the work time spent since the previous wake.
///
/// Each call sleeps for whatever is left of the target period, measured from
/// the last wake-up. Overruns are not caught up: a late cycle sleeps zero and
/// reports a period longer than the target.
pub struct FlexibleSleeper {
    target: Duration,
    last_wake: Instant,
    periods: VecDeque<f64>,
    history: usize,
}

impl FlexibleSleeper {
    pub fn new(target_secs: f64, history: usize) -> Self {
        let history = history.max(1);
        Self {
            target: Duration::from_secs_f64(target_secs.max(0.0)),
            last_wake: Instant::now(),
            periods: VecDeque::with_capacity(history),
            history,
        }
    }

    /// Sleep out the rest of the period and return the wake-to-wake interval in seconds.
    pub fn sleep_and_return_period(&mut self) -> f64 {
        let spent = self.last_wake.elapsed();
        if let Some(remaining) = self.target.checked_sub(spent) {
            thread::sleep(remaining);
        }

        let previous = self.last_wake;
        self.last_wake = Instant::now();
        let period = self.last_wake.duration_since(previous).as_secs_f64();

        if self.periods.len() == self.history {
            self.periods.pop_front();
        }
        self.periods.push_back(period);
        period
    }

    /// Mean of the last `history` measured periods.
    pub fn mean_period(&self) -> Option<f64> {
        if self.periods.is_empty() {
            return None;
        }
        Some(self.periods.iter().sum::<f64>() / self.periods.len() as f64)
    }

    pub fn target(&self) -> f64 {
        self.target.as_secs_f64()
    }

    /// Restart period measurement from now.
    pub fn reset(&mut self) {
        self.last_wake = Instant::now();
        self.periods.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock() {
        let clock = ManualClock::new(1.5);
        assert_eq!(clock.now(), 1.5);
        clock.advance(0.25);
        assert_eq!(clock.now(), 1.75);
        clock.set(10.0);
        assert_eq!(clock.now(), 10.0);
    }

    #[test]
    fn test_monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let mut last = clock.now();
        for _ in 0..1000 {
            let t = clock.now();
            assert!(t >= last);
            last = t;
        }
    }

    #[test]
    fn test_sleeper_absorbs_work_time() {
        let mut sleeper = FlexibleSleeper::new(0.010, 100);
        sleeper.reset();
        let mut periods = Vec::with_capacity(100);
        for _ in 0..100 {
            thread::sleep(Duration::from_millis(3));
            periods.push(sleeper.sleep_and_return_period());
        }

        let mean = periods.iter().sum::<f64>() / periods.len() as f64;
        let shortest = periods.iter().cloned().fold(f64::INFINITY, f64::min);
        assert!((mean - 0.010).abs() < 0.0005, "mean period {mean}");
        assert!(shortest >= 0.009, "shortest period {shortest}");
        let estimate = sleeper.mean_period().unwrap();
        assert!((estimate - mean).abs() < 1e-12);
    }

    #[test]
    fn test_sleeper_overrun_reports_long_period() {
        let mut sleeper = FlexibleSleeper::new(0.002, 4);
        sleeper.reset();
        thread::sleep(Duration::from_millis(8));
        let period = sleeper.sleep_and_return_period();
        assert!(period >= 0.008);
        assert!(sleeper.mean_period().is_some());
    }

    #[test]
    fn test_sleeper_history_is_bounded() {
        let mut sleeper = FlexibleSleeper::new(0.0, 3);
        for _ in 0..10 {
            sleeper.sleep_and_return_period();
        }
        assert_eq!(sleeper.periods.len(), 3);
        assert_eq!(sleeper.target(), 0.0);
    }
}
