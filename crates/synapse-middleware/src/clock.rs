//! Monotonic time since boot, used for the bridge heartbeat.

use std::time::Instant;

use synapse_types::{Time, Uptime};

/// Clock anchored at process start (or whenever it was created).
#[derive(Debug, Clone, Copy)]
pub struct UptimeClock {
    boot: Instant,
}

impl UptimeClock {
    pub fn new() -> Self {
        Self { boot: Instant::now() }
    }

    /// Seconds and nanoseconds elapsed since boot. Never decreases.
    pub fn now(&self) -> Uptime {
        Uptime(Time::from_duration(self.boot.elapsed()))
    }
}

impl Default for UptimeClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn uptime_is_monotonic() {
        let clock = UptimeClock::new();
        let a = clock.now();
        std::thread::sleep(Duration::from_millis(2));
        let b = clock.now();
        assert!(b > a);
        assert!(b.0.as_duration() >= Duration::from_millis(2));
    }

    #[test]
    fn nanosec_stays_below_one_second() {
        let clock = UptimeClock::new();
        assert!((0..1_000_000_000).contains(&clock.now().0.nanosec));
    }
}
