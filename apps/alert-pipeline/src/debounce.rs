use chrono::{DateTime, Utc};
use std::sync::Mutex;

/// Pure cooldown arithmetic: a dispatch is allowed when nothing was sent yet or
/// at least `interval_minutes` have elapsed since `last`.
pub fn should_dispatch(
    now: DateTime<Utc>,
    last: Option<DateTime<Utc>>,
    interval_minutes: u32,
) -> bool {
    match last {
        None => true,
        Some(last) => {
            let elapsed_ms = (now - last).num_milliseconds();
            elapsed_ms >= i64::from(interval_minutes) * 60_000
        }
    }
}

/// One cooldown shared by every sensor and every channel.
#[derive(Debug, Default)]
pub struct Debouncer {
    last_dispatch_at: Mutex<Option<DateTime<Utc>>>,
}

impl Debouncer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks the gate and, when it passes, records `now` as the last dispatch
    /// under the same lock.
    pub fn should_dispatch(&self, now: DateTime<Utc>, interval_minutes: u32) -> bool {
        let mut last = match self.last_dispatch_at.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if should_dispatch(now, *last, interval_minutes) {
            *last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn last_dispatch_at(&self) -> Option<DateTime<Utc>> {
        match self.last_dispatch_at.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use std::sync::Arc;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap()
    }

    #[test]
    fn first_dispatch_always_passes() {
        assert!(should_dispatch(t0(), None, 10));
        let debouncer = Debouncer::new();
        assert!(debouncer.should_dispatch(t0(), 10));
        assert_eq!(debouncer.last_dispatch_at(), Some(t0()));
    }

    #[test]
    fn interval_boundary_is_inclusive() {
        let last = Some(t0());
        let interval = 10;
        let just_before = t0() + Duration::milliseconds(i64::from(interval) * 60_000 - 1);
        let exactly = t0() + Duration::milliseconds(i64::from(interval) * 60_000);
        assert!(!should_dispatch(just_before, last, interval));
        assert!(should_dispatch(exactly, last, interval));
    }

    #[test]
    fn blocked_attempt_does_not_move_the_window() {
        let debouncer = Debouncer::new();
        assert!(debouncer.should_dispatch(t0(), 5));
        assert!(!debouncer.should_dispatch(t0() + Duration::minutes(3), 5));
        assert_eq!(debouncer.last_dispatch_at(), Some(t0()));
        assert!(debouncer.should_dispatch(t0() + Duration::minutes(5), 5));
        assert_eq!(
            debouncer.last_dispatch_at(),
            Some(t0() + Duration::minutes(5))
        );
    }

    #[test]
    fn clock_going_backwards_stays_blocked() {
        assert!(!should_dispatch(t0() - Duration::minutes(1), Some(t0()), 1));
    }

    #[test]
    fn concurrent_callers_get_a_single_pass() {
        let debouncer = Arc::new(Debouncer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let debouncer = debouncer.clone();
                std::thread::spawn(move || debouncer.should_dispatch(t0(), 10))
            })
            .collect();
        let passed = handles
            .into_iter()
            .map(|handle| handle.join().unwrap())
            .filter(|passed| *passed)
            .count();
        assert_eq!(passed, 1);
    }
}
