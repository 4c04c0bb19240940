//! Bounded polling for asynchronous cloud operations.
//!
//! A check is evaluated on every tick boundary until it reports completion,
//! fails, or the deadline passes. The first check runs one interval after
//! the start of the call, not immediately.

use std::time::{Duration, Instant};

use color_eyre::Result;

use crate::utils::format_duration;

/// Source of time for the poller.
pub(crate) trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// The real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration)
    }
}

/// Failures originating in the poller itself, as opposed to the check.
///
/// These travel inside an [`color_eyre::Report`]; use `downcast_ref` to
/// tell a timeout apart from a check failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub(crate) enum PollError {
    /// The deadline passed without the check reporting a terminal state.
    #[error("timed out after {} waiting for the operation to complete", format_duration(.0))]
    Timeout(Duration),
    /// A zero tick interval was supplied.
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
}

/// Poll `check` every `interval` until it returns `Ok(true)`, returns an
/// error, or `timeout` elapses.
///
/// Errors returned by `check` are passed through unchanged and are never
/// retried. Running out of time yields [`PollError::Timeout`].
pub(crate) fn poll_until<F>(interval: Duration, timeout: Duration, check: F) -> Result<()>
where
    F: FnMut() -> Result<bool>,
{
    poll_until_with_clock(&SystemClock, interval, timeout, check)
}

/// Like [`poll_until`], reading time from `clock`.
pub(crate) fn poll_until_with_clock<C, F>(
    clock: &C,
    interval: Duration,
    timeout: Duration,
    mut check: F,
) -> Result<()>
where
    C: Clock + ?Sized,
    F: FnMut() -> Result<bool>,
{
    if interval.is_zero() {
        return Err(PollError::InvalidInterval.into());
    }

    let start = clock.now();
    // An unrepresentable deadline is as good as no deadline at all.
    let deadline = start.checked_add(timeout);
    let mut next_tick = start.checked_add(interval);

    loop {
        // Race the next tick against the deadline. A tick landing exactly on
        // the deadline still fires.
        let tick = match (next_tick, deadline) {
            (Some(tick), Some(deadline)) if tick <= deadline => tick,
            (Some(tick), None) => tick,
            _ => {
                if let Some(deadline) = deadline {
                    sleep_until(clock, deadline);
                }
                return Err(PollError::Timeout(timeout).into());
            }
        };
        sleep_until(clock, tick);

        if check()? {
            return Ok(());
        }

        // Ticks missed while the check was running are dropped.
        next_tick = next_tick_after(tick, interval, clock.now());
    }
}

/// The first tick boundary after `tick` that is not before `now`, or `None`
/// if it cannot be represented.
fn next_tick_after(tick: Instant, interval: Duration, now: Instant) -> Option<Instant> {
    let behind = now.saturating_duration_since(tick).as_nanos();
    let ticks = behind.div_ceil(interval.as_nanos()).max(1);
    let offset = ticks.checked_mul(interval.as_nanos())?;
    tick.checked_add(Duration::from_nanos(u64::try_from(offset).ok()?))
}

fn sleep_until<C: Clock + ?Sized>(clock: &C, when: Instant) {
    let now = clock.now();
    if when > now {
        clock.sleep(when - now);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::cell::{Cell, RefCell};

    use color_eyre::eyre::eyre;

    use super::*;

    /// A virtual clock; sleeping advances time instantly.
    #[derive(Debug)]
    pub(crate) struct FakeClock {
        start: Instant,
        now: Cell<Instant>,
    }

    impl FakeClock {
        pub(crate) fn new() -> Self {
            let start = Instant::now();
            Self {
                start,
                now: Cell::new(start),
            }
        }

        pub(crate) fn advance(&self, d: Duration) {
            self.now.set(self.now.get() + d);
        }

        pub(crate) fn elapsed(&self) -> Duration {
            self.now.get() - self.start
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now.get()
        }

        fn sleep(&self, duration: Duration) {
            self.advance(duration)
        }
    }

    const TICK: Duration = Duration::from_secs(1);

    /// Replays `results` in order, recording the virtual time of each call.
    fn scripted<'a>(
        clock: &'a FakeClock,
        results: Vec<Result<bool>>,
        calls: &'a RefCell<Vec<Duration>>,
    ) -> impl FnMut() -> Result<bool> + 'a {
        let mut results = results.into_iter();
        move || {
            calls.borrow_mut().push(clock.elapsed());
            results.next().unwrap_or(Ok(false))
        }
    }

    fn is_timeout(err: &color_eyre::Report) -> bool {
        matches!(err.downcast_ref::<PollError>(), Some(PollError::Timeout(_)))
    }

    #[test]
    fn test_done_on_fourth_tick() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let results = vec![Ok(false), Ok(false), Ok(false), Ok(true)];
        poll_until_with_clock(
            &clock,
            TICK,
            Duration::from_secs(5),
            scripted(&clock, results, &calls),
        )
        .unwrap();

        let expected: Vec<Duration> = (1..=4).map(Duration::from_secs).collect();
        similar_asserts::assert_eq!(*calls.borrow(), expected);
        assert_eq!(clock.elapsed(), Duration::from_secs(4));
    }

    #[test]
    fn test_timeout_after_three_ticks() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let err = poll_until_with_clock(
            &clock,
            TICK,
            Duration::from_secs(3),
            scripted(&clock, vec![], &calls),
        )
        .unwrap_err();

        assert!(is_timeout(&err), "unexpected error: {err:?}");
        assert_eq!(calls.borrow().len(), 3);
        assert_eq!(clock.elapsed(), Duration::from_secs(3));
    }

    #[test]
    fn test_error_on_first_tick() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let results = vec![Err(eyre!("image import job failed to complete"))];
        let err = poll_until_with_clock(
            &clock,
            TICK,
            Duration::from_secs(3600),
            scripted(&clock, results, &calls),
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "image import job failed to complete");
        assert!(!is_timeout(&err));
        assert_eq!(calls.borrow().len(), 1);
        assert_eq!(clock.elapsed(), TICK);
    }

    #[test]
    fn test_error_stops_polling_with_budget_left() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let results = vec![Ok(false), Ok(false), Err(eyre!("job status unavailable"))];
        let err = poll_until_with_clock(
            &clock,
            TICK,
            Duration::from_secs(100),
            scripted(&clock, results, &calls),
        )
        .unwrap_err();

        assert_eq!(err.to_string(), "job status unavailable");
        assert_eq!(calls.borrow().len(), 3);
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let err = poll_until_with_clock(
            &clock,
            Duration::ZERO,
            Duration::from_secs(10),
            scripted(&clock, vec![Ok(true)], &calls),
        )
        .unwrap_err();

        assert_eq!(
            err.downcast_ref::<PollError>(),
            Some(&PollError::InvalidInterval)
        );
        assert!(calls.borrow().is_empty());
        assert_eq!(clock.elapsed(), Duration::ZERO);
    }

    #[test]
    fn test_deadline_between_ticks() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let err = poll_until_with_clock(
            &clock,
            Duration::from_secs(2),
            Duration::from_secs(5),
            scripted(&clock, vec![], &calls),
        )
        .unwrap_err();

        assert!(is_timeout(&err));
        let expected = vec![Duration::from_secs(2), Duration::from_secs(4)];
        similar_asserts::assert_eq!(*calls.borrow(), expected);
        // The deadline itself, not the next tick, ends the wait.
        assert_eq!(clock.elapsed(), Duration::from_secs(5));
    }

    #[test]
    fn test_interval_longer_than_deadline() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let err = poll_until_with_clock(
            &clock,
            Duration::from_secs(120),
            Duration::from_secs(30),
            scripted(&clock, vec![Ok(true)], &calls),
        )
        .unwrap_err();

        assert!(is_timeout(&err));
        assert!(calls.borrow().is_empty());
        assert_eq!(clock.elapsed(), Duration::from_secs(30));
    }

    #[test]
    fn test_slow_check_is_not_called_after_deadline() {
        let clock = FakeClock::new();
        let mut calls = 0;
        let err = poll_until_with_clock(&clock, TICK, Duration::from_secs(3), || {
            calls += 1;
            clock.advance(Duration::from_millis(2500));
            Ok(false)
        })
        .unwrap_err();

        assert!(is_timeout(&err));
        assert_eq!(calls, 1);
        assert_eq!(clock.elapsed(), Duration::from_millis(3500));
    }

    #[test]
    fn test_missed_ticks_are_dropped() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let mut n = 0;
        poll_until_with_clock(&clock, TICK, Duration::from_secs(10), || {
            calls.borrow_mut().push(clock.elapsed());
            n += 1;
            if n == 1 {
                clock.advance(Duration::from_millis(2500));
            }
            Ok(n == 3)
        })
        .unwrap();

        // The check overran ticks 2 and 3, so the next one is at 4s.
        let expected = vec![
            Duration::from_secs(1),
            Duration::from_secs(4),
            Duration::from_secs(5),
        ];
        similar_asserts::assert_eq!(*calls.borrow(), expected);
    }

    #[test]
    fn test_next_tick_after() {
        let t0 = Instant::now();
        let s = Duration::from_secs;
        assert_eq!(next_tick_after(t0, s(1), t0), Some(t0 + s(1)));
        assert_eq!(next_tick_after(t0, s(1), t0 + s(1)), Some(t0 + s(1)));
        assert_eq!(
            next_tick_after(t0, s(1), t0 + Duration::from_millis(2500)),
            Some(t0 + s(3))
        );
        assert_eq!(next_tick_after(t0, s(2), t0 + s(4)), Some(t0 + s(4)));
    }

    #[test]
    fn test_overrun_with_tiny_interval_returns_promptly() {
        let clock = FakeClock::new();
        let calls = RefCell::new(Vec::new());
        let started = Instant::now();
        let mut n = 0;
        poll_until_with_clock(
            &clock,
            Duration::from_nanos(1),
            Duration::from_secs(10),
            || {
                calls.borrow_mut().push(clock.elapsed());
                n += 1;
                clock.advance(Duration::from_millis(500));
                Ok(n == 3)
            },
        )
        .unwrap();

        let expected = vec![
            Duration::from_nanos(1),
            Duration::from_nanos(500_000_001),
            Duration::from_nanos(1_000_000_001),
        ];
        similar_asserts::assert_eq!(*calls.borrow(), expected);
        // Skipping ~1e9 missed ticks must not cost time proportional to them.
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_repeated_runs_agree() {
        let run = || {
            let clock = FakeClock::new();
            let calls = RefCell::new(Vec::new());
            let results = vec![Ok(false), Ok(false), Ok(true)];
            let r = poll_until_with_clock(
                &clock,
                TICK,
                Duration::from_secs(5),
                scripted(&clock, results, &calls),
            );
            (r.is_ok(), calls.into_inner(), clock.elapsed())
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_timeout_message() {
        let err: color_eyre::Report = PollError::Timeout(Duration::from_secs(5400)).into();
        assert_eq!(
            err.to_string(),
            "timed out after 1h30m0s waiting for the operation to complete"
        );
    }

    #[test]
    fn test_system_clock() {
        let mut n = 0;
        poll_until(Duration::from_millis(5), Duration::from_secs(5), || {
            n += 1;
            Ok(n == 2)
        })
        .unwrap();
        assert_eq!(n, 2);
    }
}
