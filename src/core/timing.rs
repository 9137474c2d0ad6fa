//! Pure scheduling math and an interruptible wait.
//!
//! Offsets are measured as [`Duration`]s from the scheduler's start instant so
//! the grid arithmetic is exact integer nanoseconds.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Cooperative stop request shared between the scheduler and its signal sources.
#[derive(Debug, Clone, Default)]
pub struct StopSignal {
    stopped: Arc<AtomicBool>,
}

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask the schedule to stop after the in-flight pulse is finalised.
    pub fn request_stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

/// Next start on the grid `anchor + k·gap` at least `min_lead` after `now`.
///
/// Before the anchor the anchor itself is used; afterwards the first grid
/// point strictly after `now`. Either way, a start closer than `min_lead`
/// is pushed one more `gap` out.
pub fn next_start_after(
    anchor: Duration,
    gap: Duration,
    now: Duration,
    min_lead: Duration,
) -> Duration {
    let mut start = if now < anchor {
        anchor
    } else {
        let gap_ns = gap.as_nanos().max(1);
        let k = (now - anchor).as_nanos() / gap_ns + 1;
        anchor + duration_from_nanos(k * gap_ns)
    };

    if start < now + min_lead {
        start += gap;
    }
    start
}

fn duration_from_nanos(nanos: u128) -> Duration {
    const NANOS_PER_SEC: u128 = 1_000_000_000;
    Duration::new(
        (nanos / NANOS_PER_SEC) as u64,
        (nanos % NANOS_PER_SEC) as u32,
    )
}

/// How a wait ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    Stopped,
}

/// Sleep until `deadline` in steps of at most `poll`, checking `stop` each step.
///
/// `on_tick` receives the remaining time before each sleep; it is where a
/// caller hangs a countdown display.
pub fn wait_until<F>(deadline: Instant, poll: Duration, stop: &StopSignal, mut on_tick: F) -> WaitOutcome
where
    F: FnMut(Duration),
{
    loop {
        if stop.is_stop_requested() {
            return WaitOutcome::Stopped;
        }
        let now = Instant::now();
        if now >= deadline {
            return WaitOutcome::Reached;
        }
        let remaining = deadline - now;
        on_tick(remaining);
        thread::sleep(remaining.min(poll));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    #[test]
    fn test_before_anchor_returns_anchor() {
        let start = next_start_after(secs(102), secs(100), secs(50), Duration::from_millis(200));
        assert_eq!(start, secs(102));
    }

    #[test]
    fn test_after_anchor_snaps_to_grid() {
        // anchor 102, gap 100, now 250 -> 302
        let start = next_start_after(secs(102), secs(100), secs(250), Duration::from_millis(200));
        assert_eq!(start, secs(302));
    }

    #[test]
    fn test_exactly_on_grid_moves_to_next_point() {
        let start = next_start_after(secs(102), secs(100), secs(202), Duration::from_millis(200));
        assert_eq!(start, secs(302));
    }

    #[test]
    fn test_too_close_is_pushed_one_gap() {
        let now = Duration::from_millis(301_900);
        let start = next_start_after(secs(102), secs(100), now, Duration::from_millis(200));
        assert_eq!(start, secs(402));

        let now = Duration::from_millis(101_900);
        let start = next_start_after(secs(102), secs(100), now, Duration::from_millis(200));
        assert_eq!(start, secs(202));
    }

    #[test]
    fn test_wait_until_reaches_deadline() {
        let stop = StopSignal::new();
        let deadline = Instant::now() + Duration::from_millis(30);
        let mut ticks = 0;
        let outcome = wait_until(deadline, Duration::from_millis(5), &stop, |_| ticks += 1);
        assert_eq!(outcome, WaitOutcome::Reached);
        assert!(Instant::now() >= deadline);
        assert!(ticks >= 1);
    }

    #[test]
    fn test_wait_until_honours_stop() {
        let stop = StopSignal::new();
        stop.request_stop();
        let deadline = Instant::now() + Duration::from_secs(60);
        let outcome = wait_until(deadline, Duration::from_millis(5), &stop, |_| {});
        assert_eq!(outcome, WaitOutcome::Stopped);
    }

    #[test]
    fn test_stop_from_another_thread() {
        let stop = StopSignal::new();
        let remote = stop.clone();
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            remote.request_stop();
        });
        let began = Instant::now();
        let outcome = wait_until(
            Instant::now() + Duration::from_secs(30),
            Duration::from_millis(5),
            &stop,
            |_| {},
        );
        handle.join().unwrap();
        assert_eq!(outcome, WaitOutcome::Stopped);
        assert!(began.elapsed() < Duration::from_secs(5));
    }

    proptest! {
        #[test]
        fn prop_next_start_is_on_grid_and_leads(
            anchor_ms in 0u64..1_000_000,
            gap_ms in 1u64..500_000,
            now_ms in 0u64..5_000_000,
            lead_frac in 0.0f64..1.0,
        ) {
            let anchor = Duration::from_millis(anchor_ms);
            let gap = Duration::from_millis(gap_ms);
            let now = Duration::from_millis(now_ms);
            let min_lead = gap.mul_f64(lead_frac).min(gap - Duration::from_nanos(1));

            let start = next_start_after(anchor, gap, now, min_lead);

            prop_assert!(start >= now + min_lead);
            prop_assert!(start >= anchor);
            prop_assert_eq!((start - anchor).as_nanos() % gap.as_nanos(), 0);
            // Smallest such grid point.
            prop_assert!(start == anchor || start - gap < now + min_lead);
            if now + min_lead <= anchor {
                prop_assert_eq!(start, anchor);
            }
        }
    }
}
