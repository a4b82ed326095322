//! Scheduler (C7): fires reading cycles at a fixed interval, optionally
//! aligned to wall-clock boundaries, never overlapping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    FreeInterval,
    RoundTime,
}

/// Compute the delay until the next fire, given `now` and `elapsed_in_cycle`
/// (how long the just-finished cycle took) — pure, so the alignment math is
/// unit-testable without a real clock.
pub fn next_delay(mode: Mode, interval: Duration, now: Duration) -> Duration {
    match mode {
        Mode::FreeInterval => interval,
        Mode::RoundTime => {
            let interval_secs = interval.as_secs_f64().max(0.001);
            let now_secs = now.as_secs_f64();
            let next_boundary = (now_secs / interval_secs).ceil() * interval_secs;
            Duration::from_secs_f64((next_boundary - now_secs).max(0.0))
        }
    }
}

fn unix_now() -> Duration {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default()
}

/// Drive `cycle` at the configured interval until `shutdown` is observed.
/// Cycles never overlap: the next sleep is computed only after `cycle`
/// returns control. With no `read_interval` configured, `run` performs
/// exactly one cycle and returns (one-shot mode, §4.7).
pub fn run(mode: Mode, interval: Option<Duration>, shutdown: Arc<AtomicBool>, mut cycle: impl FnMut()) {
    loop {
        cycle();
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
        let Some(interval) = interval else {
            return;
        };
        let delay = next_delay(mode, interval, unix_now());
        std::thread::sleep(delay);
        if shutdown.load(Ordering::SeqCst) {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_interval_always_waits_the_full_interval() {
        let d = next_delay(Mode::FreeInterval, Duration::from_secs(60), Duration::from_secs(1_700_000_037));
        assert_eq!(d, Duration::from_secs(60));
    }

    #[test]
    fn round_time_aligns_to_the_next_interval_boundary() {
        // now = 1_700_000_030s, interval = 60s -> next boundary at 1_700_000_040+ish bucket
        let now = Duration::from_secs(1_700_000_030);
        let d = next_delay(Mode::RoundTime, Duration::from_secs(60), now);
        let next = now + d;
        assert_eq!(next.as_secs() % 60, 0);
        assert!(d <= Duration::from_secs(60));
    }
}
