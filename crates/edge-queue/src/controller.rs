//! Spill controller: the thread mediating between the volatile queue (C8)
//! and the durable queue (C9) per the depth heuristic in §4.9.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::durable::DurableQueue;
use crate::volatile::{QueueItem, VolatileQueue};

/// Below this combined depth, pull one item back from durable storage.
pub const PULL_THRESHOLD: usize = 5;
/// Above this volatile depth, push the stalest item to durable storage.
pub const DEFAULT_VOLATILE_Q_SIZE: usize = 5;
pub const IDLE_POLL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    PullFromDurable,
    PushToDurable,
    Idle,
}

/// Pure decision function, unit-testable without threads or a real
/// database (§4.9's heuristic, exactly as documented).
pub fn decide(volatile_size: usize, publish_in_progress: bool, durable_size: i64, volatile_q_size: usize) -> Decision {
    let in_progress = if publish_in_progress { 1 } else { 0 };
    if volatile_size + in_progress < PULL_THRESHOLD && durable_size > 0 {
        Decision::PullFromDurable
    } else if volatile_size > volatile_q_size {
        Decision::PushToDurable
    } else {
        Decision::Idle
    }
}

pub struct SpillController {
    volatile: Arc<VolatileQueue>,
    durable: DurableQueue,
    publish_in_progress: Arc<AtomicBool>,
    volatile_q_size: usize,
    shutdown: Arc<AtomicBool>,
}

impl SpillController {
    pub fn new(
        volatile: Arc<VolatileQueue>,
        durable: DurableQueue,
        publish_in_progress: Arc<AtomicBool>,
        volatile_q_size: usize,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        SpillController { volatile, durable, publish_in_progress, volatile_q_size, shutdown }
    }

    /// Run the mediation loop until `shutdown` is observed, then drain the
    /// remainder of C8 into C9 before returning.
    pub fn run(&self) {
        while !self.shutdown.load(Ordering::SeqCst) {
            if matches!(self.step(), Decision::Idle) {
                std::thread::sleep(IDLE_POLL);
            }
        }
        self.drain_on_shutdown();
    }

    /// Apply one decision and report what it did, for tests and for the
    /// `run` loop's idle-sleep gate.
    pub fn step(&self) -> Decision {
        let durable_size = match self.durable.size() {
            Ok(n) => n,
            Err(e) => {
                tracing::error!(error = %e, "failed to read durable queue size");
                return Decision::Idle;
            }
        };
        let decision = decide(
            self.volatile.size(),
            self.publish_in_progress.load(Ordering::SeqCst),
            durable_size,
            self.volatile_q_size,
        );
        match decision {
            Decision::PullFromDurable => match self.durable.get() {
                Ok(Some(readout)) => {
                    self.volatile.try_put(QueueItem::Readout(readout));
                }
                Ok(None) => {}
                Err(e) => tracing::error!(error = %e, "failed to pull from durable queue"),
            },
            Decision::PushToDurable => {
                if let Some(QueueItem::Readout(readout)) = self.volatile.try_pop_tail() {
                    if let Err(e) = self.durable.put(&readout) {
                        tracing::error!(error = %e, "failed to spill readout to durable queue");
                    }
                }
            }
            Decision::Idle => {}
        }
        decision
    }

    fn drain_on_shutdown(&self) {
        for readout in self.volatile.drain_readouts() {
            if let Err(e) = self.durable.put(&readout) {
                tracing::error!(error = %e, "failed to spill readout to durable queue during shutdown");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pulls_when_shallow_and_durable_has_items() {
        assert_eq!(decide(2, false, 3, 5), Decision::PullFromDurable);
    }

    #[test]
    fn pushes_when_volatile_exceeds_target_size() {
        assert_eq!(decide(8, false, 0, 5), Decision::PushToDurable);
    }

    #[test]
    fn idles_when_neither_condition_holds() {
        assert_eq!(decide(5, false, 0, 5), Decision::Idle);
    }

    #[test]
    fn publish_in_progress_counts_toward_pull_threshold() {
        // 4 in queue + 1 in-progress = 5, not < 5, so no pull even though durable has items
        assert_eq!(decide(4, true, 3, 5), Decision::Idle);
    }
}
