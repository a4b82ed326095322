//! Volatile + durable spill queueing (C8/C9) between the reading engine
//! and the publisher.

pub mod controller;
pub mod durable;
pub mod volatile;

pub use controller::{Decision, SpillController};
pub use durable::{DurableQueue, DurableQueueError};
pub use volatile::{QueueItem, VolatileQueue, VOLATILE_QUEUE_MAXSIZE};
