//! Shared data model for the reading engine.
//!
//! Every other crate in the workspace depends on this one: the value
//! representation produced by the codec, the configuration and driver
//! registry consumed by the planner, and the readout shape handed from the
//! reader pool through the queue to the publisher all live here so that no
//! two crates invent their own copy.

pub mod config;
pub mod driver;
pub mod readout;
pub mod value;

pub use config::{Address, Config, DeviceConfig, OutputSpec, ReadingEntry, ReadingType};
pub use driver::{Driver, DriverRegistry, ReadingSpec};
pub use readout::{DeviceReading, Metadata, Readout};
pub use value::Value;
