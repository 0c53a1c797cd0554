//! Telemetry publishing
//!
//! - [`sensor`] - sources of readings
//! - [`publisher`] - the scheduled publishing loop

pub mod publisher;
pub mod sensor;

pub use publisher::{CycleSchedule, PublishRun, PublisherSettings, TelemetryPublisher};
pub use sensor::{Sensor, SimulatedSensor};
