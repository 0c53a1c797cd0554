//! Simulated sensors

use crate::config::SensorConfig;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of readings for one metric
pub trait Sensor: Send + Sync {
    fn metric(&self) -> &str;
    fn unit(&self) -> &str;
    fn sample(&mut self) -> f64;
}

/// Random values in `[base, base + spread)` with 0.1 resolution
#[derive(Debug)]
pub struct SimulatedSensor {
    config: SensorConfig,
    rng: StdRng,
}

impl SimulatedSensor {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            rng: StdRng::from_entropy(),
        }
    }

    /// Reproducible sequence for tests and demos
    pub fn with_seed(config: SensorConfig, seed: u64) -> Self {
        Self {
            config,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn steps(&self) -> u32 {
        (self.config.spread * 10.0).round().max(0.0) as u32
    }
}

impl Sensor for SimulatedSensor {
    fn metric(&self) -> &str {
        &self.config.metric
    }

    fn unit(&self) -> &str {
        &self.config.unit
    }

    fn sample(&mut self) -> f64 {
        let steps = self.steps();
        if steps == 0 {
            return self.config.base;
        }
        self.config.base + f64::from(self.rng.gen_range(0..steps)) / 10.0
    }
}
