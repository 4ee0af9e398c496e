//! Simulated sensor board: a room that cools toward ambient and a heater that warms it.
//!
//! The thermal model advances one step each time the heater output is set, which the
//! peer does once per sample. Readings carry Gaussian noise and occasionally fail
//! with NaN, like a real DHT-class sensor.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};

use crate::config::SimulatedPeerConfig;
use crate::peer::{Actuator, Sensor};

/// Fraction of the gap to ambient closed per step.
const COOLING_RATE: f32 = 0.05;

pub struct SimulatedBoard {
    rng: StdRng,
    noise: Option<Normal<f32>>,
    temperature: f32,
    ambient: f32,
    heater_power: f32,
    humidity: f32,
    read_failure_probability: f64,
}

impl SimulatedBoard {
    pub fn new(config: &SimulatedPeerConfig) -> Self {
        Self {
            rng: StdRng::seed_from_u64(config.device_id),
            noise: Normal::new(0.0, config.noise_sigma).ok(),
            temperature: config.ambient,
            ambient: config.ambient,
            heater_power: config.heater_power,
            humidity: config.humidity,
            read_failure_probability: config.read_failure_probability,
        }
    }

    /// True room temperature, without noise.
    pub fn temperature(&self) -> f32 {
        self.temperature
    }

    fn read(&mut self, value: f32) -> f32 {
        if self.rng.gen_bool(self.read_failure_probability) {
            return f32::NAN;
        }
        match &self.noise {
            Some(noise) => value + noise.sample(&mut self.rng),
            None => value,
        }
    }
}

impl Sensor for SimulatedBoard {
    fn read_temperature(&mut self) -> f32 {
        self.read(self.temperature)
    }

    fn read_humidity(&mut self) -> f32 {
        // Warmer air holds more water, so relative humidity falls as the room heats.
        let humidity = (self.humidity - (self.temperature - self.ambient) * 2.0).clamp(0.0, 100.0);
        self.read(humidity)
    }
}

impl Actuator for SimulatedBoard {
    fn set_heater(&mut self, on: bool) {
        self.temperature += (self.ambient - self.temperature) * COOLING_RATE;
        if on {
            self.temperature += self.heater_power;
        }
    }
}
