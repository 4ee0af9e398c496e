//! Sensor and actuator boundary of a peer device.

/// Temperature/humidity sensor. A failed read returns `f32::NAN`.
pub trait Sensor {
    fn read_temperature(&mut self) -> f32;
    fn read_humidity(&mut self) -> f32;
}

/// Heater output.
pub trait Actuator {
    fn set_heater(&mut self, on: bool);
}
