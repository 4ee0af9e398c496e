//! Heater control decision.

/// Reading substituted for a failed (NaN) sensor read.
pub const SENSOR_SENTINEL: f32 = -1.0;

/// Replace a NaN reading with the sentinel.
pub fn sanitize_reading(value: f32) -> f32 {
    if value.is_nan() { SENSOR_SENTINEL } else { value }
}

pub fn is_sentinel(value: f32) -> bool {
    value == SENSOR_SENTINEL || value.is_nan()
}

/// Decide the heater output.
///
/// An active override forces `override_value`. Without one, the heater runs while the
/// temperature is below `threshold`; a sentinel reading keeps `previous`. There is no
/// deadband, so a reading hovering at the threshold can toggle the heater every sample.
pub fn decide(override_active: bool, override_value: bool, temperature: f32, threshold: f32, previous: bool) -> bool {
    if override_active {
        override_value
    } else if is_sentinel(temperature) {
        previous
    } else {
        threshold > temperature
    }
}
