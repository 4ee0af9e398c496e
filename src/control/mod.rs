//! Heater control: the threshold/override decision and the operator commands that
//! change the policy.

pub mod decision;
pub mod operator;

pub use decision::{SENSOR_SENTINEL, decide, is_sentinel, sanitize_reading};
pub use operator::{OperatorCommand, OperatorError, THRESHOLD_RANGE, help_text};
