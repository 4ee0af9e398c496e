//! Operator command surface of the coordinator.
//!
//! Commands are single text lines. Parsing never touches coordinator state, so a
//! rejected line leaves the active policy unchanged.

use std::str::FromStr;
use thiserror::Error;

/// Valid range of the temperature threshold (°C).
pub const THRESHOLD_RANGE: std::ops::RangeInclusive<f32> = 0.0..=50.0;

/// Commands accepted on the operator line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OperatorCommand {
    /// Set the temperature threshold and push it to every peer.
    SetThreshold(f32),
    GetThreshold,
    /// Force every heater on.
    HeaterStart,
    /// Force every heater off.
    HeaterStop,
    /// Return heaters to threshold control.
    HeaterAuto,
    /// Dump all slots and the active command.
    Status,
    Help,
}

/// Why an operator line was refused. Displayed verbatim to the operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OperatorError {
    #[error("error: missing argument")]
    MissingArgument,
    #[error("error: illegal character '{0}' in argument")]
    IllegalCharacter(char),
    #[error("error: '{0}' is not a number")]
    InvalidNumber(String),
    #[error("error: threshold {0:.1} must be within {min:.0}-{max:.0}°C", min = THRESHOLD_RANGE.start(), max = THRESHOLD_RANGE.end())]
    OutOfRange(f32),
    #[error("error: unknown command '{0}', try HELP")]
    UnknownCommand(String),
}

impl FromStr for OperatorCommand {
    type Err = OperatorError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim();
        let (keyword, argument) = match line.split_once(char::is_whitespace) {
            Some((keyword, argument)) => (keyword, argument.trim()),
            None => (line, ""),
        };

        match keyword.to_ascii_uppercase().as_str() {
            "SET_THRESHOLD" => parse_threshold(argument).map(OperatorCommand::SetThreshold),
            "GET_THRESHOLD" => Ok(OperatorCommand::GetThreshold),
            "HEATER_START" => Ok(OperatorCommand::HeaterStart),
            "HEATER_STOP" => Ok(OperatorCommand::HeaterStop),
            "HEATER_AUTO" => Ok(OperatorCommand::HeaterAuto),
            "STATUS" => Ok(OperatorCommand::Status),
            "HELP" => Ok(OperatorCommand::Help),
            _ => Err(OperatorError::UnknownCommand(keyword.to_string())),
        }
    }
}

/// Parse a threshold argument: digits and `.` only, within range, rounded to one decimal.
fn parse_threshold(argument: &str) -> Result<f32, OperatorError> {
    if argument.is_empty() {
        return Err(OperatorError::MissingArgument);
    }
    if let Some(c) = argument.chars().find(|c| !c.is_ascii_digit() && *c != '.') {
        return Err(OperatorError::IllegalCharacter(c));
    }
    let value: f32 = argument.parse().map_err(|_| OperatorError::InvalidNumber(argument.to_string()))?;
    if !THRESHOLD_RANGE.contains(&value) {
        return Err(OperatorError::OutOfRange(value));
    }
    Ok((value * 10.0).round() / 10.0)
}

/// Help text listing every command.
pub fn help_text() -> &'static str {
    "available commands:\n\
     SET_THRESHOLD XX.X - set temperature threshold (0-50°C)\n\
     GET_THRESHOLD      - show current temperature threshold\n\
     HEATER_START       - force heaters on\n\
     HEATER_STOP        - force heaters off\n\
     HEATER_AUTO        - return heaters to threshold control\n\
     STATUS             - show all peer slots and the active command\n\
     HELP               - show this help"
}
