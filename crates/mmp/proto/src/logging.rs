//! Structured log messages submitted by instances.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Severity of a log message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
	/// Diagnostic detail.
	Debug,
	/// Normal progress.
	Info,
	/// Something unexpected that the instance recovered from.
	Warning,
	/// An operation failed.
	Error,
	/// The instance cannot continue.
	Critical,
}

impl LogLevel {
	/// Textual level name as it appears in log records.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Debug => "DEBUG",
			Self::Info => "INFO",
			Self::Warning => "WARNING",
			Self::Error => "ERROR",
			Self::Critical => "CRITICAL",
		}
	}
}

impl fmt::Display for LogLevel {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for LogLevel {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_uppercase().as_str() {
			"DEBUG" => Ok(Self::Debug),
			"INFO" => Ok(Self::Info),
			"WARNING" | "WARN" => Ok(Self::Warning),
			"ERROR" => Ok(Self::Error),
			"CRITICAL" => Ok(Self::Critical),
			_ => Err(format!("unknown log level '{s}'")),
		}
	}
}

/// Simulation time in seconds.
///
/// This is the model's clock, not wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
pub struct Timestamp(pub f64);

/// One log record produced by an instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
	/// Name of the submitting instance.
	pub instance_id: String,
	/// Simulation time at which the message was produced.
	pub timestamp: Timestamp,
	/// Severity.
	pub level: LogLevel,
	/// Message text.
	pub text: String,
}

impl LogMessage {
	/// Creates a log message.
	pub fn new(instance_id: impl Into<String>, timestamp: Timestamp, level: LogLevel, text: impl Into<String>) -> Self {
		Self {
			instance_id: instance_id.into(),
			timestamp,
			level,
			text: text.into(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn level_names_round_trip() {
		for level in [
			LogLevel::Debug,
			LogLevel::Info,
			LogLevel::Warning,
			LogLevel::Error,
			LogLevel::Critical,
		] {
			assert_eq!(level.as_str().parse::<LogLevel>(), Ok(level));
		}
		assert_eq!("warn".parse::<LogLevel>(), Ok(LogLevel::Warning));
		assert!("loud".parse::<LogLevel>().is_err());
	}
}
