//! Names of instances, ports, and conduits.
//!
//! Element names are dotted identifiers (`submodel.micro`). An instance is an
//! element name plus an index tuple, written `micro[3][2]`; a scalar element
//! has an empty index. Ports are addressed as `element.port`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure to parse or validate a name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
	/// Not a dotted identifier.
	#[error("invalid name '{0}'")]
	InvalidName(String),
	/// Malformed `[n]` index suffix.
	#[error("invalid instance index in '{0}'")]
	InvalidIndex(String),
	/// Endpoint without a `.port` suffix.
	#[error("endpoint '{0}' has no port (expected 'element.port')")]
	MissingPort(String),
}

fn is_identifier(segment: &str) -> bool {
	let mut chars = segment.chars();
	match chars.next() {
		Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
		_ => return false,
	}
	chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Returns true if `name` is a valid dotted identifier.
#[must_use]
pub fn is_valid_name(name: &str) -> bool {
	!name.is_empty() && name.split('.').all(is_identifier)
}

fn check_name(name: &str) -> Result<(), ParseError> {
	if is_valid_name(name) {
		Ok(())
	} else {
		Err(ParseError::InvalidName(name.to_string()))
	}
}

/// Identifier of one concrete instance of a compute element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceId {
	base: String,
	index: Vec<u32>,
}

impl InstanceId {
	/// Creates an instance id from an element name and index tuple.
	///
	/// # Errors
	///
	/// Returns [`ParseError::InvalidName`] if `base` is not a dotted identifier.
	pub fn new(base: impl Into<String>, index: Vec<u32>) -> Result<Self, ParseError> {
		let base = base.into();
		check_name(&base)?;
		Ok(Self { base, index })
	}

	/// Creates the id of a scalar (non-replicated) instance.
	///
	/// # Errors
	///
	/// Returns [`ParseError::InvalidName`] if `base` is not a dotted identifier.
	pub fn scalar(base: impl Into<String>) -> Result<Self, ParseError> {
		Self::new(base, Vec::new())
	}

	/// Returns an id for the same element with a different index.
	#[must_use]
	pub fn with_index(&self, index: Vec<u32>) -> Self {
		Self {
			base: self.base.clone(),
			index,
		}
	}

	/// Element name.
	pub fn base(&self) -> &str {
		&self.base
	}

	/// Index tuple, empty for scalar instances.
	pub fn index(&self) -> &[u32] {
		&self.index
	}

	/// Number of index dimensions.
	pub fn rank(&self) -> usize {
		self.index.len()
	}
}

impl fmt::Display for InstanceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.base)?;
		for i in &self.index {
			write!(f, "[{i}]")?;
		}
		Ok(())
	}
}

impl FromStr for InstanceId {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (base, mut rest) = s.split_at(s.find('[').unwrap_or(s.len()));
		check_name(base)?;

		let invalid = || ParseError::InvalidIndex(s.to_string());
		let mut index = Vec::new();
		while !rest.is_empty() {
			let inner = rest.strip_prefix('[').ok_or_else(invalid)?;
			let (digits, tail) = inner.split_once(']').ok_or_else(invalid)?;
			if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
				return Err(invalid());
			}
			index.push(digits.parse().map_err(|_| invalid())?);
			rest = tail;
		}

		Ok(Self {
			base: base.to_string(),
			index,
		})
	}
}

/// One end of a conduit: a port on a compute element.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Endpoint {
	/// Compute element name.
	pub element: String,
	/// Port name on that element.
	pub port: String,
}

impl fmt::Display for Endpoint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}.{}", self.element, self.port)
	}
}

impl FromStr for Endpoint {
	type Err = ParseError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (element, port) = s
			.rsplit_once('.')
			.ok_or_else(|| ParseError::MissingPort(s.to_string()))?;
		check_name(element)?;
		if !is_identifier(port) {
			return Err(ParseError::InvalidName(port.to_string()));
		}
		Ok(Self {
			element: element.to_string(),
			port: port.to_string(),
		})
	}
}

/// Directed data-flow edge from a sending port to a receiving port.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Conduit {
	/// Sending endpoint.
	pub sender: Endpoint,
	/// Receiving endpoint.
	pub receiver: Endpoint,
}

impl Conduit {
	/// Parses a conduit from `element.port` strings.
	///
	/// # Errors
	///
	/// Returns a [`ParseError`] if either endpoint is malformed.
	pub fn new(sender: &str, receiver: &str) -> Result<Self, ParseError> {
		Ok(Self {
			sender: sender.parse()?,
			receiver: receiver.parse()?,
		})
	}
}

impl fmt::Display for Conduit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} -> {}", self.sender, self.receiver)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn instance_ids_parse_and_print() {
		let id: InstanceId = "micro[3][12]".parse().unwrap();
		assert_eq!(id.base(), "micro");
		assert_eq!(id.index(), &[3, 12]);
		assert_eq!(id.to_string(), "micro[3][12]");

		let scalar: InstanceId = "sub.macro".parse().unwrap();
		assert_eq!(scalar.rank(), 0);
		assert_eq!(scalar.to_string(), "sub.macro");
	}

	#[test]
	fn malformed_instance_ids_are_rejected() {
		for bad in ["", "3d", "micro[", "micro[]", "micro[x]", "micro[1]x", "a..b", "micro[-1]"] {
			assert!(bad.parse::<InstanceId>().is_err(), "accepted {bad:?}");
		}
	}

	#[test]
	fn endpoints_split_on_the_last_dot() {
		let ep: Endpoint = "sub.micro.out".parse().unwrap();
		assert_eq!(ep.element, "sub.micro");
		assert_eq!(ep.port, "out");
		assert_eq!(
			"micro".parse::<Endpoint>(),
			Err(ParseError::MissingPort("micro".into()))
		);
	}

	#[test]
	fn conduits_print_sender_first() {
		let conduit = Conduit::new("macro.out", "micro.in").unwrap();
		assert_eq!(conduit.to_string(), "macro.out -> micro.in");
		assert_eq!(conduit.sender.element, "macro");
		assert_eq!(conduit.receiver.port, "in");
	}
}
