//! In-memory description of a coupled simulation.
//!
//! A [`Model`] is produced by an external loader (see [`crate::config`] for
//! the TOML one) and consumed once at manager startup.

use mmp_proto::{Conduit, Settings};
use thiserror::Error;

/// A declared component of the simulation, possibly replicated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeElement {
	/// Dotted element name.
	pub name: String,
	/// Identifier of the implementation that runs this element.
	pub implementation: String,
	/// Number of instances along each dimension; empty for a single instance.
	pub multiplicity: Vec<u32>,
}

impl ComputeElement {
	/// Declares a scalar element.
	pub fn new(name: impl Into<String>, implementation: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			implementation: implementation.into(),
			multiplicity: Vec::new(),
		}
	}

	/// Replicates the element along the given dimensions.
	#[must_use]
	pub fn with_multiplicity(mut self, multiplicity: Vec<u32>) -> Self {
		self.multiplicity = multiplicity;
		self
	}

	/// Total number of instances of this element.
	pub fn instance_count(&self) -> u64 {
		self.multiplicity.iter().map(|&n| u64::from(n)).product()
	}
}

/// Elements, conduits, and settings of one simulation run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Model {
	/// Model name.
	pub name: String,
	/// Compute elements in declaration order.
	pub elements: Vec<ComputeElement>,
	/// Conduits in declaration order.
	pub conduits: Vec<Conduit>,
	/// Settings shared by every instance.
	pub settings: Settings,
}

impl Model {
	/// Creates an empty model.
	pub fn new(name: impl Into<String>) -> Self {
		Self {
			name: name.into(),
			..Self::default()
		}
	}

	/// Adds a compute element.
	#[must_use]
	pub fn with_element(mut self, element: ComputeElement) -> Self {
		self.elements.push(element);
		self
	}

	/// Adds a conduit.
	#[must_use]
	pub fn with_conduit(mut self, conduit: Conduit) -> Self {
		self.conduits.push(conduit);
		self
	}

	/// Replaces the settings.
	#[must_use]
	pub fn with_settings(mut self, settings: Settings) -> Self {
		self.settings = settings;
		self
	}

	/// Looks up an element by name.
	pub fn element(&self, name: &str) -> Option<&ComputeElement> {
		self.elements.iter().find(|e| e.name == name)
	}
}

/// A model that cannot be turned into a topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
	/// An element name is not a dotted identifier.
	#[error("invalid compute element name '{0}'")]
	InvalidName(String),
	/// Two elements share a name.
	#[error("compute element '{0}' is declared twice")]
	DuplicateElement(String),
	/// A conduit names an element that was not declared.
	#[error("conduit '{conduit}' refers to undeclared compute element '{element}'")]
	UndeclaredElement {
		/// The offending conduit.
		conduit: Conduit,
		/// The missing element.
		element: String,
	},
	/// A conduit joins elements whose multiplicities cannot be paired.
	#[error("conduit '{conduit}' joins multiplicities {sender:?} and {receiver:?}, which do not share a common prefix")]
	IncompatibleMultiplicity {
		/// The offending conduit.
		conduit: Conduit,
		/// Sender multiplicity.
		sender: Vec<u32>,
		/// Receiver multiplicity.
		receiver: Vec<u32>,
	},
}
