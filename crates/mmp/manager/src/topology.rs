//! Peer resolution over the model's conduit graph.
//!
//! The store is built once and never changes. Every answer is a pure function
//! of the model, so it can be computed before any instance has registered.
//!
//! Pairing rule for a conduit between the caller (index `i`, rank `r`) and an
//! element with multiplicity `D` (rank `s`):
//! * `s > r`: the caller talks to every `other[i ++ j]`, `j` ranging over
//!   `D[r..]`. A scalar sending to a vector is the `r = 0` case.
//! * `s <= r`: the caller talks to exactly `other[i[..s]]`. Equal ranks pair
//!   positionally; a vector sending to a scalar is the `s = 0` case.
//!
//! For this to stay in range, the shorter multiplicity of every conduit must be
//! a prefix of the longer one. That is checked when the store is built.

use std::collections::HashSet;

use indexmap::IndexMap;
use mmp_proto::reference::is_valid_name;
use mmp_proto::{Conduit, InstanceId};
use thiserror::Error;

use crate::model::{Model, ModelError};

/// A request that does not fit the model's topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
	/// The element is not declared.
	#[error("unknown compute element '{0}'")]
	UnknownElement(String),
	/// The index tuple does not fit the element's multiplicity.
	#[error("instance '{instance}' does not fit multiplicity {expected:?} of its compute element")]
	MultiplicityMismatch {
		/// The offending instance.
		instance: InstanceId,
		/// Declared multiplicity.
		expected: Vec<u32>,
	},
	/// A conduit was named that the instance's element is not part of.
	#[error("conduit '{conduit}' is not attached to instance '{instance}'")]
	UnattachedConduit {
		/// The asking instance.
		instance: InstanceId,
		/// The named conduit.
		conduit: Conduit,
	},
}

/// A peer instance reachable over a conduit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerCandidate {
	/// The connecting conduit.
	pub conduit: Conduit,
	/// The peer instance.
	pub peer: InstanceId,
}

#[derive(Debug)]
struct ElementInfo {
	dims: Vec<u32>,
	/// Indices into `TopologyStore::conduits`.
	conduits: Vec<usize>,
}

/// Read-only view of the model's communication topology.
#[derive(Debug)]
pub struct TopologyStore {
	elements: IndexMap<String, ElementInfo>,
	conduits: Vec<Conduit>,
}

impl TopologyStore {
	/// Builds the store, validating the model.
	///
	/// # Errors
	///
	/// Returns a [`ModelError`] for invalid or duplicate element names,
	/// conduits naming undeclared elements, and conduits joining elements
	/// whose multiplicities are not prefix compatible.
	pub fn new(model: &Model) -> Result<Self, ModelError> {
		let mut elements = IndexMap::with_capacity(model.elements.len());
		for element in &model.elements {
			if !is_valid_name(&element.name) {
				return Err(ModelError::InvalidName(element.name.clone()));
			}
			let info = ElementInfo {
				dims: element.multiplicity.clone(),
				conduits: Vec::new(),
			};
			if elements.insert(element.name.clone(), info).is_some() {
				return Err(ModelError::DuplicateElement(element.name.clone()));
			}
		}

		for (pos, conduit) in model.conduits.iter().enumerate() {
			let mut dims = [&[][..], &[][..]];
			for (slot, endpoint) in [&conduit.sender, &conduit.receiver].into_iter().enumerate() {
				let Some(info) = elements.get(&endpoint.element) else {
					return Err(ModelError::UndeclaredElement {
						conduit: conduit.clone(),
						element: endpoint.element.clone(),
					});
				};
				dims[slot] = info.dims.as_slice();
			}

			let [sender, receiver] = dims;
			let shared = sender.len().min(receiver.len());
			if sender[..shared] != receiver[..shared] {
				return Err(ModelError::IncompatibleMultiplicity {
					conduit: conduit.clone(),
					sender: sender.to_vec(),
					receiver: receiver.to_vec(),
				});
			}

			for name in [&conduit.sender.element, &conduit.receiver.element] {
				if let Some(info) = elements.get_mut(name)
					&& info.conduits.last() != Some(&pos)
				{
					info.conduits.push(pos);
				}
			}
		}

		tracing::debug!(
			elements = elements.len(),
			conduits = model.conduits.len(),
			"topology built"
		);

		Ok(Self {
			elements,
			conduits: model.conduits.clone(),
		})
	}

	fn info(&self, element: &str) -> Result<&ElementInfo, TopologyError> {
		self.elements
			.get(element)
			.ok_or_else(|| TopologyError::UnknownElement(element.to_string()))
	}

	/// Declared multiplicity of an element.
	///
	/// # Errors
	///
	/// Returns [`TopologyError::UnknownElement`] for undeclared elements.
	pub fn dims(&self, element: &str) -> Result<&[u32], TopologyError> {
		Ok(&self.info(element)?.dims)
	}

	/// Checks that an instance id names a declared element and fits its
	/// multiplicity.
	///
	/// # Errors
	///
	/// Returns [`TopologyError::UnknownElement`] or
	/// [`TopologyError::MultiplicityMismatch`].
	pub fn check_instance(&self, instance: &InstanceId) -> Result<(), TopologyError> {
		let dims = self.dims(instance.base())?;
		let fits = instance.rank() == dims.len() && instance.index().iter().zip(dims).all(|(i, n)| i < n);
		if fits {
			Ok(())
		} else {
			Err(TopologyError::MultiplicityMismatch {
				instance: instance.clone(),
				expected: dims.to_vec(),
			})
		}
	}

	/// Conduits the element takes part in, in declaration order.
	///
	/// # Errors
	///
	/// Returns [`TopologyError::UnknownElement`] for undeclared elements.
	pub fn conduits_for(&self, element: &str) -> Result<Vec<Conduit>, TopologyError> {
		Ok(self
			.info(element)?
			.conduits
			.iter()
			.map(|&pos| self.conduits[pos].clone())
			.collect())
	}

	/// Every peer of an instance over all of its conduits.
	///
	/// # Errors
	///
	/// Fails if the instance does not fit the model (see
	/// [`Self::check_instance`]).
	pub fn peers_for(&self, instance: &InstanceId) -> Result<Vec<PeerCandidate>, TopologyError> {
		self.peers_on(instance, &[])
	}

	/// Peers of an instance over the given conduits; an empty slice selects
	/// every conduit of the instance.
	///
	/// # Errors
	///
	/// Fails if the instance does not fit the model, or with
	/// [`TopologyError::UnattachedConduit`] if a listed conduit does not
	/// involve the instance's element.
	pub fn peers_on(&self, instance: &InstanceId, conduits: &[Conduit]) -> Result<Vec<PeerCandidate>, TopologyError> {
		let selected = self.select_conduits(instance, conduits)?;
		let mut peers = Vec::new();
		for conduit in selected {
			let other = self.other_end(&conduit, instance.base());
			let template = InstanceId::new(other, Vec::new())
				.map_err(|_| TopologyError::UnknownElement(other.to_string()))?;
			for index in expand(instance.index(), self.dims(other)?) {
				peers.push(PeerCandidate {
					conduit: conduit.clone(),
					peer: template.with_index(index),
				});
			}
		}
		Ok(peers)
	}

	/// Resolves the conduits a peer request is about; an empty request means
	/// all of them.
	///
	/// # Errors
	///
	/// Same as [`Self::peers_on`].
	pub fn select_conduits(&self, instance: &InstanceId, requested: &[Conduit]) -> Result<Vec<Conduit>, TopologyError> {
		self.check_instance(instance)?;
		let attached = self.conduits_for(instance.base())?;
		if requested.is_empty() {
			return Ok(attached);
		}

		let mut seen = HashSet::new();
		let mut selected = Vec::with_capacity(requested.len());
		for conduit in requested {
			if !attached.contains(conduit) {
				return Err(TopologyError::UnattachedConduit {
					instance: instance.clone(),
					conduit: conduit.clone(),
				});
			}
			if seen.insert(conduit) {
				selected.push(conduit.clone());
			}
		}
		Ok(selected)
	}

	/// Multiplicity of every element on the far side of the given conduits.
	///
	/// # Errors
	///
	/// Returns [`TopologyError::UnknownElement`] for undeclared elements.
	pub fn peer_dims(&self, element: &str, conduits: &[Conduit]) -> Result<IndexMap<String, Vec<u32>>, TopologyError> {
		let mut dims = IndexMap::new();
		for conduit in conduits {
			let other = self.other_end(conduit, element);
			if !dims.contains_key(other) {
				dims.insert(other.to_string(), self.dims(other)?.to_vec());
			}
		}
		Ok(dims)
	}

	/// Every instance the model declares, element by element in row-major
	/// index order.
	pub fn expected_instances(&self) -> Vec<InstanceId> {
		let mut instances = Vec::new();
		for (name, info) in &self.elements {
			let Ok(template) = InstanceId::new(name.clone(), Vec::new()) else {
				continue;
			};
			instances.extend(index_space(&info.dims).into_iter().map(|index| template.with_index(index)));
		}
		instances
	}

	fn other_end<'a>(&self, conduit: &'a Conduit, element: &str) -> &'a str {
		if conduit.sender.element == element {
			&conduit.receiver.element
		} else {
			&conduit.sender.element
		}
	}
}

/// Indices of the peers of `mine` within an element of multiplicity `other`.
fn expand(mine: &[u32], other: &[u32]) -> Vec<Vec<u32>> {
	if other.len() <= mine.len() {
		return vec![mine[..other.len()].to_vec()];
	}
	index_space(&other[mine.len()..])
		.into_iter()
		.map(|suffix| mine.iter().copied().chain(suffix).collect())
		.collect()
}

/// Cartesian product of `0..n` over every dimension, row-major.
fn index_space(dims: &[u32]) -> Vec<Vec<u32>> {
	dims.iter().fold(vec![Vec::new()], |acc, &n| {
		acc.into_iter()
			.flat_map(|prefix| {
				(0..n).map(move |i| {
					let mut index = prefix.clone();
					index.push(i);
					index
				})
			})
			.collect()
	})
}
