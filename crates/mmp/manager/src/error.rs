//! Failures of manager operations and their wire encoding.

use std::time::Duration;

use mmp_proto::{Conduit, ErrorCode, ErrorReply, InstanceId};
use thiserror::Error;

use crate::registry::RegistryError;
use crate::topology::TopologyError;

/// A failed manager operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManagerError {
	/// The instance called an operation that requires registration first.
	#[error("instance '{0}' must register before calling {1}")]
	NotRegistered(InstanceId, &'static str),

	/// The call does not fit the model's topology.
	#[error(transparent)]
	Topology(#[from] TopologyError),

	/// The call conflicts with registry state, or the registry is stopping.
	#[error(transparent)]
	Registry(#[from] RegistryError),

	/// Peers of an instance did not all register in time.
	#[error("instance '{instance}' timed out after {waited:?} waiting for peers: {}", format_missing(.missing))]
	PeerTimeout {
		/// The waiting instance.
		instance: InstanceId,
		/// Peers that never registered, with the conduit they were needed on.
		missing: Vec<(Conduit, InstanceId)>,
		/// Time spent waiting.
		waited: Duration,
	},

	/// The setting does not exist.
	#[error("no setting named '{0}'")]
	UnknownKey(String),
}

fn format_missing(missing: &[(Conduit, InstanceId)]) -> String {
	missing
		.iter()
		.map(|(conduit, peer)| format!("{peer} on {conduit}"))
		.collect::<Vec<_>>()
		.join(", ")
}

impl ManagerError {
	/// Wire code for this failure.
	pub fn code(&self) -> ErrorCode {
		match self {
			Self::NotRegistered(..) => ErrorCode::NotRegistered,
			Self::Topology(TopologyError::UnknownElement(_)) => ErrorCode::UnknownElement,
			Self::Topology(TopologyError::MultiplicityMismatch { .. }) => ErrorCode::MultiplicityMismatch,
			Self::Topology(TopologyError::UnattachedConduit { .. }) => ErrorCode::UnattachedConduit,
			Self::Registry(RegistryError::DuplicateRegistration(_)) => ErrorCode::DuplicateRegistration,
			Self::Registry(RegistryError::UnknownInstance(_)) => ErrorCode::UnknownInstance,
			Self::Registry(RegistryError::PeerTimeout { .. }) | Self::PeerTimeout { .. } => ErrorCode::PeerTimeout,
			Self::Registry(RegistryError::ShutdownInProgress) => ErrorCode::ShutdownInProgress,
			Self::UnknownKey(_) => ErrorCode::UnknownKey,
		}
	}

	/// Encodes the failure for a response frame.
	pub fn to_reply(&self) -> ErrorReply {
		ErrorReply::new(self.code(), self.to_string())
	}
}

impl From<ManagerError> for ErrorReply {
	fn from(error: ManagerError) -> Self {
		error.to_reply()
	}
}
