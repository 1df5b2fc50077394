//! Wire types for the manager protocol.
//!
//! An instance sends [`Request`]s and the manager answers each with exactly one
//! [`Response`] carrying the same id. Several requests may be in flight on one
//! connection; responses are correlated by id, not by order.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{Conduit, InstanceId, LogMessage, SettingValue, Settings};

/// Unique identifier for requests and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub u64);

/// Classification of frames transmitted over the connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Frame {
	/// A request initiated by an instance.
	Request(Request),
	/// A response from the manager.
	Response(Response),
}

/// A request from an instance to the manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
	/// Unique request identifier for correlation.
	pub id: RequestId,
	/// The request payload.
	pub payload: RequestPayload,
}

impl Request {
	/// Wraps a payload in a new request.
	#[must_use]
	pub fn new(payload: RequestPayload) -> Self {
		Self {
			id: RequestId(0),
			payload,
		}
	}
}

/// Request payload variants for manager operations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestPayload {
	/// Announce that an instance is online.
	Register {
		/// The registering instance.
		instance: InstanceId,
		/// Addresses the instance listens on.
		locations: Vec<String>,
	},
	/// Announce that an instance is shutting down.
	Deregister {
		/// The departing instance.
		instance: InstanceId,
	},
	/// Ask for the peers of an instance, waiting until all are registered.
	RequestPeers {
		/// The asking instance.
		instance: InstanceId,
		/// Conduits to resolve; empty means every conduit of the instance.
		conduits: Vec<Conduit>,
		/// Maximum time to wait for peers, overriding the manager default.
		timeout_ms: Option<u64>,
	},
	/// Read one setting, or all of them when `key` is `None`.
	GetSettings {
		/// Setting name.
		key: Option<String>,
	},
	/// Submit a log record.
	SubmitLogMessage {
		/// The record.
		message: LogMessage,
	},
}

impl RequestPayload {
	/// Operation name, for diagnostics.
	pub const fn operation(&self) -> &'static str {
		match self {
			Self::Register { .. } => "register",
			Self::Deregister { .. } => "deregister",
			Self::RequestPeers { .. } => "request_peers",
			Self::GetSettings { .. } => "get_settings",
			Self::SubmitLogMessage { .. } => "submit_log_message",
		}
	}
}

/// A response from the manager to an instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
	/// Corresponding request identifier.
	pub request_id: RequestId,
	/// The response payload.
	pub payload: Option<ResponsePayload>,
	/// Failure report, if the request failed.
	pub error: Option<ErrorReply>,
}

/// Response payload variants for manager operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponsePayload {
	/// Registration accepted.
	Registered,
	/// Deregistration accepted.
	Deregistered,
	/// Resolved peers.
	Peers(PeerSet),
	/// A single setting.
	Setting {
		/// Setting name.
		key: String,
		/// Setting value.
		value: SettingValue,
	},
	/// All settings, in declaration order.
	Settings(Settings),
	/// Log record accepted.
	LogSubmitted,
}

/// One resolved peer instance on one conduit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Peer {
	/// The conduit connecting the caller to this peer.
	pub conduit: Conduit,
	/// The peer instance.
	pub instance: InstanceId,
	/// Where the peer can be reached.
	pub locations: Vec<String>,
}

/// Everything an instance needs to connect to its peers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerSet {
	/// Conduits attached to the instance's element.
	pub conduits: Vec<Conduit>,
	/// Multiplicity of every peer element, keyed by element name.
	pub peer_dims: IndexMap<String, Vec<u32>>,
	/// Resolved peers, grouped by conduit in conduit order.
	pub peers: Vec<Peer>,
}

impl PeerSet {
	/// Locations of a peer instance, if it is part of this set.
	pub fn locations(&self, instance: &InstanceId) -> Option<&[String]> {
		self.peers
			.iter()
			.find(|p| &p.instance == instance)
			.map(|p| p.locations.as_slice())
	}

	/// Peers on one conduit.
	pub fn on_conduit<'a>(&'a self, conduit: &'a Conduit) -> impl Iterator<Item = &'a Peer> + 'a {
		self.peers.iter().filter(move |p| &p.conduit == conduit)
	}
}

/// Failure report carried in a [`Response`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
	/// Machine readable failure.
	pub code: ErrorCode,
	/// Diagnostic naming the offending instance or conduit.
	pub message: String,
}

impl ErrorReply {
	/// Creates a failure report.
	pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
		Self {
			code,
			message: message.into(),
		}
	}
}

impl fmt::Display for ErrorReply {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{:?}: {}", self.code, self.message)
	}
}

/// Error codes for manager protocol operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorCode {
	/// The request frame did not decode.
	InvalidArgs,
	/// The instance must register before making this call.
	NotRegistered,
	/// A requested conduit is not attached to the instance.
	UnattachedConduit,
	/// The instance id is already registered.
	DuplicateRegistration,
	/// The instance id is not registered.
	UnknownInstance,
	/// The element is not declared in the model.
	UnknownElement,
	/// The index tuple does not fit the element's multiplicity.
	MultiplicityMismatch,
	/// Peers did not all register before the deadline.
	PeerTimeout,
	/// The manager is stopping.
	ShutdownInProgress,
	/// The setting does not exist.
	UnknownKey,
}

/// Broad classes of failure, used to decide how a caller reacts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Malformed or out-of-sequence call.
	Protocol,
	/// The call conflicts with registry state.
	StateConflict,
	/// The call does not fit the model's topology.
	Topology,
	/// Waiting for peers timed out.
	RendezvousTimeout,
	/// The manager is shutting down.
	Lifecycle,
	/// A setting lookup failed.
	Settings,
}

impl ErrorCode {
	/// Returns the class this code belongs to.
	pub const fn kind(self) -> ErrorKind {
		match self {
			Self::InvalidArgs | Self::NotRegistered | Self::UnattachedConduit => ErrorKind::Protocol,
			Self::DuplicateRegistration | Self::UnknownInstance => ErrorKind::StateConflict,
			Self::UnknownElement | Self::MultiplicityMismatch => ErrorKind::Topology,
			Self::PeerTimeout => ErrorKind::RendezvousTimeout,
			Self::ShutdownInProgress => ErrorKind::Lifecycle,
			Self::UnknownKey => ErrorKind::Settings,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn codes_map_onto_failure_classes() {
		assert_eq!(ErrorCode::NotRegistered.kind(), ErrorKind::Protocol);
		assert_eq!(ErrorCode::InvalidArgs.kind(), ErrorKind::Protocol);
		assert_eq!(ErrorCode::DuplicateRegistration.kind(), ErrorKind::StateConflict);
		assert_eq!(ErrorCode::UnknownInstance.kind(), ErrorKind::StateConflict);
		assert_eq!(ErrorCode::MultiplicityMismatch.kind(), ErrorKind::Topology);
		assert_eq!(ErrorCode::PeerTimeout.kind(), ErrorKind::RendezvousTimeout);
		assert_eq!(ErrorCode::ShutdownInProgress.kind(), ErrorKind::Lifecycle);
	}

	#[test]
	fn peer_set_lookups() {
		let conduit = Conduit::new("macro.out", "micro.in").unwrap();
		let micro0 = InstanceId::new("micro", vec![0]).unwrap();
		let set = PeerSet {
			conduits: vec![conduit.clone()],
			peer_dims: IndexMap::from([("micro".to_string(), vec![2])]),
			peers: vec![Peer {
				conduit: conduit.clone(),
				instance: micro0.clone(),
				locations: vec!["tcp:10.0.0.1:4000".into()],
			}],
		};

		assert_eq!(set.locations(&micro0), Some(&["tcp:10.0.0.1:4000".to_string()][..]));
		assert_eq!(set.on_conduit(&conduit).count(), 1);
		assert!(set.locations(&micro0.with_index(vec![1])).is_none());
	}
}
