//! Manager request handling over one authoritative run state.
//!
//! # Purpose
//!
//! - Compose topology, registry, logger and settings into the five protocol operations.
//! - Own the per-instance state machine `UNREGISTERED -> REGISTERED -> DEREGISTERED`.
//! - Exclude transport concerns; see [`crate::ipc`] for the TCP loop and [`crate::service`] for dispatch.
//!
//! # Mental model
//!
//! - Topology and settings are frozen at construction and read without locks.
//! - The registry is the only mutable state. Register and deregister take its lock briefly; peer waits never hold it.
//! - A peer request is answered in two steps: a pure topology lookup yields candidate peer ids, then the registry suspends the caller until all of them are registered.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`MmpServer`] | Run-wide request handler | MUST be the only owner of the registry | `MmpServer::new` |
//! | [`TopologyStore`] | Conduit graph with multiplicity expansion | MUST NOT change after construction | `TopologyStore::new` |
//! | [`InstanceRegistry`] | Live instances and parked peer waits | MUST NOT hold its lock across an await | `MmpServer::register`, `MmpServer::deregister` |
//! | [`Logger`] | Sink fan-out for instance log records | MUST preserve per-sink arrival order | `MmpServer::submit_log_message` |
//! | [`SettingsStore`] | Typed run settings | MUST be read-only | `MmpServer::new` |
//!
//! # Invariants
//!
//! 1. Only ids that fit the model MAY be registered.
//!    - Enforced in: `MmpServer::register`
//!    - Tested by: `server::tests::register_rejects_ids_outside_the_model`
//!    - Failure symptom: peers wait forever for an instance the topology never names.
//!
//! 2. A peer request MUST come from a registered instance.
//!    - Enforced in: `MmpServer::request_peers`
//!    - Tested by: `server::tests::peers_before_register_is_a_protocol_error`
//!
//! 3. A peer request MUST NOT return a partial peer set.
//!    - Enforced in: `InstanceRegistry::resolve_peers`
//!    - Tested by: `server::tests::fan_out_waits_for_every_micro_instance`
//!    - Failure symptom: an instance connects to some peers and hangs on the rest.
//!
//! 4. Shutdown MUST fail every parked peer request before the transport closes.
//!    - Enforced in: `MmpServer::shutdown_all`, `ipc::serve`
//!    - Tested by: `server::tests::shutdown_releases_pending_peer_requests`

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use mmp_proto::{Conduit, InstanceId, LogMessage, Peer, PeerSet, SettingValue, Settings};

use crate::error::ManagerError;
use crate::logger::{LogRecord, Logger};
use crate::model::{Model, ModelError};
use crate::registry::{InstanceRegistry, RegistryError};
use crate::settings::SettingsStore;
use crate::topology::TopologyStore;


/// Manager behaviour that is not part of the model.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerConfig {
	/// Peer wait limit applied when a request does not carry its own.
	/// `None` waits until the peers arrive or the manager stops.
	pub peer_timeout: Option<Duration>,
}

/// The manager's request handler.
#[derive(Debug)]
pub struct MmpServer {
	model_name: String,
	topology: TopologyStore,
	registry: InstanceRegistry,
	logger: Logger,
	settings: SettingsStore,
	config: ServerConfig,
}

impl MmpServer {
	/// Builds the run state from a model.
	///
	/// # Errors
	///
	/// Returns a [`ModelError`] if the model's topology is invalid.
	pub fn new(model: &Model, logger: Logger, config: ServerConfig) -> Result<Arc<Self>, ModelError> {
		let topology = TopologyStore::new(model)?;
		let registry = InstanceRegistry::with_expected(topology.expected_instances());
		tracing::info!(
			model = %model.name,
			elements = model.elements.len(),
			conduits = model.conduits.len(),
			settings = model.settings.len(),
			"manager state built"
		);
		Ok(Arc::new(Self {
			model_name: model.name.clone(),
			topology,
			registry,
			logger,
			settings: SettingsStore::new(model.settings.clone()),
			config,
		}))
	}

	/// Name of the model this manager coordinates.
	pub fn model_name(&self) -> &str {
		&self.model_name
	}

	/// The run's topology.
	pub fn topology(&self) -> &TopologyStore {
		&self.topology
	}

	/// The live instance registry.
	pub fn registry(&self) -> &InstanceRegistry {
		&self.registry
	}

	/// Marks an instance as online.
	///
	/// # Errors
	///
	/// Fails if the id does not fit the model, is already registered, or the
	/// manager is shutting down.
	pub fn register(&self, instance: InstanceId, locations: Vec<String>) -> Result<(), ManagerError> {
		self.topology.check_instance(&instance)?;
		let name = instance.to_string();
		self.registry.register(instance, locations)?;
		tracing::info!(instance = %name, "registered instance");
		Ok(())
	}

	/// Marks an instance as gone.
	///
	/// # Errors
	///
	/// Fails with `UnknownInstance` if the id is not registered.
	pub fn deregister(&self, instance: &InstanceId) -> Result<(), ManagerError> {
		self.registry.deregister(instance)?;
		tracing::info!(%instance, "deregistered instance");
		Ok(())
	}

	/// Resolves the peers of an instance on the given conduits, waiting until
	/// every one of them has registered. An empty conduit list means every
	/// conduit of the instance.
	///
	/// `timeout` overrides [`ServerConfig::peer_timeout`].
	///
	/// # Errors
	///
	/// Fails if the caller is not registered, the request does not fit the
	/// topology, the wait times out, or the manager shuts down meanwhile.
	pub async fn request_peers(
		&self,
		instance: &InstanceId,
		conduits: &[Conduit],
		timeout: Option<Duration>,
	) -> Result<PeerSet, ManagerError> {
		let conduits = self.topology.select_conduits(instance, conduits)?;
		if !self.registry.contains(instance) {
			return Err(ManagerError::NotRegistered(instance.clone(), "request_peers"));
		}
		let candidates = self.topology.peers_on(instance, &conduits)?;
		let peer_dims = self.topology.peer_dims(instance.base(), &conduits)?;
		let peer_ids: Vec<_> = candidates.iter().map(|c| c.peer.clone()).collect();

		tracing::debug!(%instance, peers = peer_ids.len(), "resolving peers");
		let locations = match self
			.registry
			.resolve_peers(&peer_ids, timeout.or(self.config.peer_timeout))
			.await
		{
			Ok(locations) => locations,
			Err(RegistryError::PeerTimeout { waited, missing }) => {
				let missing: HashSet<_> = missing.into_iter().collect();
				let missing = candidates
					.into_iter()
					.filter(|c| missing.contains(&c.peer))
					.map(|c| (c.conduit, c.peer))
					.collect();
				let err = ManagerError::PeerTimeout {
					instance: instance.clone(),
					missing,
					waited,
				};
				tracing::warn!(%instance, error = %err, "peer rendezvous timed out");
				return Err(err);
			}
			Err(e) => return Err(e.into()),
		};

		let peers = candidates
			.into_iter()
			.zip(locations)
			.map(|(candidate, locations)| Peer {
				conduit: candidate.conduit,
				instance: candidate.peer,
				locations,
			})
			.collect();
		Ok(PeerSet {
			conduits,
			peer_dims,
			peers,
		})
	}

	/// Reads one setting.
	///
	/// # Errors
	///
	/// Returns [`ManagerError::UnknownKey`] if the key is absent.
	pub fn get_setting(&self, key: &str) -> Result<SettingValue, ManagerError> {
		self.settings.get(key).cloned()
	}

	/// Every setting of the run.
	pub fn settings(&self) -> &Settings {
		self.settings.all()
	}

	/// Hands a log record to every sink.
	pub fn submit_log_message(&self, message: &LogMessage) -> LogRecord {
		self.logger.record(message)
	}

	/// Fails all pending and future peer waits and refuses new
	/// registrations.
	pub fn shutdown_all(&self) {
		if !self.registry.is_shutting_down() {
			tracing::info!(
				pending = self.registry.pending_waits(),
				registered = self.registry.len(),
				"shutting down manager"
			);
		}
		self.registry.shutdown_all();
	}

	/// Returns true once [`Self::shutdown_all`] has been called.
	pub fn is_shutting_down(&self) -> bool {
		self.registry.is_shutting_down()
	}

	/// Resolves once every instance of the model has registered and then
	/// deregistered.
	pub async fn wait_run_complete(&self) {
		self.registry.wait_run_complete().await;
	}

	/// Flushes the log sinks.
	pub fn close(&self) {
		self.logger.close();
	}
}
