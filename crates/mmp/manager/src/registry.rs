//! Live instance registry with peer rendezvous.
//!
//! All state sits behind one mutex that is never held across an await. A
//! caller of [`InstanceRegistry::resolve_peers`] that finds peers missing
//! parks a waiter keyed by exactly the missing ids, releases the lock, and
//! sleeps on a oneshot. [`InstanceRegistry::register`] only touches the
//! waiters keyed by the id it inserts, and fires a waiter once its missing
//! set drains. The woken caller re-checks under the lock, so a peer that left
//! again in between just gets waited for again.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::{DateTime, Utc};
use mmp_proto::InstanceId;
use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::{oneshot, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Registry operation failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
	/// The id is already registered.
	#[error("instance '{0}' is already registered")]
	DuplicateRegistration(InstanceId),
	/// The id is not registered.
	#[error("instance '{0}' is not registered")]
	UnknownInstance(InstanceId),
	/// Peers were still missing when the deadline passed.
	#[error("timed out after {waited:?} waiting for {} peer(s)", .missing.len())]
	PeerTimeout {
		/// Time spent waiting.
		waited: Duration,
		/// Peers that never registered.
		missing: Vec<InstanceId>,
	},
	/// The registry is shutting down.
	#[error("the manager is shutting down")]
	ShutdownInProgress,
}

/// Binding of a live instance to the addresses it listens on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
	/// Network locations supplied at registration.
	pub locations: Vec<String>,
	/// Wall-clock registration time.
	pub registered_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Waiter {
	/// Awaited ids that have not registered yet.
	pending: HashSet<InstanceId>,
	wake: Option<oneshot::Sender<()>>,
}

#[derive(Debug, Default)]
struct RegistryState {
	entries: HashMap<InstanceId, RegistryEntry>,
	waiters: HashMap<u64, Waiter>,
	waiting_on: HashMap<InstanceId, HashSet<u64>>,
	next_waiter: u64,
	expected: HashSet<InstanceId>,
	departed: HashSet<InstanceId>,
	shutting_down: bool,
}

impl RegistryState {
	fn lookup(&self, peers: &[InstanceId]) -> Option<Vec<Vec<String>>> {
		peers
			.iter()
			.map(|p| self.entries.get(p).map(|e| e.locations.clone()))
			.collect()
	}

	fn missing(&self, peers: &[InstanceId]) -> Vec<InstanceId> {
		let mut seen = HashSet::new();
		peers
			.iter()
			.filter(|p| !self.entries.contains_key(*p) && seen.insert(*p))
			.cloned()
			.collect()
	}

	fn park(&mut self, pending: HashSet<InstanceId>) -> (u64, oneshot::Receiver<()>) {
		let (tx, rx) = oneshot::channel();
		let id = self.next_waiter;
		self.next_waiter = self.next_waiter.wrapping_add(1);
		for peer in &pending {
			self.waiting_on.entry(peer.clone()).or_default().insert(id);
		}
		self.waiters.insert(id, Waiter {
			pending,
			wake: Some(tx),
		});
		(id, rx)
	}

	fn unpark(&mut self, id: u64) {
		let Some(waiter) = self.waiters.remove(&id) else {
			return;
		};
		for peer in &waiter.pending {
			if let Some(ids) = self.waiting_on.get_mut(peer) {
				ids.remove(&id);
				if ids.is_empty() {
					self.waiting_on.remove(peer);
				}
			}
		}
	}

	fn wake_waiters_on(&mut self, registered: &InstanceId) {
		let Some(ids) = self.waiting_on.remove(registered) else {
			return;
		};
		for id in ids {
			if let Some(waiter) = self.waiters.get_mut(&id) {
				waiter.pending.remove(registered);
				if waiter.pending.is_empty()
					&& let Some(wake) = waiter.wake.take()
				{
					let _ = wake.send(());
				}
			}
		}
	}
}

/// Removes a parked waiter however the wait ends.
struct ParkedWaiter<'a> {
	registry: &'a InstanceRegistry,
	id: u64,
}

impl Drop for ParkedWaiter<'_> {
	fn drop(&mut self) {
		self.registry.state.lock().unpark(self.id);
	}
}

/// Concurrent mapping from live instance ids to their network locations.
#[derive(Debug)]
pub struct InstanceRegistry {
	state: Mutex<RegistryState>,
	shutdown: CancellationToken,
	complete: watch::Sender<bool>,
}

impl Default for InstanceRegistry {
	fn default() -> Self {
		Self::new()
	}
}

impl InstanceRegistry {
	/// Creates an empty registry with no expected instances.
	#[must_use]
	pub fn new() -> Self {
		Self::with_expected(Vec::new())
	}

	/// Creates an empty registry that tracks run completion over the given
	/// instances.
	#[must_use]
	pub fn with_expected(expected: impl IntoIterator<Item = InstanceId>) -> Self {
		let (complete, _) = watch::channel(false);
		Self {
			state: Mutex::new(RegistryState {
				expected: expected.into_iter().collect(),
				..RegistryState::default()
			}),
			shutdown: CancellationToken::new(),
			complete,
		}
	}

	/// Adds an instance and wakes callers that were waiting only for it.
	///
	/// # Errors
	///
	/// Returns [`RegistryError::DuplicateRegistration`] if the id is present
	/// and [`RegistryError::ShutdownInProgress`] once shutdown has begun.
	pub fn register(&self, instance: InstanceId, locations: Vec<String>) -> Result<(), RegistryError> {
		let mut state = self.state.lock();
		if state.shutting_down {
			return Err(RegistryError::ShutdownInProgress);
		}
		if state.entries.contains_key(&instance) {
			return Err(RegistryError::DuplicateRegistration(instance));
		}

		state.departed.remove(&instance);
		state.wake_waiters_on(&instance);
		state.entries.insert(instance, RegistryEntry {
			locations,
			registered_at: Utc::now(),
		});
		Ok(())
	}

	/// Removes an instance.
	///
	/// Callers waiting for this instance as a peer keep waiting.
	///
	/// # Errors
	///
	/// Returns [`RegistryError::UnknownInstance`] if the id is absent.
	pub fn deregister(&self, instance: &InstanceId) -> Result<RegistryEntry, RegistryError> {
		let mut state = self.state.lock();
		let entry = state
			.entries
			.remove(instance)
			.ok_or_else(|| RegistryError::UnknownInstance(instance.clone()))?;

		if state.expected.contains(instance) {
			state.departed.insert(instance.clone());
			if state.departed.len() == state.expected.len() {
				tracing::info!(instances = state.expected.len(), "every expected instance has finished");
				self.complete.send_replace(true);
			}
		}
		Ok(entry)
	}

	/// Waits until every listed peer is registered and returns their
	/// locations, in the order given.
	///
	/// Never returns a partial result. The wait ends early on shutdown or when
	/// `timeout` elapses.
	///
	/// # Errors
	///
	/// Returns [`RegistryError::ShutdownInProgress`] or
	/// [`RegistryError::PeerTimeout`].
	pub async fn resolve_peers(&self, peers: &[InstanceId], timeout: Option<Duration>) -> Result<Vec<Vec<String>>, RegistryError> {
		let started = Instant::now();
		// A limit too far out to represent means no limit.
		let deadline = timeout.and_then(|t| started.checked_add(t));

		loop {
			let (waiter, woken) = {
				let mut state = self.state.lock();
				if state.shutting_down {
					return Err(RegistryError::ShutdownInProgress);
				}
				if let Some(locations) = state.lookup(peers) {
					return Ok(locations);
				}
				let missing = state.missing(peers).into_iter().collect();
				state.park(missing)
			};
			let _parked = ParkedWaiter { registry: self, id: waiter };

			tokio::select! {
				biased;
				_ = self.shutdown.cancelled() => return Err(RegistryError::ShutdownInProgress),
				_ = woken => {}
				_ = sleep_until(deadline) => {
					let state = self.state.lock();
					if state.lookup(peers).is_none() {
						return Err(RegistryError::PeerTimeout {
							waited: started.elapsed(),
							missing: state.missing(peers),
						});
					}
				}
			}
		}
	}

	/// Fails every pending and future wait with
	/// [`RegistryError::ShutdownInProgress`] and refuses new registrations.
	pub fn shutdown_all(&self) {
		let mut state = self.state.lock();
		state.shutting_down = true;
		state.waiters.clear();
		state.waiting_on.clear();
		drop(state);
		self.shutdown.cancel();
	}

	/// Returns true once [`Self::shutdown_all`] has been called.
	pub fn is_shutting_down(&self) -> bool {
		self.shutdown.is_cancelled()
	}

	/// Resolves once every expected instance has registered and then
	/// deregistered. Never resolves if no instances are expected.
	pub async fn wait_run_complete(&self) {
		let mut done = self.complete.subscribe();
		let _ = done.wait_for(|complete| *complete).await;
	}

	/// Returns true if the instance is currently registered.
	pub fn contains(&self, instance: &InstanceId) -> bool {
		self.state.lock().entries.contains_key(instance)
	}

	/// Returns the entry of a registered instance.
	pub fn get(&self, instance: &InstanceId) -> Option<RegistryEntry> {
		self.state.lock().entries.get(instance).cloned()
	}

	/// Number of registered instances.
	pub fn len(&self) -> usize {
		self.state.lock().entries.len()
	}

	/// Returns true if nothing is registered.
	pub fn is_empty(&self) -> bool {
		self.state.lock().entries.is_empty()
	}

	/// Number of callers currently parked in [`Self::resolve_peers`].
	pub fn pending_waits(&self) -> usize {
		self.state.lock().waiters.len()
	}
}

async fn sleep_until(deadline: Option<Instant>) {
	match deadline {
		Some(deadline) => tokio::time::sleep_until(deadline).await,
		None => std::future::pending().await,
	}
}
