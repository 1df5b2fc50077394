//! Caller side of a multiplexed connection.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::io::AsyncBufRead;
use tokio::sync::oneshot;

use crate::protocol::{Inbound, Protocol};

/// Calls waiting for their response on one connection.
///
/// Once [`Self::close`] has run no slot can be added, so a caller either gets
/// a receiver that the reader will complete or drop, or an error up front.
pub struct PendingRequests<P: Protocol> {
	state: Mutex<PendingState<P>>,
}

struct PendingState<P: Protocol> {
	waiting: HashMap<P::Id, oneshot::Sender<P::Response>>,
	closed: bool,
}

/// The connection's reader has stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct Closed;

impl<P: Protocol> Default for PendingRequests<P> {
	fn default() -> Self {
		Self::new()
	}
}

impl<P: Protocol> std::fmt::Debug for PendingRequests<P> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		let state = self.state.lock();
		f.debug_struct("PendingRequests")
			.field("waiting", &state.waiting.len())
			.field("closed", &state.closed)
			.finish()
	}
}

impl<P: Protocol> PendingRequests<P> {
	/// Creates an open, empty table.
	#[must_use]
	pub fn new() -> Self {
		Self {
			state: Mutex::new(PendingState {
				waiting: HashMap::new(),
				closed: false,
			}),
		}
	}

	/// Reserves the response slot for `id`.
	///
	/// # Errors
	///
	/// Returns [`Closed`] if the reader has already stopped.
	pub fn insert(&self, id: P::Id) -> Result<oneshot::Receiver<P::Response>, Closed> {
		let mut state = self.state.lock();
		if state.closed {
			return Err(Closed);
		}
		let (tx, rx) = oneshot::channel();
		state.waiting.insert(id, tx);
		Ok(rx)
	}

	/// Hands a response to its caller. Returns false if nobody waits for it.
	pub fn complete(&self, resp: P::Response) -> bool {
		let id = P::response_id(&resp);
		let Some(tx) = self.state.lock().waiting.remove(&id) else {
			return false;
		};
		tx.send(resp).is_ok()
	}

	/// Drops the slot of a caller that gave up.
	pub fn forget(&self, id: &P::Id) {
		self.state.lock().waiting.remove(id);
	}

	/// Refuses new slots and releases every waiting caller without a response.
	pub fn close(&self) {
		let mut state = self.state.lock();
		state.closed = true;
		state.waiting.clear();
	}

	/// Returns true once [`Self::close`] has run.
	pub fn is_closed(&self) -> bool {
		self.state.lock().closed
	}

	/// Number of callers still waiting.
	pub fn len(&self) -> usize {
		self.state.lock().waiting.len()
	}

	/// Returns true if no caller is waiting.
	pub fn is_empty(&self) -> bool {
		self.len() == 0
	}
}

/// Reads responses and completes their callers until the stream fails, then
/// closes the table. Returns the failure that ended the stream.
pub async fn route_responses<P, R>(protocol: &mut P, input: &mut R, pending: &PendingRequests<P>) -> P::LoopError
where
	P: Protocol,
	R: AsyncBufRead + Unpin + Send,
{
	let error = loop {
		match protocol.read_message(input).await {
			Ok(msg) => match P::split_inbound(msg) {
				Inbound::Response(resp) => {
					let id = P::response_id(&resp);
					if !pending.complete(resp) {
						tracing::debug!(request = ?id, "dropping response nobody waits for");
					}
				}
				Inbound::Request(req) => {
					tracing::warn!(request = ?P::request_id(&req), "ignoring request from the serving side");
				}
			},
			Err(error) => break error,
		}
	};
	pending.close();
	error
}
