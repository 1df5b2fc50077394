//! Protocol binding consumed by the connection pumps in [`crate::serve`] and
//! [`crate::pending`].

use std::hash::Hash;

use tokio::io::{AsyncBufRead, AsyncWrite};

/// Sequential request id source.
#[derive(Debug, Default, Clone, Copy)]
pub struct CounterIdGen(pub u64);

impl CounterIdGen {
	/// Creates a counter starting at 0.
	#[must_use]
	pub const fn new() -> Self {
		Self(0)
	}

	/// Returns the next id and advances the counter.
	#[allow(clippy::should_implement_trait, reason = "convention")]
	pub fn next(&mut self) -> u64 {
		let id = self.0;
		self.0 += 1;
		id
	}
}

/// Direction of an inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inbound<Req, Resp> {
	/// A call from the other side.
	Request(Req),
	/// An answer to one of our calls.
	Response(Resp),
}

/// Binding between a byte stream and a request/response message format.
///
/// The manager drives it through [`crate::serve_connection`], reading
/// requests and writing responses. Clients correlate answers through
/// [`crate::route_responses`] and a [`crate::PendingRequests`] table.
pub trait Protocol: Send + 'static {
	/// Correlation id shared by a request and its response.
	type Id: Eq + Hash + Clone + std::fmt::Debug + Send + Sync + 'static;

	/// Everything that travels on the stream.
	type Message: Send + 'static;

	/// Outgoing call.
	type Request: Send + 'static;

	/// Answer to a call.
	type Response: Send + 'static;

	/// Successful result produced by a request handler.
	type ReqResult: Send + 'static;

	/// Failure produced by a request handler.
	type ReqError: Send + 'static;

	/// Stream, codec and framing failures.
	type LoopError: From<std::io::Error> + std::fmt::Display + Send + 'static;

	/// State used to mint request ids.
	type IdGen: Send + 'static;

	/// Mints the next request id.
	fn next_id(id_gen: &mut Self::IdGen) -> Self::Id;

	/// Reads one message.
	fn read_message(
		&mut self,
		input: &mut (impl AsyncBufRead + Unpin + Send),
	) -> impl std::future::Future<Output = std::result::Result<Self::Message, Self::LoopError>> + Send;

	/// Writes one message and flushes.
	fn write_message(
		&mut self,
		output: &mut (impl AsyncWrite + Unpin + Send),
		msg: &Self::Message,
	) -> impl std::future::Future<Output = std::result::Result<(), Self::LoopError>> + Send;

	/// Splits a message by direction.
	fn split_inbound(msg: Self::Message) -> Inbound<Self::Request, Self::Response>;

	/// Id of a request.
	fn request_id(req: &Self::Request) -> Self::Id;

	/// Stamps an id onto a request.
	fn set_request_id(req: &mut Self::Request, id: Self::Id);

	/// Id of the request a response answers.
	fn response_id(resp: &Self::Response) -> Self::Id;

	/// Wraps a request for the wire.
	fn wrap_request(req: Self::Request) -> Self::Message;

	/// Wraps a response for the wire.
	fn wrap_response(resp: Self::Response) -> Self::Message;

	/// Builds a successful response.
	fn response_ok(id: Self::Id, result: Self::ReqResult) -> Self::Response;

	/// Builds a failed response.
	fn response_err(id: Self::Id, error: Self::ReqError) -> Self::Response;

	/// Returns true if the error means the other side went away.
	fn is_disconnect(_err: &Self::LoopError) -> bool {
		false
	}

	/// Answer for a frame that arrived whole but did not decode.
	///
	/// Returning `Some` keeps the connection open after sending the answer.
	/// `None` closes it.
	fn reject_malformed(_err: &Self::LoopError) -> Option<Self::Response> {
		None
	}
}
