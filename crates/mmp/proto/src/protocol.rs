//! Binding of the manager protocol to [`mmp_rpc::Protocol`].

use mmp_rpc::{CounterIdGen, Inbound, MAX_FRAME_LEN, Protocol};
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::types::{ErrorCode, ErrorReply, Frame, Request, RequestId, Response, ResponsePayload};

/// Postcard variant index of [`Frame::Request`].
const REQUEST_TAG: u32 = 0;

/// Recovers the id of a request whose payload did not decode. The frame tag
/// and the id lead the encoding, so they usually survive a bad payload.
fn salvage_request_id(frame: &[u8]) -> Option<RequestId> {
	match postcard::take_from_bytes::<(u32, RequestId)>(frame) {
		Ok(((REQUEST_TAG, id), _)) => Some(id),
		_ => None,
	}
}

/// Postcard framing for [`Frame`]s.
#[derive(Debug, Clone, Copy)]
pub struct MmpProtocol {
	max_frame_len: usize,
}

impl Default for MmpProtocol {
	fn default() -> Self {
		Self::new()
	}
}

impl MmpProtocol {
	/// Creates a protocol binding with the default frame limit.
	#[must_use]
	pub const fn new() -> Self {
		Self {
			max_frame_len: MAX_FRAME_LEN,
		}
	}
}

impl Protocol for MmpProtocol {
	type Id = RequestId;
	type Message = Frame;
	type Request = Request;
	type Response = Response;
	type ReqResult = ResponsePayload;
	type ReqError = ErrorReply;
	type LoopError = mmp_rpc::Error;
	type IdGen = CounterIdGen;

	fn next_id(id_gen: &mut Self::IdGen) -> Self::Id {
		RequestId(id_gen.next())
	}

	async fn read_message(
		&mut self,
		input: &mut (impl AsyncBufRead + Unpin + Send),
	) -> Result<Self::Message, Self::LoopError> {
		mmp_rpc::read_frame(input, self.max_frame_len).await
	}

	async fn write_message(
		&mut self,
		output: &mut (impl AsyncWrite + Unpin + Send),
		msg: &Self::Message,
	) -> Result<(), Self::LoopError> {
		mmp_rpc::write_frame(output, msg, self.max_frame_len).await
	}

	fn split_inbound(msg: Self::Message) -> Inbound<Self::Request, Self::Response> {
		match msg {
			Frame::Request(req) => Inbound::Request(req),
			Frame::Response(resp) => Inbound::Response(resp),
		}
	}

	fn request_id(req: &Self::Request) -> Self::Id {
		req.id
	}

	fn set_request_id(req: &mut Self::Request, id: Self::Id) {
		req.id = id;
	}

	fn response_id(resp: &Self::Response) -> Self::Id {
		resp.request_id
	}

	fn wrap_request(req: Self::Request) -> Self::Message {
		Frame::Request(req)
	}

	fn wrap_response(resp: Self::Response) -> Self::Message {
		Frame::Response(resp)
	}

	fn response_ok(id: Self::Id, result: Self::ReqResult) -> Self::Response {
		Response {
			request_id: id,
			payload: Some(result),
			error: None,
		}
	}

	fn response_err(id: Self::Id, error: Self::ReqError) -> Self::Response {
		Response {
			request_id: id,
			payload: None,
			error: Some(error),
		}
	}

	fn is_disconnect(err: &Self::LoopError) -> bool {
		err.is_disconnect()
	}

	fn reject_malformed(err: &Self::LoopError) -> Option<Self::Response> {
		let mmp_rpc::Error::Malformed { frame, source } = err else {
			return None;
		};
		let id = salvage_request_id(frame).unwrap_or(RequestId(0));
		Some(Self::response_err(
			id,
			ErrorReply::new(ErrorCode::InvalidArgs, format!("malformed request: {source}")),
		))
	}
}
