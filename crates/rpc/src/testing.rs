//! Echo protocol used by this crate's tests.

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncWrite};

use crate::{CounterIdGen, Error, Inbound, MAX_FRAME_LEN, Protocol};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum Msg {
	Req(EchoRequest),
	Resp(EchoResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EchoRequest {
	pub id: u64,
	pub text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct EchoResponse {
	pub id: u64,
	pub result: Result<String, String>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Echo;

impl Protocol for Echo {
	type Id = u64;
	type Message = Msg;
	type Request = EchoRequest;
	type Response = EchoResponse;
	type ReqResult = String;
	type ReqError = String;
	type LoopError = Error;
	type IdGen = CounterIdGen;

	fn next_id(id_gen: &mut Self::IdGen) -> Self::Id {
		id_gen.next()
	}

	async fn read_message(&mut self, input: &mut (impl AsyncBufRead + Unpin + Send)) -> Result<Msg, Error> {
		crate::read_frame(input, MAX_FRAME_LEN).await
	}

	async fn write_message(&mut self, output: &mut (impl AsyncWrite + Unpin + Send), msg: &Msg) -> Result<(), Error> {
		crate::write_frame(output, msg, MAX_FRAME_LEN).await
	}

	fn split_inbound(msg: Msg) -> Inbound<EchoRequest, EchoResponse> {
		match msg {
			Msg::Req(req) => Inbound::Request(req),
			Msg::Resp(resp) => Inbound::Response(resp),
		}
	}

	fn request_id(req: &EchoRequest) -> u64 {
		req.id
	}

	fn set_request_id(req: &mut EchoRequest, id: u64) {
		req.id = id;
	}

	fn response_id(resp: &EchoResponse) -> u64 {
		resp.id
	}

	fn wrap_request(req: EchoRequest) -> Msg {
		Msg::Req(req)
	}

	fn wrap_response(resp: EchoResponse) -> Msg {
		Msg::Resp(resp)
	}

	fn response_ok(id: u64, result: String) -> EchoResponse {
		EchoResponse { id, result: Ok(result) }
	}

	fn response_err(id: u64, error: String) -> EchoResponse {
		EchoResponse { id, result: Err(error) }
	}

	fn is_disconnect(err: &Error) -> bool {
		err.is_disconnect()
	}

	fn reject_malformed(err: &Error) -> Option<EchoResponse> {
		matches!(err, Error::Malformed { .. }).then(|| EchoResponse {
			id: u64::MAX,
			result: Err("malformed".into()),
		})
	}
}

pub(crate) fn request(id: u64, text: &str) -> Msg {
	Msg::Req(EchoRequest { id, text: text.into() })
}

/// Upper-cases text. `"fail"` is refused and `"park"` never finishes.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct EchoService;

impl tower_service::Service<EchoRequest> for EchoService {
	type Response = String;
	type Error = String;
	type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<String, String>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), String>> {
		std::task::Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: EchoRequest) -> Self::Future {
		Box::pin(async move {
			match req.text.as_str() {
				"fail" => Err("refused".to_string()),
				"park" => std::future::pending().await,
				text => Ok(text.to_uppercase()),
			}
		})
	}
}
