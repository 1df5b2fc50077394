//! Protocol dispatch onto [`MmpServer`].

use std::sync::Arc;
use std::time::Duration;

use mmp_proto::{Request, RequestPayload, ResponsePayload};
use tower_service::Service;

use crate::error::ManagerError;
use crate::server::MmpServer;

/// Per-connection service routing decoded requests to the shared server.
///
/// Connections carry no session state: every request names its instance.
#[derive(Debug, Clone)]
pub struct MmpService {
	server: Arc<MmpServer>,
}

impl MmpService {
	/// Creates a service over the shared server.
	#[must_use]
	pub fn new(server: Arc<MmpServer>) -> Self {
		Self { server }
	}
}

impl Service<Request> for MmpService {
	type Response = ResponsePayload;
	type Error = ManagerError;
	type Future = std::pin::Pin<Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>>;

	fn poll_ready(&mut self, _cx: &mut std::task::Context<'_>) -> std::task::Poll<Result<(), Self::Error>> {
		std::task::Poll::Ready(Ok(()))
	}

	fn call(&mut self, req: Request) -> Self::Future {
		let server = self.server.clone();
		Box::pin(async move {
			match req.payload {
				RequestPayload::Register { instance, locations } => {
					server.register(instance, locations)?;
					Ok(ResponsePayload::Registered)
				}
				RequestPayload::Deregister { instance } => {
					server.deregister(&instance)?;
					Ok(ResponsePayload::Deregistered)
				}
				RequestPayload::RequestPeers {
					instance,
					conduits,
					timeout_ms,
				} => {
					let timeout = timeout_ms.map(Duration::from_millis);
					let peers = server.request_peers(&instance, &conduits, timeout).await?;
					Ok(ResponsePayload::Peers(peers))
				}
				RequestPayload::GetSettings { key: Some(key) } => {
					let value = server.get_setting(&key)?;
					Ok(ResponsePayload::Setting { key, value })
				}
				RequestPayload::GetSettings { key: None } => Ok(ResponsePayload::Settings(server.settings().clone())),
				RequestPayload::SubmitLogMessage { message } => {
					server.submit_log_message(&message);
					Ok(ResponsePayload::LogSubmitted)
				}
			}
		})
	}
}

#[cfg(test)]
mod tests {
	use std::future::poll_fn;

	use mmp_proto::{ErrorCode, InstanceId, LogLevel, LogMessage, Settings, Timestamp};

	use super::*;
	use crate::logger::Logger;
	use crate::model::{ComputeElement, Model};
	use crate::server::ServerConfig;

	fn service() -> MmpService {
		let mut settings = Settings::new();
		settings.insert("test3", "testing").unwrap();
		let model = Model::new("single")
			.with_element(ComputeElement::new("macro", "macro_implementation"))
			.with_settings(settings);
		MmpService::new(MmpServer::new(&model, Logger::new(), ServerConfig::default()).unwrap())
	}

	async fn call(svc: &mut MmpService, payload: RequestPayload) -> Result<ResponsePayload, ManagerError> {
		poll_fn(|cx| svc.poll_ready(cx)).await?;
		svc.call(Request::new(payload)).await
	}

	#[tokio::test(flavor = "current_thread")]
	async fn dispatches_every_operation() {
		let mut svc = service();
		let macro_id = InstanceId::scalar("macro").unwrap();

		let got = call(&mut svc, RequestPayload::Register {
			instance: macro_id.clone(),
			locations: vec!["tcp:127.0.0.1:9001".into()],
		})
		.await;
		assert_eq!(got, Ok(ResponsePayload::Registered));

		let got = call(&mut svc, RequestPayload::RequestPeers {
			instance: macro_id.clone(),
			conduits: Vec::new(),
			timeout_ms: Some(10),
		})
		.await;
		assert!(matches!(got, Ok(ResponsePayload::Peers(set)) if set.peers.is_empty()));

		let got = call(&mut svc, RequestPayload::GetSettings {
			key: Some("test3".into()),
		})
		.await;
		assert_eq!(got, Ok(ResponsePayload::Setting {
			key: "test3".into(),
			value: "testing".into(),
		}));

		let got = call(&mut svc, RequestPayload::GetSettings { key: None }).await;
		assert!(matches!(got, Ok(ResponsePayload::Settings(s)) if s.len() == 1));

		let got = call(&mut svc, RequestPayload::SubmitLogMessage {
			message: LogMessage::new("macro", Timestamp(0.0), LogLevel::Info, "hello"),
		})
		.await;
		assert_eq!(got, Ok(ResponsePayload::LogSubmitted));

		let got = call(&mut svc, RequestPayload::Deregister { instance: macro_id.clone() }).await;
		assert_eq!(got, Ok(ResponsePayload::Deregistered));

		let got = call(&mut svc, RequestPayload::Deregister { instance: macro_id }).await;
		assert_eq!(got.map_err(|e| e.code()), Err(ErrorCode::UnknownInstance));
	}
}
