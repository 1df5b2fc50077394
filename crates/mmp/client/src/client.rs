use std::io;
use std::sync::Arc;
use std::time::Duration;

use mmp_proto::settings::SettingTypeError;
use mmp_proto::{
	Conduit, InstanceId, LogMessage, MmpProtocol, PeerSet, Request, RequestId, RequestPayload, Response, ResponsePayload,
	SettingValue, Settings,
};
use mmp_rpc::{CounterIdGen, PendingRequests, Protocol, route_responses};
use parking_lot::Mutex;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::config::ClientConfig;
use crate::error::{ClientError, is_transient};

/// One live connection to the manager.
///
/// A reader task routes responses to waiting calls by request id. When the
/// stream ends every waiting call is released without a response, and no
/// new call can wait on it.
struct Connection {
	writer: tokio::sync::Mutex<OwnedWriteHalf>,
	pending: Arc<PendingRequests<MmpProtocol>>,
	reader: JoinHandle<()>,
}

impl Drop for Connection {
	fn drop(&mut self) {
		self.reader.abort();
	}
}

impl Connection {
	async fn open(addr: &str) -> io::Result<Self> {
		let stream = TcpStream::connect(addr).await?;
		stream.set_nodelay(true)?;
		let (reader, writer) = stream.into_split();

		let pending = Arc::new(PendingRequests::new());
		let reader = tokio::spawn(read_responses(BufReader::new(reader), pending.clone()));

		Ok(Self {
			writer: tokio::sync::Mutex::new(writer),
			pending,
			reader,
		})
	}

	fn is_closed(&self) -> bool {
		self.pending.is_closed()
	}

	async fn send(&self, req: Request) -> mmp_rpc::Result<oneshot::Receiver<Response>> {
		let id = MmpProtocol::request_id(&req);
		let rx = self
			.pending
			.insert(id)
			.map_err(|closed| io::Error::new(io::ErrorKind::UnexpectedEof, closed))?;

		let mut writer = self.writer.lock().await;
		let written = MmpProtocol::new()
			.write_message(&mut *writer, &MmpProtocol::wrap_request(req))
			.await;
		if written.is_err() {
			self.pending.forget(&id);
		}
		written.map(|()| rx)
	}

	fn forget(&self, id: RequestId) {
		self.pending.forget(&id);
	}
}

async fn read_responses(mut reader: BufReader<OwnedReadHalf>, pending: Arc<PendingRequests<MmpProtocol>>) {
	let error = route_responses(&mut MmpProtocol::new(), &mut reader, &pending).await;
	if !MmpProtocol::is_disconnect(&error) {
		tracing::warn!(%error, "manager connection failed");
	}
}

/// Client stub for the manager protocol.
///
/// Calls may be issued concurrently from several tasks; they share one
/// connection.
pub struct MmpClient {
	addr: String,
	config: ClientConfig,
	conn: tokio::sync::Mutex<Option<Arc<Connection>>>,
	ids: Mutex<CounterIdGen>,
}

impl std::fmt::Debug for MmpClient {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("MmpClient")
			.field("addr", &self.addr)
			.field("config", &self.config)
			.finish_non_exhaustive()
	}
}

impl MmpClient {
	/// Creates a client for the manager at `addr` (`host:port`). Nothing is
	/// connected until the first call.
	#[must_use]
	pub fn new(addr: impl Into<String>, config: ClientConfig) -> Self {
		Self {
			addr: addr.into(),
			config,
			conn: tokio::sync::Mutex::new(None),
			ids: Mutex::new(CounterIdGen::new()),
		}
	}

	/// Address of the manager.
	pub fn addr(&self) -> &str {
		&self.addr
	}

	/// Announces that `instance` is online at `locations`.
	///
	/// # Errors
	///
	/// Returns [`ClientError::Manager`] with `DuplicateRegistration`,
	/// `UnknownElement`, `MultiplicityMismatch` or `ShutdownInProgress`, or a
	/// transport failure.
	pub async fn register_instance(&self, instance: &InstanceId, locations: Vec<String>) -> Result<(), ClientError> {
		let payload = RequestPayload::Register {
			instance: instance.clone(),
			locations,
		};
		match self.call(payload, self.config.request_timeout).await? {
			ResponsePayload::Registered => Ok(()),
			_ => Err(ClientError::UnexpectedResponse("register")),
		}
	}

	/// Announces that `instance` is shutting down.
	///
	/// # Errors
	///
	/// Returns [`ClientError::Manager`] with `UnknownInstance`, or a transport
	/// failure.
	pub async fn deregister_instance(&self, instance: &InstanceId) -> Result<(), ClientError> {
		let payload = RequestPayload::Deregister {
			instance: instance.clone(),
		};
		match self.call(payload, self.config.request_timeout).await? {
			ResponsePayload::Deregistered => Ok(()),
			_ => Err(ClientError::UnexpectedResponse("deregister")),
		}
	}

	/// Asks for the peers of `instance` on `conduits` (all of its conduits if
	/// empty), waiting until every peer has registered.
	///
	/// The wait is bounded by [`ClientConfig::peer_timeout`].
	///
	/// # Errors
	///
	/// Returns [`ClientError::Manager`] with `NotRegistered`,
	/// `UnattachedConduit`, `UnknownElement`, `MultiplicityMismatch`,
	/// `PeerTimeout` or `ShutdownInProgress`, or a transport failure.
	pub async fn request_peers(&self, instance: &InstanceId, conduits: &[Conduit]) -> Result<PeerSet, ClientError> {
		self.request_peers_within(instance, conduits, self.config.peer_timeout).await
	}

	/// Like [`Self::request_peers`] with an explicit wait limit.
	///
	/// # Errors
	///
	/// See [`Self::request_peers`].
	pub async fn request_peers_within(
		&self,
		instance: &InstanceId,
		conduits: &[Conduit],
		timeout: Option<Duration>,
	) -> Result<PeerSet, ClientError> {
		let payload = RequestPayload::RequestPeers {
			instance: instance.clone(),
			conduits: conduits.to_vec(),
			timeout_ms: timeout.map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX)),
		};
		let local = timeout.map(|t| self.config.peer_deadline(t));
		match self.call(payload, local).await? {
			ResponsePayload::Peers(peers) => Ok(peers),
			_ => Err(ClientError::UnexpectedResponse("request_peers")),
		}
	}

	/// Reads one setting.
	///
	/// # Errors
	///
	/// Returns [`ClientError::Manager`] with `UnknownKey`, or a transport
	/// failure.
	pub async fn get_setting(&self, key: &str) -> Result<SettingValue, ClientError> {
		let payload = RequestPayload::GetSettings {
			key: Some(key.to_string()),
		};
		match self.call(payload, self.config.request_timeout).await? {
			ResponsePayload::Setting { value, .. } => Ok(value),
			_ => Err(ClientError::UnexpectedResponse("get_settings")),
		}
	}

	/// Reads one setting as a concrete type.
	///
	/// # Errors
	///
	/// As [`Self::get_setting`], plus [`ClientError::SettingType`] if the
	/// setting has another type.
	pub async fn get_setting_as<T>(&self, key: &str) -> Result<T, ClientError>
	where
		T: TryFrom<SettingValue, Error = SettingTypeError>,
	{
		Ok(T::try_from(self.get_setting(key).await?)?)
	}

	/// Reads every setting of the run.
	///
	/// # Errors
	///
	/// Returns a transport failure.
	pub async fn get_settings(&self) -> Result<Settings, ClientError> {
		match self
			.call(RequestPayload::GetSettings { key: None }, self.config.request_timeout)
			.await?
		{
			ResponsePayload::Settings(settings) => Ok(settings),
			_ => Err(ClientError::UnexpectedResponse("get_settings")),
		}
	}

	/// Sends a log record to the manager.
	///
	/// # Errors
	///
	/// Returns a transport failure.
	pub async fn submit_log_message(&self, message: LogMessage) -> Result<(), ClientError> {
		match self
			.call(RequestPayload::SubmitLogMessage { message }, self.config.request_timeout)
			.await?
		{
			ResponsePayload::LogSubmitted => Ok(()),
			_ => Err(ClientError::UnexpectedResponse("submit_log_message")),
		}
	}

	/// Drops the connection. The next call reconnects.
	pub async fn close(&self) {
		self.conn.lock().await.take();
	}

	async fn call(&self, payload: RequestPayload, timeout: Option<Duration>) -> Result<ResponsePayload, ClientError> {
		let operation = payload.operation();
		let mut attempt = 0;
		loop {
			attempt += 1;
			let error = match self.try_call(payload.clone(), timeout).await {
				Attempt::Answered(resp) => return decode(operation, resp),
				Attempt::TimedOut(waited) => return Err(ClientError::Timeout { operation, waited }),
				Attempt::Failed(error) => error,
			};

			if !is_transient(&error) || attempt > self.config.max_retries {
				return Err(ClientError::Transport {
					attempts: attempt,
					source: error,
				});
			}
			let delay = self.config.backoff(attempt);
			tracing::warn!(addr = %self.addr, operation, attempt, ?delay, %error, "manager call failed, retrying");
			tokio::time::sleep(delay).await;
		}
	}

	async fn try_call(&self, payload: RequestPayload, timeout: Option<Duration>) -> Attempt {
		let conn = match self.connection().await {
			Ok(conn) => conn,
			Err(error) => return Attempt::Failed(error.into()),
		};

		let mut req = Request::new(payload);
		MmpProtocol::set_request_id(&mut req, MmpProtocol::next_id(&mut self.ids.lock()));
		let id = req.id;

		let rx = match conn.send(req).await {
			Ok(rx) => rx,
			Err(error) => {
				self.drop_connection(&conn).await;
				return Attempt::Failed(error);
			}
		};

		let answer = match timeout {
			Some(limit) => match tokio::time::timeout(limit, rx).await {
				Ok(answer) => answer,
				Err(_) => {
					conn.forget(id);
					self.drop_connection(&conn).await;
					return Attempt::TimedOut(limit);
				}
			},
			None => rx.await,
		};

		match answer {
			Ok(resp) => Attempt::Answered(resp),
			Err(_) => {
				self.drop_connection(&conn).await;
				Attempt::Failed(io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before a response").into())
			}
		}
	}

	async fn connection(&self) -> io::Result<Arc<Connection>> {
		let mut slot = self.conn.lock().await;
		if let Some(conn) = &*slot
			&& !conn.is_closed()
		{
			return Ok(conn.clone());
		}

		let conn = Arc::new(Connection::open(&self.addr).await?);
		tracing::debug!(addr = %self.addr, "connected to manager");
		*slot = Some(conn.clone());
		Ok(conn)
	}

	async fn drop_connection(&self, conn: &Arc<Connection>) {
		let mut slot = self.conn.lock().await;
		if slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, conn)) {
			slot.take();
		}
	}
}

enum Attempt {
	Answered(Response),
	TimedOut(Duration),
	Failed(mmp_rpc::Error),
}

fn decode(operation: &'static str, resp: Response) -> Result<ResponsePayload, ClientError> {
	match (resp.payload, resp.error) {
		(_, Some(reply)) => Err(ClientError::from_reply(operation, reply)),
		(Some(payload), None) => Ok(payload),
		(None, None) => Err(ClientError::UnexpectedResponse(operation)),
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicU32, Ordering};

	use mmp_proto::{ErrorCode, ErrorReply, Frame};
	use tokio::net::TcpListener;

	use super::*;

	fn fast_config() -> ClientConfig {
		ClientConfig {
			max_retries: 3,
			initial_backoff: Duration::from_millis(5),
			max_backoff: Duration::from_millis(20),
			request_timeout: Some(Duration::from_secs(2)),
			peer_timeout: None,
		}
	}

	fn macro_id() -> InstanceId {
		InstanceId::scalar("macro").unwrap()
	}

	async fn read_request(stream: &mut BufReader<TcpStream>) -> mmp_rpc::Result<Request> {
		match mmp_rpc::read_frame(stream, mmp_rpc::MAX_FRAME_LEN).await? {
			Frame::Request(req) => Ok(req),
			Frame::Response(_) => panic!("client sent a response"),
		}
	}

	async fn reply(stream: &mut BufReader<TcpStream>, resp: Response) -> mmp_rpc::Result<()> {
		mmp_rpc::write_frame(stream.get_mut(), &Frame::Response(resp), mmp_rpc::MAX_FRAME_LEN).await
	}

	#[tokio::test(flavor = "current_thread")]
	async fn domain_failure_is_not_retried() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let seen = Arc::new(AtomicU32::new(0));
		let counter = seen.clone();
		tokio::spawn(async move {
			loop {
				let (stream, _) = listener.accept().await.unwrap();
				let mut stream = BufReader::new(stream);
				while let Ok(req) = read_request(&mut stream).await {
					counter.fetch_add(1, Ordering::SeqCst);
					let reply_to = MmpProtocol::response_err(
						req.id,
						ErrorReply::new(ErrorCode::DuplicateRegistration, "instance 'macro' is already registered"),
					);
					reply(&mut stream, reply_to).await.unwrap();
				}
			}
		});

		let client = MmpClient::new(addr.to_string(), fast_config());
		let err = client.register_instance(&macro_id(), vec!["tcp:a".into()]).await.unwrap_err();
		assert_eq!(err.code(), Some(ErrorCode::DuplicateRegistration));
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn connection_lost_before_response_is_retried() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let connections = Arc::new(AtomicU32::new(0));
		let counter = connections.clone();
		tokio::spawn(async move {
			loop {
				let (stream, _) = listener.accept().await.unwrap();
				let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
				let mut stream = BufReader::new(stream);
				let Ok(req) = read_request(&mut stream).await else {
					continue;
				};
				if first {
					drop(stream);
					continue;
				}
				reply(&mut stream, MmpProtocol::response_ok(req.id, ResponsePayload::Registered))
					.await
					.unwrap();
			}
		});

		let client = MmpClient::new(addr.to_string(), fast_config());
		client.register_instance(&macro_id(), vec!["tcp:a".into()]).await.unwrap();
		assert_eq!(connections.load(Ordering::SeqCst), 2);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn call_on_a_connection_whose_reader_stopped_fails_fast() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let mut stream = BufReader::new(stream);
			let req = read_request(&mut stream).await.unwrap();
			reply(&mut stream, MmpProtocol::response_ok(req.id, ResponsePayload::Registered))
				.await
				.unwrap();
		});

		let client = MmpClient::new(addr.to_string(), fast_config());
		client.register_instance(&macro_id(), vec!["tcp:a".into()]).await.unwrap();
		let conn = client.conn.lock().await.clone().unwrap();
		tokio::time::timeout(Duration::from_secs(1), async {
			while !conn.is_closed() {
				tokio::task::yield_now().await;
			}
		})
		.await
		.expect("reader never saw the manager leave");

		let err = conn
			.send(Request::new(RequestPayload::GetSettings { key: None }))
			.await
			.unwrap_err();
		assert!(err.is_disconnect(), "{err}");
		assert!(conn.pending.is_empty());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn unreachable_manager_exhausts_retries() {
		let addr = {
			let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
			listener.local_addr().unwrap()
		};

		let client = MmpClient::new(addr.to_string(), fast_config());
		let err = client.get_settings().await.unwrap_err();
		assert!(matches!(err, ClientError::Transport { attempts: 4, .. }), "{err}");
		assert_eq!(err.code(), None);
	}

	#[tokio::test(flavor = "current_thread")]
	async fn timeout_drops_the_connection_without_retrying() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		let requests = Arc::new(AtomicU32::new(0));
		let counter = requests.clone();
		tokio::spawn(async move {
			loop {
				let (stream, _) = listener.accept().await.unwrap();
				let counter = counter.clone();
				tokio::spawn(async move {
					let mut stream = BufReader::new(stream);
					while read_request(&mut stream).await.is_ok() {
						counter.fetch_add(1, Ordering::SeqCst);
					}
				});
			}
		});

		let client = MmpClient::new(addr.to_string(), ClientConfig {
			request_timeout: Some(Duration::from_millis(30)),
			..fast_config()
		});
		let err = client.get_setting("test1").await.unwrap_err();
		assert!(matches!(err, ClientError::Timeout { operation: "get_settings", .. }), "{err}");
		assert_eq!(requests.load(Ordering::SeqCst), 1);
		assert!(client.conn.lock().await.is_none());
	}

	#[tokio::test(flavor = "current_thread")]
	async fn concurrent_calls_share_one_connection() {
		let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
		let addr = listener.local_addr().unwrap();
		tokio::spawn(async move {
			let (stream, _) = listener.accept().await.unwrap();
			let mut stream = BufReader::new(stream);
			let first = read_request(&mut stream).await.unwrap();
			let second = read_request(&mut stream).await.unwrap();
			// Answer in reverse order.
			for req in [second, first] {
				let RequestPayload::GetSettings { key: Some(key) } = req.payload else {
					panic!("unexpected request");
				};
				let value = SettingValue::Str(key.clone());
				reply(&mut stream, MmpProtocol::response_ok(req.id, ResponsePayload::Setting { key, value }))
					.await
					.unwrap();
			}
			let third = read_request(&mut stream).await.unwrap();
			let value = SettingValue::Str("not a number".into());
			reply(&mut stream, MmpProtocol::response_ok(third.id, ResponsePayload::Setting {
				key: "c".into(),
				value,
			}))
			.await
			.unwrap();
		});

		let client = MmpClient::new(addr.to_string(), fast_config());
		let (a, b) = tokio::join!(client.get_setting("a"), client.get_setting("b"));
		assert_eq!(a.unwrap(), SettingValue::Str("a".into()));
		assert_eq!(b.unwrap(), SettingValue::Str("b".into()));

		let typed: Result<i64, _> = client.get_setting_as("c").await;
		assert!(matches!(typed, Err(ClientError::SettingType(_))));
	}
}
