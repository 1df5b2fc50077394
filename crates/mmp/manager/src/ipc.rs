//! TCP transport for the manager protocol.

use std::io;
use std::sync::Arc;

use mmp_proto::MmpProtocol;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};
use tokio::net::{TcpListener, ToSocketAddrs};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::server::MmpServer;
use crate::service::MmpService;

/// Binds the manager listener.
///
/// # Errors
///
/// Returns an error if the address cannot be bound.
pub async fn bind(addr: impl ToSocketAddrs) -> io::Result<TcpListener> {
	TcpListener::bind(addr).await
}

/// Accepts instance connections until `shutdown` fires.
///
/// On shutdown every pending peer wait is failed first, then open
/// connections get to flush the resulting error responses before the
/// function returns.
///
/// # Errors
///
/// Returns an error if the listener's address cannot be read.
pub async fn serve(listener: TcpListener, server: Arc<MmpServer>, shutdown: CancellationToken) -> io::Result<()> {
	tracing::info!(addr = %listener.local_addr()?, model = server.model_name(), "manager listening");

	let mut connections = JoinSet::new();
	loop {
		tokio::select! {
			_ = shutdown.cancelled() => {
				server.shutdown_all();
				break;
			}
			res = listener.accept() => {
				match res {
					Ok((stream, peer)) => {
						if let Err(error) = stream.set_nodelay(true) {
							tracing::debug!(%peer, %error, "failed to disable nagle");
						}
						tracing::debug!(%peer, "instance connected");
						connections.spawn(handle_connection(stream, server.clone(), shutdown.clone()));
					}
					Err(error) => {
						tracing::error!(%error, "failed to accept connection");
					}
				}
			}
			Some(res) = connections.join_next(), if !connections.is_empty() => {
				if let Err(error) = res
					&& error.is_panic()
				{
					tracing::error!(%error, "connection handler panicked");
				}
			}
		}
	}

	drop(listener);
	while connections.join_next().await.is_some() {}
	server.close();
	tracing::info!("manager stopped");
	Ok(())
}

/// Serves one instance connection.
///
/// Requests are handled concurrently; responses are written as they complete
/// and matched by id on the other side. A request that does not decode is
/// answered with `InvalidArgs` and the connection stays open.
pub async fn handle_connection<S>(stream: S, server: Arc<MmpServer>, shutdown: CancellationToken)
where
	S: AsyncRead + AsyncWrite + Send + 'static,
{
	let (reader, writer) = tokio::io::split(stream);
	let service = MmpService::new(server);
	match mmp_rpc::serve_connection(MmpProtocol::new(), BufReader::new(reader), writer, service, shutdown).await {
		Ok(()) => tracing::debug!("instance connection closed"),
		Err(error) => tracing::warn!(%error, "instance connection failed"),
	}
}
