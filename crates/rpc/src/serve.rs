//! Serving side of a multiplexed connection.

use std::fmt::Display;

use tokio::io::{AsyncBufRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tower_service::Service;

use crate::protocol::{Inbound, Protocol};

/// Serves requests from `input` until the other side leaves, a frame breaks
/// the stream, or `shutdown` fires.
///
/// Every request runs in its own task, so a slow handler never holds up the
/// ones behind it. Responses go out through a single writer task in
/// completion order. On shutdown reading stops but handlers already running
/// are awaited and answered. When the other side leaves they are aborted.
///
/// # Errors
///
/// Returns the stream failure that ended the connection, other than a
/// disconnect.
pub async fn serve_connection<P, S, R, W>(
	protocol: P,
	mut input: R,
	mut output: W,
	service: S,
	shutdown: CancellationToken,
) -> Result<(), P::LoopError>
where
	P: Protocol + Clone,
	S: Service<P::Request, Response = P::ReqResult> + Clone + Send + 'static,
	S::Error: Into<P::ReqError> + Display,
	S::Future: Send + 'static,
	R: AsyncBufRead + Unpin + Send,
	W: AsyncWrite + Unpin + Send + 'static,
{
	let (tx, mut rx) = mpsc::unbounded_channel::<P::Response>();
	let mut writer_protocol = protocol.clone();
	let writer = tokio::spawn(async move {
		while let Some(resp) = rx.recv().await {
			writer_protocol.write_message(&mut output, &P::wrap_response(resp)).await?;
		}
		Ok::<_, P::LoopError>(())
	});

	let mut protocol = protocol;
	let mut in_flight = JoinSet::new();
	let mut peer_gone = false;
	let mut failure = None;

	loop {
		while in_flight.try_join_next().is_some() {}

		let msg = tokio::select! {
			_ = shutdown.cancelled() => break,
			msg = protocol.read_message(&mut input) => msg,
		};
		match msg {
			Ok(msg) => match P::split_inbound(msg) {
				Inbound::Request(req) => {
					let id = P::request_id(&req);
					let mut service = service.clone();
					let tx = tx.clone();
					in_flight.spawn(async move {
						let resp = match service.call(req).await {
							Ok(result) => P::response_ok(id, result),
							Err(error) => {
								tracing::debug!(request = ?id, %error, "request failed");
								P::response_err(id, error.into())
							}
						};
						let _ = tx.send(resp);
					});
				}
				Inbound::Response(resp) => {
					tracing::warn!(request = ?P::response_id(&resp), "ignoring response sent to the serving side");
				}
			},
			Err(error) if P::is_disconnect(&error) => {
				peer_gone = true;
				break;
			}
			Err(error) => match P::reject_malformed(&error) {
				Some(resp) => {
					tracing::warn!(%error, "rejecting malformed request");
					let _ = tx.send(resp);
				}
				None => {
					peer_gone = true;
					failure = Some(error);
					break;
				}
			},
		}
	}

	if peer_gone {
		in_flight.shutdown().await;
	} else {
		while in_flight.join_next().await.is_some() {}
	}
	drop(tx);

	match writer.await {
		Ok(Ok(())) => {}
		Ok(Err(error)) if P::is_disconnect(&error) => {}
		Ok(Err(error)) => {
			failure.get_or_insert(error);
		}
		Err(error) => tracing::error!(%error, "connection writer panicked"),
	}
	failure.map_or(Ok(()), Err)
}
