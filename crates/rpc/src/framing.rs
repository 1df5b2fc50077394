//! Length-prefixed postcard framing.
//!
//! Every frame is a little-endian `u32` payload length followed by the
//! postcard-encoded payload.

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Error, Result};

/// Largest payload accepted in either direction.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Reads one frame and decodes it.
///
/// # Errors
///
/// Returns [`Error::Io`] on stream failure (including EOF before a complete
/// frame), [`Error::FrameTooLarge`] if the announced length exceeds
/// `max_len`, and [`Error::Malformed`] if the payload does not decode.
pub async fn read_frame<T, R>(input: &mut R, max_len: usize) -> Result<T>
where
	T: DeserializeOwned,
	R: AsyncRead + Unpin + Send + ?Sized,
{
	let len = input.read_u32_le().await? as usize;
	if len > max_len {
		return Err(Error::FrameTooLarge { len, max: max_len });
	}

	let mut buf = vec![0u8; len];
	input.read_exact(&mut buf).await?;
	tracing::trace!(len, "rpc.frame.read");
	postcard::from_bytes(&buf).map_err(|source| Error::Malformed { frame: buf, source })
}

/// Encodes one frame and writes it, flushing the stream.
///
/// # Errors
///
/// Returns [`Error::Codec`] if the message cannot be encoded,
/// [`Error::FrameTooLarge`] if the encoded payload exceeds `max_len`, and
/// [`Error::Io`] on stream failure.
pub async fn write_frame<T, W>(output: &mut W, msg: &T, max_len: usize) -> Result<()>
where
	T: Serialize + ?Sized,
	W: AsyncWrite + Unpin + Send + ?Sized,
{
	let buf = postcard::to_allocvec(msg)?;
	let too_large = || Error::FrameTooLarge {
		len: buf.len(),
		max: max_len,
	};
	if buf.len() > max_len {
		return Err(too_large());
	}
	let len = u32::try_from(buf.len()).map_err(|_| too_large())?;

	output.write_u32_le(len).await?;
	output.write_all(&buf).await?;
	output.flush().await?;
	tracing::trace!(len = buf.len(), "rpc.frame.write");
	Ok(())
}
