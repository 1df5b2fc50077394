//! Errors raised while moving frames over a byte stream.

use std::io::ErrorKind;

use thiserror::Error;

/// Failure to read or write a protocol frame.
#[derive(Debug, Error)]
pub enum Error {
	/// The underlying stream failed.
	#[error("I/O error: {0}")]
	Io(#[from] std::io::Error),

	/// A message could not be encoded.
	#[error("codec error: {0}")]
	Codec(#[from] postcard::Error),

	/// A complete frame arrived but its payload did not decode. The stream is
	/// still aligned on a frame boundary.
	#[error("malformed frame of {} bytes: {source}", .frame.len())]
	Malformed {
		/// The raw payload.
		frame: Vec<u8>,
		/// Decoder failure.
		#[source]
		source: postcard::Error,
	},

	/// A frame length exceeded the configured maximum.
	#[error("frame of {len} bytes exceeds the {max} byte limit")]
	FrameTooLarge {
		/// Announced or encoded frame length.
		len: usize,
		/// Maximum accepted frame length.
		max: usize,
	},
}

impl Error {
	/// Returns true if the error means the peer went away.
	///
	/// A clean EOF at a frame boundary, a reset, and a broken pipe all count.
	#[must_use]
	pub fn is_disconnect(&self) -> bool {
		match self {
			Self::Io(e) => matches!(
				e.kind(),
				ErrorKind::UnexpectedEof
					| ErrorKind::ConnectionReset
					| ErrorKind::ConnectionAborted
					| ErrorKind::BrokenPipe
					| ErrorKind::NotConnected
			),
			_ => false,
		}
	}
}

/// Result type for frame operations.
pub type Result<T> = std::result::Result<T, Error>;
