use std::io::ErrorKind as IoErrorKind;
use std::time::Duration;

use mmp_proto::settings::SettingTypeError;
use mmp_proto::{ErrorCode, ErrorKind, ErrorReply};
use thiserror::Error;

/// Failure of a manager call.
#[derive(Debug, Error)]
pub enum ClientError {
	/// The manager could not be reached, or the connection failed before a
	/// response arrived, on every attempt.
	#[error("manager unreachable after {attempts} attempt(s): {source}")]
	Transport {
		/// Connection attempts made.
		attempts: u32,
		/// Last transport failure.
		#[source]
		source: mmp_rpc::Error,
	},

	/// The manager answered with a failure.
	#[error("manager rejected {operation} ({code:?}): {message}")]
	Manager {
		/// The rejected operation.
		operation: &'static str,
		/// Machine readable failure.
		code: ErrorCode,
		/// Diagnostic naming the offending instance or conduit.
		message: String,
	},

	/// No response arrived in time. The connection was dropped.
	#[error("no response to {operation} within {waited:?}")]
	Timeout {
		/// The operation that timed out.
		operation: &'static str,
		/// How long the client waited.
		waited: Duration,
	},

	/// The manager answered with a payload that does not fit the call.
	#[error("unexpected response to {0}")]
	UnexpectedResponse(&'static str),

	/// A setting exists but has a different type.
	#[error(transparent)]
	SettingType(#[from] SettingTypeError),
}

impl ClientError {
	pub(crate) fn from_reply(operation: &'static str, reply: ErrorReply) -> Self {
		Self::Manager {
			operation,
			code: reply.code,
			message: reply.message,
		}
	}

	/// Failure code reported by the manager, if it answered.
	pub fn code(&self) -> Option<ErrorCode> {
		match self {
			Self::Manager { code, .. } => Some(*code),
			_ => None,
		}
	}

	/// Failure class reported by the manager, if it answered.
	pub fn kind(&self) -> Option<ErrorKind> {
		self.code().map(ErrorCode::kind)
	}
}

/// Returns true if the call may be repeated on a fresh connection.
pub(crate) fn is_transient(error: &mmp_rpc::Error) -> bool {
	match error {
		mmp_rpc::Error::Io(e) if e.kind() == IoErrorKind::ConnectionRefused => true,
		other => other.is_disconnect(),
	}
}
