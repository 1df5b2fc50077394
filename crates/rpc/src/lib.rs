//! Multiplexed request/response connections for the manager protocol.
//!
//! * `Protocol`: Binding of a wire format to request/response semantics
//! * `serve_connection`: Serving pump running one task per request
//! * `PendingRequests` / `route_responses`: Caller side correlation by id
//! * `read_frame` / `write_frame`: Length-prefixed postcard framing

#![warn(missing_docs)]

pub mod error;
pub mod framing;
pub mod pending;
pub mod protocol;
pub mod serve;

#[cfg(test)]
mod testing;

pub use error::{Error, Result};
pub use framing::{MAX_FRAME_LEN, read_frame, write_frame};
pub use pending::{Closed, PendingRequests, route_responses};
pub use protocol::{CounterIdGen, Inbound, Protocol};
pub use serve::serve_connection;
