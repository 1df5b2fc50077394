//! Client side of the MUSCLE manager protocol.
//!
//! Every simulation instance holds one [`MmpClient`]. It keeps a single
//! connection to the manager, multiplexes concurrent calls over it, and
//! reconnects with backoff when the transport fails before a response
//! arrives. A response that reports a failure is returned as is, never
//! retried.

#![warn(missing_docs)]

mod client;
mod config;
mod error;

pub use client::MmpClient;
pub use config::ClientConfig;
pub use error::ClientError;
pub use mmp_proto as proto;
