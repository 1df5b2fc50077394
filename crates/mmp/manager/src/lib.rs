//! MUSCLE manager: topology, instance registry and peer rendezvous for a
//! coupled simulation run.

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod ipc;
pub mod logger;
pub mod model;
pub mod registry;
pub mod server;
pub mod service;
pub mod settings;
pub mod topology;

pub use error::ManagerError;
pub use logger::{FileSink, LogRecord, LogSink, Logger, StreamSink, TracingSink};
pub use mmp_proto as proto;
pub use model::{ComputeElement, Model, ModelError};
pub use server::{MmpServer, ServerConfig};
