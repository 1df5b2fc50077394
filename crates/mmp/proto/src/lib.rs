//! Shared wire types for the MUSCLE manager protocol (MMP).
//!
//! This crate defines the values exchanged between simulation instances and
//! the manager: instance identifiers, conduits, settings, log messages, and
//! the request/response frames. Frames travel as length-prefixed postcard
//! payloads (see [`MmpProtocol`]).

#![warn(missing_docs)]

pub mod logging;
pub mod protocol;
pub mod reference;
pub mod settings;
pub mod types;

pub use logging::{LogLevel, LogMessage, Timestamp};
pub use protocol::MmpProtocol;
pub use reference::{Conduit, Endpoint, InstanceId, ParseError};
pub use settings::{SettingType, SettingValue, Settings, SettingsError};
pub use types::*;
