//! TOML model files.
//!
//! ```toml
//! name = "macro_micro"
//!
//! [elements]
//! macro = "macro_implementation"
//! micro = { implementation = "micro_implementation", multiplicity = [10] }
//!
//! [conduits]
//! "macro.out" = "micro.in"
//! "micro.out" = "macro.in"
//!
//! [settings]
//! test1 = 13
//! test6 = [[1.0, 2.0], [3.0, 1.0]]
//! ```

use std::path::{Path, PathBuf};

use indexmap::IndexMap;
use mmp_proto::{Conduit, ParseError, SettingValue, Settings, SettingsError};
use serde::Deserialize;
use thiserror::Error;

use crate::model::{ComputeElement, Model, ModelError};
use crate::topology::TopologyStore;

/// Errors that can occur when loading a model file.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error reading the model file.
	#[error("I/O error reading {path}: {error}")]
	Io {
		/// Path to the file that failed to read.
		path: PathBuf,
		/// The underlying I/O error.
		error: std::io::Error,
	},

	/// Error parsing TOML syntax or structure.
	#[error("TOML parse error: {0}")]
	Toml(#[from] toml::de::Error),

	/// A conduit endpoint is not `element.port`.
	#[error("invalid conduit '{sender}' -> '{receiver}': {error}")]
	Conduit {
		/// Sending endpoint as written.
		sender: String,
		/// Receiving endpoint as written.
		receiver: String,
		/// Why it was rejected.
		error: ParseError,
	},

	/// A setting is malformed.
	#[error(transparent)]
	Settings(#[from] SettingsError),

	/// The model's topology is invalid.
	#[error(transparent)]
	Model(#[from] ModelError),
}

/// Result type for model loading.
pub type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ModelFile {
	name: String,
	#[serde(default)]
	elements: IndexMap<String, ElementEntry>,
	#[serde(default)]
	conduits: IndexMap<String, String>,
	#[serde(default)]
	settings: IndexMap<String, SettingEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ElementEntry {
	Implementation(String),
	Detailed {
		implementation: String,
		#[serde(default)]
		multiplicity: Multiplicity,
	},
}

#[derive(Debug, Default, Deserialize)]
#[serde(untagged)]
enum Multiplicity {
	#[default]
	Scalar,
	Single(u32),
	Dims(Vec<u32>),
}

impl Multiplicity {
	fn into_dims(self) -> Vec<u32> {
		match self {
			Self::Scalar => Vec::new(),
			Self::Single(n) => vec![n],
			Self::Dims(dims) => dims,
		}
	}
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SettingEntry {
	Bool(bool),
	Int(i64),
	Real(f64),
	Str(String),
	RealVec(Vec<f64>),
	RealMatrix(Vec<Vec<f64>>),
}

impl From<SettingEntry> for SettingValue {
	fn from(entry: SettingEntry) -> Self {
		match entry {
			SettingEntry::Bool(v) => Self::Bool(v),
			SettingEntry::Int(v) => Self::Int(v),
			SettingEntry::Real(v) => Self::Real(v),
			SettingEntry::Str(v) => Self::Str(v),
			SettingEntry::RealVec(v) => Self::RealVec(v),
			SettingEntry::RealMatrix(v) => Self::RealMatrix(v),
		}
	}
}

/// Parses and validates a model from TOML text.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the text is not a well-formed model or the
/// model's topology is invalid.
pub fn parse_model(input: &str) -> Result<Model> {
	let file: ModelFile = toml::from_str(input)?;

	let mut model = Model::new(file.name);
	for (name, entry) in file.elements {
		let element = match entry {
			ElementEntry::Implementation(implementation) => ComputeElement::new(name, implementation),
			ElementEntry::Detailed {
				implementation,
				multiplicity,
			} => ComputeElement::new(name, implementation).with_multiplicity(multiplicity.into_dims()),
		};
		model = model.with_element(element);
	}

	for (sender, receiver) in file.conduits {
		let conduit = Conduit::new(&sender, &receiver).map_err(|error| ConfigError::Conduit {
			sender: sender.clone(),
			receiver: receiver.clone(),
			error,
		})?;
		model = model.with_conduit(conduit);
	}

	let mut settings = Settings::new();
	for (key, entry) in file.settings {
		settings.insert(key, SettingValue::from(entry))?;
	}
	model = model.with_settings(settings);

	TopologyStore::new(&model)?;
	Ok(model)
}

/// Reads and parses a model file.
///
/// # Errors
///
/// Returns [`ConfigError::Io`] if the file cannot be read, and otherwise the
/// errors of [`parse_model`].
pub fn load_model(path: &Path) -> Result<Model> {
	let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
		path: path.to_path_buf(),
		error,
	})?;
	let model = parse_model(&input)?;
	tracing::debug!(path = %path.display(), model = %model.name, "loaded model");
	Ok(model)
}
