//! Typed settings values shared by all instances of a run.

use std::fmt;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Type tag of a [`SettingValue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettingType {
	/// Signed 64-bit integer.
	Int,
	/// Double precision real.
	Real,
	/// UTF-8 string.
	Str,
	/// Boolean.
	Bool,
	/// Vector of reals.
	RealVec,
	/// Rectangular matrix of reals.
	RealMatrix,
}

impl SettingType {
	/// Human readable type name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Int => "int",
			Self::Real => "float",
			Self::Str => "str",
			Self::Bool => "bool",
			Self::RealVec => "list of float",
			Self::RealMatrix => "list of list of float",
		}
	}
}

impl fmt::Display for SettingType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A settings value. The set of representable types is closed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SettingValue {
	/// Integer value.
	Int(i64),
	/// Real value.
	Real(f64),
	/// String value.
	Str(String),
	/// Boolean value.
	Bool(bool),
	/// Vector of reals.
	RealVec(Vec<f64>),
	/// Matrix of reals, stored row-major.
	RealMatrix(Vec<Vec<f64>>),
}

impl SettingValue {
	/// Returns the type tag of this value.
	pub const fn kind(&self) -> SettingType {
		match self {
			Self::Int(_) => SettingType::Int,
			Self::Real(_) => SettingType::Real,
			Self::Str(_) => SettingType::Str,
			Self::Bool(_) => SettingType::Bool,
			Self::RealVec(_) => SettingType::RealVec,
			Self::RealMatrix(_) => SettingType::RealMatrix,
		}
	}

	/// Returns false for a matrix whose rows differ in length.
	pub fn is_well_formed(&self) -> bool {
		match self {
			Self::RealMatrix(rows) => rows
				.first()
				.is_none_or(|first| rows.iter().all(|row| row.len() == first.len())),
			_ => true,
		}
	}
}

/// Requested a setting as a type it does not have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("expected a setting of type {expected}, found {found}")]
pub struct SettingTypeError {
	/// Type the caller asked for.
	pub expected: SettingType,
	/// Type actually stored.
	pub found: SettingType,
}

macro_rules! setting_conversions {
	($($variant:ident($ty:ty)),* $(,)?) => {
		$(
			impl From<$ty> for SettingValue {
				fn from(value: $ty) -> Self {
					Self::$variant(value)
				}
			}

			impl TryFrom<SettingValue> for $ty {
				type Error = SettingTypeError;

				fn try_from(value: SettingValue) -> Result<Self, Self::Error> {
					match value {
						SettingValue::$variant(v) => Ok(v),
						other => Err(SettingTypeError {
							expected: SettingType::$variant,
							found: other.kind(),
						}),
					}
				}
			}
		)*
	};
}

setting_conversions! {
	Int(i64),
	Real(f64),
	Str(String),
	Bool(bool),
	RealVec(Vec<f64>),
	RealMatrix(Vec<Vec<f64>>),
}

impl From<&str> for SettingValue {
	fn from(value: &str) -> Self {
		Self::Str(value.to_string())
	}
}

/// Failure to build a [`Settings`] mapping.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SettingsError {
	/// The key was inserted twice.
	#[error("duplicate setting '{0}'")]
	DuplicateKey(String),
	/// A matrix setting has rows of different lengths.
	#[error("setting '{0}' is a ragged matrix")]
	RaggedMatrix(String),
}

/// Ordered mapping from setting name to value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Settings(IndexMap<String, SettingValue>);

impl Settings {
	/// Creates an empty mapping.
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	/// Adds a setting, keeping insertion order.
	///
	/// # Errors
	///
	/// Fails if the key is already present or the value is a ragged matrix.
	pub fn insert(&mut self, key: impl Into<String>, value: impl Into<SettingValue>) -> Result<(), SettingsError> {
		let key = key.into();
		let value = value.into();
		if !value.is_well_formed() {
			return Err(SettingsError::RaggedMatrix(key));
		}
		if self.0.contains_key(&key) {
			return Err(SettingsError::DuplicateKey(key));
		}
		self.0.insert(key, value);
		Ok(())
	}

	/// Looks up a setting.
	pub fn get(&self, key: &str) -> Option<&SettingValue> {
		self.0.get(key)
	}

	/// Number of settings.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if there are no settings.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Iterates over settings in insertion order.
	pub fn iter(&self) -> impl Iterator<Item = (&str, &SettingValue)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}
}
