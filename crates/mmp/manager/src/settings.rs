//! Read-only settings shared by every instance of the run.

use std::sync::Arc;

use mmp_proto::{SettingValue, Settings};

use crate::error::ManagerError;

/// Immutable view of the run's settings. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct SettingsStore {
	settings: Arc<Settings>,
}

impl SettingsStore {
	/// Freezes a settings mapping.
	pub fn new(settings: Settings) -> Self {
		Self {
			settings: Arc::new(settings),
		}
	}

	/// Looks up one setting.
	///
	/// # Errors
	///
	/// Returns [`ManagerError::UnknownKey`] if the key is absent.
	pub fn get(&self, key: &str) -> Result<&SettingValue, ManagerError> {
		self.settings
			.get(key)
			.ok_or_else(|| ManagerError::UnknownKey(key.to_string()))
	}

	/// Every setting, in declaration order.
	pub fn all(&self) -> &Settings {
		&self.settings
	}
}

#[cfg(test)]
mod tests {
	use mmp_proto::SettingType;

	use super::*;

	fn integration_settings() -> Settings {
		let mut settings = Settings::new();
		settings.insert("test1", 13_i64).unwrap();
		settings.insert("test2", 13.3_f64).unwrap();
		settings.insert("test3", "testing").unwrap();
		settings.insert("test4", true).unwrap();
		settings.insert("test5", vec![2.3_f64, 5.6]).unwrap();
		settings.insert("test6", vec![vec![1.0_f64, 2.0], vec![3.0, 1.0]]).unwrap();
		settings
	}

	#[test]
	fn values_keep_their_types() {
		let store = SettingsStore::new(integration_settings());
		assert_eq!(store.get("test1"), Ok(&SettingValue::Int(13)));
		assert_eq!(store.get("test2"), Ok(&SettingValue::Real(13.3)));
		assert_eq!(store.get("test3"), Ok(&SettingValue::Str("testing".into())));
		assert_eq!(store.get("test4"), Ok(&SettingValue::Bool(true)));
		assert_eq!(store.get("test5"), Ok(&SettingValue::RealVec(vec![2.3, 5.6])));
		assert_eq!(store.get("test6").map(SettingValue::kind), Ok(SettingType::RealMatrix));

		let matrix: Vec<Vec<f64>> = store.get("test6").cloned().unwrap().try_into().unwrap();
		assert_eq!(matrix, vec![vec![1.0, 2.0], vec![3.0, 1.0]]);
	}

	#[test]
	fn missing_key_is_reported() {
		let store = SettingsStore::new(integration_settings());
		assert!(matches!(store.get("test7"), Err(ManagerError::UnknownKey(k)) if k == "test7"));
		assert_eq!(store.all().iter().map(|(k, _)| k).collect::<Vec<_>>(), [
			"test1", "test2", "test3", "test4", "test5", "test6"
		]);
	}
}
