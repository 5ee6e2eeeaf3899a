//! In-memory storage backend.
//!
//! Used for tests and for single-process simulations of a settlement chain.
//! State is lost when the process exits.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use settler_types::{ConfigSchema, Schema, ValidationError};

pub const NAME: &str = "memory";

pub struct MemoryStorage {
	store: DashMap<String, Vec<u8>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self {
			store: DashMap::new(),
		}
	}

	/// Number of stored keys.
	pub fn len(&self) -> usize {
		self.store.len()
	}

	pub fn is_empty(&self) -> bool {
		self.store.is_empty()
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		self.store
			.get(key)
			.map(|entry| entry.value().clone())
			.ok_or_else(|| StorageError::NotFound(key.to_string()))
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		self.store.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		self.store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.store.contains_key(key))
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// The memory backend takes no configuration.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(format!("Invalid configuration: {}", e)))?;

	Ok(Box::new(MemoryStorage::new()))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		storage.set_bytes("key", b"value".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes("key").await.unwrap(), b"value".to_vec());
		assert!(storage.exists("key").await.unwrap());

		storage.delete("key").await.unwrap();
		assert!(!storage.exists("key").await.unwrap());
		assert!(matches!(
			storage.get_bytes("key").await,
			Err(StorageError::NotFound(_))
		));
		assert!(storage.is_empty());
	}

	#[tokio::test]
	async fn test_delete_missing_key_is_ok() {
		let storage = MemoryStorage::new();
		assert!(storage.delete("missing").await.is_ok());
	}
}
