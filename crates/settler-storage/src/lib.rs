//! Storage module for the OIF settlement engine.
//!
//! All mutable settlement state (order status, claims, purchases, ledger
//! balances, attestations) lives behind a [`StorageService`]. The service
//! journals every write made while a checkpoint is open so that a failed
//! call can be rolled back in full, which is what gives settlement entry
//! points their all-or-nothing semantics.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use settler_types::ConfigSchema;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

pub mod chain;

pub use chain::Chain;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

#[derive(Debug, Error)]
pub enum StorageError {
	#[error("Not found: {0}")]
	NotFound(String),
	#[error("Serialization error: {0}")]
	Serialization(String),
	#[error("Backend error: {0}")]
	Backend(String),
	#[error("Configuration error: {0}")]
	Configuration(String),
	/// A checkpoint was committed or reverted out of nesting order.
	#[error("Journal error: {0}")]
	Journal(String),
}

/// Low-level key/value backend.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deleting a missing key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Schema of this backend's configuration table.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// All backends, by configuration name.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::NAME, file::create_storage as StorageFactory),
		(memory::NAME, memory::create_storage as StorageFactory),
	]
}

/// Builds the backend named `backend` from its configuration table.
pub fn create_storage(backend: &str, config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	let factory = get_all_implementations()
		.into_iter()
		.find(|(name, _)| *name == backend)
		.map(|(_, factory)| factory)
		.ok_or_else(|| StorageError::Configuration(format!("Unknown storage backend '{}'", backend)))?;
	factory(config)
}

/// Position in the write journal returned by [`StorageService::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
	index: usize,
	depth: usize,
}

impl Checkpoint {
	/// Nesting depth of this checkpoint, starting at 1 for the outermost.
	pub fn depth(&self) -> usize {
		self.depth
	}

	pub fn is_outermost(&self) -> bool {
		self.depth == 1
	}
}

struct JournalEntry {
	key: String,
	previous: Option<Vec<u8>>,
}

#[derive(Default)]
struct Journal {
	entries: Vec<JournalEntry>,
	depth: usize,
}

/// Typed, namespaced store with checkpoint / commit / revert.
///
/// Values are JSON encoded and keyed as `namespace:id`. Writes are only
/// journaled while at least one checkpoint is open.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
	journal: Mutex<Journal>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self {
			backend,
			journal: Mutex::new(Journal::default()),
		}
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
		self.journal.lock().unwrap_or_else(PoisonError::into_inner)
	}

	async fn read_raw(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
		match self.backend.get_bytes(key).await {
			Ok(bytes) => Ok(Some(bytes)),
			Err(StorageError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	async fn record(&self, key: &str) -> Result<(), StorageError> {
		if self.journal().depth == 0 {
			return Ok(());
		}
		let previous = self.read_raw(key).await?;
		self.journal().entries.push(JournalEntry {
			key: key.to_string(),
			previous,
		});
		Ok(())
	}

	pub async fn store<T: Serialize>(&self, namespace: &str, id: &str, data: &T) -> Result<(), StorageError> {
		let key = Self::key(namespace, id);
		let bytes = serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.record(&key).await?;
		self.backend.set_bytes(&key, bytes).await
	}

	pub async fn retrieve<T: DeserializeOwned>(&self, namespace: &str, id: &str) -> Result<T, StorageError> {
		let key = Self::key(namespace, id);
		let bytes = self.backend.get_bytes(&key).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Like [`retrieve`](Self::retrieve) but maps a missing key to `None`.
	pub async fn retrieve_optional<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Option<T>, StorageError> {
		match self.retrieve(namespace, id).await {
			Ok(value) => Ok(Some(value)),
			Err(StorageError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		let key = Self::key(namespace, id);
		self.record(&key).await?;
		self.backend.delete(&key).await
	}

	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}

	/// Opens a (possibly nested) checkpoint.
	pub fn checkpoint(&self) -> Checkpoint {
		let mut journal = self.journal();
		journal.depth += 1;
		Checkpoint {
			index: journal.entries.len(),
			depth: journal.depth,
		}
	}

	/// Keeps the writes made since `checkpoint`.
	///
	/// Writes of a committed inner checkpoint stay journaled until the
	/// outermost checkpoint commits, so an outer revert still undoes them.
	pub fn commit(&self, checkpoint: Checkpoint) -> Result<(), StorageError> {
		let mut journal = self.journal();
		Self::close(&mut journal, checkpoint)?;
		if journal.depth == 0 {
			journal.entries.clear();
		}
		Ok(())
	}

	/// Undoes every write made since `checkpoint`, newest first.
	pub async fn revert(&self, checkpoint: Checkpoint) -> Result<(), StorageError> {
		let undo: Vec<JournalEntry> = {
			let mut journal = self.journal();
			Self::close(&mut journal, checkpoint)?;
			journal.entries.drain(checkpoint.index..).collect()
		};

		tracing::debug!(depth = checkpoint.depth, writes = undo.len(), "Reverting storage checkpoint");

		for entry in undo.into_iter().rev() {
			match entry.previous {
				Some(bytes) => self.backend.set_bytes(&entry.key, bytes).await?,
				None => self.backend.delete(&entry.key).await?,
			}
		}
		Ok(())
	}

	fn close(journal: &mut Journal, checkpoint: Checkpoint) -> Result<(), StorageError> {
		if journal.depth != checkpoint.depth || journal.entries.len() < checkpoint.index {
			return Err(StorageError::Journal(format!(
				"checkpoint at depth {} closed while at depth {}",
				checkpoint.depth, journal.depth
			)));
		}
		journal.depth -= 1;
		Ok(())
	}

	/// Number of open checkpoints.
	pub fn depth(&self) -> usize {
		self.journal().depth
	}
}
