//! The execution environment shared by every contract on one chain.

use crate::{StorageError, StorageService};
use settler_types::{EventBus, U256};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// One chain: its id, its world state and its event log.
///
/// Contracts deployed on the same chain share a `Chain` so that a failed
/// call reverts the state of every contract it touched.
#[derive(Clone)]
pub struct Chain {
	chain_id: U256,
	storage: Arc<StorageService>,
	events: EventBus,
}

impl Chain {
	pub fn new(chain_id: U256, storage: Arc<StorageService>, events: EventBus) -> Self {
		Self {
			chain_id,
			storage,
			events,
		}
	}

	pub fn chain_id(&self) -> U256 {
		self.chain_id
	}

	pub fn storage(&self) -> &StorageService {
		&self.storage
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}

	/// Runs `call` atomically.
	///
	/// State written by `call` (including writes made by nested calls into
	/// other contracts) is reverted and its staged events dropped if it
	/// returns an error. Events are published when the outermost call
	/// commits. Calls must not be interleaved: one top-level call runs to
	/// completion before the next begins.
	pub async fn execute<T, E, F>(&self, call: F) -> Result<T, E>
	where
		F: Future<Output = Result<T, E>>,
		E: From<StorageError> + Display,
	{
		let checkpoint = self.storage.checkpoint();
		let staged = self.events.staged_len();

		match call.await {
			Ok(value) => {
				self.storage.commit(checkpoint)?;
				if checkpoint.is_outermost() {
					let published = self.events.flush();
					tracing::trace!(published, "Call committed");
				}
				Ok(value)
			}
			Err(error) => {
				tracing::debug!(depth = checkpoint.depth(), error = %error, "Call reverted");
				if let Err(revert_error) = self.storage.revert(checkpoint).await {
					tracing::error!(error = %revert_error, "Failed to revert storage checkpoint");
				}
				self.events.discard_from(staged);
				Err(error)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::memory::MemoryStorage;
	use settler_types::{OrderEvent, SettlerEvent, B256};

	fn chain() -> Chain {
		Chain::new(
			U256::from(1),
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			EventBus::new(16),
		)
	}

	fn refunded() -> OrderEvent {
		OrderEvent::Refunded {
			settler: Default::default(),
			order_id: B256::repeat_byte(1),
		}
	}

	#[tokio::test]
	async fn test_failed_call_leaves_no_trace() {
		let chain = chain();
		let mut events = chain.events().subscribe();

		let result: Result<(), StorageError> = chain
			.execute(async {
				chain.storage().store("status", "a", &1u8).await?;
				chain.events().stage(refunded());
				Err(StorageError::Backend("callback failed".into()))
			})
			.await;

		assert!(result.is_err());
		assert!(!chain.storage().exists("status", "a").await.unwrap());
		assert!(events.try_recv().is_err());
	}

	#[tokio::test]
	async fn test_events_published_after_outermost_commit() {
		let chain = chain();
		let mut events = chain.events().subscribe();

		chain
			.execute(async {
				chain
					.execute(async {
						chain.events().stage(refunded());
						Ok::<_, StorageError>(())
					})
					.await?;
				assert!(events.try_recv().is_err());
				Ok::<_, StorageError>(())
			})
			.await
			.unwrap();

		assert_eq!(events.recv().await.unwrap(), SettlerEvent::Order(refunded()));
	}

	#[tokio::test]
	async fn test_inner_failure_can_be_absorbed() {
		let chain = chain();

		chain
			.execute(async {
				chain.storage().store("k", "outer", &1u8).await?;
				let inner: Result<(), StorageError> = chain
					.execute(async {
						chain.storage().store("k", "inner", &2u8).await?;
						Err(StorageError::Backend("proof missing".into()))
					})
					.await;
				assert!(inner.is_err());
				Ok::<_, StorageError>(())
			})
			.await
			.unwrap();

		assert!(chain.storage().exists("k", "outer").await.unwrap());
		assert!(!chain.storage().exists("k", "inner").await.unwrap());
	}
}
