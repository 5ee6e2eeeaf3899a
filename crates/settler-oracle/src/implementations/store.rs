//! Proof store backed by the chain's journaled storage.

use crate::{AttestationKey, OracleError, ProofStore};
use async_trait::async_trait;
use settler_storage::Chain;

pub struct StorageProofStore {
	chain: Chain,
	namespace: String,
}

impl StorageProofStore {
	/// Stores attestations under `namespace`, one store per receiving oracle.
	pub fn new(chain: Chain, namespace: impl Into<String>) -> Self {
		Self {
			chain,
			namespace: namespace.into(),
		}
	}

	fn id(key: &AttestationKey) -> String {
		format!(
			"{}:{}:{}:{}",
			key.remote_chain_id, key.remote_oracle, key.application, key.payload_hash
		)
	}
}

#[async_trait]
impl ProofStore for StorageProofStore {
	async fn is_attested(&self, key: &AttestationKey) -> Result<bool, OracleError> {
		Ok(self.chain.storage().exists(&self.namespace, &Self::id(key)).await?)
	}

	async fn attest(&self, key: &AttestationKey) -> Result<(), OracleError> {
		self.chain.storage().store(&self.namespace, &Self::id(key), &true).await?;
		Ok(())
	}
}
