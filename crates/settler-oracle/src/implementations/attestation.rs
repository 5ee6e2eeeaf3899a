//! Oracle fed by a cross-chain message bridge.
//!
//! A bridge adapter delivers fill descriptions emitted by a remote output
//! settler. Each payload is decoded, hashed and recorded in the injected
//! [`ProofStore`]; cross-chain proof records are then affirmed by lookup.

use crate::{AttestationKey, OracleError, OracleInterface, ProofRecord, ProofStore};
use async_trait::async_trait;
use settler_storage::Chain;
use settler_types::{keccak256, Address, Bytes, CallContext, FillDescription, FillEvent, B256, U256};
use std::sync::Arc;
use tracing::info;

pub struct AttestationOracle {
	address: Address,
	chain: Chain,
	/// Only account allowed to deliver messages.
	bridge: Address,
	store: Arc<dyn ProofStore>,
}

impl AttestationOracle {
	pub fn new(address: Address, chain: Chain, bridge: Address, store: Arc<dyn ProofStore>) -> Self {
		Self {
			address,
			chain,
			bridge,
			store,
		}
	}

	/// Records the fill descriptions `payloads` sent by `remote_oracle` on
	/// `source_chain_id` about output settler `application`.
	pub async fn receive_message(
		&self,
		ctx: &CallContext,
		source_chain_id: U256,
		remote_oracle: B256,
		application: B256,
		payloads: &[Bytes],
	) -> Result<Vec<B256>, OracleError> {
		self.chain
			.execute(async {
				if ctx.caller != self.bridge {
					return Err(OracleError::NotAuthorized(format!(
						"{} is not the bridge of oracle {}",
						ctx.caller, self.address
					)));
				}

				let mut hashes = Vec::with_capacity(payloads.len());
				for payload in payloads {
					FillDescription::decode(payload)
						.map_err(|e| OracleError::InvalidPayload(e.to_string()))?;
					let payload_hash = keccak256(payload);
					self.store
						.attest(&AttestationKey {
							remote_chain_id: source_chain_id,
							remote_oracle,
							application,
							payload_hash,
						})
						.await?;
					self.chain.events().stage(FillEvent::AttestationReceived {
						oracle: self.address,
						remote_chain_id: source_chain_id,
						remote_oracle,
						payload_hash,
					});
					hashes.push(payload_hash);
				}

				info!(oracle = %self.address, chain = %source_chain_id, count = hashes.len(), "Attestations received");
				Ok(hashes)
			})
			.await
	}
}

#[async_trait]
impl OracleInterface for AttestationOracle {
	fn address(&self) -> Address {
		self.address
	}

	async fn is_proven(&self, record: &ProofRecord) -> Result<bool, OracleError> {
		match record {
			ProofRecord::CrossChain {
				chain_id,
				oracle,
				settler,
				fill_hash,
			} => {
				self.store
					.is_attested(&AttestationKey {
						remote_chain_id: *chain_id,
						remote_oracle: *oracle,
						application: *settler,
						payload_hash: *fill_hash,
					})
					.await
			}
			ProofRecord::Local { .. } => Ok(false),
		}
	}
}
