//! Signature transfer contract (Permit2 style, batch permits with witness).

use crate::{CustodyError, SignatureTransferInterface, TokenInterface, TransferDetails};
use async_trait::async_trait;
use settler_storage::Chain;
use settler_types::standards::permit2::{permit2_domain, permit_batch_witness_digest, PermitBatchTransferFrom};
use settler_types::{verify_signer, Address, CallContext, B256, U256};
use std::sync::Arc;
use tracing::debug;

const NONCES: &str = "permit2_nonces";

pub struct SignatureTransfer {
	address: Address,
	chain: Chain,
	tokens: Arc<dyn TokenInterface>,
}

impl SignatureTransfer {
	/// Token owners must approve `address` on the token ledger.
	pub fn new(address: Address, chain: Chain, tokens: Arc<dyn TokenInterface>) -> Self {
		Self { address, chain, tokens }
	}

	pub fn domain(&self) -> alloy_sol_types::Eip712Domain {
		permit2_domain(self.chain.chain_id(), self.address)
	}

	pub async fn is_nonce_used(&self, owner: Address, nonce: U256) -> Result<bool, CustodyError> {
		Ok(self.chain.storage().exists(NONCES, &format!("{}:{}", owner, nonce)).await?)
	}
}

#[async_trait]
impl SignatureTransferInterface for SignatureTransfer {
	fn address(&self) -> Address {
		self.address
	}

	async fn permit_witness_transfer_from(
		&self,
		ctx: &CallContext,
		permit: &PermitBatchTransferFrom,
		transfers: &[TransferDetails],
		owner: Address,
		witness: B256,
		witness_type: &str,
		signature: &[u8],
	) -> Result<(), CustodyError> {
		self.chain
			.execute(async {
				if U256::from(ctx.timestamp) > permit.deadline {
					return Err(CustodyError::Expired {
						deadline: permit.deadline,
						now: ctx.timestamp,
					});
				}
				if permit.permitted.len() != transfers.len() {
					return Err(CustodyError::InvalidRequest(format!(
						"{} permitted tokens but {} transfers",
						permit.permitted.len(),
						transfers.len()
					)));
				}
				if self.is_nonce_used(owner, permit.nonce).await? {
					return Err(CustodyError::NonceUsed);
				}

				let digest = permit_batch_witness_digest(&self.domain(), permit, ctx.caller, witness, witness_type);
				verify_signer(owner, digest, signature)?;

				self.chain
					.storage()
					.store(NONCES, &format!("{}:{}", owner, permit.nonce), &true)
					.await?;

				let as_permit2 = ctx.with_caller(self.address);
				for (permission, transfer) in permit.permitted.iter().zip(transfers) {
					if transfer.requested_amount > permission.amount {
						return Err(CustodyError::InvalidRequest(format!(
							"requested {} of {} but only {} permitted",
							transfer.requested_amount, permission.token, permission.amount
						)));
					}
					if transfer.requested_amount.is_zero() {
						continue;
					}
					self.tokens
						.transfer_from(&as_permit2, permission.token, owner, transfer.to, transfer.requested_amount)
						.await?;
				}

				debug!(%owner, spender = %ctx.caller, nonce = %permit.nonce, "Permit consumed");
				Ok(())
			})
			.await
	}
}
