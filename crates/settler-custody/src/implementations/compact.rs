//! Resource-lock registry (The Compact style).
//!
//! Depositors lock tokens under a lock tag; an arbiter named in a signed
//! batch compact can later split each locked amount between claimants.
//! Claimed portions are released as underlying tokens.

use crate::{BatchClaim, CustodyError, ResourceLockInterface, TokenInterface};
use async_trait::async_trait;
use dashmap::DashMap;
use settler_storage::Chain;
use settler_types::standards::compact::{claim_hash, compact_domain, lock_id, LockCommitment};
use settler_types::standards::eip712::signing_hash_from_struct_hash;
use settler_types::{token_address, verify_signer, Address, CallContext, FixedBytes, B256, U256};
use std::sync::Arc;
use tracing::{debug, info};

const LOCK_BALANCES: &str = "compact_balances";
const NONCES: &str = "compact_nonces";

pub struct ResourceLockRegistry {
	address: Address,
	chain: Chain,
	tokens: Arc<dyn TokenInterface>,
	/// Allocator co-signing claims for each lock tag.
	allocators: DashMap<FixedBytes<12>, Address>,
}

impl ResourceLockRegistry {
	pub fn new(address: Address, chain: Chain, tokens: Arc<dyn TokenInterface>) -> Self {
		Self {
			address,
			chain,
			tokens,
			allocators: DashMap::new(),
		}
	}

	/// Requires claims against locks tagged `lock_tag` to carry a signature
	/// of `allocator` in their allocator data.
	pub fn register_allocator(&self, lock_tag: FixedBytes<12>, allocator: Address) {
		self.allocators.insert(lock_tag, allocator);
	}

	pub fn domain(&self) -> alloy_sol_types::Eip712Domain {
		compact_domain(self.chain.chain_id(), self.address)
	}

	/// Locks `amount` of `token` pulled from the caller in favour of `recipient`.
	///
	/// The caller must have approved the registry. Returns the lock id.
	pub async fn deposit(
		&self,
		ctx: &CallContext,
		lock_tag: FixedBytes<12>,
		token: Address,
		amount: U256,
		recipient: Address,
	) -> Result<U256, CustodyError> {
		self.chain
			.execute(async {
				let id = lock_id(lock_tag, token);
				self.tokens
					.transfer_from(&ctx.with_caller(self.address), token, ctx.caller, self.address, amount)
					.await?;
				let balance = self.lock_balance(recipient, id).await?;
				self.set_lock_balance(recipient, id, balance.checked_add(amount).ok_or(CustodyError::Overflow)?)
					.await?;
				debug!(%recipient, id = %id, %amount, "Deposited into resource lock");
				Ok(id)
			})
			.await
	}

	async fn lock_balance(&self, owner: Address, id: U256) -> Result<U256, CustodyError> {
		Ok(self
			.chain
			.storage()
			.retrieve_optional(LOCK_BALANCES, &format!("{}:{}", owner, id))
			.await?
			.unwrap_or_default())
	}

	async fn set_lock_balance(&self, owner: Address, id: U256, amount: U256) -> Result<(), CustodyError> {
		let key = format!("{}:{}", owner, id);
		if amount.is_zero() {
			self.chain.storage().remove(LOCK_BALANCES, &key).await?;
		} else {
			self.chain.storage().store(LOCK_BALANCES, &key, &amount).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl ResourceLockInterface for ResourceLockRegistry {
	fn address(&self) -> Address {
		self.address
	}

	async fn balance_of(&self, owner: Address, id: U256) -> Result<U256, CustodyError> {
		self.lock_balance(owner, id).await
	}

	async fn batch_claim(&self, ctx: &CallContext, claim: &BatchClaim) -> Result<B256, CustodyError> {
		self.chain
			.execute(async {
				if U256::from(ctx.timestamp) > claim.expires {
					return Err(CustodyError::Expired {
						deadline: claim.expires,
						now: ctx.timestamp,
					});
				}

				let nonce_key = format!("{}:{}", claim.sponsor, claim.nonce);
				if self.chain.storage().exists(NONCES, &nonce_key).await? {
					return Err(CustodyError::NonceUsed);
				}

				let commitments: Vec<LockCommitment> = claim
					.claims
					.iter()
					.map(|component| LockCommitment::from_id(component.id, component.allocated_amount))
					.collect();
				let hash = claim_hash(
					ctx.caller,
					claim.sponsor,
					claim.nonce,
					claim.expires,
					&commitments,
					claim.witness,
					&claim.witness_type_string,
				);
				let digest = signing_hash_from_struct_hash(&self.domain(), hash);
				verify_signer(claim.sponsor, digest, &claim.sponsor_signature)?;

				for commitment in &commitments {
					let allocator = self.allocators.get(&commitment.lock_tag).map(|entry| *entry.value());
					if let Some(allocator) = allocator {
						verify_signer(allocator, digest, &claim.allocator_data)?;
					}
				}

				self.chain.storage().store(NONCES, &nonce_key, &true).await?;

				let as_registry = ctx.with_caller(self.address);
				for component in &claim.claims {
					let portions = component
						.portions
						.iter()
						.try_fold(U256::ZERO, |sum, portion| sum.checked_add(portion.amount))
						.ok_or(CustodyError::Overflow)?;
					if portions != component.allocated_amount {
						return Err(CustodyError::InvalidRequest(format!(
							"portions sum to {} but {} allocated for lock {}",
							portions, component.allocated_amount, component.id
						)));
					}

					let balance = self.lock_balance(claim.sponsor, component.id).await?;
					if balance < component.allocated_amount {
						return Err(CustodyError::InsufficientBalance {
							token: token_address(component.id),
							account: claim.sponsor,
							needed: component.allocated_amount,
							available: balance,
						});
					}
					self.set_lock_balance(claim.sponsor, component.id, balance - component.allocated_amount)
						.await?;

					for portion in &component.portions {
						if portion.amount.is_zero() {
							continue;
						}
						self.tokens
							.transfer(&as_registry, token_address(component.id), portion.claimant, portion.amount)
							.await?;
					}
				}

				info!(claim_hash = %hash, sponsor = %claim.sponsor, arbiter = %ctx.caller, "Batch claim processed");
				Ok(hash)
			})
			.await
	}
}
