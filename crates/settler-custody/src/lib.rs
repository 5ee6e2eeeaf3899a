//! Token custody collaborators of the settlement engine.
//!
//! Settlement contracts never hold balances themselves; they move tokens
//! through these interfaces. The implementations keep their state in the
//! chain's journaled storage so that a reverted settlement call also
//! reverts every transfer it made.

use async_trait::async_trait;
use dashmap::DashMap;
use settler_storage::StorageError;
use settler_types::standards::permit2::PermitBatchTransferFrom;
use settler_types::{Address, Bytes, CallContext, Input, SignatureError, B256, U256};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

pub mod implementations {
	pub mod compact;
	pub mod permit2;
	pub mod token;
}

#[derive(Debug, Error)]
pub enum CustodyError {
	#[error("Insufficient balance of {token} for {account}: need {needed}, have {available}")]
	InsufficientBalance {
		token: Address,
		account: Address,
		needed: U256,
		available: U256,
	},
	#[error("Insufficient allowance of {token} from {owner} to {spender}: need {needed}, have {available}")]
	InsufficientAllowance {
		token: Address,
		owner: Address,
		spender: Address,
		needed: U256,
		available: U256,
	},
	#[error("Invalid signature: {0}")]
	Signature(#[from] SignatureError),
	#[error("Authorization expired at {deadline}, now {now}")]
	Expired { deadline: U256, now: u64 },
	#[error("Authorization not valid before {valid_after}, now {now}")]
	NotYetValid { valid_after: U256, now: u64 },
	#[error("Nonce already used")]
	NonceUsed,
	#[error("Not authorized: {0}")]
	NotAuthorized(String),
	#[error("Invalid request: {0}")]
	InvalidRequest(String),
	#[error("Arithmetic overflow")]
	Overflow,
	#[error("Callback failed: {0}")]
	Callback(String),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Multi-token fungible ledger (one ERC20-like balance sheet per token).
#[async_trait]
pub trait TokenInterface: Send + Sync {
	async fn balance_of(&self, token: Address, account: Address) -> Result<U256, CustodyError>;

	async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, CustodyError>;

	async fn approve(&self, ctx: &CallContext, token: Address, spender: Address, amount: U256) -> Result<(), CustodyError>;

	/// Moves `amount` from the caller to `to`.
	async fn transfer(&self, ctx: &CallContext, token: Address, to: Address, amount: U256) -> Result<(), CustodyError>;

	/// Moves `amount` from `from` to `to`, spending the caller's allowance.
	async fn transfer_from(
		&self,
		ctx: &CallContext,
		token: Address,
		from: Address,
		to: Address,
		amount: U256,
	) -> Result<(), CustodyError>;
}

/// EIP-3009 receive authorization, implemented by the token itself.
#[async_trait]
pub trait AuthorizedTransferInterface: Send + Sync {
	/// Moves `value` from `from` to the caller, who must be `to`.
	#[allow(clippy::too_many_arguments)]
	async fn receive_with_authorization(
		&self,
		ctx: &CallContext,
		token: Address,
		from: Address,
		to: Address,
		value: U256,
		valid_after: U256,
		valid_before: U256,
		nonce: B256,
		signature: &[u8],
	) -> Result<(), CustodyError>;
}

/// Recipient and amount of one permitted token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferDetails {
	pub to: Address,
	pub requested_amount: U256,
}

/// Signature-based transfer authorization (Permit2 style).
#[async_trait]
pub trait SignatureTransferInterface: Send + Sync {
	fn address(&self) -> Address;

	/// Pulls the permitted tokens from `owner`, the caller being the spender.
	///
	/// Fails closed on a bad signature, a used nonce or a passed deadline.
	#[allow(clippy::too_many_arguments)]
	async fn permit_witness_transfer_from(
		&self,
		ctx: &CallContext,
		permit: &PermitBatchTransferFrom,
		transfers: &[TransferDetails],
		owner: Address,
		witness: B256,
		witness_type: &str,
		signature: &[u8],
	) -> Result<(), CustodyError>;
}

/// One recipient of a claimed lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
	pub claimant: Address,
	pub amount: U256,
}

/// The split of one locked amount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchClaimComponent {
	pub id: U256,
	pub allocated_amount: U256,
	pub portions: Vec<Component>,
}

/// Claim request submitted by an arbiter to a resource-lock registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchClaim {
	pub allocator_data: Bytes,
	pub sponsor_signature: Bytes,
	pub sponsor: Address,
	pub nonce: U256,
	pub expires: U256,
	pub witness: B256,
	pub witness_type_string: String,
	pub claims: Vec<BatchClaimComponent>,
}

/// External resource-lock registry.
#[async_trait]
pub trait ResourceLockInterface: Send + Sync {
	fn address(&self) -> Address;

	async fn balance_of(&self, owner: Address, id: U256) -> Result<U256, CustodyError>;

	/// Verifies and executes `claim` with the caller as arbiter.
	///
	/// Returns the claim hash.
	async fn batch_claim(&self, ctx: &CallContext, claim: &BatchClaim) -> Result<B256, CustodyError>;
}

/// Destination hook invoked after inputs have been paid out.
#[async_trait]
pub trait InputCallbackInterface: Send + Sync {
	async fn on_inputs_delivered(&self, ctx: &CallContext, inputs: &[Input], payload: &Bytes) -> Result<(), CustodyError>;
}

/// Accounts on this chain that implement [`InputCallbackInterface`].
#[derive(Default)]
pub struct CallbackRegistry {
	callbacks: DashMap<Address, Arc<dyn InputCallbackInterface>>,
}

impl CallbackRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, account: Address, callback: Arc<dyn InputCallbackInterface>) {
		self.callbacks.insert(account, callback);
	}

	/// Invokes the callback of `account`.
	///
	/// An account without a callback cannot accept a payload, so the call
	/// fails like a call to a contract without the hook would.
	pub async fn deliver(
		&self,
		ctx: &CallContext,
		account: Address,
		inputs: &[Input],
		payload: &Bytes,
	) -> Result<(), CustodyError> {
		let callback = self
			.callbacks
			.get(&account)
			.map(|entry| Arc::clone(entry.value()))
			.ok_or_else(|| CustodyError::Callback(format!("{} has no input callback", account)))?;
		callback.on_inputs_delivered(ctx, inputs, payload).await
	}
}
