//! Storage-backed multi-token ledger.
//!
//! Implements plain transfers with allowances and EIP-3009 receive
//! authorizations. A transfer hook can be installed to observe (or re-enter
//! from) every balance movement, the way callback-enabled tokens do.

use crate::{AuthorizedTransferInterface, CustodyError, TokenInterface};
use async_trait::async_trait;
use settler_storage::Chain;
use settler_types::standards::eip712;
use settler_types::{verify_signer, Address, CallContext, B256, U256};
use std::sync::{Arc, PoisonError, RwLock};
use tracing::debug;

/// EIP-712 domain name under which token authorizations are signed.
pub const AUTHORIZATION_DOMAIN_NAME: &str = "OIF Token";

const BALANCES: &str = "token_balances";
const ALLOWANCES: &str = "token_allowances";
const AUTHORIZATIONS: &str = "token_authorizations";

/// Observer of balance movements.
#[async_trait]
pub trait TransferHook: Send + Sync {
	async fn on_transfer(&self, token: Address, from: Address, to: Address, amount: U256) -> Result<(), CustodyError>;
}

pub struct TokenLedger {
	chain: Chain,
	hook: RwLock<Option<Arc<dyn TransferHook>>>,
}

impl TokenLedger {
	pub fn new(chain: Chain) -> Self {
		Self {
			chain,
			hook: RwLock::new(None),
		}
	}

	pub fn set_transfer_hook(&self, hook: Option<Arc<dyn TransferHook>>) {
		*self.hook.write().unwrap_or_else(PoisonError::into_inner) = hook;
	}

	/// Creates `amount` new tokens for `to`.
	pub async fn mint(&self, token: Address, to: Address, amount: U256) -> Result<(), CustodyError> {
		self.chain
			.execute(async {
				let balance = self.balance(token, to).await?;
				let updated = balance.checked_add(amount).ok_or(CustodyError::Overflow)?;
				self.set_balance(token, to, updated).await?;
				debug!(%token, %to, %amount, "Minted tokens");
				Ok(())
			})
			.await
	}

	/// EIP-712 domain of `token`'s authorizations.
	pub fn authorization_domain(&self, token: Address) -> alloy_sol_types::Eip712Domain {
		eip712::domain(AUTHORIZATION_DOMAIN_NAME, self.chain.chain_id(), token)
	}

	fn balance_key(token: Address, account: Address) -> String {
		format!("{}:{}", token, account)
	}

	fn allowance_key(token: Address, owner: Address, spender: Address) -> String {
		format!("{}:{}:{}", token, owner, spender)
	}

	async fn balance(&self, token: Address, account: Address) -> Result<U256, CustodyError> {
		Ok(self
			.chain
			.storage()
			.retrieve_optional(BALANCES, &Self::balance_key(token, account))
			.await?
			.unwrap_or_default())
	}

	async fn set_balance(&self, token: Address, account: Address, amount: U256) -> Result<(), CustodyError> {
		let key = Self::balance_key(token, account);
		if amount.is_zero() {
			self.chain.storage().remove(BALANCES, &key).await?;
		} else {
			self.chain.storage().store(BALANCES, &key, &amount).await?;
		}
		Ok(())
	}

	async fn move_balance(&self, token: Address, from: Address, to: Address, amount: U256) -> Result<(), CustodyError> {
		let available = self.balance(token, from).await?;
		if available < amount {
			return Err(CustodyError::InsufficientBalance {
				token,
				account: from,
				needed: amount,
				available,
			});
		}
		self.set_balance(token, from, available - amount).await?;
		let received = self.balance(token, to).await?;
		self.set_balance(token, to, received.checked_add(amount).ok_or(CustodyError::Overflow)?)
			.await?;

		let hook = self.hook.read().unwrap_or_else(PoisonError::into_inner).clone();
		if let Some(hook) = hook {
			hook.on_transfer(token, from, to, amount).await?;
		}
		Ok(())
	}
}

#[async_trait]
impl TokenInterface for TokenLedger {
	async fn balance_of(&self, token: Address, account: Address) -> Result<U256, CustodyError> {
		self.balance(token, account).await
	}

	async fn allowance(&self, token: Address, owner: Address, spender: Address) -> Result<U256, CustodyError> {
		Ok(self
			.chain
			.storage()
			.retrieve_optional(ALLOWANCES, &Self::allowance_key(token, owner, spender))
			.await?
			.unwrap_or_default())
	}

	async fn approve(&self, ctx: &CallContext, token: Address, spender: Address, amount: U256) -> Result<(), CustodyError> {
		self.chain
			.execute(async {
				self.chain
					.storage()
					.store(ALLOWANCES, &Self::allowance_key(token, ctx.caller, spender), &amount)
					.await?;
				Ok(())
			})
			.await
	}

	async fn transfer(&self, ctx: &CallContext, token: Address, to: Address, amount: U256) -> Result<(), CustodyError> {
		self.chain
			.execute(self.move_balance(token, ctx.caller, to, amount))
			.await
	}

	async fn transfer_from(
		&self,
		ctx: &CallContext,
		token: Address,
		from: Address,
		to: Address,
		amount: U256,
	) -> Result<(), CustodyError> {
		self.chain
			.execute(async {
				let allowance = self.allowance(token, from, ctx.caller).await?;
				if allowance < amount {
					return Err(CustodyError::InsufficientAllowance {
						token,
						owner: from,
						spender: ctx.caller,
						needed: amount,
						available: allowance,
					});
				}
				if allowance != U256::MAX {
					self.chain
						.storage()
						.store(ALLOWANCES, &Self::allowance_key(token, from, ctx.caller), &(allowance - amount))
						.await?;
				}
				self.move_balance(token, from, to, amount).await
			})
			.await
	}
}

#[async_trait]
impl AuthorizedTransferInterface for TokenLedger {
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
	) -> Result<(), CustodyError> {
		self.chain
			.execute(async {
				if ctx.caller != to {
					return Err(CustodyError::NotAuthorized(format!("caller {} is not the payee {}", ctx.caller, to)));
				}
				let now = U256::from(ctx.timestamp);
				if now <= valid_after {
					return Err(CustodyError::NotYetValid {
						valid_after,
						now: ctx.timestamp,
					});
				}
				if now >= valid_before {
					return Err(CustodyError::Expired {
						deadline: valid_before,
						now: ctx.timestamp,
					});
				}

				let nonce_key = format!("{}:{}:{}", token, from, nonce);
				if self.chain.storage().exists(AUTHORIZATIONS, &nonce_key).await? {
					return Err(CustodyError::NonceUsed);
				}

				let authorization = eip712::ReceiveWithAuthorization {
					from,
					to,
					value,
					validAfter: valid_after,
					validBefore: valid_before,
					nonce,
				};
				let digest = eip712::signing_hash(&authorization, &self.authorization_domain(token));
				verify_signer(from, digest, signature)?;

				self.chain.storage().store(AUTHORIZATIONS, &nonce_key, &true).await?;
				self.move_balance(token, from, to, value).await
			})
			.await
	}
}
