//! Solver collateral ledger.
//!
//! Solvers deposit collateral per token. Operators lock part of it against
//! open commitments, release it, or take it away when the solver defaults.
//! Slashing takes the locked amount plus a penalty from what is still
//! available.

use crate::error::{custody_kind, ErrorKind};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use settler_custody::{
	AuthorizedTransferInterface, CustodyError, SignatureTransferInterface, TokenInterface, TransferDetails,
};
use settler_storage::{Chain, StorageError};
use settler_types::standards::permit2::{PermitBatchTransferFrom, TokenPermissions};
use settler_types::{keccak256, Address, Bytes, CallContext, CollateralEvent, B256, BPS_DENOMINATOR, U256};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

const BALANCES: &str = "collateral";

const COLLATERAL_LOCK_TYPE: &str = "CollateralLock(address solver)";

/// Witness type string of signature transfers into the ledger.
pub const COLLATERAL_WITNESS_TYPE_STRING: &str =
	"CollateralLock witness)CollateralLock(address solver)TokenPermissions(address token,uint256 amount)";

#[derive(Debug, Error)]
pub enum CollateralError {
	#[error("{0} is not a collateral operator")]
	NotOperator(Address),
	#[error("Zero collateral amount")]
	ZeroAmount,
	#[error("Solver {solver} has {available} of {token} available, needs {needed}")]
	InsufficientAvailable {
		solver: Address,
		token: Address,
		needed: U256,
		available: U256,
	},
	#[error("Solver {solver} has {locked} of {token} locked, needs {needed}")]
	InsufficientLocked {
		solver: Address,
		token: Address,
		needed: U256,
		locked: U256,
	},
	#[error("Slash of {0} bps exceeds 100%")]
	InvalidSlash(u64),
	#[error("No {0} configured")]
	Unsupported(&'static str),
	#[error("Collateral overflow")]
	Overflow,
	#[error("Custody error: {0}")]
	Custody(#[from] CustodyError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl CollateralError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			CollateralError::NotOperator(_) => ErrorKind::Authorization,
			CollateralError::ZeroAmount
			| CollateralError::InvalidSlash(_)
			| CollateralError::Unsupported(_)
			| CollateralError::Overflow => ErrorKind::Validation,
			CollateralError::InsufficientAvailable { .. } | CollateralError::InsufficientLocked { .. } => {
				ErrorKind::StateConflict
			}
			CollateralError::Custody(e) => custody_kind(e),
			CollateralError::Storage(_) => ErrorKind::Collaborator,
		}
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralBalance {
	pub available: U256,
	pub locked: U256,
}

/// Source of collateral locked in one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Funding {
	/// Pulled from the caller, who approved the ledger.
	Direct,
	/// Signature transfer by `owner` witnessing the solver credited.
	SignatureTransfer {
		owner: Address,
		nonce: U256,
		deadline: U256,
		signature: Bytes,
	},
	/// EIP-3009 receive authorization by `from`.
	ReceiveWithAuthorization {
		from: Address,
		valid_after: U256,
		valid_before: U256,
		nonce: B256,
		signature: Bytes,
	},
}

/// Witness binding a signature transfer to the credited solver.
pub fn collateral_witness(solver: Address) -> B256 {
	keccak256((keccak256(COLLATERAL_LOCK_TYPE), solver).abi_encode())
}

pub struct CollateralLedger {
	address: Address,
	chain: Chain,
	tokens: Arc<dyn TokenInterface>,
	operators: HashSet<Address>,
	signature_transfer: Option<Arc<dyn SignatureTransferInterface>>,
	authorized_transfer: Option<Arc<dyn AuthorizedTransferInterface>>,
}

impl CollateralLedger {
	pub fn new(address: Address, chain: Chain, tokens: Arc<dyn TokenInterface>, operators: impl IntoIterator<Item = Address>) -> Self {
		Self {
			address,
			chain,
			tokens,
			operators: operators.into_iter().collect(),
			signature_transfer: None,
			authorized_transfer: None,
		}
	}

	pub fn with_signature_transfer(mut self, signature_transfer: Arc<dyn SignatureTransferInterface>) -> Self {
		self.signature_transfer = Some(signature_transfer);
		self
	}

	pub fn with_authorized_transfer(mut self, authorized_transfer: Arc<dyn AuthorizedTransferInterface>) -> Self {
		self.authorized_transfer = Some(authorized_transfer);
		self
	}

	pub fn address(&self) -> Address {
		self.address
	}

	pub fn is_operator(&self, account: Address) -> bool {
		self.operators.contains(&account)
	}

	pub async fn balance(&self, solver: Address, token: Address) -> Result<CollateralBalance, CollateralError> {
		Ok(self
			.chain
			.storage()
			.retrieve_optional(BALANCES, &format!("{}:{}", solver, token))
			.await?
			.unwrap_or_default())
	}

	async fn set_balance(&self, solver: Address, token: Address, balance: &CollateralBalance) -> Result<(), CollateralError> {
		let key = format!("{}:{}", solver, token);
		if balance.available.is_zero() && balance.locked.is_zero() {
			self.chain.storage().remove(BALANCES, &key).await?;
		} else {
			self.chain.storage().store(BALANCES, &key, balance).await?;
		}
		Ok(())
	}

	fn require_operator(&self, ctx: &CallContext) -> Result<(), CollateralError> {
		if !self.is_operator(ctx.caller) {
			warn!(caller = %ctx.caller, "Collateral operation by non-operator");
			return Err(CollateralError::NotOperator(ctx.caller));
		}
		Ok(())
	}

	/// Adds `amount` of the caller's tokens to its available collateral.
	pub async fn deposit(&self, ctx: &CallContext, token: Address, amount: U256) -> Result<(), CollateralError> {
		self.chain
			.execute(async {
				if amount.is_zero() {
					return Err(CollateralError::ZeroAmount);
				}
				self.tokens
					.transfer_from(&ctx.with_caller(self.address), token, ctx.caller, self.address, amount)
					.await?;

				let mut balance = self.balance(ctx.caller, token).await?;
				balance.available = balance.available.checked_add(amount).ok_or(CollateralError::Overflow)?;
				self.set_balance(ctx.caller, token, &balance).await?;

				self.chain.events().stage(CollateralEvent::Deposited {
					solver: ctx.caller,
					token,
					amount,
				});
				info!(solver = %ctx.caller, %token, %amount, "Collateral deposited");
				Ok(())
			})
			.await
	}

	/// Returns available collateral to the caller.
	pub async fn withdraw(&self, ctx: &CallContext, token: Address, amount: U256) -> Result<(), CollateralError> {
		self.chain
			.execute(async {
				if amount.is_zero() {
					return Err(CollateralError::ZeroAmount);
				}
				let mut balance = self.balance(ctx.caller, token).await?;
				balance.available = self.take_available(ctx.caller, token, &balance, amount)?;
				self.set_balance(ctx.caller, token, &balance).await?;

				self.tokens
					.transfer(&ctx.with_caller(self.address), token, ctx.caller, amount)
					.await?;

				self.chain.events().stage(CollateralEvent::Withdrawn {
					solver: ctx.caller,
					token,
					amount,
				});
				info!(solver = %ctx.caller, %token, %amount, "Collateral withdrawn");
				Ok(())
			})
			.await
	}

	pub async fn lock(&self, ctx: &CallContext, solver: Address, token: Address, amount: U256) -> Result<(), CollateralError> {
		self.chain
			.execute(async {
				self.require_operator(ctx)?;
				let mut balance = self.balance(solver, token).await?;
				balance.available = self.take_available(solver, token, &balance, amount)?;
				balance.locked = balance.locked.checked_add(amount).ok_or(CollateralError::Overflow)?;
				self.set_balance(solver, token, &balance).await?;

				self.chain
					.events()
					.stage(CollateralEvent::Locked { solver, token, amount });
				info!(%solver, %token, %amount, "Collateral locked");
				Ok(())
			})
			.await
	}

	pub async fn unlock(&self, ctx: &CallContext, solver: Address, token: Address, amount: U256) -> Result<(), CollateralError> {
		self.chain
			.execute(async {
				self.require_operator(ctx)?;
				let mut balance = self.balance(solver, token).await?;
				balance.locked = self.take_locked(solver, token, &balance, amount)?;
				balance.available = balance.available.checked_add(amount).ok_or(CollateralError::Overflow)?;
				self.set_balance(solver, token, &balance).await?;

				self.chain
					.events()
					.stage(CollateralEvent::Unlocked { solver, token, amount });
				info!(%solver, %token, %amount, "Collateral unlocked");
				Ok(())
			})
			.await
	}

	/// Pays `amount` of the solver's locked collateral to `recipient`.
	pub async fn penalize(
		&self,
		ctx: &CallContext,
		solver: Address,
		token: Address,
		amount: U256,
		recipient: Address,
	) -> Result<(), CollateralError> {
		self.chain
			.execute(async {
				self.require_operator(ctx)?;
				let mut balance = self.balance(solver, token).await?;
				balance.locked = self.take_locked(solver, token, &balance, amount)?;
				self.set_balance(solver, token, &balance).await?;

				self.tokens
					.transfer(&ctx.with_caller(self.address), token, recipient, amount)
					.await?;

				self.chain.events().stage(CollateralEvent::Penalized {
					solver,
					token,
					amount,
					recipient,
				});
				info!(%solver, %token, %amount, %recipient, "Collateral penalized");
				Ok(())
			})
			.await
	}

	/// Pays `amount` of locked collateral plus `slash_bps` of the available
	/// balance, capped at what is available, to `recipient`.
	///
	/// Returns the extra amount slashed from available collateral.
	pub async fn slash(
		&self,
		ctx: &CallContext,
		solver: Address,
		token: Address,
		amount: U256,
		slash_bps: u64,
		recipient: Address,
	) -> Result<U256, CollateralError> {
		self.chain
			.execute(async {
				self.require_operator(ctx)?;
				if slash_bps > BPS_DENOMINATOR {
					return Err(CollateralError::InvalidSlash(slash_bps));
				}
				let mut balance = self.balance(solver, token).await?;
				balance.locked = self.take_locked(solver, token, &balance, amount)?;

				let penalty = balance
					.available
					.checked_mul(U256::from(slash_bps))
					.ok_or(CollateralError::Overflow)?
					/ U256::from(BPS_DENOMINATOR);
				let slashed = penalty.min(balance.available);
				balance.available -= slashed;
				self.set_balance(solver, token, &balance).await?;

				let total = amount.checked_add(slashed).ok_or(CollateralError::Overflow)?;
				self.tokens
					.transfer(&ctx.with_caller(self.address), token, recipient, total)
					.await?;

				self.chain.events().stage(CollateralEvent::Slashed {
					solver,
					token,
					locked_amount: amount,
					slashed_amount: slashed,
					recipient,
				});
				info!(%solver, %token, locked = %amount, %slashed, %recipient, "Collateral slashed");
				Ok(slashed)
			})
			.await
	}

	/// Moves funds into the ledger and locks them for `solver` in one step.
	pub async fn lock_and_transfer(
		&self,
		ctx: &CallContext,
		solver: Address,
		token: Address,
		amount: U256,
		funding: &Funding,
	) -> Result<(), CollateralError> {
		self.chain
			.execute(async {
				if amount.is_zero() {
					return Err(CollateralError::ZeroAmount);
				}
				let as_ledger = ctx.with_caller(self.address);
				match funding {
					Funding::Direct => {
						self.tokens
							.transfer_from(&as_ledger, token, ctx.caller, self.address, amount)
							.await?;
					}
					Funding::SignatureTransfer {
						owner,
						nonce,
						deadline,
						signature,
					} => {
						let signature_transfer = self
							.signature_transfer
							.as_ref()
							.ok_or(CollateralError::Unsupported("signature transfer"))?;
						let permit = PermitBatchTransferFrom {
							permitted: vec![TokenPermissions { token, amount }],
							nonce: *nonce,
							deadline: *deadline,
						};
						let transfers = [TransferDetails {
							to: self.address,
							requested_amount: amount,
						}];
						signature_transfer
							.permit_witness_transfer_from(
								&as_ledger,
								&permit,
								&transfers,
								*owner,
								collateral_witness(solver),
								COLLATERAL_WITNESS_TYPE_STRING,
								signature,
							)
							.await?;
					}
					Funding::ReceiveWithAuthorization {
						from,
						valid_after,
						valid_before,
						nonce,
						signature,
					} => {
						let authorized_transfer = self
							.authorized_transfer
							.as_ref()
							.ok_or(CollateralError::Unsupported("receive authorization"))?;
						authorized_transfer
							.receive_with_authorization(
								&as_ledger,
								token,
								*from,
								self.address,
								amount,
								*valid_after,
								*valid_before,
								*nonce,
								signature,
							)
							.await?;
					}
				}

				let mut balance = self.balance(solver, token).await?;
				balance.locked = balance.locked.checked_add(amount).ok_or(CollateralError::Overflow)?;
				self.set_balance(solver, token, &balance).await?;

				let events = self.chain.events();
				events.stage(CollateralEvent::Deposited { solver, token, amount });
				events.stage(CollateralEvent::Locked { solver, token, amount });
				info!(%solver, %token, %amount, "Collateral transferred and locked");
				Ok(())
			})
			.await
	}

	fn take_available(
		&self,
		solver: Address,
		token: Address,
		balance: &CollateralBalance,
		amount: U256,
	) -> Result<U256, CollateralError> {
		balance
			.available
			.checked_sub(amount)
			.ok_or(CollateralError::InsufficientAvailable {
				solver,
				token,
				needed: amount,
				available: balance.available,
			})
	}

	fn take_locked(
		&self,
		solver: Address,
		token: Address,
		balance: &CollateralBalance,
		amount: U256,
	) -> Result<U256, CollateralError> {
		balance
			.locked
			.checked_sub(amount)
			.ok_or(CollateralError::InsufficientLocked {
				solver,
				token,
				needed: amount,
				locked: balance.locked,
			})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::*;
	use alloy_signer::SignerSync;
	use settler_types::standards::permit2::permit_batch_witness_digest;
	use settler_types::{CollateralEvent, SettlerEvent};

	const OPERATOR: Address = Address::repeat_byte(0x0b);
	const LEDGER: Address = Address::repeat_byte(0xc1);

	async fn ledger(world: &World) -> CollateralLedger {
		let ledger = CollateralLedger::new(LEDGER, world.env.chain.clone(), world.tokens.clone(), [OPERATOR])
			.with_signature_transfer(world.permit2.clone());
		let solver = world.solver_ctx(0);
		world.mint(INPUT_TOKEN, solver.caller, 1_000).await;
		world
			.tokens
			.approve(&solver, INPUT_TOKEN, LEDGER, U256::MAX)
			.await
			.unwrap();
		ledger
	}

	#[tokio::test]
	async fn test_deposit_lock_unlock_withdraw() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver_ctx(1);
		let operator = CallContext::new(OPERATOR, 1);
		let who = solver.caller;

		ledger.deposit(&solver, INPUT_TOKEN, U256::from(500)).await.unwrap();
		ledger.lock(&operator, who, INPUT_TOKEN, U256::from(200)).await.unwrap();
		assert_eq!(
			ledger.balance(who, INPUT_TOKEN).await.unwrap(),
			CollateralBalance {
				available: U256::from(300),
				locked: U256::from(200),
			}
		);

		let error = ledger.withdraw(&solver, INPUT_TOKEN, U256::from(301)).await.unwrap_err();
		assert_eq!(error.kind(), ErrorKind::StateConflict);

		ledger.unlock(&operator, who, INPUT_TOKEN, U256::from(200)).await.unwrap();
		ledger.withdraw(&solver, INPUT_TOKEN, U256::from(500)).await.unwrap();
		assert_eq!(world.balance(INPUT_TOKEN, who).await, U256::from(1_000));
		assert_eq!(ledger.balance(who, INPUT_TOKEN).await.unwrap(), CollateralBalance::default());
	}

	#[tokio::test]
	async fn test_operations_restricted_to_operators() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver_ctx(1);
		ledger.deposit(&solver, INPUT_TOKEN, U256::from(500)).await.unwrap();

		let error = ledger
			.lock(&solver, solver.caller, INPUT_TOKEN, U256::from(100))
			.await
			.unwrap_err();
		assert!(matches!(error, CollateralError::NotOperator(_)));
		assert_eq!(error.kind(), ErrorKind::Authorization);
	}

	#[tokio::test]
	async fn test_slash_takes_share_of_available() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver_ctx(1);
		let operator = CallContext::new(OPERATOR, 1);
		let victim = Address::repeat_byte(0x3c);

		ledger.deposit(&solver, INPUT_TOKEN, U256::from(250)).await.unwrap();
		ledger
			.lock(&operator, solver.caller, INPUT_TOKEN, U256::from(200))
			.await
			.unwrap();

		let mut events = world.env.chain.events().subscribe();
		let slashed = ledger
			.slash(&operator, solver.caller, INPUT_TOKEN, U256::from(200), 5_000, victim)
			.await
			.unwrap();
		assert_eq!(slashed, U256::from(25));
		assert_eq!(world.balance(INPUT_TOKEN, victim).await, U256::from(225));
		assert_eq!(
			ledger.balance(solver.caller, INPUT_TOKEN).await.unwrap(),
			CollateralBalance {
				available: U256::from(25),
				locked: U256::ZERO,
			}
		);
		assert_eq!(
			events.try_recv().unwrap(),
			SettlerEvent::Collateral(CollateralEvent::Slashed {
				solver: solver.caller,
				token: INPUT_TOKEN,
				locked_amount: U256::from(200),
				slashed_amount: U256::from(25),
				recipient: victim,
			})
		);
	}

	#[tokio::test]
	async fn test_slash_share_independent_of_locked_amount() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver_ctx(1);
		let operator = CallContext::new(OPERATOR, 1);
		let victim = Address::repeat_byte(0x3c);

		ledger.deposit(&solver, INPUT_TOKEN, U256::from(1_000)).await.unwrap();
		ledger
			.lock(&operator, solver.caller, INPUT_TOKEN, U256::from(100))
			.await
			.unwrap();

		let slashed = ledger
			.slash(&operator, solver.caller, INPUT_TOKEN, U256::from(100), 5_000, victim)
			.await
			.unwrap();
		assert_eq!(slashed, U256::from(450));
		assert_eq!(world.balance(INPUT_TOKEN, victim).await, U256::from(550));
		assert_eq!(
			ledger.balance(solver.caller, INPUT_TOKEN).await.unwrap(),
			CollateralBalance {
				available: U256::from(450),
				locked: U256::ZERO,
			}
		);
	}

	#[tokio::test]
	async fn test_full_slash_empties_available() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver_ctx(1);
		let operator = CallContext::new(OPERATOR, 1);
		let victim = Address::repeat_byte(0x3c);

		ledger.deposit(&solver, INPUT_TOKEN, U256::from(300)).await.unwrap();
		ledger
			.lock(&operator, solver.caller, INPUT_TOKEN, U256::from(100))
			.await
			.unwrap();

		let slashed = ledger
			.slash(&operator, solver.caller, INPUT_TOKEN, U256::from(100), 10_000, victim)
			.await
			.unwrap();
		assert_eq!(slashed, U256::from(200));
		assert_eq!(world.balance(INPUT_TOKEN, victim).await, U256::from(300));
		assert_eq!(
			ledger.balance(solver.caller, INPUT_TOKEN).await.unwrap(),
			CollateralBalance::default()
		);

		let error = ledger
			.slash(&operator, solver.caller, INPUT_TOKEN, U256::ZERO, 10_001, victim)
			.await
			.unwrap_err();
		assert!(matches!(error, CollateralError::InvalidSlash(10_001)));
	}

	#[tokio::test]
	async fn test_penalize_more_than_locked_rejected() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver_ctx(1);
		let operator = CallContext::new(OPERATOR, 1);

		ledger.deposit(&solver, INPUT_TOKEN, U256::from(100)).await.unwrap();
		ledger
			.lock(&operator, solver.caller, INPUT_TOKEN, U256::from(40))
			.await
			.unwrap();
		let error = ledger
			.penalize(&operator, solver.caller, INPUT_TOKEN, U256::from(41), operator.caller)
			.await
			.unwrap_err();
		assert!(matches!(error, CollateralError::InsufficientLocked { .. }));

		ledger
			.penalize(&operator, solver.caller, INPUT_TOKEN, U256::from(40), operator.caller)
			.await
			.unwrap();
		assert_eq!(world.balance(INPUT_TOKEN, OPERATOR).await, U256::from(40));
	}

	#[tokio::test]
	async fn test_lock_and_transfer_with_signature() {
		let world = World::new().await;
		let ledger = ledger(&world).await;
		let solver = world.solver.address();
		let sponsor = world.user.address();

		let permit = PermitBatchTransferFrom {
			permitted: vec![TokenPermissions {
				token: INPUT_TOKEN,
				amount: U256::from(300),
			}],
			nonce: U256::from(9),
			deadline: U256::from(1_000),
		};
		let digest = permit_batch_witness_digest(
			&world.permit2.domain(),
			&permit,
			LEDGER,
			collateral_witness(solver),
			COLLATERAL_WITNESS_TYPE_STRING,
		);
		let signature: Bytes = world.user.sign_hash_sync(&digest).unwrap().as_bytes().to_vec().into();

		let funding = Funding::SignatureTransfer {
			owner: sponsor,
			nonce: U256::from(9),
			deadline: U256::from(1_000),
			signature,
		};
		let relayer = CallContext::new(Address::repeat_byte(0x77), 5);
		ledger
			.lock_and_transfer(&relayer, solver, INPUT_TOKEN, U256::from(300), &funding)
			.await
			.unwrap();
		assert_eq!(ledger.balance(solver, INPUT_TOKEN).await.unwrap().locked, U256::from(300));
		assert_eq!(world.balance(INPUT_TOKEN, sponsor).await, U256::from(700));

		// Replays fail on the spent nonce.
		let error = ledger
			.lock_and_transfer(&relayer, Address::repeat_byte(0x3d), INPUT_TOKEN, U256::from(300), &funding)
			.await
			.unwrap_err();
		assert_eq!(error.kind(), ErrorKind::StateConflict);
	}
}
