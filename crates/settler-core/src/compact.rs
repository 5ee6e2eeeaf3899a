//! Resource-lock input settler.
//!
//! Inputs stay locked in an external registry. The order id is the claim
//! hash of the batch compact the user signed with this settler as arbiter,
//! so a successful claim proves the registry honoured exactly this order.

use crate::base::{Environment, Finalisation, SettlerBase};
use crate::error::SettlementError;
use crate::fee::GovernanceFee;
use crate::purchase::{OrderPurchase, PurchaseRequest};
use crate::status::{OrderStatus, Transition};
use settler_custody::{BatchClaim, BatchClaimComponent, Component, ResourceLockInterface};
use settler_types::standards::compact::{self, LockCommitment, MANDATE_WITNESS_TYPE_STRING};
use settler_types::{identifier_to_address, Address, Bytes, CallContext, Input, OrderEvent, SolveParams, StandardOrder, B256, U256};
use std::sync::Arc;
use tracing::info;

pub const COMPACT_DOMAIN_NAME: &str = "OIF Compact";

/// Signatures the registry needs to release a lock.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LockAuthorization {
	pub sponsor_signature: Bytes,
	pub allocator_data: Bytes,
}

pub struct CompactSettler {
	base: SettlerBase,
	registry: Arc<dyn ResourceLockInterface>,
}

impl CompactSettler {
	pub fn new(address: Address, env: Environment, fee: GovernanceFee, registry: Arc<dyn ResourceLockInterface>) -> Self {
		Self {
			base: SettlerBase::new(address, COMPACT_DOMAIN_NAME, env, fee),
			registry,
		}
	}

	pub fn base(&self) -> &SettlerBase {
		&self.base
	}

	pub fn address(&self) -> Address {
		self.base.address()
	}

	/// Claim hash of the batch compact backing `order`.
	pub fn order_identifier(&self, order: &StandardOrder) -> B256 {
		let commitments: Vec<LockCommitment> = order
			.inputs
			.iter()
			.map(|input| LockCommitment::from_id(input.token, input.amount))
			.collect();
		compact::claim_hash(
			self.base.address(),
			order.user,
			order.nonce,
			U256::from(order.expires),
			&commitments,
			order.mandate_hash(),
			MANDATE_WITNESS_TYPE_STRING,
		)
	}

	pub async fn order_status(&self, order_id: B256) -> Result<OrderStatus, SettlementError> {
		self.base.order_status(order_id).await
	}

	/// Registers `order` on-chain. Only its user may do this; no tokens move.
	pub async fn open(&self, ctx: &CallContext, order: &StandardOrder) -> Result<B256, SettlementError> {
		self.base
			.chain()
			.execute(async {
				order.validate()?;
				self.base.check_chain(order.origin_chain_id)?;
				self.base.check_fillable(ctx, order.fill_deadline)?;
				if ctx.caller != order.user {
					return Err(SettlementError::NotOrderUser {
						caller: ctx.caller,
						user: order.user,
					});
				}

				let order_id = self.order_identifier(order);
				self.base.advance(order_id, Transition::Open).await?;
				self.base.emit(OrderEvent::Opened {
					settler: self.base.address(),
					order_id,
					user: order.user,
					inputs: order.inputs.clone(),
				});
				info!(order_id = %order_id, user = %order.user, "Resource-lock order registered");
				Ok(order_id)
			})
			.await
	}

	/// Claims the locked inputs for the order owner once fills are proven.
	pub async fn finalise(
		&self,
		ctx: &CallContext,
		order: &StandardOrder,
		authorization: &LockAuthorization,
		params: &SolveParams,
		finalisation: Finalisation,
	) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				self.base.check_chain(order.origin_chain_id)?;
				params.check_len(order.outputs.len())?;
				let order_id = self.order_identifier(order);
				let owner = self.base.resolve_owner(order_id, params).await?;
				let (destination, call) = self
					.base
					.authorize_finalisation(ctx, order_id, owner, &finalisation)?;
				let recipient = identifier_to_address(destination)?;

				self.base.advance(order_id, Transition::FinaliseLocked).await?;
				self.base
					.validate_fills(&order.requirements(), order_id, params)
					.await?;

				let (claim, delivered) = self.batch_claim(order, authorization, recipient);
				let claim_hash = self
					.registry
					.batch_claim(&self.base.as_contract(ctx), &claim)
					.await?;
				if claim_hash != order_id {
					return Err(SettlementError::ClaimHashMismatch {
						expected: order_id,
						actual: claim_hash,
					});
				}

				self.base.verify_status(order_id, OrderStatus::Claimed).await?;
				self.base
					.deliver_callback(ctx, recipient, &delivered, &call)
					.await?;

				self.base.emit(OrderEvent::Finalised {
					settler: self.base.address(),
					order_id,
					solver: owner,
					destination,
				});
				info!(order_id = %order_id, owner = %owner, destination = %destination, "Resource-lock order finalised");
				Ok(())
			})
			.await
	}

	/// Marks an opened order refunded after expiry.
	///
	/// The locked tokens never left the registry; the sponsor recovers them
	/// there once the compact has expired.
	pub async fn refund(&self, ctx: &CallContext, order: &StandardOrder) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let expires = u64::from(order.expires);
				if ctx.timestamp < expires {
					return Err(SettlementError::TooEarly {
						available_at: expires,
						now: ctx.timestamp,
					});
				}
				let order_id = self.order_identifier(order);
				self.base.advance(order_id, Transition::Refund).await?;
				self.base.emit(OrderEvent::Refunded {
					settler: self.base.address(),
					order_id,
				});
				info!(order_id = %order_id, "Resource-lock order refunded");
				Ok(())
			})
			.await
	}

	/// Buys `solver`'s claim on an order that has not been finalised.
	pub async fn purchase_order(
		&self,
		ctx: &CallContext,
		order: &StandardOrder,
		request: PurchaseRequest<'_>,
	) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				self.base
					.purchase(ctx, order_id, &order.inputs, request, |status| !status.is_final())
					.await
			})
			.await
	}

	pub fn purchase_digest(&self, terms: &OrderPurchase) -> B256 {
		terms.signing_hash(&self.base)
	}

	/// Splits each lock between `recipient` and the fee recipient.
	fn batch_claim(&self, order: &StandardOrder, authorization: &LockAuthorization, recipient: Address) -> (BatchClaim, Vec<Input>) {
		let fee = self.base.fee();
		let mut delivered = Vec::with_capacity(order.inputs.len());
		let claims = order
			.inputs
			.iter()
			.map(|input| {
				let (amount, fee_amount) = fee.split(input.amount);
				let mut portions = vec![Component {
					claimant: recipient,
					amount,
				}];
				if !fee_amount.is_zero() {
					portions.push(Component {
						claimant: fee.recipient,
						amount: fee_amount,
					});
				}
				delivered.push(Input::new(input.token, amount));
				BatchClaimComponent {
					id: input.token,
					allocated_amount: input.amount,
					portions,
				}
			})
			.collect();

		let claim = BatchClaim {
			allocator_data: authorization.allocator_data.clone(),
			sponsor_signature: authorization.sponsor_signature.clone(),
			sponsor: order.user,
			nonce: order.nonce,
			expires: U256::from(order.expires),
			witness: order.mandate_hash(),
			witness_type_string: MANDATE_WITNESS_TYPE_STRING.to_string(),
			claims,
		};
		(claim, delivered)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::*;
	use crate::ErrorKind;

	#[tokio::test]
	async fn test_open_requires_user() {
		let world = World::new().await;
		let settler = world.compact();
		let order = world.locked_order(100).await;

		let error = settler.open(&world.solver_ctx(10), &order).await.unwrap_err();
		assert!(matches!(error, SettlementError::NotOrderUser { .. }));

		let order_id = settler.open(&world.user_ctx(10), &order).await.unwrap();
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Deposited);
	}

	#[tokio::test]
	async fn test_finalise_claims_lock_with_fee() {
		let world = World::new().await;
		let settler = world.compact_with_fee(300);
		let order = world.locked_order(1_000).await;
		let order_id = settler.order_identifier(&order);
		let params = world.fill_all(order_id, &order, 20).await;
		let authorization = world.sign_compact(order_id);

		// Never opened here: the signed compact alone backs the order.
		settler
			.finalise(&world.solver_ctx(30), &order, &authorization, &params, Finalisation::ToSelf)
			.await
			.unwrap();

		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Claimed);
		assert_eq!(world.balance(INPUT_TOKEN, world.solver.address()).await, U256::from(970));
		assert_eq!(world.balance(INPUT_TOKEN, FEE_RECIPIENT).await, U256::from(30));
	}

	#[tokio::test]
	async fn test_finalise_without_allocator_approval_reverts() {
		let world = World::new().await;
		let settler = world.compact();
		let order = world.locked_order(100).await;
		let order_id = settler.order_identifier(&order);
		let params = world.fill_all(order_id, &order, 20).await;
		let mut authorization = world.sign_compact(order_id);
		authorization.allocator_data = authorization.sponsor_signature.clone();

		let error = settler
			.finalise(&world.solver_ctx(30), &order, &authorization, &params, Finalisation::ToSelf)
			.await
			.unwrap_err();
		assert_eq!(error.kind(), ErrorKind::Authorization);
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::None);
	}

	#[tokio::test]
	async fn test_refund_after_expiry() {
		let world = World::new().await;
		let settler = world.compact();
		let order = world.locked_order(100).await;
		let order_id = settler.open(&world.user_ctx(10), &order).await.unwrap();

		assert!(settler.refund(&world.user_ctx(u64::from(order.expires) - 1), &order).await.is_err());
		settler.refund(&world.user_ctx(u64::from(order.expires)), &order).await.unwrap();
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Refunded);
	}
}
