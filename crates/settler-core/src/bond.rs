//! Optimistic escrow settler backed by solver bonds.
//!
//! A solver claims an order by posting a bond per input. If nobody
//! disputes within the dispute window the claim finalises without any
//! proof. A disputer posts a matching bond; after the waiting time the
//! oracle decides and the winner takes both bonds.

use crate::base::{Environment, SettlerBase};
use crate::error::SettlementError;
use crate::escrow::{open_escrow, refund_escrow, Deposit, EscrowFunding, SponsorAuthorization};
use crate::fee::GovernanceFee;
use crate::status::{OrderStatus, Transition};
use serde::{Deserialize, Serialize};
use settler_types::{
	identifier_to_address, Address, CallContext, DisputeEvent, Input, OrderEvent, SolveParams, StandardOrder, B256,
	BPS_DENOMINATOR, U256,
};
use tracing::{debug, info};

pub const BOND_DOMAIN_NAME: &str = "OIF Bond";

const CLAIMS: &str = "bond_claims";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondParameters {
	/// Bond per input, in basis points of the input amount, rounded up.
	pub bond_bps: u64,
	/// Seconds after a claim during which it can be disputed.
	pub dispute_window: u64,
	/// Seconds after a dispute before it can be settled.
	pub waiting_time: u64,
}

impl BondParameters {
	pub fn new(bond_bps: u64, dispute_window: u64, waiting_time: u64) -> Result<Self, SettlementError> {
		if bond_bps == 0 || bond_bps > BPS_DENOMINATOR {
			return Err(SettlementError::InvalidAmount(format!(
				"bond of {} bps outside 1..={}",
				bond_bps, BPS_DENOMINATOR
			)));
		}
		Ok(Self {
			bond_bps,
			dispute_window,
			waiting_time,
		})
	}

	/// Bond owed for an input of `amount`.
	pub fn bond_for(&self, amount: U256) -> Result<U256, SettlementError> {
		let denominator = U256::from(BPS_DENOMINATOR);
		amount
			.checked_mul(U256::from(self.bond_bps))
			.map(|product| product.div_ceil(denominator))
			.ok_or_else(|| SettlementError::InvalidAmount(format!("bond on {} overflows", amount)))
	}

	fn bonds(&self, inputs: &[Input]) -> Result<Vec<Input>, SettlementError> {
		inputs
			.iter()
			.map(|input| Ok(Input::new(input.token, self.bond_for(input.amount)?)))
			.collect()
	}
}

/// State of one claim on an order, keyed by the claimed solve parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClaimRecord {
	pub solver: Address,
	pub claimed_at: u64,
	pub disputer: Option<Address>,
	pub disputed_at: Option<u64>,
	/// Bonds have been paid out.
	pub finalised: bool,
}

pub struct BondSettler {
	base: SettlerBase,
	funding: EscrowFunding,
	params: BondParameters,
}

impl BondSettler {
	pub fn new(address: Address, env: Environment, fee: GovernanceFee, params: BondParameters) -> Self {
		Self {
			base: SettlerBase::new(address, BOND_DOMAIN_NAME, env, fee),
			funding: EscrowFunding::new(),
			params,
		}
	}

	pub fn with_funding(mut self, funding: EscrowFunding) -> Self {
		self.funding = funding;
		self
	}

	pub fn base(&self) -> &SettlerBase {
		&self.base
	}

	pub fn address(&self) -> Address {
		self.base.address()
	}

	pub fn parameters(&self) -> &BondParameters {
		&self.params
	}

	pub fn order_identifier(&self, order: &StandardOrder) -> B256 {
		order.order_identifier(self.base.chain_id(), self.base.address())
	}

	pub async fn order_status(&self, order_id: B256) -> Result<OrderStatus, SettlementError> {
		self.base.order_status(order_id).await
	}

	pub async fn claim_record(&self, order_id: B256, params: &SolveParams) -> Result<Option<ClaimRecord>, SettlementError> {
		Ok(self
			.base
			.chain()
			.storage()
			.retrieve_optional(&self.base.namespace(CLAIMS), &Self::claim_key(order_id, params))
			.await?)
	}

	fn claim_key(order_id: B256, params: &SolveParams) -> String {
		format!("{}:{}", order_id, params.hash())
	}

	async fn existing_claim(&self, order_id: B256, params: &SolveParams) -> Result<ClaimRecord, SettlementError> {
		self.claim_record(order_id, params)
			.await?
			.ok_or(SettlementError::ClaimNotFound {
				order_id,
				solve_params_hash: params.hash(),
			})
	}

	async fn store_claim(&self, order_id: B256, params: &SolveParams, record: &ClaimRecord) -> Result<(), SettlementError> {
		self.base
			.chain()
			.storage()
			.store(&self.base.namespace(CLAIMS), &Self::claim_key(order_id, params), record)
			.await?;
		Ok(())
	}

	pub async fn open(&self, ctx: &CallContext, order: &StandardOrder) -> Result<B256, SettlementError> {
		self.base
			.chain()
			.execute(open_escrow(&self.base, ctx, order, Deposit::FromCaller))
			.await
	}

	pub async fn open_for(
		&self,
		ctx: &CallContext,
		order: &StandardOrder,
		authorization: &SponsorAuthorization,
	) -> Result<B256, SettlementError> {
		self.base
			.chain()
			.execute(open_escrow(
				&self.base,
				ctx,
				order,
				Deposit::Sponsored(&self.funding, authorization),
			))
			.await
	}

	/// Claims `order` for the caller, who must be the order solver, posting
	/// the bond. Returns the hash of the claimed solve parameters.
	pub async fn claim(&self, ctx: &CallContext, order: &StandardOrder, params: &SolveParams) -> Result<B256, SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				self.base.require_status(order_id, OrderStatus::Deposited).await?;
				let expires = u64::from(order.expires);
				if ctx.timestamp >= expires {
					return Err(SettlementError::DeadlinePassed {
						deadline: expires,
						now: ctx.timestamp,
					});
				}

				params.check_len(order.outputs.len())?;
				let solver = params
					.order_solver()
					.ok_or_else(|| SettlementError::InvalidSolveParams("no solver".into()))?;
				if solver != ctx.caller_identifier() {
					return Err(SettlementError::NotSolver {
						caller: ctx.caller,
						solver,
					});
				}
				for (index, timestamp) in params.timestamps.iter().enumerate() {
					if *timestamp > order.fill_deadline {
						return Err(SettlementError::FilledTooLate {
							index,
							timestamp: *timestamp,
							fill_deadline: order.fill_deadline,
						});
					}
				}

				let solve_params_hash = params.hash();
				if self.claim_record(order_id, params).await?.is_some() {
					return Err(SettlementError::ClaimAlreadyExists {
						order_id,
						solve_params_hash,
					});
				}

				let bonds = self.params.bonds(&order.inputs)?;
				self.base.collect_inputs(ctx, &bonds, ctx.caller).await?;
				self.store_claim(
					order_id,
					params,
					&ClaimRecord {
						solver: ctx.caller,
						claimed_at: ctx.timestamp,
						disputer: None,
						disputed_at: None,
						finalised: false,
					},
				)
				.await?;

				self.base.emit(DisputeEvent::Claimed {
					settler: self.base.address(),
					order_id,
					solve_params_hash,
					solver: ctx.caller,
				});
				info!(order_id = %order_id, solve_params_hash = %solve_params_hash, solver = %ctx.caller, "Order claimed");
				Ok(solve_params_hash)
			})
			.await
	}

	/// Disputes a claim within its window, posting a matching bond.
	pub async fn dispute(&self, ctx: &CallContext, order: &StandardOrder, params: &SolveParams) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				let mut record = self.existing_claim(order_id, params).await?;
				self.base.require_status(order_id, OrderStatus::Deposited).await?;
				if record.finalised {
					return Err(SettlementError::ClaimAlreadyFinalised { order_id });
				}
				if record.disputer.is_some() {
					return Err(SettlementError::AlreadyDisputed { order_id });
				}
				let closed_at = record.claimed_at.saturating_add(self.params.dispute_window);
				if ctx.timestamp >= closed_at {
					return Err(SettlementError::DisputeWindowClosed {
						closed_at,
						now: ctx.timestamp,
					});
				}

				let bonds = self.params.bonds(&order.inputs)?;
				self.base.collect_inputs(ctx, &bonds, ctx.caller).await?;
				record.disputer = Some(ctx.caller);
				record.disputed_at = Some(ctx.timestamp);
				self.store_claim(order_id, params, &record).await?;

				self.base.emit(DisputeEvent::Disputed {
					settler: self.base.address(),
					order_id,
					solve_params_hash: params.hash(),
					disputer: ctx.caller,
				});
				info!(order_id = %order_id, disputer = %ctx.caller, "Claim disputed");
				Ok(())
			})
			.await
	}

	/// Finalises an undisputed claim after the dispute window.
	///
	/// Pays the inputs to the order owner unless the order was already
	/// settled, and returns the claimant's bond.
	pub async fn finalise_claim(&self, ctx: &CallContext, order: &StandardOrder, params: &SolveParams) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				let mut record = self.existing_claim(order_id, params).await?;
				if record.finalised {
					return Err(SettlementError::ClaimAlreadyFinalised { order_id });
				}
				if record.disputer.is_some() {
					return Err(SettlementError::AlreadyDisputed { order_id });
				}
				let available_at = record.claimed_at.saturating_add(self.params.dispute_window);
				if ctx.timestamp < available_at {
					return Err(SettlementError::TooEarly {
						available_at,
						now: ctx.timestamp,
					});
				}

				record.finalised = true;
				self.store_claim(order_id, params, &record).await?;

				if self.base.order_status(order_id).await? == OrderStatus::Deposited {
					self.pay_owner(ctx, order_id, order, params).await?;
				} else {
					debug!(order_id = %order_id, "Order already settled, returning bond only");
				}

				let bonds = self.params.bonds(&order.inputs)?;
				self.base.pay_inputs(ctx, &bonds, record.solver, false).await?;

				self.base.emit(DisputeEvent::ClaimFinalised {
					settler: self.base.address(),
					order_id,
					solve_params_hash: params.hash(),
				});
				info!(order_id = %order_id, solver = %record.solver, "Claim finalised");
				Ok(())
			})
			.await
	}

	/// Settles a dispute once the waiting time has passed.
	///
	/// With the fills proven the order pays out and the solver takes both
	/// bonds; otherwise the disputer takes them and the order stays open.
	pub async fn settle_dispute(&self, ctx: &CallContext, order: &StandardOrder, params: &SolveParams) -> Result<bool, SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				let mut record = self.existing_claim(order_id, params).await?;
				if record.finalised {
					return Err(SettlementError::ClaimAlreadyFinalised { order_id });
				}
				let (Some(disputer), Some(disputed_at)) = (record.disputer, record.disputed_at) else {
					return Err(SettlementError::NotDisputed { order_id });
				};
				self.base.require_status(order_id, OrderStatus::Deposited).await?;
				let available_at = disputed_at.saturating_add(self.params.waiting_time);
				if ctx.timestamp < available_at {
					return Err(SettlementError::TooEarly {
						available_at,
						now: ctx.timestamp,
					});
				}

				let proven = self.fills_proven(order_id, order, params).await?;
				record.finalised = true;
				self.store_claim(order_id, params, &record).await?;

				if proven {
					self.pay_owner(ctx, order_id, order, params).await?;
				}
				let winner = if proven { record.solver } else { disputer };
				self.pay_both_bonds(ctx, order, winner).await?;

				self.base.emit(DisputeEvent::DisputeSettled {
					settler: self.base.address(),
					order_id,
					solve_params_hash: params.hash(),
					proven,
				});
				info!(order_id = %order_id, proven, winner = %winner, "Dispute settled");
				Ok(proven)
			})
			.await
	}

	/// Releases the bonds of a dispute left open on an order that was
	/// settled through another claim or refunded.
	pub async fn slash_dispute(&self, ctx: &CallContext, order: &StandardOrder, params: &SolveParams) -> Result<bool, SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				let mut record = self.existing_claim(order_id, params).await?;
				if record.finalised {
					return Err(SettlementError::ClaimAlreadyFinalised { order_id });
				}
				let Some(disputer) = record.disputer else {
					return Err(SettlementError::NotDisputed { order_id });
				};
				let status = self.base.order_status(order_id).await?;
				if !status.is_final() {
					return Err(SettlementError::UnexpectedStatus {
						order_id,
						expected: OrderStatus::Claimed,
						actual: status,
					});
				}

				let proven = self.fills_proven(order_id, order, params).await?;
				record.finalised = true;
				self.store_claim(order_id, params, &record).await?;

				let winner = if proven { record.solver } else { disputer };
				self.pay_both_bonds(ctx, order, winner).await?;

				self.base.emit(DisputeEvent::DisputeSlashed {
					settler: self.base.address(),
					order_id,
					solve_params_hash: params.hash(),
					proven,
				});
				info!(order_id = %order_id, proven, winner = %winner, "Dispute slashed");
				Ok(proven)
			})
			.await
	}

	/// Returns the inputs after expiry plus both dispute periods.
	pub async fn refund(&self, ctx: &CallContext, order: &StandardOrder) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				let refundable_at = u64::from(order.expires)
					.saturating_add(self.params.dispute_window)
					.saturating_add(self.params.waiting_time);
				refund_escrow(&self.base, ctx, order_id, order.user, &order.inputs, refundable_at).await
			})
			.await
	}

	async fn fills_proven(&self, order_id: B256, order: &StandardOrder, params: &SolveParams) -> Result<bool, SettlementError> {
		match self.base.validate_fills(&order.requirements(), order_id, params).await {
			Ok(()) => Ok(true),
			Err(error) if error.is_proof_failure() => {
				debug!(order_id = %order_id, error = %error, "Fills not proven");
				Ok(false)
			}
			Err(error) => Err(error),
		}
	}

	async fn pay_owner(
		&self,
		ctx: &CallContext,
		order_id: B256,
		order: &StandardOrder,
		params: &SolveParams,
	) -> Result<(), SettlementError> {
		let owner = self.base.resolve_owner(order_id, params).await?;
		let recipient = identifier_to_address(owner)?;

		self.base.advance(order_id, Transition::Finalise).await?;
		self.base.pay_inputs(ctx, &order.inputs, recipient, true).await?;
		self.base.verify_status(order_id, OrderStatus::Claimed).await?;

		self.base.emit(OrderEvent::Finalised {
			settler: self.base.address(),
			order_id,
			solver: owner,
			destination: owner,
		});
		Ok(())
	}

	async fn pay_both_bonds(&self, ctx: &CallContext, order: &StandardOrder, winner: Address) -> Result<(), SettlementError> {
		let doubled = self
			.params
			.bonds(&order.inputs)?
			.into_iter()
			.map(|bond| {
				bond.amount
					.checked_mul(U256::from(2))
					.map(|amount| Input::new(bond.token, amount))
					.ok_or_else(|| SettlementError::InvalidAmount(format!("bond {} overflows", bond.amount)))
			})
			.collect::<Result<Vec<_>, _>>()?;
		self.base.pay_inputs(ctx, &doubled, winner, false).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::test_utils::*;
	use crate::ErrorKind;

	const WINDOW: u64 = 50;
	const WAITING: u64 = 30;

	struct BondFixture {
		world: World,
		settler: BondSettler,
		order: StandardOrder,
		order_id: B256,
		params: SolveParams,
	}

	async fn opened() -> BondFixture {
		let world = World::new().await;
		world.mint(INPUT_TOKEN, world.solver.address(), 1_000).await;
		let settler = world.bond(BondParameters::new(1_000, WINDOW, WAITING).unwrap());
		let order = world.order(100);
		let order_id = settler.open(&world.user_ctx(10), &order).await.unwrap();
		let params = SolveParams::single(world.solver_id(), vec![20]);
		BondFixture {
			world,
			settler,
			order,
			order_id,
			params,
		}
	}

	async fn total_input_tokens(world: &World, settler: Address) -> U256 {
		let mut total = U256::ZERO;
		for account in [
			world.user.address(),
			world.solver.address(),
			world.disputer.address(),
			world.purchaser.address(),
			settler,
			FEE_RECIPIENT,
		] {
			total += world.balance(INPUT_TOKEN, account).await;
		}
		total
	}

	#[test]
	fn test_bond_rounds_up() {
		let params = BondParameters::new(1_000, 0, 0).unwrap();
		assert_eq!(params.bond_for(U256::from(100)).unwrap(), U256::from(10));
		assert_eq!(params.bond_for(U256::from(101)).unwrap(), U256::from(11));
		assert!(params.bond_for(U256::MAX).is_err());
		assert!(BondParameters::new(0, 0, 0).is_err());
		assert!(BondParameters::new(10_001, 0, 0).is_err());
	}

	#[tokio::test]
	async fn test_undisputed_claim_finalises_without_proof() {
		let BondFixture {
			world,
			settler,
			order,
			order_id,
			params,
		} = opened().await;
		let before = total_input_tokens(&world, settler.address()).await;

		settler.claim(&world.solver_ctx(30), &order, &params).await.unwrap();
		assert_eq!(world.balance(INPUT_TOKEN, world.solver.address()).await, U256::from(990));

		let early = settler.finalise_claim(&world.solver_ctx(30 + WINDOW - 1), &order, &params).await;
		assert!(matches!(early, Err(SettlementError::TooEarly { .. })));

		settler
			.finalise_claim(&world.solver_ctx(30 + WINDOW), &order, &params)
			.await
			.unwrap();
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Claimed);
		assert_eq!(world.balance(INPUT_TOKEN, world.solver.address()).await, U256::from(1_100));
		assert_eq!(total_input_tokens(&world, settler.address()).await, before);
	}

	#[tokio::test]
	async fn test_only_order_solver_can_claim() {
		let BondFixture {
			world,
			settler,
			order,
			params,
			..
		} = opened().await;

		let error = settler.claim(&world.disputer_ctx(30), &order, &params).await.unwrap_err();
		assert!(matches!(error, SettlementError::NotSolver { .. }));

		settler.claim(&world.solver_ctx(30), &order, &params).await.unwrap();
		let again = settler.claim(&world.solver_ctx(31), &order, &params).await.unwrap_err();
		assert!(matches!(again, SettlementError::ClaimAlreadyExists { .. }));
	}

	#[tokio::test]
	async fn test_proven_dispute_pays_solver_both_bonds() {
		let BondFixture {
			world,
			settler,
			order,
			order_id,
			..
		} = opened().await;
		let before = total_input_tokens(&world, settler.address()).await;
		let params = world.fill_all(order_id, &order, 20).await;

		settler.claim(&world.solver_ctx(30), &order, &params).await.unwrap();
		settler.dispute(&world.disputer_ctx(40), &order, &params).await.unwrap();
		assert!(matches!(
			settler.finalise_claim(&world.solver_ctx(30 + WINDOW), &order, &params).await,
			Err(SettlementError::AlreadyDisputed { .. })
		));

		let early = settler.settle_dispute(&world.solver_ctx(40 + WAITING - 1), &order, &params).await;
		assert_eq!(early.unwrap_err().kind(), ErrorKind::Timing);

		let proven = settler
			.settle_dispute(&world.solver_ctx(40 + WAITING), &order, &params)
			.await
			.unwrap();
		assert!(proven);
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Claimed);
		assert_eq!(world.balance(INPUT_TOKEN, world.solver.address()).await, U256::from(1_110));
		assert_eq!(world.balance(INPUT_TOKEN, world.disputer.address()).await, U256::from(990));
		assert_eq!(world.balance(INPUT_TOKEN, settler.address()).await, U256::ZERO);
		assert_eq!(total_input_tokens(&world, settler.address()).await, before);
	}

	#[tokio::test]
	async fn test_unproven_dispute_pays_disputer_and_allows_refund() {
		let BondFixture {
			world,
			settler,
			order,
			order_id,
			params,
		} = opened().await;
		let before = total_input_tokens(&world, settler.address()).await;

		settler.claim(&world.solver_ctx(30), &order, &params).await.unwrap();
		settler.dispute(&world.disputer_ctx(40), &order, &params).await.unwrap();
		let proven = settler
			.settle_dispute(&world.disputer_ctx(40 + WAITING), &order, &params)
			.await
			.unwrap();
		assert!(!proven);
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Deposited);
		assert_eq!(world.balance(INPUT_TOKEN, world.disputer.address()).await, U256::from(1_010));
		assert_eq!(world.balance(INPUT_TOKEN, world.solver.address()).await, U256::from(990));

		let refundable_at = u64::from(order.expires) + WINDOW + WAITING;
		assert!(settler.refund(&world.user_ctx(refundable_at - 1), &order).await.is_err());
		settler.refund(&world.user_ctx(refundable_at), &order).await.unwrap();
		assert_eq!(world.balance(INPUT_TOKEN, world.user.address()).await, U256::from(1_000));
		assert_eq!(total_input_tokens(&world, settler.address()).await, before);
	}

	#[tokio::test]
	async fn test_dispute_after_window_rejected() {
		let BondFixture {
			world,
			settler,
			order,
			params,
			..
		} = opened().await;

		settler.claim(&world.solver_ctx(30), &order, &params).await.unwrap();
		let error = settler
			.dispute(&world.disputer_ctx(30 + WINDOW), &order, &params)
			.await
			.unwrap_err();
		assert!(matches!(error, SettlementError::DisputeWindowClosed { .. }));
		assert_eq!(world.balance(INPUT_TOKEN, world.disputer.address()).await, U256::from(1_000));
	}

	#[tokio::test]
	async fn test_stale_dispute_slashed_after_other_claim_settles() {
		let BondFixture {
			world,
			settler,
			order,
			order_id,
			params: bogus,
		} = opened().await;
		let before = total_input_tokens(&world, settler.address()).await;
		let honest = world.fill_all(order_id, &order, 25).await;

		settler.claim(&world.solver_ctx(30), &order, &bogus).await.unwrap();
		settler.dispute(&world.disputer_ctx(35), &order, &bogus).await.unwrap();
		settler.claim(&world.solver_ctx(36), &order, &honest).await.unwrap();
		settler
			.finalise_claim(&world.solver_ctx(36 + WINDOW), &order, &honest)
			.await
			.unwrap();
		assert_eq!(settler.order_status(order_id).await.unwrap(), OrderStatus::Claimed);

		let proven = settler
			.slash_dispute(&world.disputer_ctx(100), &order, &bogus)
			.await
			.unwrap();
		assert!(!proven);
		assert_eq!(world.balance(INPUT_TOKEN, world.disputer.address()).await, U256::from(1_010));
		assert_eq!(world.balance(INPUT_TOKEN, settler.address()).await, U256::ZERO);
		assert_eq!(total_input_tokens(&world, settler.address()).await, before);
	}
}
