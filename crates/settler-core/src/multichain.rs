//! Escrow settler for orders whose inputs span several origin chains.
//!
//! Each chain escrows its own share of the inputs. All chains derive the
//! same order id, so one set of proven fills releases every share.

use crate::base::{Environment, Finalisation, SettlerBase};
use crate::error::SettlementError;
use crate::escrow::{finalise_escrow, refund_escrow, EscrowFunding, SponsorAuthorization, SponsoredInputs};
use crate::fee::GovernanceFee;
use crate::status::{OrderStatus, Transition};
use settler_types::standards::permit2;
use settler_types::{Address, CallContext, MultichainOrder, OrderEvent, SolveParams, B256};
use tracing::info;

pub const MULTICHAIN_DOMAIN_NAME: &str = "OIF Multichain Escrow";

pub struct MultichainEscrowSettler {
	base: SettlerBase,
	funding: EscrowFunding,
}

impl MultichainEscrowSettler {
	pub fn new(address: Address, env: Environment, fee: GovernanceFee) -> Self {
		Self {
			base: SettlerBase::new(address, MULTICHAIN_DOMAIN_NAME, env, fee),
			funding: EscrowFunding::new(),
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

	/// This chain's element hash, as other chains list it.
	pub fn element_hash(&self, order: &MultichainOrder) -> B256 {
		order.element_hash(self.base.chain_id(), self.base.address())
	}

	pub fn order_identifier(&self, order: &MultichainOrder) -> Result<B256, SettlementError> {
		Ok(order.order_identifier(self.base.chain_id(), self.base.address())?)
	}

	pub async fn order_status(&self, order_id: B256) -> Result<OrderStatus, SettlementError> {
		self.base.order_status(order_id).await
	}

	/// Escrows this chain's inputs, pulled from the caller.
	pub async fn open(&self, ctx: &CallContext, order: &MultichainOrder) -> Result<B256, SettlementError> {
		self.base.chain().execute(self.open_share(ctx, order, None)).await
	}

	/// Escrows this chain's inputs on behalf of the user.
	///
	/// A signature transfer witnesses the order id, so the user's signature
	/// covers the inputs on every chain.
	pub async fn open_for(
		&self,
		ctx: &CallContext,
		order: &MultichainOrder,
		authorization: &SponsorAuthorization,
	) -> Result<B256, SettlementError> {
		self.base
			.chain()
			.execute(self.open_share(ctx, order, Some(authorization)))
			.await
	}

	async fn open_share(
		&self,
		ctx: &CallContext,
		order: &MultichainOrder,
		authorization: Option<&SponsorAuthorization>,
	) -> Result<B256, SettlementError> {
		order.validate()?;
		self.base.check_fillable(ctx, order.fill_deadline)?;
		SettlerBase::check_plain_tokens(&order.inputs)?;

		let order_id = self.order_identifier(order)?;
		self.base.advance(order_id, Transition::Open).await?;
		match authorization {
			None => self.base.collect_inputs(ctx, &order.inputs, ctx.caller).await?,
			Some(authorization) => {
				let sponsored = SponsoredInputs {
					user: order.user,
					nonce: order.nonce,
					fill_deadline: order.fill_deadline,
					inputs: &order.inputs,
					order_id,
					witness: permit2::multichain_permit2_witness_hash(order_id),
					witness_type: permit2::MULTICHAIN_PERMIT2_WITNESS_TYPE_STRING,
				};
				self.funding
					.collect(&self.base, ctx, &sponsored, authorization)
					.await?
			}
		}
		self.base.verify_status(order_id, OrderStatus::Deposited).await?;

		self.base.emit(OrderEvent::Opened {
			settler: self.base.address(),
			order_id,
			user: order.user,
			inputs: order.inputs.clone(),
		});
		info!(
			order_id = %order_id,
			chain_index = order.chain_index,
			chains = order.additional_chains.len() + 1,
			"Multichain order opened"
		);
		Ok(order_id)
	}

	/// Releases this chain's inputs once the fills are proven.
	pub async fn finalise(
		&self,
		ctx: &CallContext,
		order: &MultichainOrder,
		params: &SolveParams,
		finalisation: Finalisation,
	) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order)?;
				finalise_escrow(
					&self.base,
					ctx,
					order_id,
					&order.requirements(),
					&order.inputs,
					params,
					&finalisation,
				)
				.await
			})
			.await
	}

	pub async fn refund(&self, ctx: &CallContext, order: &MultichainOrder) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order)?;
				refund_escrow(&self.base, ctx, order_id, order.user, &order.inputs, u64::from(order.expires)).await
			})
			.await
	}
}
