//! Escrow input settler.
//!
//! Inputs are pulled into the settler when the order opens and released
//! to the order owner once the input oracle affirms every output fill, or
//! back to the user after expiry.

use crate::base::{Environment, Finalisation, SettlerBase};
use crate::error::SettlementError;
use crate::fee::GovernanceFee;
use crate::purchase::{OrderPurchase, PurchaseRequest};
use crate::status::{OrderStatus, Transition};
use settler_custody::{AuthorizedTransferInterface, SignatureTransferInterface, TransferDetails};
use settler_types::standards::permit2::{self, PermitBatchTransferFrom, TokenPermissions};
use settler_types::{
	identifier_to_address, Address, Bytes, CallContext, FillRequirements, Input, OrderEvent, SolveParams, StandardOrder,
	B256, U256,
};
use std::sync::Arc;
use tracing::info;

pub const ESCROW_DOMAIN_NAME: &str = "OIF Escrow";

/// Sponsor authorization for opening an order on the user's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SponsorAuthorization {
	/// Signature transfer of every input, witnessing the order.
	SignatureTransfer(Bytes),
	/// One EIP-3009 receive authorization per input, each using the order
	/// id as nonce.
	ReceiveWithAuthorization(Vec<Bytes>),
}

/// Ways inputs reach an escrow.
#[derive(Clone, Default)]
pub struct EscrowFunding {
	signature_transfer: Option<Arc<dyn SignatureTransferInterface>>,
	authorized_transfer: Option<Arc<dyn AuthorizedTransferInterface>>,
}

impl EscrowFunding {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn with_signature_transfer(mut self, signature_transfer: Arc<dyn SignatureTransferInterface>) -> Self {
		self.signature_transfer = Some(signature_transfer);
		self
	}

	pub fn with_authorized_transfer(mut self, authorized_transfer: Arc<dyn AuthorizedTransferInterface>) -> Self {
		self.authorized_transfer = Some(authorized_transfer);
		self
	}

	/// Pulls the order's inputs from its user using `authorization`.
	pub(crate) async fn collect_sponsored(
		&self,
		base: &SettlerBase,
		ctx: &CallContext,
		order: &StandardOrder,
		order_id: B256,
		authorization: &SponsorAuthorization,
	) -> Result<(), SettlementError> {
		let sponsored = SponsoredInputs {
			user: order.user,
			nonce: order.nonce,
			fill_deadline: order.fill_deadline,
			inputs: &order.inputs,
			order_id,
			witness: permit2::permit2_witness_hash(order.expires, order.input_oracle, &order.outputs),
			witness_type: permit2::PERMIT2_WITNESS_TYPE_STRING,
		};
		self.collect(base, ctx, &sponsored, authorization).await
	}

	pub(crate) async fn collect(
		&self,
		base: &SettlerBase,
		ctx: &CallContext,
		sponsored: &SponsoredInputs<'_>,
		authorization: &SponsorAuthorization,
	) -> Result<(), SettlementError> {
		let as_settler = base.as_contract(ctx);
		match authorization {
			SponsorAuthorization::SignatureTransfer(signature) => {
				let signature_transfer = self.signature_transfer.as_ref().ok_or_else(|| {
					SettlementError::Unsupported("signature transfer")
				})?;
				let permit = PermitBatchTransferFrom {
					permitted: sponsored.inputs.iter().map(TokenPermissions::from).collect(),
					nonce: sponsored.nonce,
					deadline: U256::from(sponsored.fill_deadline),
				};
				let transfers: Vec<TransferDetails> = sponsored
					.inputs
					.iter()
					.map(|input| TransferDetails {
						to: base.address(),
						requested_amount: input.amount,
					})
					.collect();

				signature_transfer
					.permit_witness_transfer_from(
						&as_settler,
						&permit,
						&transfers,
						sponsored.user,
						sponsored.witness,
						sponsored.witness_type,
						signature,
					)
					.await?;
			}
			SponsorAuthorization::ReceiveWithAuthorization(signatures) => {
				let authorized_transfer = self.authorized_transfer.as_ref().ok_or_else(|| {
					SettlementError::Unsupported("receive authorization")
				})?;
				if signatures.len() != sponsored.inputs.len() {
					return Err(SettlementError::InvalidAmount(format!(
						"{} authorizations for {} inputs",
						signatures.len(),
						sponsored.inputs.len()
					)));
				}
				for (input, signature) in sponsored.inputs.iter().zip(signatures) {
					authorized_transfer
						.receive_with_authorization(
							&as_settler,
							input.token_address(),
							sponsored.user,
							base.address(),
							input.amount,
							U256::ZERO,
							U256::from(sponsored.fill_deadline),
							sponsored.order_id,
							signature,
						)
						.await?;
				}
			}
		}
		Ok(())
	}
}

/// Inputs moved by a sponsor authorization and the witness it signs.
pub(crate) struct SponsoredInputs<'a> {
	pub user: Address,
	pub nonce: U256,
	pub fill_deadline: u32,
	pub inputs: &'a [Input],
	/// Nonce of every receive authorization.
	pub order_id: B256,
	pub witness: B256,
	pub witness_type: &'static str,
}

/// How an opening call is funded.
pub(crate) enum Deposit<'a> {
	/// The caller transfers the inputs.
	FromCaller,
	/// The user's signed authorization moves the inputs.
	Sponsored(&'a EscrowFunding, &'a SponsorAuthorization),
}

/// Opens a single-chain order into escrow held by `base`.
pub(crate) async fn open_escrow(
	base: &SettlerBase,
	ctx: &CallContext,
	order: &StandardOrder,
	deposit: Deposit<'_>,
) -> Result<B256, SettlementError> {
	order.validate()?;
	base.check_chain(order.origin_chain_id)?;
	base.check_fillable(ctx, order.fill_deadline)?;
	SettlerBase::check_plain_tokens(&order.inputs)?;

	let order_id = order.order_identifier(base.chain_id(), base.address());
	base.advance(order_id, Transition::Open).await?;

	match deposit {
		Deposit::FromCaller => base.collect_inputs(ctx, &order.inputs, ctx.caller).await?,
		Deposit::Sponsored(funding, authorization) => {
			funding
				.collect_sponsored(base, ctx, order, order_id, authorization)
				.await?
		}
	}
	base.verify_status(order_id, OrderStatus::Deposited).await?;

	base.emit(OrderEvent::Opened {
		settler: base.address(),
		order_id,
		user: order.user,
		inputs: order.inputs.clone(),
	});
	info!(order_id = %order_id, user = %order.user, inputs = order.inputs.len(), "Order opened");
	Ok(order_id)
}

/// Pays out an escrowed order once its fills are proven.
pub(crate) async fn finalise_escrow(
	base: &SettlerBase,
	ctx: &CallContext,
	order_id: B256,
	requirements: &FillRequirements<'_>,
	inputs: &[Input],
	params: &SolveParams,
	finalisation: &Finalisation,
) -> Result<(), SettlementError> {
	params.check_len(requirements.outputs.len())?;
	let owner = base.resolve_owner(order_id, params).await?;
	let (destination, call) = base.authorize_finalisation(ctx, order_id, owner, finalisation)?;
	let recipient = identifier_to_address(destination)?;

	base.advance(order_id, Transition::Finalise).await?;
	base.validate_fills(requirements, order_id, params).await?;

	let delivered = base.pay_inputs(ctx, inputs, recipient, true).await?;
	base.verify_status(order_id, OrderStatus::Claimed).await?;
	base.deliver_callback(ctx, recipient, &delivered, &call).await?;

	base.emit(OrderEvent::Finalised {
		settler: base.address(),
		order_id,
		solver: owner,
		destination,
	});
	info!(order_id = %order_id, owner = %owner, destination = %destination, "Order finalised");
	Ok(())
}

/// Returns escrowed inputs to the user once `refundable_at` has passed.
pub(crate) async fn refund_escrow(
	base: &SettlerBase,
	ctx: &CallContext,
	order_id: B256,
	user: Address,
	inputs: &[Input],
	refundable_at: u64,
) -> Result<(), SettlementError> {
	if ctx.timestamp < refundable_at {
		return Err(SettlementError::TooEarly {
			available_at: refundable_at,
			now: ctx.timestamp,
		});
	}

	base.advance(order_id, Transition::Refund).await?;
	base.pay_inputs(ctx, inputs, user, false).await?;
	base.verify_status(order_id, OrderStatus::Refunded).await?;

	base.emit(OrderEvent::Refunded {
		settler: base.address(),
		order_id,
	});
	info!(order_id = %order_id, user = %user, "Order refunded");
	Ok(())
}

pub struct EscrowSettler {
	base: SettlerBase,
	funding: EscrowFunding,
}

impl EscrowSettler {
	pub fn new(address: Address, env: Environment, fee: GovernanceFee) -> Self {
		Self {
			base: SettlerBase::new(address, ESCROW_DOMAIN_NAME, env, fee),
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

	pub fn order_identifier(&self, order: &StandardOrder) -> B256 {
		order.order_identifier(self.base.chain_id(), self.base.address())
	}

	pub async fn order_status(&self, order_id: B256) -> Result<OrderStatus, SettlementError> {
		self.base.order_status(order_id).await
	}

	/// Opens `order`, pulling the inputs from the caller.
	pub async fn open(&self, ctx: &CallContext, order: &StandardOrder) -> Result<B256, SettlementError> {
		self.base
			.chain()
			.execute(open_escrow(&self.base, ctx, order, Deposit::FromCaller))
			.await
	}

	/// Opens `order` on behalf of its user.
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

	pub async fn finalise(
		&self,
		ctx: &CallContext,
		order: &StandardOrder,
		params: &SolveParams,
		finalisation: Finalisation,
	) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
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

	pub async fn refund(&self, ctx: &CallContext, order: &StandardOrder) -> Result<(), SettlementError> {
		self.base
			.chain()
			.execute(async {
				let order_id = self.order_identifier(order);
				refund_escrow(&self.base, ctx, order_id, order.user, &order.inputs, u64::from(order.expires)).await
			})
			.await
	}

	/// Buys `solver`'s claim on `order`; the caller pays the discounted inputs.
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
					.purchase(ctx, order_id, &order.inputs, request, |status| status == OrderStatus::Deposited)
					.await
			})
			.await
	}

	pub fn purchase_digest(&self, terms: &OrderPurchase) -> B256 {
		terms.signing_hash(&self.base)
	}
}
