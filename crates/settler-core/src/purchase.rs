//! Order purchasing.
//!
//! A solver that filled an order may sell its claim on the inputs to a
//! purchaser who pays out immediately, at a discount, and collects the
//! inputs later. The sale only binds fills completed within the solver's
//! promised `time_to_buy`; a later fill resolves back to the solver.

use crate::base::SettlerBase;
use crate::error::SettlementError;
use crate::status::OrderStatus;
use serde::{Deserialize, Serialize};
use settler_types::standards::eip712;
use settler_types::{
	identifier_to_address, verify_signer, Address, Bytes, CallContext, Input, OrderEvent, SolveParams, B256,
	BPS_DENOMINATOR, U256,
};
use tracing::{debug, info};

const PURCHASES: &str = "purchases";

/// Terms a solver signs to sell its claim on an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderPurchase {
	pub order_id: B256,
	/// Receives the discounted inputs.
	pub destination: Address,
	/// Optional payload delivered to `destination` after payment.
	pub call: Bytes,
	/// Discount in basis points taken off each input.
	pub discount_bps: u64,
	/// Seconds after the purchase within which fills must complete.
	pub time_to_buy: u32,
	/// Last timestamp the offer may be taken.
	pub expiry: u64,
}

impl OrderPurchase {
	/// Digest the solver signs, under the settler's domain.
	pub fn signing_hash(&self, settler: &SettlerBase) -> B256 {
		let purchase = eip712::OrderPurchase {
			orderId: self.order_id,
			originSettler: settler.address(),
			destination: self.destination,
			call: self.call.clone(),
			discount: self.discount_bps,
			timeToBuy: self.time_to_buy,
			expiry: self.expiry,
		};
		eip712::signing_hash(&purchase, &settler.domain())
	}

	/// `amount` after the discount.
	fn discounted(&self, amount: U256) -> U256 {
		let denominator = U256::from(BPS_DENOMINATOR);
		let keep = U256::from(BPS_DENOMINATOR - self.discount_bps);
		match amount.checked_mul(keep) {
			Some(product) => product / denominator,
			None => amount / denominator * keep,
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseRecord {
	/// Fills completed at or before this timestamp belong to the purchaser.
	pub cutoff: u32,
	pub purchaser: B256,
}

/// Arguments of a purchase call.
#[derive(Debug, Clone)]
pub struct PurchaseRequest<'a> {
	pub terms: &'a OrderPurchase,
	pub solver: B256,
	pub purchaser: B256,
	pub solver_signature: &'a [u8],
}

impl SettlerBase {
	fn purchase_key(solver: B256, order_id: B256) -> String {
		format!("{}:{}", solver, order_id)
	}

	pub async fn purchase_record(&self, solver: B256, order_id: B256) -> Result<Option<PurchaseRecord>, SettlementError> {
		Ok(self
			.chain()
			.storage()
			.retrieve_optional(&self.namespace(PURCHASES), &Self::purchase_key(solver, order_id))
			.await?)
	}

	/// Buys the solver's claim on `order_id`, the caller paying.
	///
	/// `purchasable` decides which order statuses accept a purchase.
	pub(crate) async fn purchase(
		&self,
		ctx: &CallContext,
		order_id: B256,
		inputs: &[Input],
		request: PurchaseRequest<'_>,
		purchasable: impl Fn(OrderStatus) -> bool,
	) -> Result<(), SettlementError> {
		let PurchaseRequest {
			terms,
			solver,
			purchaser,
			solver_signature,
		} = request;

		if purchaser.is_zero() {
			return Err(SettlementError::ZeroValue("purchaser"));
		}
		if ctx.timestamp > terms.expiry {
			return Err(SettlementError::DeadlinePassed {
				deadline: terms.expiry,
				now: ctx.timestamp,
			});
		}
		if terms.order_id != order_id {
			return Err(SettlementError::OrderIdMismatch {
				expected: order_id,
				actual: terms.order_id,
			});
		}
		if terms.discount_bps > BPS_DENOMINATOR {
			return Err(SettlementError::InvalidAmount(format!(
				"discount {} bps exceeds {} bps",
				terms.discount_bps, BPS_DENOMINATOR
			)));
		}

		let status = self.order_status(order_id).await?;
		if !purchasable(status) {
			return Err(SettlementError::UnexpectedStatus {
				order_id,
				expected: OrderStatus::Deposited,
				actual: status,
			});
		}

		let key = Self::purchase_key(solver, order_id);
		if self.chain().storage().exists(&self.namespace(PURCHASES), &key).await? {
			return Err(SettlementError::AlreadyPurchased { order_id, solver });
		}

		let solver_address = identifier_to_address(solver)?;
		verify_signer(solver_address, terms.signing_hash(self), solver_signature)?;

		let cutoff = ctx
			.timestamp
			.checked_add(u64::from(terms.time_to_buy))
			.and_then(|cutoff| u32::try_from(cutoff).ok())
			.ok_or_else(|| SettlementError::InvalidAmount(format!("time to buy {} overflows", terms.time_to_buy)))?;
		let record = PurchaseRecord { cutoff, purchaser };
		self.chain()
			.storage()
			.store(&self.namespace(PURCHASES), &key, &record)
			.await?;

		let as_settler = self.as_contract(ctx);
		let mut delivered = Vec::with_capacity(inputs.len());
		for input in inputs {
			let (net, _) = self.fee().split(input.amount);
			let amount = terms.discounted(net);
			if !amount.is_zero() {
				self.env()
					.tokens
					.transfer_from(&as_settler, input.token_address(), ctx.caller, terms.destination, amount)
					.await?;
			}
			delivered.push(Input::new(input.token, amount));
		}
		self.deliver_callback(ctx, terms.destination, &delivered, &terms.call)
			.await?;

		self.emit(OrderEvent::Purchased {
			settler: self.address(),
			order_id,
			solver,
			purchaser,
		});
		info!(order_id = %order_id, solver = %solver, purchaser = %purchaser, cutoff, "Order purchased");
		Ok(())
	}

	/// Who collects the inputs of a proven order.
	///
	/// Consumes any purchase record of the order solver: the purchaser owns
	/// the order if every fill landed by the cutoff, the solver otherwise.
	pub(crate) async fn resolve_owner(&self, order_id: B256, params: &SolveParams) -> Result<B256, SettlementError> {
		let solver = params
			.order_solver()
			.ok_or_else(|| SettlementError::InvalidSolveParams("no solver".into()))?;

		let key = Self::purchase_key(solver, order_id);
		let Some(record) = self
			.chain()
			.storage()
			.retrieve_optional::<PurchaseRecord>(&self.namespace(PURCHASES), &key)
			.await?
		else {
			return Ok(solver);
		};
		self.chain().storage().remove(&self.namespace(PURCHASES), &key).await?;

		let owner = if params.max_timestamp() <= record.cutoff {
			record.purchaser
		} else {
			solver
		};
		debug!(order_id = %order_id, owner = %owner, cutoff = record.cutoff, "Resolved purchased order owner");
		Ok(owner)
	}
}
