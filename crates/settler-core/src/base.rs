//! State and behaviour shared by every settler variant.

use crate::error::SettlementError;
use crate::fee::GovernanceFee;
use crate::status::{OrderStatus, Transition};
use alloy_sol_types::Eip712Domain;
use settler_custody::{CallbackRegistry, TokenInterface};
use settler_oracle::{validate_fills, OracleRegistry};
use settler_storage::Chain;
use settler_types::standards::eip712;
use settler_types::{
	identifier_to_address, strict_token_address, verify_signer, Address, Bytes, CallContext, FillRequirements, Input,
	SettlerEvent, SolveParams, B256, U256,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Collaborators every settler on a chain talks to.
#[derive(Clone)]
pub struct Environment {
	pub chain: Chain,
	pub tokens: Arc<dyn TokenInterface>,
	pub oracles: Arc<OracleRegistry>,
	pub callbacks: Arc<CallbackRegistry>,
}

/// How a finalise call is authorized and where the inputs go.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalisation {
	/// The caller is the order owner and receives the inputs.
	ToSelf,
	/// The caller is the order owner and directs the inputs elsewhere.
	To { destination: B256, call: Bytes },
	/// A third party finalises with the owner's `AllowOpen` signature.
	For {
		destination: B256,
		call: Bytes,
		signature: Bytes,
	},
}

pub struct SettlerBase {
	address: Address,
	domain_name: &'static str,
	env: Environment,
	fee: GovernanceFee,
}

impl SettlerBase {
	pub fn new(address: Address, domain_name: &'static str, env: Environment, fee: GovernanceFee) -> Self {
		Self {
			address,
			domain_name,
			env,
			fee,
		}
	}

	pub fn address(&self) -> Address {
		self.address
	}

	pub fn chain(&self) -> &Chain {
		&self.env.chain
	}

	pub fn chain_id(&self) -> U256 {
		self.env.chain.chain_id()
	}

	pub fn env(&self) -> &Environment {
		&self.env
	}

	pub fn fee(&self) -> &GovernanceFee {
		&self.fee
	}

	/// EIP-712 domain of this settler's authorizations.
	pub fn domain(&self) -> Eip712Domain {
		eip712::domain(self.domain_name, self.chain_id(), self.address)
	}

	/// Context of a call made by this contract.
	pub(crate) fn as_contract(&self, ctx: &CallContext) -> CallContext {
		ctx.with_caller(self.address)
	}

	pub(crate) fn namespace(&self, table: &str) -> String {
		format!("{}:{}", table, self.address)
	}

	pub(crate) fn emit(&self, event: impl Into<SettlerEvent>) {
		self.env.chain.events().stage(event);
	}

	pub async fn order_status(&self, order_id: B256) -> Result<OrderStatus, SettlementError> {
		Ok(self
			.chain()
			.storage()
			.retrieve_optional(&self.namespace("order_status"), &order_id.to_string())
			.await?
			.unwrap_or_default())
	}

	/// Applies `transition` to the stored status and writes the result.
	pub(crate) async fn advance(&self, order_id: B256, transition: Transition) -> Result<OrderStatus, SettlementError> {
		let current = self.order_status(order_id).await?;
		let next = transition
			.apply(current)
			.map_err(|source| SettlementError::InvalidOrderStatus { order_id, source })?;

		self.chain()
			.storage()
			.store(&self.namespace("order_status"), &order_id.to_string(), &next)
			.await?;
		debug!(order_id = %order_id, from = %current, to = %next, "Order status advanced");
		Ok(next)
	}

	pub(crate) async fn require_status(&self, order_id: B256, expected: OrderStatus) -> Result<(), SettlementError> {
		let actual = self.order_status(order_id).await?;
		if actual != expected {
			return Err(SettlementError::UnexpectedStatus {
				order_id,
				expected,
				actual,
			});
		}
		Ok(())
	}

	/// Post-call check that nothing re-entered and moved the order on.
	pub(crate) async fn verify_status(&self, order_id: B256, expected: OrderStatus) -> Result<(), SettlementError> {
		let actual = self.order_status(order_id).await?;
		if actual != expected {
			warn!(order_id = %order_id, %expected, %actual, "Order status changed during external call");
			return Err(SettlementError::ReentrancyDetected { order_id });
		}
		Ok(())
	}

	pub(crate) fn check_chain(&self, origin_chain_id: U256) -> Result<(), SettlementError> {
		if origin_chain_id != self.chain_id() {
			return Err(SettlementError::WrongChain {
				order: origin_chain_id,
				chain: self.chain_id(),
			});
		}
		Ok(())
	}

	/// Orders can only be opened while they can still be filled.
	pub(crate) fn check_fillable(&self, ctx: &CallContext, fill_deadline: u32) -> Result<(), SettlementError> {
		if ctx.timestamp >= u64::from(fill_deadline) {
			return Err(SettlementError::DeadlinePassed {
				deadline: u64::from(fill_deadline),
				now: ctx.timestamp,
			});
		}
		Ok(())
	}

	pub(crate) async fn validate_fills(
		&self,
		requirements: &FillRequirements<'_>,
		order_id: B256,
		params: &SolveParams,
	) -> Result<(), SettlementError> {
		validate_fills(&self.env.oracles, requirements, order_id, params).await?;
		Ok(())
	}

	/// Checks the caller may finalise for `owner`; returns destination and call.
	pub(crate) fn authorize_finalisation(
		&self,
		ctx: &CallContext,
		order_id: B256,
		owner: B256,
		finalisation: &Finalisation,
	) -> Result<(B256, Bytes), SettlementError> {
		match finalisation {
			Finalisation::ToSelf => {
				self.require_owner(ctx, owner)?;
				Ok((ctx.caller_identifier(), Bytes::new()))
			}
			Finalisation::To { destination, call } => {
				self.require_owner(ctx, owner)?;
				if destination.is_zero() {
					return Err(SettlementError::ZeroValue("destination"));
				}
				Ok((*destination, call.clone()))
			}
			Finalisation::For {
				destination,
				call,
				signature,
			} => {
				if destination.is_zero() {
					return Err(SettlementError::ZeroValue("destination"));
				}
				let owner_address = identifier_to_address(owner).map_err(|_| SettlementError::NotOrderOwner {
					caller: ctx.caller,
					owner,
				})?;
				let allow = eip712::AllowOpen {
					orderId: order_id,
					destination: *destination,
					call: call.clone(),
				};
				verify_signer(owner_address, eip712::signing_hash(&allow, &self.domain()), signature)?;
				Ok((*destination, call.clone()))
			}
		}
	}

	fn require_owner(&self, ctx: &CallContext, owner: B256) -> Result<(), SettlementError> {
		if ctx.caller_identifier() != owner {
			return Err(SettlementError::NotOrderOwner {
				caller: ctx.caller,
				owner,
			});
		}
		Ok(())
	}

	/// Rejects resource-lock ids where plain token addresses are expected.
	pub(crate) fn check_plain_tokens(inputs: &[Input]) -> Result<(), SettlementError> {
		for input in inputs {
			strict_token_address(input.token)?;
		}
		Ok(())
	}

	/// Pulls `inputs` from `from` into this contract (requires an allowance).
	pub(crate) async fn collect_inputs(&self, ctx: &CallContext, inputs: &[Input], from: Address) -> Result<(), SettlementError> {
		let as_settler = self.as_contract(ctx);
		for input in inputs {
			self.env
				.tokens
				.transfer_from(&as_settler, input.token_address(), from, self.address, input.amount)
				.await?;
		}
		Ok(())
	}

	/// Pays `inputs` held by this contract to `recipient`.
	///
	/// With `charge_fee` the governance fee is split off first. Returns the
	/// amounts the recipient actually received.
	pub(crate) async fn pay_inputs(
		&self,
		ctx: &CallContext,
		inputs: &[Input],
		recipient: Address,
		charge_fee: bool,
	) -> Result<Vec<Input>, SettlementError> {
		let as_settler = self.as_contract(ctx);
		let mut delivered = Vec::with_capacity(inputs.len());
		for input in inputs {
			let (amount, fee) = if charge_fee {
				self.fee.split(input.amount)
			} else {
				(input.amount, U256::ZERO)
			};
			let token = input.token_address();
			if !amount.is_zero() {
				self.env.tokens.transfer(&as_settler, token, recipient, amount).await?;
			}
			if !fee.is_zero() {
				self.env
					.tokens
					.transfer(&as_settler, token, self.fee.recipient, fee)
					.await?;
			}
			delivered.push(Input::new(input.token, amount));
		}
		Ok(delivered)
	}

	/// Invokes `destination`'s input callback when `call` is non-empty.
	pub(crate) async fn deliver_callback(
		&self,
		ctx: &CallContext,
		destination: Address,
		inputs: &[Input],
		call: &Bytes,
	) -> Result<(), SettlementError> {
		if call.is_empty() {
			return Ok(());
		}
		self.env
			.callbacks
			.deliver(&self.as_contract(ctx), destination, inputs, call)
			.await?;
		Ok(())
	}
}
