//! Single-chain test world with funded actors and every settler variant.

use crate::base::{Environment, SettlerBase};
use crate::bond::{BondParameters, BondSettler};
use crate::compact::{CompactSettler, LockAuthorization};
use crate::error::ErrorKind;
use crate::escrow::{EscrowFunding, EscrowSettler};
use crate::fee::GovernanceFee;
use crate::multichain::MultichainEscrowSettler;
use alloy_signer::SignerSync;
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use settler_custody::implementations::compact::ResourceLockRegistry;
use settler_custody::implementations::permit2::SignatureTransfer;
use settler_custody::implementations::token::{TokenLedger, TransferHook};
use settler_custody::{CallbackRegistry, CustodyError, InputCallbackInterface, TokenInterface};
use settler_oracle::implementations::local::LocalFillOracle;
use settler_oracle::OracleRegistry;
use settler_storage::implementations::memory::MemoryStorage;
use settler_storage::{Chain, StorageService};
use settler_types::standards::eip712::{self, signing_hash_from_struct_hash};
use settler_types::standards::permit2::{
	multichain_permit2_witness_hash, permit2_witness_hash, permit_batch_witness_digest, PermitBatchTransferFrom,
	TokenPermissions, MULTICHAIN_PERMIT2_WITNESS_TYPE_STRING, PERMIT2_WITNESS_TYPE_STRING,
};
use settler_types::{
	address_to_identifier, address_to_token_id, Address, Bytes, CallContext, EventBus, FixedBytes, Input,
	MandateOutput, MultichainOrder, SolveParams, StandardOrder, B256, U256,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

pub const INPUT_TOKEN: Address = Address::repeat_byte(0x70);
pub const OUTPUT_TOKEN: Address = Address::repeat_byte(0x71);
pub const FEE_RECIPIENT: Address = Address::repeat_byte(0xfe);
pub const LOCAL_ORACLE: Address = Address::repeat_byte(0x0a);
pub const PERMIT2: Address = Address::repeat_byte(0x22);
pub const REGISTRY: Address = Address::repeat_byte(0x33);
pub const ESCROW: Address = Address::repeat_byte(0xe1);
pub const COMPACT: Address = Address::repeat_byte(0xe2);
pub const BOND: Address = Address::repeat_byte(0xe3);
pub const MULTICHAIN: Address = Address::repeat_byte(0xe4);
pub const LOCK_TAG: FixedBytes<12> = FixedBytes::repeat_byte(0x01);

pub const FILL_DEADLINE: u32 = 100;
pub const EXPIRES: u32 = 200;

pub struct World {
	pub env: Environment,
	pub tokens: Arc<TokenLedger>,
	pub permit2: Arc<SignatureTransfer>,
	pub registry: Arc<ResourceLockRegistry>,
	pub local_oracle: Arc<LocalFillOracle>,
	pub user: PrivateKeySigner,
	pub solver: PrivateKeySigner,
	pub purchaser: PrivateKeySigner,
	pub disputer: PrivateKeySigner,
	pub allocator: PrivateKeySigner,
}

impl World {
	pub async fn new() -> Self {
		let chain = Chain::new(
			U256::from(1),
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			EventBus::new(64),
		);
		let tokens = Arc::new(TokenLedger::new(chain.clone()));
		let permit2 = Arc::new(SignatureTransfer::new(PERMIT2, chain.clone(), tokens.clone()));
		let registry = Arc::new(ResourceLockRegistry::new(REGISTRY, chain.clone(), tokens.clone()));
		let local_oracle = Arc::new(LocalFillOracle::new(LOCAL_ORACLE, chain.clone(), tokens.clone()));

		let oracles = Arc::new(OracleRegistry::new());
		oracles.register(local_oracle.clone());

		let allocator = PrivateKeySigner::random();
		registry.register_allocator(LOCK_TAG, allocator.address());

		let world = Self {
			env: Environment {
				chain,
				tokens: tokens.clone(),
				oracles,
				callbacks: Arc::new(CallbackRegistry::new()),
			},
			tokens,
			permit2,
			registry,
			local_oracle,
			user: PrivateKeySigner::random(),
			solver: PrivateKeySigner::random(),
			purchaser: PrivateKeySigner::random(),
			disputer: PrivateKeySigner::random(),
			allocator,
		};

		for actor in [world.user.address(), world.purchaser.address(), world.disputer.address()] {
			world.mint(INPUT_TOKEN, actor, 1_000).await;
		}
		world.mint(OUTPUT_TOKEN, world.solver.address(), 1_000).await;

		for actor in [
			world.user.address(),
			world.solver.address(),
			world.purchaser.address(),
			world.disputer.address(),
		] {
			for spender in [ESCROW, COMPACT, BOND, MULTICHAIN] {
				world.approve(actor, INPUT_TOKEN, spender).await;
			}
		}
		world.approve(world.user.address(), INPUT_TOKEN, PERMIT2).await;
		world.approve(world.user.address(), INPUT_TOKEN, REGISTRY).await;
		world.approve(world.solver.address(), OUTPUT_TOKEN, LOCAL_ORACLE).await;
		world
	}

	pub async fn mint(&self, token: Address, to: Address, amount: u64) {
		self.tokens.mint(token, to, U256::from(amount)).await.unwrap();
	}

	async fn approve(&self, owner: Address, token: Address, spender: Address) {
		self.tokens
			.approve(&CallContext::new(owner, 0), token, spender, U256::MAX)
			.await
			.unwrap();
	}

	pub async fn balance(&self, token: Address, account: Address) -> U256 {
		self.tokens.balance_of(token, account).await.unwrap()
	}

	fn fee(bps: u64) -> GovernanceFee {
		GovernanceFee::new(bps, FEE_RECIPIENT).unwrap()
	}

	pub fn escrow(&self) -> EscrowSettler {
		self.escrow_with_fee(0)
	}

	pub fn escrow_with_fee(&self, bps: u64) -> EscrowSettler {
		EscrowSettler::new(ESCROW, self.env.clone(), Self::fee(bps)).with_funding(self.funding())
	}

	pub fn compact(&self) -> CompactSettler {
		self.compact_with_fee(0)
	}

	pub fn compact_with_fee(&self, bps: u64) -> CompactSettler {
		CompactSettler::new(COMPACT, self.env.clone(), Self::fee(bps), self.registry.clone())
	}

	pub fn bond(&self, params: BondParameters) -> BondSettler {
		BondSettler::new(BOND, self.env.clone(), GovernanceFee::none(), params).with_funding(self.funding())
	}

	pub fn multichain(&self) -> MultichainEscrowSettler {
		MultichainEscrowSettler::new(MULTICHAIN, self.env.clone(), GovernanceFee::none()).with_funding(self.funding())
	}

	fn funding(&self) -> EscrowFunding {
		EscrowFunding::new()
			.with_signature_transfer(self.permit2.clone())
			.with_authorized_transfer(self.tokens.clone())
	}

	pub fn user_ctx(&self, timestamp: u64) -> CallContext {
		CallContext::new(self.user.address(), timestamp)
	}

	pub fn solver_ctx(&self, timestamp: u64) -> CallContext {
		CallContext::new(self.solver.address(), timestamp)
	}

	pub fn disputer_ctx(&self, timestamp: u64) -> CallContext {
		CallContext::new(self.disputer.address(), timestamp)
	}

	pub fn solver_id(&self) -> B256 {
		address_to_identifier(self.solver.address())
	}

	pub fn purchaser_id(&self) -> B256 {
		address_to_identifier(self.purchaser.address())
	}

	/// Order for `amount` of the input token, filled through the local oracle.
	pub fn order(&self, amount: u64) -> StandardOrder {
		self.order_with_inputs(vec![Input::new(address_to_token_id(INPUT_TOKEN), U256::from(amount))])
	}

	/// Order whose input is locked by the user in the registry.
	pub async fn locked_order(&self, amount: u64) -> StandardOrder {
		let id = self
			.registry
			.deposit(&self.user_ctx(0), LOCK_TAG, INPUT_TOKEN, U256::from(amount), self.user.address())
			.await
			.unwrap();
		self.order_with_inputs(vec![Input::new(id, U256::from(amount))])
	}

	fn order_with_inputs(&self, inputs: Vec<Input>) -> StandardOrder {
		StandardOrder {
			user: self.user.address(),
			nonce: U256::from(1),
			origin_chain_id: U256::from(1),
			expires: EXPIRES,
			fill_deadline: FILL_DEADLINE,
			input_oracle: LOCAL_ORACLE,
			inputs,
			outputs: vec![MandateOutput {
				oracle: address_to_identifier(LOCAL_ORACLE),
				settler: address_to_identifier(LOCAL_ORACLE),
				chain_id: U256::from(1),
				token: address_to_identifier(OUTPUT_TOKEN),
				amount: U256::from(50),
				recipient: address_to_identifier(self.user.address()),
				call: Bytes::new(),
				context: Bytes::new(),
			}],
		}
	}

	/// Fills every output of `order` as the solver at `timestamp`.
	pub async fn fill_all(&self, order_id: B256, order: &StandardOrder, timestamp: u32) -> SolveParams {
		self.fill_outputs(order_id, &order.outputs, order.fill_deadline, timestamp)
			.await
	}

	pub async fn fill_outputs(
		&self,
		order_id: B256,
		outputs: &[MandateOutput],
		fill_deadline: u32,
		timestamp: u32,
	) -> SolveParams {
		let ctx = self.solver_ctx(u64::from(timestamp));
		for output in outputs {
			self.local_oracle
				.fill(&ctx, order_id, output, self.solver_id(), fill_deadline)
				.await
				.unwrap();
		}
		SolveParams::single(self.solver_id(), vec![timestamp; outputs.len()])
	}

	pub fn sign_digest(&self, signer: &PrivateKeySigner, digest: B256) -> Bytes {
		signer.sign_hash_sync(&digest).unwrap().as_bytes().to_vec().into()
	}

	/// User's signature transfer of the order inputs to `spender`.
	pub fn sign_permit2(&self, order: &StandardOrder, spender: Address) -> Bytes {
		let permit = PermitBatchTransferFrom {
			permitted: order.inputs.iter().map(TokenPermissions::from).collect(),
			nonce: order.nonce,
			deadline: U256::from(order.fill_deadline),
		};
		let witness = permit2_witness_hash(order.expires, order.input_oracle, &order.outputs);
		let digest = permit_batch_witness_digest(
			&self.permit2.domain(),
			&permit,
			spender,
			witness,
			PERMIT2_WITNESS_TYPE_STRING,
		);
		self.sign_digest(&self.user, digest)
	}

	/// User's receive authorization of the single order input to `to`.
	pub fn sign_receive_authorization(&self, order: &StandardOrder, to: Address, nonce: B256) -> Bytes {
		self.sign_receive(order.inputs[0].amount, order.fill_deadline, to, nonce)
	}

	/// User's receive authorization of `value` input tokens to `to`.
	pub fn sign_receive(&self, value: U256, fill_deadline: u32, to: Address, nonce: B256) -> Bytes {
		let authorization = eip712::ReceiveWithAuthorization {
			from: self.user.address(),
			to,
			value,
			validAfter: U256::ZERO,
			validBefore: U256::from(fill_deadline),
			nonce,
		};
		let digest = eip712::signing_hash(&authorization, &self.tokens.authorization_domain(INPUT_TOKEN));
		self.sign_digest(&self.user, digest)
	}

	/// User's signature transfer of one multichain share, witnessing `order_id`.
	pub fn sign_multichain_permit2(&self, order: &MultichainOrder, order_id: B256, spender: Address) -> Bytes {
		let permit = PermitBatchTransferFrom {
			permitted: order.inputs.iter().map(TokenPermissions::from).collect(),
			nonce: order.nonce,
			deadline: U256::from(order.fill_deadline),
		};
		let digest = permit_batch_witness_digest(
			&self.permit2.domain(),
			&permit,
			spender,
			multichain_permit2_witness_hash(order_id),
			MULTICHAIN_PERMIT2_WITNESS_TYPE_STRING,
		);
		self.sign_digest(&self.user, digest)
	}

	/// Solver's permission for a third party to finalise to `destination`.
	pub fn sign_allow_open(&self, settler: &SettlerBase, order_id: B256, destination: B256, call: Bytes) -> Bytes {
		let allow = eip712::AllowOpen {
			orderId: order_id,
			destination,
			call,
		};
		self.sign_digest(&self.solver, eip712::signing_hash(&allow, &settler.domain()))
	}

	/// Sponsor and allocator signatures over the compact `claim_hash`.
	pub fn sign_compact(&self, claim_hash: B256) -> LockAuthorization {
		let digest = signing_hash_from_struct_hash(&self.registry.domain(), claim_hash);
		LockAuthorization {
			sponsor_signature: self.sign_digest(&self.user, digest),
			allocator_data: self.sign_digest(&self.allocator, digest),
		}
	}
}

/// Token hook that tries to refund an order from inside a transfer.
pub struct ReenterRefund {
	settler: Arc<EscrowSettler>,
	order: StandardOrder,
	fired: AtomicBool,
	outcome: Mutex<Option<ErrorKind>>,
}

impl ReenterRefund {
	pub fn new(settler: Arc<EscrowSettler>, order: StandardOrder) -> Self {
		Self {
			settler,
			order,
			fired: AtomicBool::new(false),
			outcome: Mutex::new(None),
		}
	}

	/// Error kind of the re-entrant call, if it failed.
	pub fn outcome(&self) -> Option<ErrorKind> {
		*self.outcome.lock().unwrap()
	}
}

#[async_trait]
impl TransferHook for ReenterRefund {
	async fn on_transfer(&self, _token: Address, _from: Address, _to: Address, _amount: U256) -> Result<(), CustodyError> {
		if self.fired.swap(true, Ordering::SeqCst) {
			return Ok(());
		}
		let ctx = CallContext::new(Address::repeat_byte(0x66), u64::from(self.order.expires));
		if let Err(error) = self.settler.refund(&ctx, &self.order).await {
			*self.outcome.lock().unwrap() = Some(error.kind());
		}
		Ok(())
	}
}

/// One observed input callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveredCall {
	pub caller: Address,
	pub inputs: Vec<Input>,
	pub payload: Bytes,
	/// Destination's balance of `INPUT_TOKEN` when the callback ran.
	pub balance: U256,
}

/// Destination callback that records every delivery.
pub struct RecordingCallback {
	account: Address,
	tokens: Arc<TokenLedger>,
	calls: Mutex<Vec<DeliveredCall>>,
}

impl RecordingCallback {
	/// Registers a recorder for `account` in the world's callback registry.
	pub fn install(world: &World, account: Address) -> Arc<Self> {
		let callback = Arc::new(Self {
			account,
			tokens: world.tokens.clone(),
			calls: Mutex::new(Vec::new()),
		});
		world.env.callbacks.register(account, callback.clone());
		callback
	}

	pub fn calls(&self) -> Vec<DeliveredCall> {
		self.calls.lock().unwrap().clone()
	}
}

#[async_trait]
impl InputCallbackInterface for RecordingCallback {
	async fn on_inputs_delivered(&self, ctx: &CallContext, inputs: &[Input], payload: &Bytes) -> Result<(), CustodyError> {
		let balance = self.tokens.balance_of(INPUT_TOKEN, self.account).await?;
		self.calls.lock().unwrap().push(DeliveredCall {
			caller: ctx.caller,
			inputs: inputs.to_vec(),
			payload: payload.clone(),
			balance,
		});
		Ok(())
	}
}
