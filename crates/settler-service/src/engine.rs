//! Wiring of a configured deployment.
//!
//! Builds the chain, the custody and oracle collaborators and one settler per
//! configured deployment, all sharing a single journaled storage.

use anyhow::{Context, Result};
use serde::Deserialize;
use settler_config::{SettlerConfig, SettlerKind};
use settler_core::{
	BondParameters, BondSettler, CollateralLedger, CompactSettler, Environment, EscrowFunding, EscrowSettler,
	GovernanceFee, MultichainEscrowSettler, OrderStatus,
};
use settler_custody::implementations::compact::ResourceLockRegistry;
use settler_custody::implementations::permit2::SignatureTransfer;
use settler_custody::implementations::token::TokenLedger;
use settler_custody::{CallbackRegistry, ResourceLockInterface};
use settler_oracle::implementations::attestation::AttestationOracle;
use settler_oracle::implementations::local::LocalFillOracle;
use settler_oracle::implementations::store::StorageProofStore;
use settler_oracle::OracleRegistry;
use settler_storage::{create_storage, Chain, StorageService};
use settler_types::{Address, EventBus, MultichainOrder, SettlerEvent, StandardOrder, B256, U256};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::info;

const EVENT_CAPACITY: usize = 1024;

/// An order as read from a JSON document.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum OrderDocument {
	Multichain(MultichainOrder),
	Standard(StandardOrder),
}

/// A settler deployed by the engine.
pub enum Deployment {
	Escrow(EscrowSettler),
	Compact(CompactSettler),
	Bond(BondSettler),
	Multichain(MultichainEscrowSettler),
}

impl Deployment {
	pub fn kind(&self) -> SettlerKind {
		match self {
			Deployment::Escrow(_) => SettlerKind::Escrow,
			Deployment::Compact(_) => SettlerKind::Compact,
			Deployment::Bond(_) => SettlerKind::Bond,
			Deployment::Multichain(_) => SettlerKind::Multichain,
		}
	}

	pub fn address(&self) -> Address {
		match self {
			Deployment::Escrow(settler) => settler.address(),
			Deployment::Compact(settler) => settler.address(),
			Deployment::Bond(settler) => settler.address(),
			Deployment::Multichain(settler) => settler.address(),
		}
	}

	pub async fn order_status(&self, order_id: B256) -> Result<OrderStatus> {
		let status = match self {
			Deployment::Escrow(settler) => settler.order_status(order_id).await?,
			Deployment::Compact(settler) => settler.order_status(order_id).await?,
			Deployment::Bond(settler) => settler.order_status(order_id).await?,
			Deployment::Multichain(settler) => settler.order_status(order_id).await?,
		};
		Ok(status)
	}

	/// Identifier this settler assigns to `order`.
	pub fn order_identifier(&self, order: &OrderDocument) -> Result<B256> {
		match (self, order) {
			(Deployment::Escrow(settler), OrderDocument::Standard(order)) => Ok(settler.order_identifier(order)),
			(Deployment::Compact(settler), OrderDocument::Standard(order)) => Ok(settler.order_identifier(order)),
			(Deployment::Bond(settler), OrderDocument::Standard(order)) => Ok(settler.order_identifier(order)),
			(Deployment::Multichain(settler), OrderDocument::Multichain(order)) => {
				Ok(settler.order_identifier(order)?)
			}
			(Deployment::Multichain(_), OrderDocument::Standard(_)) => {
				anyhow::bail!("Multichain settler expects a multichain order")
			}
			(deployment, OrderDocument::Multichain(_)) => {
				anyhow::bail!("{} settler expects a single-chain order", deployment.kind())
			}
		}
	}
}

pub struct SettlerEngine {
	env: Environment,
	tokens: Arc<TokenLedger>,
	local_oracle: Option<Arc<LocalFillOracle>>,
	deployments: HashMap<Address, Deployment>,
	collateral: Option<CollateralLedger>,
}

impl SettlerEngine {
	pub fn from_config(config: &SettlerConfig) -> Result<Self> {
		let backend = create_storage(&config.storage.backend, &config.storage.options_value())
			.with_context(|| format!("Failed to create '{}' storage", config.storage.backend))?;
		let chain = Chain::new(
			U256::from(config.settler.chain_id),
			Arc::new(StorageService::new(backend)),
			EventBus::new(EVENT_CAPACITY),
		);

		let tokens = Arc::new(TokenLedger::new(chain.clone()));
		let signature_transfer = config
			.custody
			.signature_transfer
			.map(|address| Arc::new(SignatureTransfer::new(address, chain.clone(), tokens.clone())));
		let resource_lock = config.custody.resource_lock.map(|address| {
			let registry = ResourceLockRegistry::new(address, chain.clone(), tokens.clone());
			for allocator in &config.custody.allocators {
				registry.register_allocator(allocator.lock_tag, allocator.allocator);
			}
			Arc::new(registry)
		});

		let oracles = Arc::new(OracleRegistry::new());
		let local_oracle = config.oracles.local.map(|address| {
			let oracle = Arc::new(LocalFillOracle::new(address, chain.clone(), tokens.clone()));
			oracles.register(oracle.clone());
			oracle
		});
		for attestation in &config.oracles.attestation {
			let store = Arc::new(StorageProofStore::new(
				chain.clone(),
				format!("attestations:{}", attestation.address),
			));
			oracles.register(Arc::new(AttestationOracle::new(
				attestation.address,
				chain.clone(),
				attestation.bridge,
				store,
			)));
		}

		let env = Environment {
			chain: chain.clone(),
			tokens: tokens.clone(),
			oracles,
			callbacks: Arc::new(CallbackRegistry::new()),
		};

		let mut funding = EscrowFunding::new().with_authorized_transfer(tokens.clone());
		if let Some(signature_transfer) = &signature_transfer {
			funding = funding.with_signature_transfer(signature_transfer.clone());
		}

		let mut deployments = HashMap::new();
		for deployment in &config.deployments {
			let fee = GovernanceFee::new(deployment.fee_bps, deployment.fee_recipient)?;
			let settler = match deployment.kind {
				SettlerKind::Escrow => Deployment::Escrow(
					EscrowSettler::new(deployment.address, env.clone(), fee).with_funding(funding.clone()),
				),
				SettlerKind::Compact => {
					let registry: Arc<dyn ResourceLockInterface> = resource_lock
						.clone()
						.context("Compact settler configured without a resource lock")?;
					Deployment::Compact(CompactSettler::new(deployment.address, env.clone(), fee, registry))
				}
				SettlerKind::Bond => {
					let params = BondParameters::new(
						config.dispute.bond_bps,
						config.dispute.dispute_window,
						config.dispute.waiting_time,
					)?;
					Deployment::Bond(
						BondSettler::new(deployment.address, env.clone(), fee, params).with_funding(funding.clone()),
					)
				}
				SettlerKind::Multichain => {
					Deployment::Multichain(
						MultichainEscrowSettler::new(deployment.address, env.clone(), fee).with_funding(funding.clone()),
					)
				}
			};
			info!(kind = %deployment.kind, address = %deployment.address, fee_bps = deployment.fee_bps, "Deployed settler");
			deployments.insert(deployment.address, settler);
		}

		let collateral = config.collateral.as_ref().map(|collateral| {
			let mut ledger = CollateralLedger::new(
				collateral.address,
				chain.clone(),
				tokens.clone(),
				collateral.operators.iter().copied(),
			)
			.with_authorized_transfer(tokens.clone());
			if let Some(signature_transfer) = &signature_transfer {
				ledger = ledger.with_signature_transfer(signature_transfer.clone());
			}
			info!(address = %collateral.address, operators = collateral.operators.len(), "Deployed collateral ledger");
			ledger
		});

		Ok(Self {
			env,
			tokens,
			local_oracle,
			deployments,
			collateral,
		})
	}

	pub fn chain(&self) -> &Chain {
		&self.env.chain
	}

	pub fn environment(&self) -> &Environment {
		&self.env
	}

	pub fn tokens(&self) -> &Arc<TokenLedger> {
		&self.tokens
	}

	pub fn local_oracle(&self) -> Option<&Arc<LocalFillOracle>> {
		self.local_oracle.as_ref()
	}

	pub fn collateral(&self) -> Option<&CollateralLedger> {
		self.collateral.as_ref()
	}

	pub fn deployment(&self, address: Address) -> Option<&Deployment> {
		self.deployments.get(&address)
	}

	pub fn deployments(&self) -> impl Iterator<Item = &Deployment> {
		self.deployments.values()
	}

	/// Events published after each successful top-level call.
	pub fn subscribe(&self) -> broadcast::Receiver<SettlerEvent> {
		self.env.chain.events().subscribe()
	}

	pub fn order_identifier(&self, settler: Address, order: &OrderDocument) -> Result<B256> {
		self.deployment(settler)
			.with_context(|| format!("No settler deployed at {}", settler))?
			.order_identifier(order)
	}
}
