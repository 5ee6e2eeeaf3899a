//! Oracle collaborators and the proof validation protocol.
//!
//! An oracle affirms fill descriptions to the origin chain. Settlement
//! contracts build a [`ProofSeries`] from an order and a solver's declared
//! fills and hand it to the order's designated oracle, which must either
//! affirm every record or fail.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use settler_custody::CustodyError;
use settler_storage::StorageError;
use settler_types::{Address, EncodingError, B256, U256};
use std::sync::Arc;
use thiserror::Error;

pub mod proof;

pub use proof::{build_proof_series, validate_fills, ProofError, ProofRecord, ProofSeries};

pub mod implementations {
	pub mod attestation;
	pub mod local;
	pub mod store;
}

#[derive(Debug, Error)]
pub enum OracleError {
	/// Record `index` of the series could not be affirmed.
	#[error("Proof record {index} is not proven")]
	NotProven { index: usize },
	#[error("No oracle deployed at {0}")]
	UnknownOracle(Address),
	#[error("Not authorized: {0}")]
	NotAuthorized(String),
	#[error("Output already filled for order {order_id}")]
	AlreadyFilled { order_id: B256, output_hash: B256 },
	#[error("Fill deadline {fill_deadline} passed at {now}")]
	FillDeadlinePassed { fill_deadline: u32, now: u64 },
	#[error("Invalid output: {0}")]
	InvalidOutput(String),
	#[error("Invalid payload: {0}")]
	InvalidPayload(String),
	#[error("Encoding error: {0}")]
	Encoding(#[from] EncodingError),
	#[error("Custody error: {0}")]
	Custody(#[from] CustodyError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

/// Trait implemented by every oracle able to validate fills on this chain.
#[async_trait]
pub trait OracleInterface: Send + Sync {
	fn address(&self) -> Address;

	async fn is_proven(&self, record: &ProofRecord) -> Result<bool, OracleError>;

	/// Affirms every record of `series` or fails on the first unproven one.
	async fn require_all_proven(&self, series: &ProofSeries) -> Result<(), OracleError> {
		for (index, record) in series.records().iter().enumerate() {
			if !self.is_proven(record).await? {
				return Err(OracleError::NotProven { index });
			}
		}
		Ok(())
	}
}

/// Oracles deployed on a chain, by address.
#[derive(Default)]
pub struct OracleRegistry {
	oracles: DashMap<Address, Arc<dyn OracleInterface>>,
}

impl OracleRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, oracle: Arc<dyn OracleInterface>) {
		self.oracles.insert(oracle.address(), oracle);
	}

	pub fn get(&self, address: Address) -> Result<Arc<dyn OracleInterface>, OracleError> {
		self.oracles
			.get(&address)
			.map(|entry| Arc::clone(entry.value()))
			.ok_or(OracleError::UnknownOracle(address))
	}
}

/// Key of one attested payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttestationKey {
	pub remote_chain_id: U256,
	/// Oracle on the remote chain that sent the attestation.
	pub remote_oracle: B256,
	/// Contract on the remote chain whose payload was attested.
	pub application: B256,
	pub payload_hash: B256,
}

/// Table of attested payloads, populated by bridge adapters.
#[async_trait]
pub trait ProofStore: Send + Sync {
	async fn is_attested(&self, key: &AttestationKey) -> Result<bool, OracleError>;

	async fn attest(&self, key: &AttestationKey) -> Result<(), OracleError>;
}
