//! Same-chain output settler that doubles as its own oracle.
//!
//! Solvers fill outputs whose settler is this contract directly on the
//! origin chain. The fill is recorded and later affirmed both as a local
//! proof record (when this contract is the order's oracle) and as a
//! cross-chain record naming this chain, oracle and settler.

use crate::{OracleError, OracleInterface, ProofRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use settler_custody::TokenInterface;
use settler_storage::Chain;
use settler_types::{
	address_to_identifier, fill_description_hash, identifier_to_address, Address, CallContext, FillEvent,
	MandateOutput, B256,
};
use std::sync::Arc;
use tracing::info;

const FILLS: &str = "local_fills";
const FILL_HASHES: &str = "local_fill_hashes";

/// What was recorded for one filled output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillRecord {
	pub solver: B256,
	pub timestamp: u32,
	pub fill_hash: B256,
}

pub struct LocalFillOracle {
	address: Address,
	chain: Chain,
	tokens: Arc<dyn TokenInterface>,
}

impl LocalFillOracle {
	pub fn new(address: Address, chain: Chain, tokens: Arc<dyn TokenInterface>) -> Self {
		Self { address, chain, tokens }
	}

	pub fn identifier(&self) -> B256 {
		address_to_identifier(self.address)
	}

	/// Delivers `output` of `order_id` from the caller to its recipient and
	/// records the fill on behalf of `solver`.
	///
	/// The caller must have approved this contract for the output token.
	/// Returns the fill description hash.
	pub async fn fill(
		&self,
		ctx: &CallContext,
		order_id: B256,
		output: &MandateOutput,
		solver: B256,
		fill_deadline: u32,
	) -> Result<B256, OracleError> {
		self.chain
			.execute(async {
				if output.settler != self.identifier() {
					return Err(OracleError::InvalidOutput(format!(
						"output settler {} is not {}",
						output.settler, self.address
					)));
				}
				if output.chain_id != self.chain.chain_id() {
					return Err(OracleError::InvalidOutput(format!(
						"output is for chain {}, this is chain {}",
						output.chain_id,
						self.chain.chain_id()
					)));
				}
				if ctx.timestamp > u64::from(fill_deadline) {
					return Err(OracleError::FillDeadlinePassed {
						fill_deadline,
						now: ctx.timestamp,
					});
				}
				let timestamp = u32::try_from(ctx.timestamp)
					.map_err(|_| OracleError::InvalidOutput(format!("timestamp {} overflows", ctx.timestamp)))?;

				let output_hash = output.identifier()?;
				let key = format!("{}:{}", order_id, output_hash);
				if self.chain.storage().exists(FILLS, &key).await? {
					return Err(OracleError::AlreadyFilled { order_id, output_hash });
				}

				let token = identifier_to_address(output.token).map_err(|e| OracleError::InvalidOutput(e.to_string()))?;
				let recipient =
					identifier_to_address(output.recipient).map_err(|e| OracleError::InvalidOutput(e.to_string()))?;

				let fill_hash = fill_description_hash(solver, order_id, timestamp, output)?;
				let record = FillRecord {
					solver,
					timestamp,
					fill_hash,
				};
				self.chain.storage().store(FILLS, &key, &record).await?;
				self.chain
					.storage()
					.store(FILL_HASHES, &fill_hash.to_string(), &true)
					.await?;

				self.tokens
					.transfer_from(&ctx.with_caller(self.address), token, ctx.caller, recipient, output.amount)
					.await?;

				self.chain.events().stage(FillEvent::OutputFilled {
					oracle: self.address,
					order_id,
					output_hash,
					solver,
					timestamp,
				});
				info!(order_id = %order_id, output_hash = %output_hash, solver = %solver, "Output filled");
				Ok(fill_hash)
			})
			.await
	}

	pub async fn fill_record(&self, order_id: B256, output_hash: B256) -> Result<Option<FillRecord>, OracleError> {
		Ok(self
			.chain
			.storage()
			.retrieve_optional(FILLS, &format!("{}:{}", order_id, output_hash))
			.await?)
	}
}

#[async_trait]
impl OracleInterface for LocalFillOracle {
	fn address(&self) -> Address {
		self.address
	}

	async fn is_proven(&self, record: &ProofRecord) -> Result<bool, OracleError> {
		match record {
			ProofRecord::Local {
				order_id,
				output_hash,
				fill_hash,
			} => Ok(self
				.fill_record(*order_id, *output_hash)
				.await?
				.is_some_and(|fill| fill.fill_hash == *fill_hash)),
			ProofRecord::CrossChain {
				chain_id,
				oracle,
				settler,
				fill_hash,
			} => {
				if *chain_id != self.chain.chain_id() || *oracle != self.identifier() || *settler != self.identifier() {
					return Ok(false);
				}
				Ok(self
					.chain
					.storage()
					.exists(FILL_HASHES, &fill_hash.to_string())
					.await?)
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::ProofSeries;
	use settler_custody::implementations::token::TokenLedger;
	use settler_storage::implementations::memory::MemoryStorage;
	use settler_storage::StorageService;
	use settler_types::{output_identifier, Bytes, EventBus, U256};

	const ORACLE: Address = Address::repeat_byte(0x0a);
	const TOKEN: Address = Address::repeat_byte(0x70);

	async fn setup() -> (Arc<TokenLedger>, LocalFillOracle, Address) {
		let chain = Chain::new(
			U256::from(1),
			Arc::new(StorageService::new(Box::new(MemoryStorage::new()))),
			EventBus::new(16),
		);
		let tokens = Arc::new(TokenLedger::new(chain.clone()));
		let oracle = LocalFillOracle::new(ORACLE, chain, tokens.clone());

		let filler = Address::repeat_byte(0x05);
		tokens.mint(TOKEN, filler, U256::from(10)).await.unwrap();
		tokens
			.approve(&CallContext::new(filler, 0), TOKEN, ORACLE, U256::MAX)
			.await
			.unwrap();
		(tokens, oracle, filler)
	}

	fn output() -> MandateOutput {
		MandateOutput {
			oracle: address_to_identifier(ORACLE),
			settler: address_to_identifier(ORACLE),
			chain_id: U256::from(1),
			token: address_to_identifier(TOKEN),
			amount: U256::from(4),
			recipient: address_to_identifier(Address::repeat_byte(0x09)),
			call: Bytes::new(),
			context: Bytes::new(),
		}
	}

	#[tokio::test]
	async fn test_fill_delivers_and_proves() {
		let (tokens, oracle, filler) = setup().await;
		let output = output();
		let order_id = B256::repeat_byte(0x66);
		let solver = address_to_identifier(filler);

		let fill_hash = oracle
			.fill(&CallContext::new(filler, 50), order_id, &output, solver, 100)
			.await
			.unwrap();
		assert_eq!(tokens.balance_of(TOKEN, Address::repeat_byte(0x09)).await.unwrap(), U256::from(4));

		let mut series = ProofSeries::new();
		series.push(ProofRecord::Local {
			order_id,
			output_hash: output_identifier(&output).unwrap(),
			fill_hash,
		});
		series.push(ProofRecord::CrossChain {
			chain_id: U256::from(1),
			oracle: output.oracle,
			settler: output.settler,
			fill_hash,
		});
		assert!(oracle.require_all_proven(&series).await.is_ok());
	}

	#[tokio::test]
	async fn test_double_fill_rejected() {
		let (_, oracle, filler) = setup().await;
		let output = output();
		let ctx = CallContext::new(filler, 50);
		let solver = address_to_identifier(filler);

		oracle.fill(&ctx, B256::repeat_byte(0x66), &output, solver, 100).await.unwrap();
		assert!(matches!(
			oracle.fill(&ctx, B256::repeat_byte(0x66), &output, solver, 100).await,
			Err(OracleError::AlreadyFilled { .. })
		));
	}

	#[tokio::test]
	async fn test_failed_delivery_records_nothing() {
		let (_, oracle, _) = setup().await;
		let output = output();
		let broke = Address::repeat_byte(0x06);

		let result = oracle
			.fill(&CallContext::new(broke, 50), B256::repeat_byte(0x66), &output, B256::ZERO, 100)
			.await;
		assert!(matches!(result, Err(OracleError::Custody(_))));
		assert!(oracle
			.fill_record(B256::repeat_byte(0x66), output_identifier(&output).unwrap())
			.await
			.unwrap()
			.is_none());
	}

	#[tokio::test]
	async fn test_late_fill_rejected() {
		let (_, oracle, filler) = setup().await;
		let result = oracle
			.fill(&CallContext::new(filler, 101), B256::repeat_byte(0x66), &output(), B256::ZERO, 100)
			.await;
		assert!(matches!(result, Err(OracleError::FillDeadlinePassed { .. })));
	}
}
