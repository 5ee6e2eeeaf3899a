//! Proof records and the proof validation protocol.

use crate::{OracleError, OracleRegistry};
use settler_types::{
	address_to_identifier, fill_description_hash, keccak256, output_identifier, EncodingError, FillRequirements,
	OrderError, SolveParams, B256, U256,
};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ProofError {
	#[error("Output {index} filled at {timestamp}, after fill deadline {fill_deadline}")]
	FilledTooLate {
		index: usize,
		timestamp: u32,
		fill_deadline: u32,
	},
	#[error("Malformed solve parameters: {0}")]
	InvalidSolveParams(#[from] OrderError),
	#[error("No solver declared for output {0}")]
	MissingSolver(usize),
	#[error("Encoding error: {0}")]
	Encoding(#[from] EncodingError),
	#[error("Oracle error: {0}")]
	Oracle(#[from] OracleError),
}

/// One entry of a proof series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProofRecord {
	/// A fill on another chain, attested through the destination oracle.
	CrossChain {
		chain_id: U256,
		oracle: B256,
		settler: B256,
		fill_hash: B256,
	},
	/// A fill recorded by the order's own oracle acting as output settler.
	Local {
		order_id: B256,
		output_hash: B256,
		fill_hash: B256,
	},
}

impl ProofRecord {
	pub const CROSS_CHAIN_LEN: usize = 128;
	pub const LOCAL_LEN: usize = 96;

	pub fn fill_hash(&self) -> B256 {
		match self {
			ProofRecord::CrossChain { fill_hash, .. } | ProofRecord::Local { fill_hash, .. } => *fill_hash,
		}
	}

	pub fn encoded_len(&self) -> usize {
		match self {
			ProofRecord::CrossChain { .. } => Self::CROSS_CHAIN_LEN,
			ProofRecord::Local { .. } => Self::LOCAL_LEN,
		}
	}

	/// Appends the fixed-width encoding of this record.
	pub fn encode_into(&self, out: &mut Vec<u8>) {
		match self {
			ProofRecord::CrossChain {
				chain_id,
				oracle,
				settler,
				fill_hash,
			} => {
				out.extend_from_slice(&chain_id.to_be_bytes::<32>());
				out.extend_from_slice(oracle.as_slice());
				out.extend_from_slice(settler.as_slice());
				out.extend_from_slice(fill_hash.as_slice());
			}
			ProofRecord::Local {
				order_id,
				output_hash,
				fill_hash,
			} => {
				out.extend_from_slice(order_id.as_slice());
				out.extend_from_slice(output_hash.as_slice());
				out.extend_from_slice(fill_hash.as_slice());
			}
		}
	}
}

/// Ordered list of proof records, one per output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProofSeries {
	records: Vec<ProofRecord>,
}

impl ProofSeries {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn push(&mut self, record: ProofRecord) {
		self.records.push(record);
	}

	pub fn records(&self) -> &[ProofRecord] {
		&self.records
	}

	pub fn len(&self) -> usize {
		self.records.len()
	}

	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	/// Concatenation of the records' fixed-width encodings.
	pub fn encode(&self) -> Vec<u8> {
		let mut out = Vec::with_capacity(self.records.iter().map(ProofRecord::encoded_len).sum());
		for record in &self.records {
			record.encode_into(&mut out);
		}
		out
	}

	pub fn hash(&self) -> B256 {
		keccak256(self.encode())
	}
}

/// Builds the proof series for `order_id` filled as declared in `params`.
///
/// Rejects any output whose fill timestamp is after the fill deadline. An
/// output whose settler is the order's own oracle gets a local record.
pub fn build_proof_series(
	requirements: &FillRequirements<'_>,
	order_id: B256,
	params: &SolveParams,
) -> Result<ProofSeries, ProofError> {
	params.check_len(requirements.outputs.len())?;

	let local_settler = address_to_identifier(requirements.input_oracle);
	let mut series = ProofSeries::new();

	for (index, output) in requirements.outputs.iter().enumerate() {
		let timestamp = params.timestamps[index];
		if timestamp > requirements.fill_deadline {
			return Err(ProofError::FilledTooLate {
				index,
				timestamp,
				fill_deadline: requirements.fill_deadline,
			});
		}

		let solver = params.solver_for(index).ok_or(ProofError::MissingSolver(index))?;
		let fill_hash = fill_description_hash(solver, order_id, timestamp, output)?;

		let record = if output.settler == local_settler {
			ProofRecord::Local {
				order_id,
				output_hash: output_identifier(output)?,
				fill_hash,
			}
		} else {
			ProofRecord::CrossChain {
				chain_id: output.chain_id,
				oracle: output.oracle,
				settler: output.settler,
				fill_hash,
			}
		};
		series.push(record);
	}

	Ok(series)
}

/// Runs the proof validation protocol against the order's oracle.
///
/// An order without outputs is trivially proven.
pub async fn validate_fills(
	oracles: &OracleRegistry,
	requirements: &FillRequirements<'_>,
	order_id: B256,
	params: &SolveParams,
) -> Result<(), ProofError> {
	let series = build_proof_series(requirements, order_id, params)?;
	if series.is_empty() {
		return Ok(());
	}

	let oracle = oracles.get(requirements.input_oracle)?;
	oracle.require_all_proven(&series).await?;

	debug!(order_id = %order_id, records = series.len(), oracle = %requirements.input_oracle, "Fills proven");
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::OracleInterface;
	use async_trait::async_trait;
	use settler_types::{Address, Bytes, MandateOutput};
	use std::collections::HashSet;
	use std::sync::Arc;

	const ORACLE: Address = Address::repeat_byte(0x0a);

	fn output(settler: B256) -> MandateOutput {
		MandateOutput {
			oracle: B256::repeat_byte(0x01),
			settler,
			chain_id: U256::from(10),
			token: B256::repeat_byte(0x03),
			amount: U256::from(1),
			recipient: B256::repeat_byte(0x04),
			call: Bytes::new(),
			context: Bytes::new(),
		}
	}

	fn requirements(outputs: &[MandateOutput]) -> FillRequirements<'_> {
		FillRequirements {
			fill_deadline: 100,
			input_oracle: ORACLE,
			outputs,
		}
	}

	struct FixedOracle {
		proven: HashSet<B256>,
	}

	#[async_trait]
	impl OracleInterface for FixedOracle {
		fn address(&self) -> Address {
			ORACLE
		}

		async fn is_proven(&self, record: &ProofRecord) -> Result<bool, OracleError> {
			Ok(self.proven.contains(&record.fill_hash()))
		}
	}

	#[test]
	fn test_series_layout_and_local_shortcut() {
		let outputs = vec![output(B256::repeat_byte(0x02)), output(address_to_identifier(ORACLE))];
		let params = SolveParams::single(B256::repeat_byte(0x05), vec![10, 20]);
		let series = build_proof_series(&requirements(&outputs), B256::repeat_byte(0x06), &params).unwrap();

		assert!(matches!(series.records()[0], ProofRecord::CrossChain { .. }));
		assert!(matches!(series.records()[1], ProofRecord::Local { .. }));
		assert_eq!(series.encode().len(), ProofRecord::CROSS_CHAIN_LEN + ProofRecord::LOCAL_LEN);
		assert_eq!(&series.encode()[..32], &U256::from(10).to_be_bytes::<32>());
	}

	#[test]
	fn test_series_is_deterministic_and_field_sensitive() {
		let outputs = vec![output(B256::repeat_byte(0x02))];
		let order_id = B256::repeat_byte(0x06);
		let params = SolveParams::single(B256::repeat_byte(0x05), vec![10]);
		let base = build_proof_series(&requirements(&outputs), order_id, &params).unwrap();

		assert_eq!(base, build_proof_series(&requirements(&outputs), order_id, &params).unwrap());

		let other_solver = SolveParams::single(B256::repeat_byte(0x07), vec![10]);
		let other_time = SolveParams::single(B256::repeat_byte(0x05), vec![11]);
		let mut other_chain = outputs.clone();
		other_chain[0].chain_id = U256::from(11);
		let mut other_oracle = outputs.clone();
		other_oracle[0].oracle = B256::repeat_byte(0x09);

		for changed in [
			build_proof_series(&requirements(&outputs), order_id, &other_solver).unwrap(),
			build_proof_series(&requirements(&outputs), order_id, &other_time).unwrap(),
			build_proof_series(&requirements(&other_chain), order_id, &params).unwrap(),
			build_proof_series(&requirements(&other_oracle), order_id, &params).unwrap(),
			build_proof_series(&requirements(&outputs), B256::repeat_byte(0x08), &params).unwrap(),
		] {
			assert_ne!(base.hash(), changed.hash());
		}
	}

	#[test]
	fn test_late_fill_rejected() {
		let outputs = vec![output(B256::repeat_byte(0x02)), output(B256::repeat_byte(0x02))];
		let params = SolveParams::single(B256::repeat_byte(0x05), vec![100, 101]);
		let result = build_proof_series(&requirements(&outputs), B256::ZERO, &params);

		assert!(matches!(
			result,
			Err(ProofError::FilledTooLate { index: 1, timestamp: 101, fill_deadline: 100 })
		));
	}

	#[tokio::test]
	async fn test_late_fill_rejected_even_if_proven() {
		let outputs = vec![output(B256::repeat_byte(0x02))];
		let order_id = B256::repeat_byte(0x06);
		let late = SolveParams::single(B256::repeat_byte(0x05), vec![101]);
		let fill_hash = fill_description_hash(B256::repeat_byte(0x05), order_id, 101, &outputs[0]).unwrap();

		let registry = OracleRegistry::new();
		registry.register(Arc::new(FixedOracle {
			proven: HashSet::from([fill_hash]),
		}));

		let result = validate_fills(&registry, &requirements(&outputs), order_id, &late).await;
		assert!(matches!(result, Err(ProofError::FilledTooLate { .. })));
	}

	#[tokio::test]
	async fn test_all_or_nothing() {
		let outputs = vec![output(B256::repeat_byte(0x02)), output(B256::repeat_byte(0x03))];
		let order_id = B256::repeat_byte(0x06);
		let solver = B256::repeat_byte(0x05);
		let params = SolveParams::single(solver, vec![10, 10]);
		let first = fill_description_hash(solver, order_id, 10, &outputs[0]).unwrap();

		let registry = OracleRegistry::new();
		registry.register(Arc::new(FixedOracle {
			proven: HashSet::from([first]),
		}));

		let result = validate_fills(&registry, &requirements(&outputs), order_id, &params).await;
		assert!(matches!(
			result,
			Err(ProofError::Oracle(OracleError::NotProven { index: 1 }))
		));
	}

	#[tokio::test]
	async fn test_empty_outputs_trivially_proven() {
		let registry = OracleRegistry::new();
		let params = SolveParams::single(B256::ZERO, vec![]);
		assert!(validate_fills(&registry, &requirements(&[]), B256::ZERO, &params).await.is_ok());
	}
}
