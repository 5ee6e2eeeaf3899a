//! Order model and identifier derivation.
//!
//! Orders are immutable values. Their identifiers are computed on demand and
//! bind the order to one settlement contract on one chain.

use crate::common::{keccak256, token_address, Address, Bytes, B256, U256};
use crate::encoding::{output_identifier, EncodingError};
use crate::standards::{compact, eip712};
use alloy_sol_types::SolValue;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by structural order checks.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OrderError {
	#[error("Fill deadline {fill_deadline} is after expiry {expires}")]
	FillDeadlineAfterExpiry { fill_deadline: u32, expires: u32 },
	#[error("Chain index {index} out of range for {chains} chains")]
	ChainIndexOutOfRange { index: usize, chains: usize },
	#[error("Expected {expected} timestamps, got {actual}")]
	TimestampCountMismatch { expected: usize, actual: usize },
	#[error("Expected {expected} solvers, got {actual}")]
	SolverCountMismatch { expected: usize, actual: usize },
}

/// One committed input: a token id and an amount.
///
/// For escrow orders the token id is a plain address; for resource-lock
/// orders it is a lock id carrying the lock tag in its upper 96 bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Input {
	pub token: U256,
	pub amount: U256,
}

impl Input {
	pub fn new(token: U256, amount: U256) -> Self {
		Self { token, amount }
	}

	/// Token contract address held in the low 160 bits of the id.
	pub fn token_address(&self) -> Address {
		token_address(self.token)
	}
}

/// One requested delivery on a destination chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateOutput {
	/// Oracle on the destination chain that attests the fill.
	pub oracle: B256,
	/// Output settler on the destination chain.
	pub settler: B256,
	pub chain_id: U256,
	pub token: B256,
	pub amount: U256,
	pub recipient: B256,
	/// Callback payload forwarded to the recipient by the output settler.
	#[serde(default)]
	pub call: Bytes,
	/// Fill parameters interpreted by the output settler only.
	#[serde(default)]
	pub context: Bytes,
}

impl MandateOutput {
	/// Collision-resistant identifier of this output, independent of any order.
	pub fn identifier(&self) -> Result<B256, EncodingError> {
		output_identifier(self)
	}
}

/// `keccak256(abi.encodePacked(inputs))` over `(token, amount)` pairs.
pub fn inputs_hash(inputs: &[Input]) -> B256 {
	let mut packed = Vec::with_capacity(inputs.len() * 64);
	for input in inputs {
		packed.extend_from_slice(&input.token.to_be_bytes::<32>());
		packed.extend_from_slice(&input.amount.to_be_bytes::<32>());
	}
	keccak256(packed)
}

/// `abi.encode(outputs)`.
pub fn encode_outputs_abi(outputs: &[MandateOutput]) -> Vec<u8> {
	eip712::sol_outputs(outputs).abi_encode()
}

/// The fields of an order the proof validation protocol needs.
#[derive(Debug, Clone, Copy)]
pub struct FillRequirements<'a> {
	pub fill_deadline: u32,
	pub input_oracle: Address,
	pub outputs: &'a [MandateOutput],
}

/// A single-chain order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardOrder {
	pub user: Address,
	pub nonce: U256,
	pub origin_chain_id: U256,
	pub expires: u32,
	pub fill_deadline: u32,
	/// Oracle trusted on the origin chain to validate fills.
	pub input_oracle: Address,
	pub inputs: Vec<Input>,
	pub outputs: Vec<MandateOutput>,
}

impl StandardOrder {
	/// Structural checks independent of any settlement contract.
	pub fn validate(&self) -> Result<(), OrderError> {
		if self.fill_deadline > self.expires {
			return Err(OrderError::FillDeadlineAfterExpiry {
				fill_deadline: self.fill_deadline,
				expires: self.expires,
			});
		}
		Ok(())
	}

	pub fn inputs_hash(&self) -> B256 {
		inputs_hash(&self.inputs)
	}

	/// Order identifier for the escrow-style settler at `settler` on `chain_id`.
	///
	/// `keccak256(abi.encodePacked(chainId, settler, user, nonce, expires,
	/// fillDeadline, inputOracle, keccak256(abi.encodePacked(inputs)),
	/// abi.encode(outputs)))`
	pub fn order_identifier(&self, chain_id: U256, settler: Address) -> B256 {
		let outputs = encode_outputs_abi(&self.outputs);

		let mut packed = Vec::with_capacity(164 + outputs.len());
		packed.extend_from_slice(&chain_id.to_be_bytes::<32>());
		packed.extend_from_slice(settler.as_slice());
		packed.extend_from_slice(self.user.as_slice());
		packed.extend_from_slice(&self.nonce.to_be_bytes::<32>());
		packed.extend_from_slice(&self.expires.to_be_bytes());
		packed.extend_from_slice(&self.fill_deadline.to_be_bytes());
		packed.extend_from_slice(self.input_oracle.as_slice());
		packed.extend_from_slice(self.inputs_hash().as_slice());
		packed.extend_from_slice(&outputs);

		keccak256(packed)
	}

	/// Hash of the mandate witness signed by resource-lock sponsors.
	pub fn mandate_hash(&self) -> B256 {
		compact::mandate_hash(self.fill_deadline, self.input_oracle, &self.outputs)
	}

	pub fn requirements(&self) -> FillRequirements<'_> {
		FillRequirements {
			fill_deadline: self.fill_deadline,
			input_oracle: self.input_oracle,
			outputs: &self.outputs,
		}
	}
}

/// Which solver filled which output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverAssignment {
	/// One solver filled every output.
	Single(B256),
	/// One solver per output, in output order.
	PerOutput(Vec<B256>),
}

/// A solver's declaration of how an order was filled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SolveParams {
	/// Fill timestamp per output.
	pub timestamps: Vec<u32>,
	pub solvers: SolverAssignment,
}

impl SolveParams {
	pub fn single(solver: B256, timestamps: Vec<u32>) -> Self {
		Self {
			timestamps,
			solvers: SolverAssignment::Single(solver),
		}
	}

	pub fn per_output(solvers: Vec<B256>, timestamps: Vec<u32>) -> Self {
		Self {
			timestamps,
			solvers: SolverAssignment::PerOutput(solvers),
		}
	}

	/// Checks that there is one timestamp (and solver) per output.
	pub fn check_len(&self, outputs: usize) -> Result<(), OrderError> {
		if self.timestamps.len() != outputs {
			return Err(OrderError::TimestampCountMismatch {
				expected: outputs,
				actual: self.timestamps.len(),
			});
		}
		if let SolverAssignment::PerOutput(solvers) = &self.solvers {
			if solvers.len() != outputs {
				return Err(OrderError::SolverCountMismatch {
					expected: outputs,
					actual: solvers.len(),
				});
			}
		}
		Ok(())
	}

	pub fn solver_for(&self, index: usize) -> Option<B256> {
		match &self.solvers {
			SolverAssignment::Single(solver) => Some(*solver),
			SolverAssignment::PerOutput(solvers) => solvers.get(index).copied(),
		}
	}

	/// The solver of output 0, which owns the order for payout purposes.
	pub fn order_solver(&self) -> Option<B256> {
		self.solver_for(0)
	}

	/// Latest fill timestamp; zero when there are no outputs.
	pub fn max_timestamp(&self) -> u32 {
		self.timestamps.iter().copied().max().unwrap_or(0)
	}

	/// Hash of the `(timestamp, solver)` pairs, keying bond claims.
	///
	/// A single-solver assignment hashes the same as the equivalent
	/// per-output assignment.
	pub fn hash(&self) -> B256 {
		let pairs: Vec<(u32, B256)> = self
			.timestamps
			.iter()
			.enumerate()
			.map(|(index, timestamp)| (*timestamp, self.solver_for(index).unwrap_or_default()))
			.collect();
		keccak256(pairs.abi_encode())
	}
}

/// An order whose inputs are spread over several origin chains.
///
/// Every participating chain derives the same identifier: the element hash
/// of the local chain is inserted at `chain_index` into the element hashes
/// of the other chains.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MultichainOrder {
	pub user: Address,
	pub nonce: U256,
	pub expires: u32,
	pub fill_deadline: u32,
	pub input_oracle: Address,
	/// Inputs committed on this chain.
	pub inputs: Vec<Input>,
	pub outputs: Vec<MandateOutput>,
	/// Element hashes of the other chains, in order.
	pub additional_chains: Vec<B256>,
	/// Position of this chain in the full element list.
	pub chain_index: usize,
}

impl MultichainOrder {
	pub fn validate(&self) -> Result<(), OrderError> {
		if self.fill_deadline > self.expires {
			return Err(OrderError::FillDeadlineAfterExpiry {
				fill_deadline: self.fill_deadline,
				expires: self.expires,
			});
		}
		if self.chain_index > self.additional_chains.len() {
			return Err(OrderError::ChainIndexOutOfRange {
				index: self.chain_index,
				chains: self.additional_chains.len() + 1,
			});
		}
		Ok(())
	}

	pub fn mandate_hash(&self) -> B256 {
		compact::mandate_hash(self.fill_deadline, self.input_oracle, &self.outputs)
	}

	/// Commitment of this chain: `keccak256(abi.encode(chainId, settler,
	/// inputsHash, mandateHash))`.
	pub fn element_hash(&self, chain_id: U256, settler: Address) -> B256 {
		keccak256(
			(
				chain_id,
				settler,
				inputs_hash(&self.inputs),
				self.mandate_hash(),
			)
				.abi_encode(),
		)
	}

	/// All element hashes with this chain's entry at `chain_index`.
	pub fn element_hashes(&self, chain_id: U256, settler: Address) -> Result<Vec<B256>, OrderError> {
		self.validate()?;
		let mut elements = self.additional_chains.clone();
		elements.insert(self.chain_index, self.element_hash(chain_id, settler));
		Ok(elements)
	}

	/// Identifier shared by every chain of the order.
	pub fn order_identifier(&self, chain_id: U256, settler: Address) -> Result<B256, OrderError> {
		let elements = self.element_hashes(chain_id, settler)?;
		let mut concatenated = Vec::with_capacity(elements.len() * 32);
		for element in &elements {
			concatenated.extend_from_slice(element.as_slice());
		}

		Ok(keccak256(
			(
				self.user,
				self.nonce,
				U256::from(self.expires),
				keccak256(concatenated),
			)
				.abi_encode(),
		))
	}

	pub fn requirements(&self) -> FillRequirements<'_> {
		FillRequirements {
			fill_deadline: self.fill_deadline,
			input_oracle: self.input_oracle,
			outputs: &self.outputs,
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn sample_output() -> MandateOutput {
		MandateOutput {
			oracle: B256::repeat_byte(0x01),
			settler: B256::repeat_byte(0x02),
			chain_id: U256::from(10),
			token: B256::repeat_byte(0x03),
			amount: U256::from(1_000),
			recipient: B256::repeat_byte(0x04),
			call: Bytes::new(),
			context: Bytes::new(),
		}
	}

	fn sample_order() -> StandardOrder {
		StandardOrder {
			user: Address::repeat_byte(0x11),
			nonce: U256::from(7),
			origin_chain_id: U256::from(1),
			expires: 2_000,
			fill_deadline: 1_500,
			input_oracle: Address::repeat_byte(0x22),
			inputs: vec![Input::new(U256::from(0x33), U256::from(1_000))],
			outputs: vec![sample_output()],
		}
	}

	#[test]
	fn test_order_identifier_is_deployment_scoped() {
		let order = sample_order();
		let settler = Address::repeat_byte(0x99);

		let id = order.order_identifier(U256::from(1), settler);
		assert_eq!(id, order.order_identifier(U256::from(1), settler));
		assert_ne!(id, order.order_identifier(U256::from(2), settler));
		assert_ne!(id, order.order_identifier(U256::from(1), Address::repeat_byte(0x98)));
	}

	#[test]
	fn test_order_identifier_covers_every_field() {
		let settler = Address::repeat_byte(0x99);
		let base = sample_order().order_identifier(U256::from(1), settler);

		let mut changed = sample_order();
		changed.nonce = U256::from(8);
		assert_ne!(base, changed.order_identifier(U256::from(1), settler));

		let mut changed = sample_order();
		changed.fill_deadline = 1_400;
		assert_ne!(base, changed.order_identifier(U256::from(1), settler));

		let mut changed = sample_order();
		changed.inputs[0].amount = U256::from(999);
		assert_ne!(base, changed.order_identifier(U256::from(1), settler));

		let mut changed = sample_order();
		changed.outputs[0].context = Bytes::from(vec![1u8]);
		assert_ne!(base, changed.order_identifier(U256::from(1), settler));
	}

	#[test]
	fn test_validate_rejects_deadline_after_expiry() {
		let mut order = sample_order();
		order.fill_deadline = order.expires + 1;
		assert!(matches!(
			order.validate(),
			Err(OrderError::FillDeadlineAfterExpiry { .. })
		));
	}

	#[test]
	fn test_single_solver_hash_matches_per_output() {
		let solver = B256::repeat_byte(0x05);
		let single = SolveParams::single(solver, vec![10, 20]);
		let per_output = SolveParams::per_output(vec![solver, solver], vec![10, 20]);

		assert_eq!(single.hash(), per_output.hash());
		assert_ne!(single.hash(), SolveParams::single(solver, vec![10, 21]).hash());
		assert_eq!(single.max_timestamp(), 20);
		assert_eq!(per_output.order_solver(), Some(solver));
	}

	#[test]
	fn test_solve_params_length_check() {
		let params = SolveParams::per_output(vec![B256::ZERO], vec![1, 2]);
		assert!(matches!(
			params.check_len(2),
			Err(OrderError::SolverCountMismatch { expected: 2, actual: 1 })
		));
		assert!(matches!(
			params.check_len(1),
			Err(OrderError::TimestampCountMismatch { expected: 1, actual: 2 })
		));
	}

	#[test]
	fn test_multichain_identifier_is_shared_across_chains() {
		let settler_a = Address::repeat_byte(0xa0);
		let settler_b = Address::repeat_byte(0xb0);
		let template = MultichainOrder {
			user: Address::repeat_byte(0x11),
			nonce: U256::from(1),
			expires: 2_000,
			fill_deadline: 1_500,
			input_oracle: Address::repeat_byte(0x22),
			inputs: vec![],
			outputs: vec![sample_output()],
			additional_chains: vec![],
			chain_index: 0,
		};

		let mut chain_a = template.clone();
		chain_a.inputs = vec![Input::new(U256::from(1), U256::from(100))];
		let mut chain_b = template.clone();
		chain_b.inputs = vec![Input::new(U256::from(2), U256::from(200))];

		let element_a = chain_a.element_hash(U256::from(1), settler_a);
		let element_b = chain_b.element_hash(U256::from(2), settler_b);

		chain_a.additional_chains = vec![element_b];
		chain_a.chain_index = 0;
		chain_b.additional_chains = vec![element_a];
		chain_b.chain_index = 1;

		assert_eq!(
			chain_a.order_identifier(U256::from(1), settler_a).unwrap(),
			chain_b.order_identifier(U256::from(2), settler_b).unwrap()
		);

		chain_b.chain_index = 0;
		assert_ne!(
			chain_a.order_identifier(U256::from(1), settler_a).unwrap(),
			chain_b.order_identifier(U256::from(2), settler_b).unwrap()
		);
	}

	#[test]
	fn test_multichain_rejects_out_of_range_index() {
		let order = MultichainOrder {
			user: Address::ZERO,
			nonce: U256::ZERO,
			expires: 10,
			fill_deadline: 10,
			input_oracle: Address::ZERO,
			inputs: vec![],
			outputs: vec![],
			additional_chains: vec![B256::ZERO],
			chain_index: 2,
		};
		assert!(matches!(
			order.order_identifier(U256::from(1), Address::ZERO),
			Err(OrderError::ChainIndexOutOfRange { index: 2, chains: 2 })
		));
	}
}
