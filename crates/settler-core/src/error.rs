//! Settlement error taxonomy.

use crate::collateral::CollateralError;
use crate::status::{InvalidTransition, OrderStatus};
use settler_custody::CustodyError;
use settler_oracle::{OracleError, ProofError};
use settler_storage::StorageError;
use settler_types::{Address, EncodingError, IdentifierError, OrderError, SignatureError, B256, U256};
use thiserror::Error;

/// Broad class of a failure, deciding whether and when a retry can succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
	/// Malformed or mismatched arguments. Resubmit with corrected input.
	Validation,
	/// Wrong caller or invalid signature. The right party may retry.
	Authorization,
	/// Too early or too late for this call.
	Timing,
	/// The order is not in the state this call expects.
	StateConflict,
	/// The oracle could not affirm the fills.
	Proof,
	/// A custody, oracle or storage collaborator failed.
	Collaborator,
}

#[derive(Debug, Error)]
pub enum SettlementError {
	// Validation
	#[error("Invalid order: {0}")]
	InvalidOrder(#[from] OrderError),
	#[error("Order is for chain {order}, this is chain {chain}")]
	WrongChain { order: U256, chain: U256 },
	#[error("Order id mismatch: expected {expected}, got {actual}")]
	OrderIdMismatch { expected: B256, actual: B256 },
	#[error("Invalid solve parameters: {0}")]
	InvalidSolveParams(String),
	#[error("Invalid identifier: {0}")]
	InvalidIdentifier(#[from] IdentifierError),
	#[error("Zero value for {0}")]
	ZeroValue(&'static str),
	#[error("Invalid amount: {0}")]
	InvalidAmount(String),
	#[error("Encoding error: {0}")]
	Encoding(#[from] EncodingError),
	#[error("No {0} configured")]
	Unsupported(&'static str),

	// Authorization
	#[error("Caller {caller} is not the order owner {owner}")]
	NotOrderOwner { caller: Address, owner: B256 },
	#[error("Caller {caller} is not the order user {user}")]
	NotOrderUser { caller: Address, user: Address },
	#[error("Caller {caller} is not the solver {solver}")]
	NotSolver { caller: Address, solver: B256 },
	#[error("Invalid signature: {0}")]
	InvalidSignature(#[from] SignatureError),

	// Timing
	#[error("Deadline {deadline} passed at {now}")]
	DeadlinePassed { deadline: u64, now: u64 },
	#[error("Not available before {available_at}, now {now}")]
	TooEarly { available_at: u64, now: u64 },
	#[error("Dispute window closed at {closed_at}, now {now}")]
	DisputeWindowClosed { closed_at: u64, now: u64 },

	// State conflict
	#[error("Order {order_id}: {source}")]
	InvalidOrderStatus {
		order_id: B256,
		#[source]
		source: InvalidTransition,
	},
	#[error("Order {order_id} is {actual:?}, expected {expected:?}")]
	UnexpectedStatus {
		order_id: B256,
		expected: OrderStatus,
		actual: OrderStatus,
	},
	#[error("Claim already exists for order {order_id}")]
	ClaimAlreadyExists { order_id: B256, solve_params_hash: B256 },
	#[error("No claim for order {order_id}")]
	ClaimNotFound { order_id: B256, solve_params_hash: B256 },
	#[error("Claim on order {order_id} is already disputed")]
	AlreadyDisputed { order_id: B256 },
	#[error("Claim on order {order_id} is not disputed")]
	NotDisputed { order_id: B256 },
	#[error("Claim on order {order_id} is already finalised")]
	ClaimAlreadyFinalised { order_id: B256 },
	#[error("Order {order_id} already purchased from {solver}")]
	AlreadyPurchased { order_id: B256, solver: B256 },
	#[error("Reentrancy detected on order {order_id}")]
	ReentrancyDetected { order_id: B256 },

	// Proof
	#[error("Output {index} filled at {timestamp}, after fill deadline {fill_deadline}")]
	FilledTooLate {
		index: usize,
		timestamp: u32,
		fill_deadline: u32,
	},
	#[error("Fills not proven: {0}")]
	NotProven(OracleError),

	// Collaborators
	#[error("Custody error: {0}")]
	Custody(#[from] CustodyError),
	#[error("Oracle error: {0}")]
	Oracle(OracleError),
	#[error("Resource lock returned claim hash {actual}, expected {expected}")]
	ClaimHashMismatch { expected: B256, actual: B256 },
	#[error("Collateral error: {0}")]
	Collateral(#[from] CollateralError),
	#[error("Storage error: {0}")]
	Storage(#[from] StorageError),
}

impl From<OracleError> for SettlementError {
	fn from(error: OracleError) -> Self {
		match error {
			OracleError::NotProven { .. } | OracleError::UnknownOracle(_) => SettlementError::NotProven(error),
			other => SettlementError::Oracle(other),
		}
	}
}

impl From<ProofError> for SettlementError {
	fn from(error: ProofError) -> Self {
		match error {
			ProofError::FilledTooLate {
				index,
				timestamp,
				fill_deadline,
			} => SettlementError::FilledTooLate {
				index,
				timestamp,
				fill_deadline,
			},
			ProofError::InvalidSolveParams(e) => SettlementError::InvalidSolveParams(e.to_string()),
			ProofError::MissingSolver(index) => {
				SettlementError::InvalidSolveParams(format!("no solver for output {}", index))
			}
			ProofError::Encoding(e) => SettlementError::Encoding(e),
			ProofError::Oracle(e) => e.into(),
		}
	}
}

/// Classifies a failure reported by a custody collaborator.
pub(crate) fn custody_kind(error: &CustodyError) -> ErrorKind {
	match error {
		CustodyError::Signature(_) | CustodyError::NotAuthorized(_) => ErrorKind::Authorization,
		CustodyError::Expired { .. } | CustodyError::NotYetValid { .. } => ErrorKind::Timing,
		CustodyError::NonceUsed => ErrorKind::StateConflict,
		_ => ErrorKind::Collaborator,
	}
}

impl SettlementError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			SettlementError::InvalidOrder(_)
			| SettlementError::WrongChain { .. }
			| SettlementError::OrderIdMismatch { .. }
			| SettlementError::InvalidSolveParams(_)
			| SettlementError::InvalidIdentifier(_)
			| SettlementError::ZeroValue(_)
			| SettlementError::InvalidAmount(_)
			| SettlementError::Encoding(_)
			| SettlementError::Unsupported(_) => ErrorKind::Validation,

			SettlementError::NotOrderOwner { .. }
			| SettlementError::NotOrderUser { .. }
			| SettlementError::NotSolver { .. }
			| SettlementError::InvalidSignature(_) => ErrorKind::Authorization,

			SettlementError::DeadlinePassed { .. }
			| SettlementError::TooEarly { .. }
			| SettlementError::DisputeWindowClosed { .. } => ErrorKind::Timing,

			SettlementError::InvalidOrderStatus { .. }
			| SettlementError::UnexpectedStatus { .. }
			| SettlementError::ClaimAlreadyExists { .. }
			| SettlementError::ClaimNotFound { .. }
			| SettlementError::AlreadyDisputed { .. }
			| SettlementError::NotDisputed { .. }
			| SettlementError::ClaimAlreadyFinalised { .. }
			| SettlementError::AlreadyPurchased { .. }
			| SettlementError::ReentrancyDetected { .. } => ErrorKind::StateConflict,

			SettlementError::FilledTooLate { .. } | SettlementError::NotProven(_) => ErrorKind::Proof,

			SettlementError::Custody(e) => custody_kind(e),
			SettlementError::Collateral(e) => e.kind(),

			SettlementError::Oracle(_)
			| SettlementError::ClaimHashMismatch { .. }
			| SettlementError::Storage(_) => ErrorKind::Collaborator,
		}
	}

	/// Whether the proof validation protocol rejected the fills.
	pub fn is_proof_failure(&self) -> bool {
		self.kind() == ErrorKind::Proof
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::status::Transition;

	#[test]
	fn test_proof_errors_classified() {
		let late: SettlementError = ProofError::FilledTooLate {
			index: 0,
			timestamp: 2,
			fill_deadline: 1,
		}
		.into();
		assert_eq!(late.kind(), ErrorKind::Proof);

		let unproven: SettlementError = ProofError::Oracle(OracleError::NotProven { index: 3 }).into();
		assert!(unproven.is_proof_failure());

		let storage: SettlementError = OracleError::Storage(StorageError::Backend("down".into())).into();
		assert_eq!(storage.kind(), ErrorKind::Collaborator);
	}

	#[test]
	fn test_state_conflict_classified() {
		let error = SettlementError::InvalidOrderStatus {
			order_id: B256::ZERO,
			source: InvalidTransition {
				transition: Transition::Finalise,
				from: OrderStatus::Claimed,
			},
		};
		assert_eq!(error.kind(), ErrorKind::StateConflict);
	}
}
