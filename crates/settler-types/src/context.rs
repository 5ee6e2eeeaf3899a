//! Execution context of a single call into a settlement contract.

use crate::common::{address_to_identifier, Address, Timestamp, B256};
use serde::{Deserialize, Serialize};

/// Who is calling and when.
///
/// Every state-changing entry point receives the context of the call that
/// reached it. Timing guards (fill deadline, expiry, dispute windows) are
/// evaluated against `timestamp`; authorization guards against `caller`.
/// A contract that re-enters another contract builds a fresh context with
/// its own address as caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
	/// Account that issued the call.
	pub caller: Address,
	/// Timestamp of the block executing the call.
	pub timestamp: Timestamp,
}

impl CallContext {
	pub fn new(caller: Address, timestamp: Timestamp) -> Self {
		Self { caller, timestamp }
	}

	/// The caller as a bytes32 identifier.
	pub fn caller_identifier(&self) -> B256 {
		address_to_identifier(self.caller)
	}

	/// Same block, different caller.
	pub fn with_caller(&self, caller: Address) -> Self {
		Self {
			caller,
			timestamp: self.timestamp,
		}
	}
}
