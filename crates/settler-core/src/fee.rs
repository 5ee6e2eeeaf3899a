//! Governance fee taken from input payouts.

use crate::error::SettlementError;
use serde::{Deserialize, Serialize};
use settler_types::{Address, BPS_DENOMINATOR, U256};

/// Upper bound of the governance fee: 10%.
pub const MAX_GOVERNANCE_FEE_BPS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GovernanceFee {
	pub bps: u64,
	pub recipient: Address,
}

impl GovernanceFee {
	pub fn new(bps: u64, recipient: Address) -> Result<Self, SettlementError> {
		if bps > MAX_GOVERNANCE_FEE_BPS {
			return Err(SettlementError::InvalidAmount(format!(
				"governance fee {} bps exceeds {} bps",
				bps, MAX_GOVERNANCE_FEE_BPS
			)));
		}
		if bps > 0 && recipient.is_zero() {
			return Err(SettlementError::ZeroValue("fee recipient"));
		}
		Ok(Self { bps, recipient })
	}

	pub fn none() -> Self {
		Self::default()
	}

	/// Fee owed on `amount`, rounded down.
	pub fn fee_of(&self, amount: U256) -> U256 {
		if self.bps == 0 {
			return U256::ZERO;
		}
		// bps <= 1000 so the product only overflows for amounts near 2^246.
		match amount.checked_mul(U256::from(self.bps)) {
			Some(product) => product / U256::from(BPS_DENOMINATOR),
			None => amount / U256::from(BPS_DENOMINATOR) * U256::from(self.bps),
		}
	}

	/// Splits `amount` into `(owner share, fee)`.
	pub fn split(&self, amount: U256) -> (U256, U256) {
		let fee = self.fee_of(amount);
		(amount - fee, fee)
	}
}
