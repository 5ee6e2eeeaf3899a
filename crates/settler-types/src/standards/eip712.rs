//! EIP-712 structures signed or hashed by the settlement engine.
//!
//! IMPORTANT: field order and names must match the Solidity definitions
//! exactly, the type hashes are derived from them.

use crate::common::{Address, B256, U256};
use crate::order;
use alloy_sol_types::{sol, Eip712Domain, SolStruct};
use std::borrow::Cow;

sol! {
	/// ABI / EIP-712 shape of an order output.
	struct MandateOutput {
		bytes32 oracle;
		bytes32 settler;
		uint256 chainId;
		bytes32 token;
		uint256 amount;
		bytes32 recipient;
		bytes call;
		bytes context;
	}

	/// Witness committed to by resource-lock sponsors and multichain orders.
	struct Mandate {
		uint32 fillDeadline;
		address inputOracle;
		MandateOutput[] outputs;
	}

	/// Witness committed to by signature-transfer sponsors.
	struct Permit2Witness {
		uint32 expires;
		address inputOracle;
		MandateOutput[] outputs;
	}

	/// Witness of a signature transfer into one share of a multichain order.
	struct MultichainPermit2Witness {
		bytes32 orderId;
	}

	/// Signed by an order owner to let a third party finalise to `destination`.
	struct AllowOpen {
		bytes32 orderId;
		bytes32 destination;
		bytes call;
	}

	/// Signed by a solver to sell its claim on an order.
	struct OrderPurchase {
		bytes32 orderId;
		address originSettler;
		address destination;
		bytes call;
		uint64 discount;
		uint32 timeToBuy;
		uint64 expiry;
	}

	/// EIP-3009 receive authorization.
	struct ReceiveWithAuthorization {
		address from;
		address to;
		uint256 value;
		uint256 validAfter;
		uint256 validBefore;
		bytes32 nonce;
	}
}

impl From<&order::MandateOutput> for MandateOutput {
	fn from(output: &order::MandateOutput) -> Self {
		Self {
			oracle: output.oracle,
			settler: output.settler,
			chainId: output.chain_id,
			token: output.token,
			amount: output.amount,
			recipient: output.recipient,
			call: output.call.clone(),
			context: output.context.clone(),
		}
	}
}

/// Converts domain outputs to their ABI representation.
pub fn sol_outputs(outputs: &[order::MandateOutput]) -> Vec<MandateOutput> {
	outputs.iter().map(MandateOutput::from).collect()
}

/// Domain of a contract deployed at `verifying_contract` on `chain_id`.
pub fn domain(name: &str, chain_id: U256, verifying_contract: Address) -> Eip712Domain {
	Eip712Domain::new(
		Some(Cow::Owned(name.to_string())),
		Some(Cow::Borrowed("1")),
		Some(chain_id),
		Some(verifying_contract),
		None,
	)
}

/// Digest to be signed for `value` under `domain`.
pub fn signing_hash<T: SolStruct>(value: &T, domain: &Eip712Domain) -> B256 {
	value.eip712_signing_hash(domain)
}

/// Digest for a struct hash that was computed by hand (custom witness types).
pub fn signing_hash_from_struct_hash(domain: &Eip712Domain, struct_hash: B256) -> B256 {
	let mut buffer = [0u8; 66];
	buffer[0] = 0x19;
	buffer[1] = 0x01;
	buffer[2..34].copy_from_slice(domain.hash_struct().as_slice());
	buffer[34..66].copy_from_slice(struct_hash.as_slice());
	crate::common::keccak256(buffer)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_manual_digest_matches_typed_digest() {
		let domain = domain("OIF Escrow", U256::from(1), Address::repeat_byte(0x11));
		let allow = AllowOpen {
			orderId: B256::repeat_byte(0x01),
			destination: B256::repeat_byte(0x02),
			call: Default::default(),
		};

		let typed = signing_hash(&allow, &domain);
		let manual = signing_hash_from_struct_hash(&domain, allow.eip712_hash_struct());
		assert_eq!(typed, manual);
	}

	#[test]
	fn test_domain_binds_chain_and_contract() {
		let allow = AllowOpen {
			orderId: B256::repeat_byte(0x01),
			destination: B256::repeat_byte(0x02),
			call: Default::default(),
		};
		let a = domain("OIF Escrow", U256::from(1), Address::repeat_byte(0x11));
		let b = domain("OIF Escrow", U256::from(2), Address::repeat_byte(0x11));
		let c = domain("OIF Escrow", U256::from(1), Address::repeat_byte(0x12));

		assert_ne!(signing_hash(&allow, &a), signing_hash(&allow, &b));
		assert_ne!(signing_hash(&allow, &a), signing_hash(&allow, &c));
	}
}
