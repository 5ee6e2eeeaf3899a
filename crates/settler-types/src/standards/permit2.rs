//! Signature-transfer (Permit2 style) batch permits with a custom witness.

use crate::common::{keccak256, Address, B256, U256};
use crate::order::{Input, MandateOutput};
use crate::standards::eip712;
use alloy_sol_types::{Eip712Domain, SolStruct, SolValue};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

pub const PERMIT2_DOMAIN_NAME: &str = "Permit2";

pub const TOKEN_PERMISSIONS_TYPE: &str = "TokenPermissions(address token,uint256 amount)";

const PERMIT_BATCH_WITNESS_TYPE_PREFIX: &str = "PermitBatchWitnessTransferFrom(TokenPermissions[] permitted,address spender,uint256 nonce,uint256 deadline,";

/// Witness type string for orders opened through a signature transfer.
pub const PERMIT2_WITNESS_TYPE_STRING: &str = "Permit2Witness witness)MandateOutput(bytes32 oracle,bytes32 settler,uint256 chainId,bytes32 token,uint256 amount,bytes32 recipient,bytes call,bytes context)Permit2Witness(uint32 expires,address inputOracle,MandateOutput[] outputs)TokenPermissions(address token,uint256 amount)";

/// Witness type string for one chain's share of a multichain order.
pub const MULTICHAIN_PERMIT2_WITNESS_TYPE_STRING: &str = "MultichainPermit2Witness witness)MultichainPermit2Witness(bytes32 orderId)TokenPermissions(address token,uint256 amount)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPermissions {
	pub token: Address,
	pub amount: U256,
}

impl TokenPermissions {
	fn struct_hash(&self) -> B256 {
		keccak256((keccak256(TOKEN_PERMISSIONS_TYPE), self.token, self.amount).abi_encode())
	}
}

impl From<&Input> for TokenPermissions {
	fn from(input: &Input) -> Self {
		Self {
			token: input.token_address(),
			amount: input.amount,
		}
	}
}

/// A batch permit as signed by the token owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermitBatchTransferFrom {
	pub permitted: Vec<TokenPermissions>,
	pub nonce: U256,
	pub deadline: U256,
}

pub fn permit_batch_witness_typehash(witness_type: &str) -> B256 {
	keccak256(format!("{PERMIT_BATCH_WITNESS_TYPE_PREFIX}{witness_type}"))
}

/// Struct hash of a `PermitBatchWitnessTransferFrom`.
pub fn permit_batch_witness_hash(
	permit: &PermitBatchTransferFrom,
	spender: Address,
	witness: B256,
	witness_type: &str,
) -> B256 {
	let mut permission_hashes = Vec::with_capacity(permit.permitted.len() * 32);
	for permission in &permit.permitted {
		permission_hashes.extend_from_slice(permission.struct_hash().as_slice());
	}

	keccak256(
		(
			permit_batch_witness_typehash(witness_type),
			keccak256(permission_hashes),
			spender,
			permit.nonce,
			permit.deadline,
			witness,
		)
			.abi_encode(),
	)
}

/// Hash of the order witness carried by a signature transfer.
pub fn permit2_witness_hash(expires: u32, input_oracle: Address, outputs: &[MandateOutput]) -> B256 {
	eip712::Permit2Witness {
		expires,
		inputOracle: input_oracle,
		outputs: eip712::sol_outputs(outputs),
	}
	.eip712_hash_struct()
}

/// Multichain witness. The order id already commits to every chain's inputs.
pub fn multichain_permit2_witness_hash(order_id: B256) -> B256 {
	eip712::MultichainPermit2Witness { orderId: order_id }.eip712_hash_struct()
}

/// The signature-transfer domain has no version field.
pub fn permit2_domain(chain_id: U256, verifying_contract: Address) -> Eip712Domain {
	Eip712Domain::new(
		Some(Cow::Borrowed(PERMIT2_DOMAIN_NAME)),
		None,
		Some(chain_id),
		Some(verifying_contract),
		None,
	)
}

/// Digest the owner signs for `permit`.
pub fn permit_batch_witness_digest(
	domain: &Eip712Domain,
	permit: &PermitBatchTransferFrom,
	spender: Address,
	witness: B256,
	witness_type: &str,
) -> B256 {
	eip712::signing_hash_from_struct_hash(
		domain,
		permit_batch_witness_hash(permit, spender, witness, witness_type),
	)
}
