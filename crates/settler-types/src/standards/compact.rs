//! Resource-lock (The Compact style) claim hashing.
//!
//! A resource lock is identified by a 256-bit id: a 12-byte lock tag (the
//! allocator and reset policy) followed by the 20-byte token address. A
//! batch claim commits to a list of locks and a witness; its EIP-712 struct
//! hash is the claim hash returned by the registry and used as the order
//! identifier by resource-lock settlers.

use crate::common::{address_to_identifier, keccak256, token_address, Address, FixedBytes, B256, U256};
use crate::order::MandateOutput;
use crate::standards::eip712;
use alloy_sol_types::{Eip712Domain, SolStruct, SolValue};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// EIP-712 domain name of the resource-lock registry.
pub const COMPACT_DOMAIN_NAME: &str = "The Compact";

pub const LOCK_TYPE: &str = "Lock(bytes12 lockTag,address token,uint256 amount)";

const BATCH_COMPACT_TYPE_PREFIX: &str = "BatchCompact(address arbiter,address sponsor,uint256 nonce,uint256 expires,Lock[] commitments,";

/// Witness type string for orders whose witness is a [`eip712::Mandate`].
pub const MANDATE_WITNESS_TYPE_STRING: &str = "Mandate mandate)Lock(bytes12 lockTag,address token,uint256 amount)Mandate(uint32 fillDeadline,address inputOracle,MandateOutput[] outputs)MandateOutput(bytes32 oracle,bytes32 settler,uint256 chainId,bytes32 token,uint256 amount,bytes32 recipient,bytes call,bytes context)";

/// One locked amount committed to by a batch claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockCommitment {
	pub lock_tag: FixedBytes<12>,
	pub token: Address,
	pub amount: U256,
}

impl LockCommitment {
	/// Splits a resource-lock id into tag and token.
	pub fn from_id(id: U256, amount: U256) -> Self {
		let bytes = id.to_be_bytes::<32>();
		Self {
			lock_tag: FixedBytes::<12>::from_slice(&bytes[..12]),
			token: token_address(id),
			amount,
		}
	}

	pub fn id(&self) -> U256 {
		lock_id(self.lock_tag, self.token)
	}

	fn struct_hash(&self) -> B256 {
		keccak256((keccak256(LOCK_TYPE), self.lock_tag, self.token, self.amount).abi_encode())
	}
}

/// Builds a resource-lock id from its tag and token.
pub fn lock_id(lock_tag: FixedBytes<12>, token: Address) -> U256 {
	let mut bytes = address_to_identifier(token).0;
	bytes[..12].copy_from_slice(lock_tag.as_slice());
	U256::from_be_bytes(bytes)
}

/// Type hash of a batch compact carrying a witness of `witness_type`.
pub fn batch_compact_typehash(witness_type: &str) -> B256 {
	keccak256(format!("{BATCH_COMPACT_TYPE_PREFIX}{witness_type}"))
}

/// Struct hash of a batch compact; the registry's claim hash.
pub fn claim_hash(
	arbiter: Address,
	sponsor: Address,
	nonce: U256,
	expires: U256,
	commitments: &[LockCommitment],
	witness: B256,
	witness_type: &str,
) -> B256 {
	let mut lock_hashes = Vec::with_capacity(commitments.len() * 32);
	for commitment in commitments {
		lock_hashes.extend_from_slice(commitment.struct_hash().as_slice());
	}
	let commitments_hash = keccak256(lock_hashes);

	keccak256(
		(
			batch_compact_typehash(witness_type),
			arbiter,
			sponsor,
			nonce,
			expires,
			commitments_hash,
			witness,
		)
			.abi_encode(),
	)
}

/// Hash of the mandate witness of an order.
pub fn mandate_hash(fill_deadline: u32, input_oracle: Address, outputs: &[MandateOutput]) -> B256 {
	eip712::Mandate {
		fillDeadline: fill_deadline,
		inputOracle: input_oracle,
		outputs: eip712::sol_outputs(outputs),
	}
	.eip712_hash_struct()
}

/// Domain of the resource-lock registry at `registry` on `chain_id`.
pub fn compact_domain(chain_id: U256, registry: Address) -> Eip712Domain {
	Eip712Domain::new(
		Some(Cow::Borrowed(COMPACT_DOMAIN_NAME)),
		Some(Cow::Borrowed("1")),
		Some(chain_id),
		Some(registry),
		None,
	)
}
