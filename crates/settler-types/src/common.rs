//! Primitive types shared across the settlement engine.
//!
//! Identities that may live on foreign chains (solvers, recipients, output
//! settlers) are carried as 32-byte identifiers. Local EVM accounts are
//! carried as 20-byte addresses and embedded into identifiers left-padded.

pub use alloy_primitives::{keccak256, Address, Bytes, FixedBytes, B256, U256};
use thiserror::Error;

/// Unix timestamp in seconds, as observed by the executing chain.
pub type Timestamp = u64;

/// Basis-point denominator used for fees, bonds, discounts and slashing.
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Errors raised when converting between identifier representations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdentifierError {
	/// The upper 12 bytes of the identifier are not zero.
	#[error("Identifier {0} is not an EVM address")]
	NotAnAddress(B256),
	/// The upper 96 bits of a token id are not zero.
	#[error("Token id {0:#x} is not an EVM address")]
	NotATokenAddress(U256),
}

/// Converts an EVM address to its bytes32 identifier (left-padded).
pub fn address_to_identifier(address: Address) -> B256 {
	address.into_word()
}

/// Converts a bytes32 identifier back to an EVM address.
///
/// Fails when the identifier carries data in its upper 12 bytes, which means
/// it addresses something that is not an account on this chain.
pub fn identifier_to_address(identifier: B256) -> Result<Address, IdentifierError> {
	if identifier[..12].iter().any(|&b| b != 0) {
		return Err(IdentifierError::NotAnAddress(identifier));
	}
	Ok(Address::from_word(identifier))
}

/// Returns the EVM address held in the low 160 bits of a token id.
///
/// Resource-lock ids keep their lock tag in the upper 96 bits, so this
/// conversion never fails; use [`strict_token_address`] for plain tokens.
pub fn token_address(id: U256) -> Address {
	let word = B256::from(id.to_be_bytes::<32>());
	Address::from_word(word)
}

/// Interprets a token id as a plain EVM address, rejecting any high bits.
pub fn strict_token_address(id: U256) -> Result<Address, IdentifierError> {
	let word = B256::from(id.to_be_bytes::<32>());
	identifier_to_address(word).map_err(|_| IdentifierError::NotATokenAddress(id))
}

/// Encodes an EVM address as a token id.
pub fn address_to_token_id(address: Address) -> U256 {
	U256::from_be_bytes(address.into_word().0)
}
