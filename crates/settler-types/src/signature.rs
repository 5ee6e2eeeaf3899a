//! ECDSA recovery over EIP-712 digests.
//!
//! Authorizations (finalise-for, order purchase, signature transfers,
//! resource-lock sponsorship) are 65-byte `r ‖ s ‖ v` signatures over a
//! typed-data digest.

use crate::common::{Address, B256};
use alloy_primitives::Signature;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignatureError {
	#[error("Signature must be 65 bytes, got {0}")]
	InvalidLength(usize),
	#[error("Malformed signature: {0}")]
	Malformed(String),
	#[error("Recovery failed: {0}")]
	Recovery(String),
	#[error("Signed by {recovered}, expected {expected}")]
	WrongSigner { expected: Address, recovered: Address },
}

/// Recovers the signer of `digest`.
pub fn recover_signer(digest: B256, signature: &[u8]) -> Result<Address, SignatureError> {
	if signature.len() != 65 {
		return Err(SignatureError::InvalidLength(signature.len()));
	}

	let sig = Signature::try_from(signature).map_err(|e| SignatureError::Malformed(e.to_string()))?;

	sig.recover_address_from_prehash(&digest)
		.map_err(|e| SignatureError::Recovery(e.to_string()))
}

/// Fails unless `signature` over `digest` was produced by `expected`.
pub fn verify_signer(expected: Address, digest: B256, signature: &[u8]) -> Result<(), SignatureError> {
	let recovered = recover_signer(digest, signature)?;
	if recovered != expected {
		return Err(SignatureError::WrongSigner { expected, recovered });
	}
	Ok(())
}
