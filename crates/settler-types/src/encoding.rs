//! Bit-exact encodings of mandate outputs and fill descriptions.
//!
//! Both encodings share a common suffix:
//!
//! ```text
//! token (32) | amount (32) | recipient (32) | call length (2) | call | context length (2) | context
//! ```
//!
//! An output is prefixed with `oracle (32) | settler (32) | chainId (32)`; a
//! fill description with `solver (32) | orderId (32) | timestamp (4)`. All
//! integers are big endian. These bytes are hashed on both the origin and
//! the destination chain, so any change here breaks compatibility.

use crate::common::{keccak256, Bytes, B256, U256};
use crate::order::MandateOutput;
use thiserror::Error;

/// Maximum length of the `call` and `context` fields.
pub const MAX_DYNAMIC_FIELD_LENGTH: usize = u16::MAX as usize;

const COMMON_SUFFIX_FIXED_LENGTH: usize = 32 + 32 + 32 + 2 + 2;
const OUTPUT_PREFIX_LENGTH: usize = 32 + 32 + 32;
const FILL_PREFIX_LENGTH: usize = 32 + 32 + 4;

/// Errors that can occur while encoding or decoding fill-proof payloads.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EncodingError {
	/// A length-prefixed field does not fit in two bytes.
	#[error("Field '{field}' is {length} bytes, maximum is 65535")]
	FieldTooLarge { field: &'static str, length: usize },
	/// The payload ended before all fields were read.
	#[error("Payload truncated: needed {needed} bytes at offset {offset}, have {available}")]
	Truncated {
		offset: usize,
		needed: usize,
		available: usize,
	},
	/// Bytes remain after the last field.
	#[error("Payload has {0} trailing bytes")]
	TrailingBytes(usize),
}

/// The attested fact "solver delivered output for order at timestamp".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FillDescription {
	pub solver: B256,
	pub order_id: B256,
	pub timestamp: u32,
	pub token: B256,
	pub amount: U256,
	pub recipient: B256,
	pub call: Bytes,
	pub context: Bytes,
}

impl FillDescription {
	/// Describes a fill of `output` without copying its oracle and settler,
	/// which are not part of the attested payload.
	pub fn new(solver: B256, order_id: B256, timestamp: u32, output: &MandateOutput) -> Self {
		Self {
			solver,
			order_id,
			timestamp,
			token: output.token,
			amount: output.amount,
			recipient: output.recipient,
			call: output.call.clone(),
			context: output.context.clone(),
		}
	}

	pub fn encode(&self) -> Result<Vec<u8>, EncodingError> {
		check_dynamic_fields(&self.call, &self.context)?;

		let mut payload = Vec::with_capacity(
			FILL_PREFIX_LENGTH + COMMON_SUFFIX_FIXED_LENGTH + self.call.len() + self.context.len(),
		);
		payload.extend_from_slice(self.solver.as_slice());
		payload.extend_from_slice(self.order_id.as_slice());
		payload.extend_from_slice(&self.timestamp.to_be_bytes());
		write_common_suffix(
			&mut payload,
			&self.token,
			&self.amount,
			&self.recipient,
			&self.call,
			&self.context,
		);
		Ok(payload)
	}

	/// Parses a fill description, e.g. one carried by a bridge message.
	pub fn decode(payload: &[u8]) -> Result<Self, EncodingError> {
		let mut reader = Reader::new(payload);
		let solver = reader.word()?;
		let order_id = reader.word()?;
		let timestamp = u32::from_be_bytes(reader.array::<4>()?);
		let token = reader.word()?;
		let amount = U256::from_be_bytes(reader.word()?.0);
		let recipient = reader.word()?;
		let call = reader.length_prefixed()?;
		let context = reader.length_prefixed()?;
		reader.finish()?;

		Ok(Self {
			solver,
			order_id,
			timestamp,
			token,
			amount,
			recipient,
			call,
			context,
		})
	}

	pub fn hash(&self) -> Result<B256, EncodingError> {
		Ok(keccak256(self.encode()?))
	}
}

/// Encodes an output for identification: `oracle | settler | chainId | suffix`.
pub fn encode_output(output: &MandateOutput) -> Result<Vec<u8>, EncodingError> {
	check_dynamic_fields(&output.call, &output.context)?;

	let mut encoded = Vec::with_capacity(
		OUTPUT_PREFIX_LENGTH + COMMON_SUFFIX_FIXED_LENGTH + output.call.len() + output.context.len(),
	);
	encoded.extend_from_slice(output.oracle.as_slice());
	encoded.extend_from_slice(output.settler.as_slice());
	encoded.extend_from_slice(&output.chain_id.to_be_bytes::<32>());
	write_common_suffix(
		&mut encoded,
		&output.token,
		&output.amount,
		&output.recipient,
		&output.call,
		&output.context,
	);
	Ok(encoded)
}

/// Collision-resistant identifier of an output, independent of any order.
pub fn output_identifier(output: &MandateOutput) -> Result<B256, EncodingError> {
	Ok(keccak256(encode_output(output)?))
}

/// Encodes `solver | orderId | timestamp | suffix` for a fill of `output`.
pub fn encode_fill_description(
	solver: B256,
	order_id: B256,
	timestamp: u32,
	output: &MandateOutput,
) -> Result<Vec<u8>, EncodingError> {
	FillDescription::new(solver, order_id, timestamp, output).encode()
}

/// Hash of the fill description; the key attested across chains.
pub fn fill_description_hash(
	solver: B256,
	order_id: B256,
	timestamp: u32,
	output: &MandateOutput,
) -> Result<B256, EncodingError> {
	Ok(keccak256(encode_fill_description(
		solver, order_id, timestamp, output,
	)?))
}

fn check_dynamic_fields(call: &[u8], context: &[u8]) -> Result<(), EncodingError> {
	if call.len() > MAX_DYNAMIC_FIELD_LENGTH {
		return Err(EncodingError::FieldTooLarge {
			field: "call",
			length: call.len(),
		});
	}
	if context.len() > MAX_DYNAMIC_FIELD_LENGTH {
		return Err(EncodingError::FieldTooLarge {
			field: "context",
			length: context.len(),
		});
	}
	Ok(())
}

// Lengths must have been checked by `check_dynamic_fields`.
fn write_common_suffix(
	buffer: &mut Vec<u8>,
	token: &B256,
	amount: &U256,
	recipient: &B256,
	call: &[u8],
	context: &[u8],
) {
	buffer.extend_from_slice(token.as_slice());
	buffer.extend_from_slice(&amount.to_be_bytes::<32>());
	buffer.extend_from_slice(recipient.as_slice());
	buffer.extend_from_slice(&(call.len() as u16).to_be_bytes());
	buffer.extend_from_slice(call);
	buffer.extend_from_slice(&(context.len() as u16).to_be_bytes());
	buffer.extend_from_slice(context);
}

struct Reader<'a> {
	data: &'a [u8],
	offset: usize,
}

impl<'a> Reader<'a> {
	fn new(data: &'a [u8]) -> Self {
		Self { data, offset: 0 }
	}

	fn take(&mut self, len: usize) -> Result<&'a [u8], EncodingError> {
		let end = self.offset + len;
		if end > self.data.len() {
			return Err(EncodingError::Truncated {
				offset: self.offset,
				needed: len,
				available: self.data.len() - self.offset,
			});
		}
		let slice = &self.data[self.offset..end];
		self.offset = end;
		Ok(slice)
	}

	fn array<const N: usize>(&mut self) -> Result<[u8; N], EncodingError> {
		let mut out = [0u8; N];
		out.copy_from_slice(self.take(N)?);
		Ok(out)
	}

	fn word(&mut self) -> Result<B256, EncodingError> {
		Ok(B256::from(self.array::<32>()?))
	}

	fn length_prefixed(&mut self) -> Result<Bytes, EncodingError> {
		let len = u16::from_be_bytes(self.array::<2>()?) as usize;
		Ok(Bytes::copy_from_slice(self.take(len)?))
	}

	fn finish(self) -> Result<(), EncodingError> {
		match self.data.len() - self.offset {
			0 => Ok(()),
			trailing => Err(EncodingError::TrailingBytes(trailing)),
		}
	}
}
