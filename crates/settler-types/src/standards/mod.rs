//! Typed-data standards shared with the surrounding protocol contracts.

pub mod compact;
pub mod eip712;
pub mod permit2;
