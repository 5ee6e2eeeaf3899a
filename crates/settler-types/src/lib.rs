//! Common types for the OIF intent settlement engine.
//!
//! This crate holds the order model, the canonical identifier derivations,
//! the bit-exact fill-proof codec, the EIP-712 typed structures signed by
//! users, solvers and sponsors, and the event types published by the
//! settlement contracts.

pub mod common;
pub mod context;
pub mod encoding;
pub mod events;
pub mod order;
pub mod signature;
pub mod standards;
pub mod validation;

pub use common::*;
pub use context::*;
pub use encoding::*;
pub use events::*;
pub use order::*;
pub use signature::*;
pub use validation::*;
