//! Input settlement contracts.
//!
//! Each settler holds or claims the inputs of orders and releases them to
//! the solver once the order's oracle proves every output was filled, or
//! back to the user after expiry. Escrow settlers custody the tokens
//! themselves, the resource-lock settler claims them from a registry, the
//! bond settler adds an optimistic claim and dispute game on top of escrow.
//! All entry points run as a single atomic call on the [`Chain`] they were
//! built with.
//!
//! [`Chain`]: settler_storage::Chain

pub mod base;
pub mod bond;
pub mod collateral;
pub mod compact;
pub mod error;
pub mod escrow;
pub mod fee;
pub mod multichain;
pub mod purchase;
pub mod status;

#[cfg(test)]
mod test_utils;

pub use base::{Environment, Finalisation, SettlerBase};
pub use bond::{BondParameters, BondSettler, ClaimRecord};
pub use collateral::{CollateralBalance, CollateralError, CollateralLedger, Funding};
pub use compact::{CompactSettler, LockAuthorization};
pub use error::{ErrorKind, SettlementError};
pub use escrow::{EscrowFunding, EscrowSettler, SponsorAuthorization};
pub use fee::{GovernanceFee, MAX_GOVERNANCE_FEE_BPS};
pub use multichain::MultichainEscrowSettler;
pub use purchase::{OrderPurchase, PurchaseRecord, PurchaseRequest};
pub use status::{OrderStatus, Transition};
