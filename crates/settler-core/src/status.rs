//! Order lifecycle status and its transition function.
//!
//! The status map is the single source of truth for whether an order has
//! been paid out. Every money-moving entry point advances the status before
//! any external call and checks it again afterwards.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum OrderStatus {
	#[default]
	None,
	Deposited,
	Claimed,
	Refunded,
}

impl OrderStatus {
	/// No further transition is possible.
	pub fn is_final(self) -> bool {
		matches!(self, OrderStatus::Claimed | OrderStatus::Refunded)
	}
}

impl fmt::Display for OrderStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fmt::Debug::fmt(self, f)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
	/// Inputs committed: `None -> Deposited`.
	Open,
	/// Inputs paid out: `Deposited -> Claimed`.
	Finalise,
	/// Inputs claimed from a resource lock, which may never have been
	/// opened here: `None | Deposited -> Claimed`.
	FinaliseLocked,
	/// Inputs returned after expiry: `Deposited -> Refunded`.
	Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("cannot {transition:?} from {from}")]
pub struct InvalidTransition {
	pub transition: Transition,
	pub from: OrderStatus,
}

impl Transition {
	/// Status after applying this transition to `from`.
	pub fn apply(self, from: OrderStatus) -> Result<OrderStatus, InvalidTransition> {
		use OrderStatus::*;

		let to = match (self, from) {
			(Transition::Open, None) => Some(Deposited),
			(Transition::Open, Deposited | Claimed | Refunded) => Option::None,

			(Transition::Finalise, Deposited) => Some(Claimed),
			(Transition::Finalise, None | Claimed | Refunded) => Option::None,

			(Transition::FinaliseLocked, None | Deposited) => Some(Claimed),
			(Transition::FinaliseLocked, Claimed | Refunded) => Option::None,

			(Transition::Refund, Deposited) => Some(Refunded),
			(Transition::Refund, None | Claimed | Refunded) => Option::None,
		};

		to.ok_or(InvalidTransition { transition: self, from })
	}
}
