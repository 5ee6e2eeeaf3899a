//! Events emitted by settlement contracts and the event bus carrying them.
//!
//! Contracts stage events while a call executes. Staged events are published
//! once the outermost call succeeds and discarded when it reverts, so
//! subscribers only ever observe committed state changes.

use crate::common::{Address, B256, U256};
use crate::order::Input;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SettlerEvent {
	Order(OrderEvent),
	Dispute(DisputeEvent),
	Fill(FillEvent),
	Collateral(CollateralEvent),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
	Opened {
		settler: Address,
		order_id: B256,
		user: Address,
		inputs: Vec<Input>,
	},
	Finalised {
		settler: Address,
		order_id: B256,
		solver: B256,
		destination: B256,
	},
	Refunded {
		settler: Address,
		order_id: B256,
	},
	Purchased {
		settler: Address,
		order_id: B256,
		solver: B256,
		purchaser: B256,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeEvent {
	Claimed {
		settler: Address,
		order_id: B256,
		solve_params_hash: B256,
		solver: Address,
	},
	Disputed {
		settler: Address,
		order_id: B256,
		solve_params_hash: B256,
		disputer: Address,
	},
	ClaimFinalised {
		settler: Address,
		order_id: B256,
		solve_params_hash: B256,
	},
	DisputeSettled {
		settler: Address,
		order_id: B256,
		solve_params_hash: B256,
		proven: bool,
	},
	DisputeSlashed {
		settler: Address,
		order_id: B256,
		solve_params_hash: B256,
		proven: bool,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FillEvent {
	OutputFilled {
		oracle: Address,
		order_id: B256,
		output_hash: B256,
		solver: B256,
		timestamp: u32,
	},
	AttestationReceived {
		oracle: Address,
		remote_chain_id: U256,
		remote_oracle: B256,
		payload_hash: B256,
	},
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollateralEvent {
	Deposited {
		solver: Address,
		token: Address,
		amount: U256,
	},
	Withdrawn {
		solver: Address,
		token: Address,
		amount: U256,
	},
	Locked {
		solver: Address,
		token: Address,
		amount: U256,
	},
	Unlocked {
		solver: Address,
		token: Address,
		amount: U256,
	},
	Penalized {
		solver: Address,
		token: Address,
		amount: U256,
		recipient: Address,
	},
	Slashed {
		solver: Address,
		token: Address,
		locked_amount: U256,
		slashed_amount: U256,
		recipient: Address,
	},
}

impl From<OrderEvent> for SettlerEvent {
	fn from(event: OrderEvent) -> Self {
		SettlerEvent::Order(event)
	}
}

impl From<DisputeEvent> for SettlerEvent {
	fn from(event: DisputeEvent) -> Self {
		SettlerEvent::Dispute(event)
	}
}

impl From<FillEvent> for SettlerEvent {
	fn from(event: FillEvent) -> Self {
		SettlerEvent::Fill(event)
	}
}

impl From<CollateralEvent> for SettlerEvent {
	fn from(event: CollateralEvent) -> Self {
		SettlerEvent::Collateral(event)
	}
}

/// Broadcast bus for settler events.
///
/// Clones share both the channel and the staging buffer.
pub struct EventBus {
	sender: broadcast::Sender<SettlerEvent>,
	staged: Arc<Mutex<Vec<SettlerEvent>>>,
}

impl EventBus {
	/// Creates a bus buffering up to `capacity` undelivered events per subscriber.
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self {
			sender,
			staged: Arc::new(Mutex::new(Vec::new())),
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SettlerEvent> {
		self.sender.subscribe()
	}

	/// Publishes an event immediately.
	///
	/// Returns an error if there are no active subscribers.
	pub fn publish(&self, event: SettlerEvent) -> Result<(), broadcast::error::SendError<SettlerEvent>> {
		self.sender.send(event)?;
		Ok(())
	}

	/// Queues an event until the enclosing call commits.
	pub fn stage(&self, event: impl Into<SettlerEvent>) {
		self.staged
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.push(event.into());
	}

	pub fn staged_len(&self) -> usize {
		self.staged.lock().unwrap_or_else(PoisonError::into_inner).len()
	}

	/// Drops events staged after position `len`.
	pub fn discard_from(&self, len: usize) {
		self.staged
			.lock()
			.unwrap_or_else(PoisonError::into_inner)
			.truncate(len);
	}

	/// Publishes every staged event in order. Returns how many were staged.
	pub fn flush(&self) -> usize {
		let events = std::mem::take(&mut *self.staged.lock().unwrap_or_else(PoisonError::into_inner));
		let count = events.len();
		for event in events {
			if self.sender.send(event).is_err() {
				tracing::trace!("No subscribers for settler event");
			}
		}
		count
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
			staged: Arc::clone(&self.staged),
		}
	}
}

impl Default for EventBus {
	fn default() -> Self {
		Self::new(1024)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn refunded(byte: u8) -> OrderEvent {
		OrderEvent::Refunded {
			settler: Address::ZERO,
			order_id: B256::repeat_byte(byte),
		}
	}

	#[tokio::test]
	async fn test_staged_events_published_on_flush() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();

		bus.stage(refunded(1));
		bus.stage(refunded(2));
		assert!(receiver.try_recv().is_err());

		assert_eq!(bus.flush(), 2);
		assert_eq!(receiver.recv().await.unwrap(), SettlerEvent::Order(refunded(1)));
		assert_eq!(receiver.recv().await.unwrap(), SettlerEvent::Order(refunded(2)));
	}

	#[tokio::test]
	async fn test_discarded_events_never_published() {
		let bus = EventBus::new(16);
		let mut receiver = bus.subscribe();

		bus.stage(refunded(1));
		let mark = bus.staged_len();
		bus.stage(refunded(2));
		bus.discard_from(mark);

		assert_eq!(bus.flush(), 1);
		assert_eq!(receiver.recv().await.unwrap(), SettlerEvent::Order(refunded(1)));
		assert!(receiver.try_recv().is_err());
	}

	#[test]
	fn test_clones_share_staging() {
		let bus = EventBus::new(4);
		let other = bus.clone();
		other.stage(refunded(3));
		assert_eq!(bus.staged_len(), 1);
	}
}
