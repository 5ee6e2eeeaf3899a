//! Configuration types for a settlement deployment.

use serde::{Deserialize, Serialize};
use settler_types::{Address, FixedBytes};
use std::fmt;

/// Complete deployment configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SettlerConfig {
	/// Engine identity and chain
	pub settler: EngineSettings,
	/// Settlement contracts to deploy
	#[serde(default)]
	pub deployments: Vec<DeploymentConfig>,
	/// Parameters shared by every bond settler
	#[serde(default)]
	pub dispute: DisputeConfig,
	#[serde(default)]
	pub custody: CustodyConfig,
	#[serde(default)]
	pub oracles: OracleConfig,
	/// Optional solver collateral ledger
	#[serde(default)]
	pub collateral: Option<CollateralConfig>,
	#[serde(default)]
	pub storage: StorageConfig,
}

impl SettlerConfig {
	/// Deployment at `address`, if any.
	pub fn deployment(&self, address: Address) -> Option<&DeploymentConfig> {
		self.deployments.iter().find(|d| d.address == address)
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EngineSettings {
	pub name: String,
	/// Chain id the settlers run on
	pub chain_id: u64,
	#[serde(default = "default_log_level")]
	pub log_level: String,
}

fn default_log_level() -> String {
	"info".to_string()
}

/// Settlement variant of a deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlerKind {
	Escrow,
	Compact,
	Bond,
	Multichain,
}

impl fmt::Display for SettlerKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let name = match self {
			SettlerKind::Escrow => "escrow",
			SettlerKind::Compact => "compact",
			SettlerKind::Bond => "bond",
			SettlerKind::Multichain => "multichain",
		};
		f.write_str(name)
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DeploymentConfig {
	pub kind: SettlerKind,
	pub address: Address,
	/// Governance fee in basis points
	#[serde(default)]
	pub fee_bps: u64,
	#[serde(default)]
	pub fee_recipient: Address,
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct DisputeConfig {
	#[serde(default = "default_bond_bps")]
	pub bond_bps: u64,
	/// Seconds
	#[serde(default = "default_dispute_window")]
	pub dispute_window: u64,
	/// Seconds
	#[serde(default = "default_waiting_time")]
	pub waiting_time: u64,
}

fn default_bond_bps() -> u64 {
	1_000
}

fn default_dispute_window() -> u64 {
	3_600
}

fn default_waiting_time() -> u64 {
	3_600
}

impl Default for DisputeConfig {
	fn default() -> Self {
		Self {
			bond_bps: default_bond_bps(),
			dispute_window: default_dispute_window(),
			waiting_time: default_waiting_time(),
		}
	}
}

/// Token custody collaborators
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CustodyConfig {
	/// Signature transfer contract used by `open_for`
	pub signature_transfer: Option<Address>,
	/// Resource-lock registry backing compact settlers
	pub resource_lock: Option<Address>,
	#[serde(default)]
	pub allocators: Vec<AllocatorConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AllocatorConfig {
	pub lock_tag: FixedBytes<12>,
	pub allocator: Address,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct OracleConfig {
	/// Same-chain output settler and oracle
	pub local: Option<Address>,
	#[serde(default)]
	pub attestation: Vec<AttestationOracleConfig>,
}

/// Oracle fed by a messaging bridge
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AttestationOracleConfig {
	pub address: Address,
	/// Only messages delivered by this bridge are accepted
	pub bridge: Address,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollateralConfig {
	pub address: Address,
	/// Accounts allowed to lock, unlock, penalize and slash
	#[serde(default)]
	pub operators: Vec<Address>,
}

/// Storage backend and its backend-specific options
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// "memory" or "file"
	pub backend: String,
	#[serde(flatten)]
	pub options: toml::Table,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: "memory".to_string(),
			options: toml::Table::new(),
		}
	}
}

impl StorageConfig {
	/// Backend options as the table storage factories expect.
	pub fn options_value(&self) -> toml::Value {
		toml::Value::Table(self.options.clone())
	}
}
