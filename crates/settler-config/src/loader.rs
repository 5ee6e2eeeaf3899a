//! Configuration loading from files and environment.

use crate::types::*;
use crate::ConfigError;
use anyhow::{Context, Result};
use regex::Regex;
use settler_types::{Address, Field, FieldType, Schema, BPS_DENOMINATOR};
use std::collections::HashSet;
use std::env;
use std::path::Path;
use tracing::{debug, info, warn};

/// Upper bound of a deployment's governance fee.
const MAX_FEE_BPS: u64 = 1_000;

const STORAGE_BACKENDS: &[&str] = &["memory", "file"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
	Toml,
	Json,
	Yaml,
}

impl ConfigFormat {
	/// Format implied by the file extension.
	pub fn from_path(path: &Path) -> Option<Self> {
		match path.extension().and_then(|s| s.to_str()) {
			Some("toml") => Some(Self::Toml),
			Some("json") => Some(Self::Json),
			Some("yaml") | Some("yml") => Some(Self::Yaml),
			_ => None,
		}
	}
}

/// Configuration loader with environment variable substitution
pub struct ConfigLoader {
	env_prefix: String,
}

impl Default for ConfigLoader {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			env_prefix: "SETTLER_".to_string(),
		}
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	/// Load configuration from file
	pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<SettlerConfig> {
		let path = path.as_ref();
		info!("Loading configuration from {:?}", path);

		let format = ConfigFormat::from_path(path)
			.ok_or_else(|| anyhow::anyhow!("Unsupported config format: {:?}", path))?;
		let contents =
			std::fs::read_to_string(path).with_context(|| format!("Failed to read config file: {:?}", path))?;

		self.load_str(&contents, format)
	}

	/// Substitutes, parses, overrides and validates `contents`.
	pub fn load_str(&self, contents: &str, format: ConfigFormat) -> Result<SettlerConfig> {
		let substituted = substitute_env_vars(contents)?;
		let mut config = Self::parse(&substituted, format)?;
		self.apply_env_overrides(&mut config)?;
		validate_config(&config)?;
		Ok(config)
	}

	fn parse(contents: &str, format: ConfigFormat) -> Result<SettlerConfig> {
		match format {
			ConfigFormat::Toml => toml::from_str(contents).map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e)),
			ConfigFormat::Json => serde_json::from_str(contents).context("Failed to parse JSON"),
			ConfigFormat::Yaml => serde_yaml::from_str(contents).context("Failed to parse YAML"),
		}
	}

	/// Apply environment variable overrides
	fn apply_env_overrides(&self, config: &mut SettlerConfig) -> Result<()> {
		if let Some(level) = self.env_var("LOG_LEVEL") {
			debug!("Overriding log level from environment");
			config.settler.log_level = level;
		}

		if let Some(chain_id) = self.env_var("CHAIN_ID") {
			debug!("Overriding chain id from environment");
			config.settler.chain_id = chain_id
				.parse()
				.map_err(|e| ConfigError::Validation(format!("Invalid chain id '{}': {}", chain_id, e)))?;
		}

		if let Some(backend) = self.env_var("STORAGE_BACKEND") {
			debug!("Overriding storage backend from environment");
			config.storage.backend = backend;
		}

		if let Some(path) = self.env_var("STORAGE_PATH") {
			debug!("Overriding storage path from environment");
			config
				.storage
				.options
				.insert("storage_path".to_string(), toml::Value::String(path));
		}

		Ok(())
	}

	fn env_var(&self, name: &str) -> Option<String> {
		env::var(format!("{}{}", self.env_prefix, name)).ok()
	}
}

/// Replaces every `${VAR}` with the value of `VAR`.
fn substitute_env_vars(content: &str) -> Result<String, ConfigError> {
	let re = Regex::new(r"\$\{([^}]+)\}").map_err(|e| ConfigError::Parse(e.to_string()))?;
	let mut result = content.to_string();

	for cap in re.captures_iter(content) {
		let full_match = &cap[0];
		let var_name = &cap[1];

		let env_value = env::var(var_name).map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

		result = result.replace(full_match, &env_value);
	}

	Ok(result)
}

/// Validate configuration
pub fn validate_config(config: &SettlerConfig) -> Result<(), ConfigError> {
	if config.settler.name.trim().is_empty() {
		return Err(ConfigError::Validation("Settler name must not be empty".to_string()));
	}
	if config.settler.chain_id == 0 {
		return Err(ConfigError::Validation("Chain id must not be zero".to_string()));
	}

	// Every contract lives at its own address.
	let mut addresses = HashSet::new();
	let mut claim = |address: Address, what: &str| {
		if address.is_zero() {
			return Err(ConfigError::Validation(format!("{} address must not be zero", what)));
		}
		if !addresses.insert(address) {
			return Err(ConfigError::Validation(format!("Address {} is configured twice", address)));
		}
		Ok(())
	};

	for deployment in &config.deployments {
		claim(deployment.address, &format!("{} settler", deployment.kind))?;
		if deployment.fee_bps > MAX_FEE_BPS {
			return Err(ConfigError::Validation(format!(
				"Governance fee of {} bps on {} exceeds {} bps",
				deployment.fee_bps, deployment.address, MAX_FEE_BPS
			)));
		}
		if deployment.fee_bps > 0 && deployment.fee_recipient.is_zero() {
			return Err(ConfigError::Validation(format!(
				"Settler {} charges a fee but has no fee recipient",
				deployment.address
			)));
		}
		if deployment.kind == SettlerKind::Compact && config.custody.resource_lock.is_none() {
			return Err(ConfigError::Validation(format!(
				"Compact settler {} requires custody.resource_lock",
				deployment.address
			)));
		}
	}

	if config.dispute.bond_bps == 0 || config.dispute.bond_bps > BPS_DENOMINATOR {
		return Err(ConfigError::Validation(format!(
			"Bond of {} bps outside 1..={}",
			config.dispute.bond_bps, BPS_DENOMINATOR
		)));
	}

	if let Some(address) = config.custody.signature_transfer {
		claim(address, "Signature transfer")?;
	}
	if let Some(address) = config.custody.resource_lock {
		claim(address, "Resource lock")?;
	}
	for allocator in &config.custody.allocators {
		if allocator.allocator.is_zero() {
			return Err(ConfigError::Validation(format!(
				"Allocator for lock tag {} must not be zero",
				allocator.lock_tag
			)));
		}
	}

	if let Some(address) = config.oracles.local {
		claim(address, "Local oracle")?;
	}
	for oracle in &config.oracles.attestation {
		claim(oracle.address, "Attestation oracle")?;
		if oracle.bridge.is_zero() {
			return Err(ConfigError::Validation(format!(
				"Attestation oracle {} has no bridge",
				oracle.address
			)));
		}
	}

	if let Some(collateral) = &config.collateral {
		claim(collateral.address, "Collateral ledger")?;
		if collateral.operators.iter().any(|a| a.is_zero()) {
			return Err(ConfigError::Validation("Collateral operators must not be zero".to_string()));
		}
	}

	validate_storage(&config.storage)?;

	if !config.deployments.is_empty() && config.oracles.local.is_none() && config.oracles.attestation.is_empty() {
		warn!("No oracle configured, no order can be finalised");
	}

	Ok(())
}

fn validate_storage(storage: &StorageConfig) -> Result<(), ConfigError> {
	if !STORAGE_BACKENDS.contains(&storage.backend.as_str()) {
		return Err(ConfigError::Validation(format!(
			"Unknown storage backend '{}'",
			storage.backend
		)));
	}

	if storage.backend == "file" {
		let schema = Schema::new(
			vec![Field::new("storage_path", FieldType::String).with_validator(|value| match value.as_str() {
				Some(path) if !path.trim().is_empty() => Ok(()),
				_ => Err("storage_path must not be empty".to_string()),
			})],
			vec![],
		);
		schema
			.validate(&storage.options_value())
			.map_err(|e| ConfigError::Validation(format!("storage: {}", e)))?;
	}

	Ok(())
}

/// Load configuration from standard locations
pub fn load_config() -> Result<SettlerConfig> {
	let loader = ConfigLoader::new();
	if let Ok(path) = env::var("SETTLER_CONFIG") {
		return loader.load_file(path);
	}

	let paths = ["./config.toml", "./config/settler.toml", "/etc/oif-settler/config.toml"];
	for path in &paths {
		if Path::new(path).exists() {
			return loader.load_file(path);
		}
	}

	anyhow::bail!("No configuration file found; set SETTLER_CONFIG")
}
