//! Deployment configuration for the settlement engine.
//!
//! A [`SettlerConfig`] names the chain, the settlers to deploy with their
//! governance fees, the dispute parameters of bond settlers, the custody and
//! oracle collaborators and the storage backend. Files may be TOML, JSON or
//! YAML; `${VAR}` references are substituted from the environment and
//! `SETTLER_*` variables override individual settings.

use thiserror::Error;

pub mod loader;
pub mod types;

pub use loader::{load_config, validate_config, ConfigFormat, ConfigLoader};
pub use types::*;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("Parse error: {0}")]
	Parse(String),

	#[error("Validation error: {0}")]
	Validation(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
}
