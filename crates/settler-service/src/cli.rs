//! Command-line interface definitions.

use clap::{Parser, Subcommand};
use settler_types::{Address, B256};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "oif-settler")]
#[command(about = "OIF intent settlement engine", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Args {
	/// Path to configuration file
	#[arg(short, long, env = "SETTLER_CONFIG", default_value = "config/settler.toml")]
	pub config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, env = "SETTLER_LOG_LEVEL", default_value = "info")]
	pub log_level: String,

	#[command(subcommand)]
	pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
	/// Validate the configuration and deploy every settler it names
	Validate,

	/// Print the identifier a settler assigns to an order
	OrderId {
		/// Address of the deployed settler
		#[arg(short, long)]
		settler: Address,
		/// JSON file with a single-chain or multichain order
		order: PathBuf,
	},

	/// Print the status of an order on a settler
	Status {
		#[arg(short, long)]
		settler: Address,
		order_id: B256,
	},

	/// Print the collision-resistant identifier of an output
	OutputId {
		/// JSON file with one output
		output: PathBuf,
	},

	/// Encode the fill description an oracle attests for an output
	FillDescription {
		#[arg(long)]
		solver: B256,
		#[arg(long)]
		order_id: B256,
		#[arg(long)]
		timestamp: u32,
		/// JSON file with one output
		output: PathBuf,
	},
}
