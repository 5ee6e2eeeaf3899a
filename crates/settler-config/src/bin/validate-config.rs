//! Configuration validation utility
//!
//! Usage: cargo run --bin validate-config config/settler.toml

use std::env;
use std::process;

use settler_config::ConfigLoader;

fn main() {
	let args: Vec<String> = env::args().collect();

	if args.len() != 2 {
		eprintln!("Usage: {} <config-file>", args[0]);
		process::exit(1);
	}

	let config_path = &args[1];

	println!("Validating configuration file: {}", config_path);

	match ConfigLoader::new().load_file(config_path) {
		Ok(config) => {
			println!("✅ Configuration is valid!");
			println!("Settler name: {}", config.settler.name);
			println!("Chain id: {}", config.settler.chain_id);
			for deployment in &config.deployments {
				println!(
					"Deployment: {} at {} (fee {} bps)",
					deployment.kind, deployment.address, deployment.fee_bps
				);
			}
			println!(
				"Dispute: bond {} bps, window {}s, waiting {}s",
				config.dispute.bond_bps, config.dispute.dispute_window, config.dispute.waiting_time
			);
			println!("Storage backend: {}", config.storage.backend);
		}
		Err(e) => {
			eprintln!("❌ Configuration validation failed:");
			eprintln!("{:#}", e);
			process::exit(1);
		}
	}
}
