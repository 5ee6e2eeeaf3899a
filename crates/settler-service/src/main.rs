use anyhow::{Context, Result};
use clap::Parser;
use serde::de::DeserializeOwned;
use settler_config::ConfigLoader;
use settler_service::cli::{Args, Command};
use settler_service::{OrderDocument, SettlerEngine};
use settler_types::{output_identifier, FillDescription, MandateOutput};
use std::path::Path;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
	let args = Args::parse();

	setup_tracing(&args.log_level)?;

	match &args.command {
		Command::Validate => validate(&args),
		Command::OrderId { settler, order } => {
			let engine = load_engine(&args)?;
			let order: OrderDocument = read_json(order)?;
			println!("{}", engine.order_identifier(*settler, &order)?);
			Ok(())
		}
		Command::Status { settler, order_id } => {
			let engine = load_engine(&args)?;
			let deployment = engine
				.deployment(*settler)
				.with_context(|| format!("No settler deployed at {}", settler))?;
			println!("{:?}", deployment.order_status(*order_id).await?);
			Ok(())
		}
		Command::OutputId { output } => {
			let output: MandateOutput = read_json(output)?;
			println!("{}", output_identifier(&output)?);
			Ok(())
		}
		Command::FillDescription {
			solver,
			order_id,
			timestamp,
			output,
		} => {
			let output: MandateOutput = read_json(output)?;
			let description = FillDescription::new(*solver, *order_id, *timestamp, &output);
			println!("payload: 0x{}", hex::encode(description.encode()?));
			println!("hash:    {}", description.hash()?);
			Ok(())
		}
	}
}

fn validate(args: &Args) -> Result<()> {
	info!("Validating configuration file: {:?}", args.config);
	let engine = load_engine(args)?;

	info!("Configuration is valid");
	for deployment in engine.deployments() {
		info!("  {} settler at {}", deployment.kind(), deployment.address());
	}
	if let Some(ledger) = engine.collateral() {
		info!("  collateral ledger at {}", ledger.address());
	}
	Ok(())
}

fn load_engine(args: &Args) -> Result<SettlerEngine> {
	let config = ConfigLoader::new()
		.load_file(&args.config)
		.context("Failed to load configuration")?;
	info!("Settler name: {}", config.settler.name);
	SettlerEngine::from_config(&config).context("Failed to build settlement engine")
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
	let contents = std::fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
	serde_json::from_str(&contents).with_context(|| format!("Failed to parse {:?}", path))
}

fn setup_tracing(log_level: &str) -> Result<()> {
	let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

	tracing_subscriber::registry()
		.with(env_filter)
		.with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
		.init();

	Ok(())
}
