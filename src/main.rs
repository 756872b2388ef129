use std::path::PathBuf;

use async_shutdown::ShutdownManager;
use clap::Parser;

use akvcam_broker::broker::Broker;
use akvcam_broker::config::Config;
use akvcam_broker::preferences::PreferencesStore;

#[derive(Parser, Debug)]
#[clap(version)]
struct Args {
	/// Path to configuration file.
	config: PathBuf,

	/// Show more log messages.
	#[clap(long, short)]
	#[clap(action = clap::ArgAction::Count)]
	verbose: u8,

	/// Show less log messages.
	#[clap(long, short)]
	#[clap(action = clap::ArgAction::Count)]
	quiet: u8,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<(), ()> {
	let args = Args::parse();

	let log_level = match i16::from(args.verbose) - i16::from(args.quiet) {
		..=-2 => tracing::Level::ERROR,
		-1 => tracing::Level::WARN,
		0 => tracing::Level::INFO,
		1 => tracing::Level::DEBUG,
		2.. => tracing::Level::TRACE,
	};

	tracing_subscriber::fmt()
		.with_env_filter(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level.to_string())),
		)
		.init();

	let config = Config::read_from_file(&args.config).map_err(|e| {
		tracing::error!("failed to read configuration from {}: {e}", args.config.display());
	})?;

	tracing::debug!("using configuration:\n{:#?}", config);

	let prefs = PreferencesStore::open(config.preferences_path.clone())
		.await
		.map_err(|e| tracing::error!("failed to open preferences store: {e}"))?;

	// Spawn a task to wait for CTRL+C and trigger a shutdown.
	let shutdown = ShutdownManager::new();
	tokio::spawn({
		let shutdown = shutdown.clone();
		async move {
			if let Err(e) = tokio::signal::ctrl_c().await {
				tracing::error!("failed to wait for CTRL+C: {e}");
				std::process::exit(1);
			} else {
				tracing::info!("received interrupt signal, shutting down");
				shutdown.trigger_shutdown(()).ok();
			}
		}
	});

	let endpoint = config.effective_endpoint();
	tracing::info!("akvcam broker listening on {endpoint}");

	let serve_result = Broker::serve(config, prefs, shutdown.clone()).await;

	shutdown.wait_shutdown_complete().await;
	tracing::trace!("shutdown complete");

	if let Err(e) = serve_result {
		tracing::error!("broker service failed: {e}");
		std::process::exit(1);
	}

	Ok(())
}
