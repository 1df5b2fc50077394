//! MUSCLE manager binary.
//!
//! Loads a model, then coordinates the run's instances until they have all
//! deregistered or the process is interrupted.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use mmp_manager::config::load_model;
use mmp_manager::{FileSink, Logger, MmpServer, ServerConfig, TracingSink, ipc};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Manager command line arguments.
#[derive(Parser, Debug)]
#[command(name = "muscle-manager")]
#[command(about = "Coordinates the instances of a coupled simulation")]
struct Args {
	/// Model description (TOML)
	#[arg(short, long, value_name = "PATH")]
	model: PathBuf,

	/// Address to listen on
	#[arg(short, long, value_name = "ADDR", default_value = "127.0.0.1:9000")]
	bind: String,

	/// File receiving instance log records
	#[arg(long, value_name = "PATH", default_value = "muscle3_manager.log")]
	log_file: PathBuf,

	/// Fail peer requests that wait longer than this
	#[arg(long, value_name = "SECS")]
	peer_timeout_secs: Option<u64>,

	/// Verbose logging
	#[arg(short, long)]
	verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	let subscriber = tracing_subscriber::fmt()
		.with_max_level(if args.verbose {
			tracing::Level::DEBUG
		} else {
			tracing::Level::INFO
		})
		.finish();
	tracing::subscriber::set_global_default(subscriber)?;

	let model = load_model(&args.model)?;
	info!(model = %model.name, path = %args.model.display(), "loaded model");

	let logger = Logger::new()
		.with_sink(TracingSink)
		.with_sink(FileSink::open(&args.log_file)?);
	info!(log_file = %args.log_file.display(), "writing instance logs");

	let config = ServerConfig {
		peer_timeout: args.peer_timeout_secs.map(Duration::from_secs),
	};
	let server = MmpServer::new(&model, logger, config)?;

	let listener = ipc::bind(args.bind.as_str()).await?;
	let shutdown = CancellationToken::new();
	let serving = tokio::spawn(ipc::serve(listener, server.clone(), shutdown.clone()));

	tokio::select! {
		res = tokio::signal::ctrl_c() => {
			res?;
			info!("interrupted");
		}
		() = server.wait_run_complete() => {
			info!("all instances finished");
		}
	}

	shutdown.cancel();
	serving.await??;
	Ok(())
}
