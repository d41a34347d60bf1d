use std::process::ExitCode;

use clap::{ArgAction, Args, Parser, Subcommand};
use tokio::signal::unix::{SignalKind, signal};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use otelherd::app::App;
use otelherd::config::Config;

#[derive(Parser)]
#[command(
	name = "otelherd",
	version,
	about = "Control-plane supervisor for embedded OpenTelemetry Collectors"
)]
struct Cli {
	#[command(subcommand)]
	command: Commands,
}

#[derive(Subcommand)]
enum Commands {
	/// Run the supervisor
	Run(RunArgs),
}

#[derive(Args)]
struct RunArgs {
	/// Enable verbose (debug level) output
	#[arg(short = 'd', long)]
	debug: bool,

	/// Enable self telemetry for collectors. Disabled by default to avoid
	/// port conflicts
	#[arg(short = 's', long = "self_telemetry")]
	self_telemetry: bool,

	/// REST API host
	#[arg(short = 'a', long = "server_host", default_value = "localhost")]
	server_host: String,

	/// REST API port
	#[arg(short = 'p', long = "server_port", default_value_t = 10222)]
	server_port: u16,

	/// Collector `--set` override, forwarded to every policy; repeatable
	#[arg(short = 'e', long = "set")]
	set: Vec<String>,

	/// Collector feature gates, comma separated
	#[arg(short = 'f', long = "feature_gates", default_value = "")]
	feature_gates: String,

	/// Include timestamps in log output
	#[arg(long = "log_timestamp", default_value_t = true, action = ArgAction::Set)]
	log_timestamp: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
	let cli = Cli::parse();
	match cli.command {
		Commands::Run(args) => run(args).await,
	}
}

async fn run(args: RunArgs) -> ExitCode {
	init_logging(args.debug, args.log_timestamp);

	let config = Config {
		debug: args.debug,
		self_telemetry: args.self_telemetry,
		server_host: args.server_host,
		server_port: args.server_port,
		set: args.set,
		feature_gates: args.feature_gates,
		log_timestamp: args.log_timestamp,
	};

	let app = App::new(config);
	let mut server_errors = match app.start().await {
		Ok(rx) => rx,
		Err(e) => {
			error!(error = %e, "otelherd startup failed");
			app.stop().await;
			return ExitCode::FAILURE;
		}
	};

	let mut sigterm = match signal(SignalKind::terminate()) {
		Ok(sigterm) => sigterm,
		Err(e) => {
			error!(error = %e, "failed to register SIGTERM handler");
			app.stop().await;
			return ExitCode::FAILURE;
		}
	};

	tokio::select! {
		_ = tokio::signal::ctrl_c() => {
			warn!("received interrupt, shutting down");
		}
		_ = sigterm.recv() => {
			warn!("received SIGTERM, shutting down");
		}
		err = server_errors.recv() => {
			if let Some(e) = err {
				error!(error = %e, "otelherd server encountered an error");
				app.stop().await;
				return ExitCode::FAILURE;
			}
		}
	}

	app.stop().await;
	info!("otelherd stopped");
	ExitCode::SUCCESS
}

fn init_logging(debug: bool, log_timestamp: bool) {
	let default = if debug { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

	let builder = tracing_subscriber::fmt()
		.json()
		.with_env_filter(filter)
		.with_target(false);
	if log_timestamp {
		builder.init();
	} else {
		builder.without_time().init();
	}
}
