mod check;
mod config;
mod reporter;
#[cfg(feature = "serve")]
mod serve;
mod signals;
mod status;

use clap::{Parser, Subcommand};
use config::{AgentConfig, OUTPUT_TARGET_ENV};
use reporter::Reporter;
use status::Status;
use std::path::PathBuf;
use std::sync::Arc;

/// A liveness-reporting agent: rewrites a heartbeat file once per interval
/// and serves the derived alive/dead flag on an HTTP health endpoint.
#[derive(Parser, Debug)]
#[command(name = "heartbeat-agent", version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Config file path
    #[arg(short, long, default_value = "heartbeat.toml")]
    config: PathBuf,

    /// Heartbeat destination (overrides config and OUTPUT_TARGET)
    #[arg(short, long)]
    target: Option<PathBuf>,

    /// Health endpoint port (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Run without the health endpoint
    #[arg(long)]
    no_serve: bool,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every heartbeat write)
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Query a running agent's health endpoint; exit 0 if alive, 1 otherwise
    Check {
        /// Base URL of the agent (default: derived from config)
        #[arg(long)]
        url: Option<String>,

        /// Request timeout in seconds
        #[arg(long, default_value_t = 3)]
        timeout_secs: u64,
    },
}

fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "heartbeat_agent=debug"
    } else {
        "heartbeat_agent=info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// File, then `OUTPUT_TARGET`, then CLI flags.
fn resolve_config(cli: &Cli) -> Result<AgentConfig, config::ConfigError> {
    let mut config = AgentConfig::load(&cli.config)?;
    config.apply_output_target(std::env::var(OUTPUT_TARGET_ENV).ok());

    if let Some(target) = &cli.target {
        config.reporter.target = target.clone();
    }
    if let Some(port) = cli.port {
        config.serve.port = port;
    }
    if cli.no_serve {
        config.serve.enabled = false;
    }

    config.validate()?;
    Ok(config)
}

async fn run_agent(config: AgentConfig) {
    let status = Arc::new(Status::new(config.status.stale_after()));

    let reporter = Reporter::new(
        config.reporter.target.clone(),
        config.reporter.interval(),
        Arc::clone(&status),
    );
    tracing::debug!(path = %reporter.target().display(), "spawning reporter");
    let handle = reporter.spawn();

    #[cfg(feature = "serve")]
    let exporter = if config.serve.enabled {
        serve::start(&config.serve, Arc::clone(&status), handle.subscribe()).await
    } else {
        tracing::info!("status exporter disabled");
        None
    };

    #[cfg(not(feature = "serve"))]
    let exporter: Option<tokio::task::JoinHandle<()>> = {
        if config.serve.enabled {
            tracing::warn!("built without the serve feature, status exporter unavailable");
        }
        None
    };

    signals::shutdown_signal().await;

    handle.shutdown().await;

    if let Some(exporter) = exporter {
        if let Err(e) = exporter.await {
            tracing::warn!(error = %e, "status exporter task did not exit cleanly");
        }
    }

    tracing::info!(alive = status.is_alive(), "heartbeat-agent stopped");
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);
    tracing::debug!(?cli, "parsed CLI arguments");

    let config = match resolve_config(&cli) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!(error = %e, "cannot start");
            std::process::exit(1);
        }
    };

    if let Some(Command::Check { url, timeout_secs }) = cli.command {
        let url = url.unwrap_or_else(|| config.serve.local_url());
        let code = check::run(&url, std::time::Duration::from_secs(timeout_secs)).await;
        std::process::exit(code);
    }

    if cli.dry_run {
        println!("heartbeat-agent v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        match toml::to_string_pretty(&config) {
            Ok(rendered) => print!("{rendered}"),
            Err(e) => tracing::warn!(error = %e, "failed to render config"),
        }
        println!("Dry run mode, config validated, not running.");
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        path = %config.reporter.target.display(),
        "heartbeat-agent starting"
    );

    run_agent(config).await;
}
