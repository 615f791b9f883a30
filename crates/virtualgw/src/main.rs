//! VirtualGW daemon binary

use clap::Parser;
use gateway::Role;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use virtualgw::{Config, Daemon, StartupError};

/// Dual-node virtual gateway failover daemon
#[derive(Debug, Parser)]
#[command(name = "virtualgw", version, about)]
struct Cli {
    /// Configuration file (default: search /etc/virtualgw, ~/.config/virtualgw, .)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Role of this node, overriding the configuration file
    #[arg(short, long, value_parser = parse_role)]
    role: Option<Role>,
}

fn parse_role(s: &str) -> Result<Role, String> {
    s.parse::<Role>().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Configuration first: it carries the logging settings
    let loaded = Config::resolve_path(cli.config)
        .and_then(|path| Config::load_from_file(&path, cli.role).map(|config| (config, path)));

    let (config, path) = match loaded {
        Ok(loaded) => loaded,
        Err(e) => {
            // Can't use tracing yet - not initialized
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(StartupError::from(e).exit_code());
        }
    };

    let logs = common::logging::init(config.logging.format, &config.logging.level);
    tracing::info!(path = %path.display(), "Configuration loaded");

    let daemon = Daemon::new(config, path, cli.role).with_log_handle(logs);
    match daemon.run(CancellationToken::new()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "virtualgw failed");
            ExitCode::from(e.exit_code())
        }
    }
}
