use std::path::PathBuf;

use clap::Parser;
use tracing::{error, info};

use hangar_daemon::DaemonConfig;
use hangar_paths::HangarPaths;

#[derive(Parser, Debug)]
#[command(name = "hangard", about = "hangar orchestration server", version)]
struct Args {
    /// Config root (defaults to $HANGAR_HOME, then ~/.hangar).
    #[arg(long)]
    home: Option<PathBuf>,

    /// Listen port (overrides config.toml and $HANGAR_PORT).
    #[arg(long)]
    port: Option<u16>,

    /// Emit JSON logs.
    #[arg(long)]
    json_logs: bool,
}

fn main() {
    let args = Args::parse();
    hangar_core::init_logging(args.json_logs);
    info!(event = "daemon.start_started");

    let exit_code = match run(args) {
        Ok(()) => {
            info!(event = "daemon.start_completed");
            0
        }
        Err(e) => {
            error!(event = "daemon.start_failed", error = %e);
            eprintln!("hangard: {}", e);
            1
        }
    };
    std::process::exit(exit_code);
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    let paths = match args.home {
        Some(home) => HangarPaths::from_dir(home),
        None => HangarPaths::resolve()?,
    };

    let mut config = DaemonConfig::load(&paths)?;
    if let Some(port) = args.port {
        config.port = port;
    }

    let rt = tokio::runtime::Runtime::new()?;
    rt.block_on(async { hangar_daemon::run_server(config).await })?;
    Ok(())
}
