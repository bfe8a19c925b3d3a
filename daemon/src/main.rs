use clap::Parser;
use daemon::runner::run_until;
use daemon::{Config, FileClaimsSource, MemoryOverlay, Reconciler};
use log::{error, info, warn};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Settings file (TOML); defaults are used when it does not exist
    #[arg(short = 'c', long, default_value = "claim-overlay.toml")]
    config: PathBuf,

    /// Claims registry file (.json or .bin)
    #[arg(short = 'r', long, default_value = "claims.json")]
    registry: PathBuf,

    /// Where the overlay markers are exported for the web map
    #[arg(short = 'o', long, default_value = "markers.json")]
    output: PathBuf,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    let (config, warnings) = match Config::load(&args.config) {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("Claim overlay disabled: {}", e);
            return Ok(());
        }
    };
    for warning in &warnings {
        warn!("{}", warning);
    }

    let source = FileClaimsSource::new(&args.registry);
    let mut reconciler = match Reconciler::start(config, source, MemoryOverlay::new()) {
        Ok(reconciler) => reconciler,
        Err(e) => {
            // Startup problems disable the mirror, they never fail the host.
            error!("Claim overlay disabled: {}", e);
            return Ok(());
        }
    };

    info!(
        "Reading claims from {}, exporting markers to {}",
        args.registry.display(),
        args.output.display()
    );

    let output = args.output.clone();
    run_until(
        &mut reconciler,
        async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
                Err(e) => error!("Failed to listen for Ctrl+C: {}", e),
            }
        },
        |reconciler, result| {
            if result.is_ok() {
                if let Err(e) = reconciler.overlay().write_snapshot(&output) {
                    warn!("Failed to export markers: {}", e);
                }
            }
        },
    )
    .await;

    let overlay = reconciler.shutdown();
    overlay.write_snapshot(&args.output)?;

    Ok(())
}
