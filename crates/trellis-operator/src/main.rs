//! Trellis Operator - route aggregation controller for Trellis

use clap::{Parser, Subcommand};
use trellis_common::kube_utils::create_client;
use trellis_common::telemetry::{init_telemetry, TelemetryConfig};

mod config;
mod runner;
mod startup;

use config::RunArgs;

/// Trellis - routes application traffic through shared per-hostname proxies
#[derive(Parser, Debug)]
#[command(name = "trellis-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,

    #[command(flatten)]
    run: RunArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the route controller (default mode)
    Run,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        for def in startup::all_crds() {
            let crd = serde_yaml::to_string(&def.crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize {} CRD: {}", def.name, e))?;
            println!("---\n{crd}");
        }
        return Ok(());
    }

    init_telemetry(TelemetryConfig {
        service_name: "trellis-operator".to_string(),
        format: cli.run.log_format,
    })?;

    match cli.command {
        Some(Commands::Run) | None => run_controller(cli.run).await,
    }
}

async fn run_controller(args: RunArgs) -> anyhow::Result<()> {
    let client = create_client().await?;

    if args.install_crds {
        startup::ensure_crds_installed(&client).await?;
    }

    tracing::info!(workers = args.workers, "Starting Trellis controllers");
    runner::run_route_controller(client, &args).await;
    tracing::info!("Trellis operator stopped");
    Ok(())
}
