use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use harvestd::config::ManifestConfig;
use harvestd::cooldown::CooldownTracker;
use harvestd::error::Result;
use harvestd::registry::Registry;
use harvestd::scheduler::Scheduler;
use harvestd::shutdown::install_shutdown_handler;
use harvestd::status::{run_status_server, StatusState};

#[derive(Parser, Debug)]
#[command(name = "harvestd")]
#[command(version)]
#[command(about = "Supervisor for recurring data-harvester processes")]
#[command(propagate_version = true)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Run the supervisor with the given manifest
    Run {
        /// Path to the TOML job manifest
        #[arg(long, short = 'c', default_value = "harvestd.toml")]
        config: PathBuf,
    },

    /// Validate the manifest and print the job table without spawning anything
    Check {
        /// Path to the TOML job manifest
        #[arg(long, short = 'c', default_value = "harvestd.toml")]
        config: PathBuf,
    },
}

async fn run(config_path: PathBuf) -> Result<()> {
    let manifest = ManifestConfig::load(&config_path)?;
    let registry = Registry::load(&manifest)?;
    if registry.is_empty() {
        tracing::warn!("Manifest declares no jobs, nothing to supervise");
    }

    let cooldowns = if manifest.supervisor.persist_state {
        CooldownTracker::with_state_file(manifest.supervisor.state_file.clone())?
    } else {
        CooldownTracker::in_memory()
    };

    tracing::info!(
        manifest = %config_path.display(),
        jobs = registry.len(),
        persist_state = manifest.supervisor.persist_state,
        "Starting harvestd"
    );

    let shutdown = install_shutdown_handler();
    let tick = Duration::from_secs(manifest.supervisor.tick_interval_secs.max(1));
    let scheduler = Scheduler::new(registry, cooldowns, shutdown, tick);

    if let Some(addr) = manifest.supervisor.status_addr {
        let state = StatusState {
            table: scheduler.table(),
        };
        tokio::spawn(async move {
            run_status_server(addr, state).await;
        });
    }

    scheduler.run().await;
    Ok(())
}

fn check(config_path: PathBuf) -> Result<()> {
    let manifest = ManifestConfig::load(&config_path)?;
    let registry = Registry::load(&manifest)?;

    println!(
        "{:<16} {:>10} {:>10} {:>8} {:<8} {:<16}",
        "JOB", "TIMEOUT", "COOLDOWN", "GRACE", "SIGNAL", "RESTART"
    );
    println!("{}", "-".repeat(74));
    for spec in registry.iter() {
        println!(
            "{:<16} {:>9}s {:>9}s {:>7}s {:<8} {:<16}",
            spec.id,
            spec.timeout.as_secs(),
            spec.cooldown.as_secs(),
            spec.grace_period.as_secs(),
            spec.stop_signal.to_string(),
            spec.restart.to_string()
        );
    }
    println!();
    println!("{}: {} jobs OK", config_path.display(), registry.len());
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let result = match args.command {
        Commands::Run { config } => run(config).await,
        Commands::Check { config } => check(config),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
