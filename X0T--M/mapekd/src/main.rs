use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio::runtime::Runtime;
use x0t_mapek::{MapekConfig, MapekRuntime};

#[derive(Parser, Debug)]
#[command(name = "x0t-mapekd", version, about = "x0t MAPE-K autonomic loop daemon")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Runs the loop until interrupted or for a fixed number of cycles.
    Run {
        #[arg(long, default_value = "X0T--M/mapekd/config/mapek.toml")]
        config: PathBuf,
        /// Stop after this many cycles.
        #[arg(long)]
        cycles: Option<u64>,
    },
    /// Runs a single cycle and prints the recorded state as JSON.
    Once {
        #[arg(long, default_value = "X0T--M/mapekd/config/mapek.toml")]
        config: PathBuf,
        /// Also print the Prometheus exposition after the state.
        #[arg(long)]
        metrics: bool,
    },
    /// Validates a config file and prints the effective settings.
    Check {
        #[arg(long, default_value = "X0T--M/mapekd/config/mapek.toml")]
        config: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    shared_logging::init_tracing("info,x0t_mapek=info");
    match cli.command {
        Commands::Run { config, cycles } => run(&config, cycles),
        Commands::Once { config, metrics } => once(&config, metrics),
        Commands::Check { config } => check(&config),
    }
}

fn run(path: &Path, cycles: Option<u64>) -> Result<()> {
    let config = MapekConfig::load(path)?;
    let rt = Runtime::new().context("starting tokio runtime")?;
    rt.block_on(async {
        let runtime = MapekRuntime::bootstrap(&config)?;
        if cycles.is_some() {
            runtime.run(cycles).await;
            return Ok(());
        }
        let driver = runtime.clone();
        let loop_task = tokio::spawn(async move { driver.run(None).await });
        tokio::signal::ctrl_c()
            .await
            .context("waiting for shutdown signal")?;
        tracing::info!("shutdown signal received");
        runtime.stop();
        loop_task.await.context("joining mapek loop")?;
        Ok::<(), anyhow::Error>(())
    })
}

fn once(path: &Path, metrics: bool) -> Result<()> {
    let config = MapekConfig::load(path)?;
    let rt = Runtime::new().context("starting tokio runtime")?;
    rt.block_on(async {
        let runtime = MapekRuntime::bootstrap(&config)?;
        let state = runtime.run_once().await.context("running mapek cycle")?;
        println!("{}", serde_json::to_string_pretty(&state)?);
        if metrics {
            print!("{}", runtime.render_metrics());
        }
        Ok::<(), anyhow::Error>(())
    })
}

fn check(path: &Path) -> Result<()> {
    let config = MapekConfig::load(path)?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
