//! svxlogd - SvxLink log capture daemon
//!
//! Captures the SvxLink journal into daily files under the output directory,
//! compresses finished days and keeps a bounded number of archives.

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use svx_logs::Controller;
use svxlogd::config::{ConfigOverrides, DaemonConfig, DEFAULT_CONFIG_PATH};
use svxlogd::DEFAULT_LOG_FILTER;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "svxlogd")]
#[command(about = "SvxLink log capture daemon")]
#[command(version)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    #[command(flatten)]
    run: RunArgs,

    /// Emit diagnostics as JSON
    #[arg(long, global = true)]
    log_json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the capture daemon (default)
    Run(RunArgs),

    /// Write a sample config file
    InitConfig {
        /// Path to write config
        #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
        output: PathBuf,
    },

    /// Load and validate the config, then print the effective settings
    CheckConfig(RunArgs),
}

#[derive(Args, Clone)]
struct RunArgs {
    /// Path to config file
    #[arg(short, long, env = "SVXLOGD_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Output directory for day files
    #[arg(long)]
    dir: Option<PathBuf>,

    /// File name prefix of day files
    #[arg(long)]
    prefix: Option<String>,

    /// Flush interval in seconds
    #[arg(long = "flush", value_name = "SECS")]
    flush_interval_secs: Option<u64>,

    /// Compress finished days (true/false)
    #[arg(long, value_name = "BOOL")]
    compress: Option<bool>,

    /// Archives to keep (0 or less keeps all)
    #[arg(long, allow_negative_numbers = true)]
    keep: Option<i64>,

    /// systemd unit to follow
    #[arg(long)]
    unit: Option<String>,

    /// Seconds to wait before restarting the source
    #[arg(long = "restart-wait", value_name = "SECS")]
    restart_wait_secs: Option<u64>,
}

impl RunArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            dir: self.dir.clone(),
            prefix: self.prefix.clone(),
            flush_interval_secs: self.flush_interval_secs,
            compress: self.compress,
            keep: self.keep,
            unit: self.unit.clone(),
            restart_wait_secs: self.restart_wait_secs,
        }
    }

    fn load(&self) -> anyhow::Result<DaemonConfig> {
        let mut config = DaemonConfig::load(&self.config)?;
        config.apply(&self.overrides());
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        None => run_daemon(cli.run).await?,
        Some(Commands::Run(args)) => run_daemon(args).await?,
        Some(Commands::InitConfig { output }) => init_config(output)?,
        Some(Commands::CheckConfig(args)) => check_config(&args)?,
    }

    Ok(())
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(DEFAULT_LOG_FILTER)?,
    };

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

async fn run_daemon(args: RunArgs) -> anyhow::Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %args.config.display(),
        "starting svxlogd"
    );

    let config = args.load()?;
    let source = config.build_source();
    info!(
        dir = %config.dir.display(),
        prefix = %config.prefix,
        extension = %config.extension,
        flush_secs = config.flush_interval_secs,
        compress = config.compress,
        keep = config.keep,
        source = %source.describe(),
        restart_wait_secs = config.restart_wait_secs,
        kill_grace_ms = config.kill_grace_ms,
        events = ?config.events.kind,
        "loaded config"
    );

    std::fs::create_dir_all(&config.dir)
        .with_context(|| format!("failed to create output directory {}", config.dir.display()))?;

    let controller = Controller::new(config.controller_config())
        .with_classifier(config.build_classifier()?)
        .with_sink(config.build_sink()?);

    if let Err(e) = controller.run(source, shutdown_signal()).await {
        error!(error = %e, "final flush failed");
        return Err(e.into());
    }

    info!("svxlogd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for interrupt");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = interrupt => info!("received interrupt"),
        () = terminate => info!("received terminate signal"),
    }
}

fn init_config(output: PathBuf) -> anyhow::Result<()> {
    let config = DaemonConfig::default();
    config.save(&output)?;

    println!("Config written to {}", output.display());
    println!();
    println!("Edit the file to adjust the unit and output directory, then run:");
    println!("  svxlogd run --config {}", output.display());

    Ok(())
}

fn check_config(args: &RunArgs) -> anyhow::Result<()> {
    let config = args.load()?;
    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}
