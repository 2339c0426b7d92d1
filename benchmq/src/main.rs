use std::{
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use rama::{
    error::{BoxError, ErrorContext as _},
    graceful,
    telemetry::tracing,
};

use benchmq_lib::{config::Config, utils};
use clap::{Parser, Subcommand};

pub mod cmd;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// CLI arguments for configuring benchmq behavior.
#[derive(Debug, Clone, Parser)]
#[command(name = "benchmq")]
#[command(bin_name = "benchmq")]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    cmds: CliCommands,

    /// debug logging as default instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false, global = true)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false, global = true)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o', global = true)]
    pub output: Option<PathBuf>,

    /// yaml config file (defaults to $BENCHMQ_CONFIG, or else ./config.yml)
    #[arg(long, value_name = "FILE", global = true)]
    pub config: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0., global = true)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,

    #[cfg(target_family = "unix")]
    /// Set the limit of max open file descriptors for this process and its children.
    #[arg(long, value_name = "N", default_value_t = 262_144, global = true)]
    pub ulimit: utils::os::rlim_t,
}

#[derive(Debug, Clone, Subcommand)]
enum CliCommands {
    /// connection benchmark: connect (and disconnect) every client once
    Conn(self::cmd::conn::ConnCommand),
    /// publish benchmark: every client publishes a fixed amount of messages
    Pub(self::cmd::publish::PubCommand),
    /// subscribe benchmark: every client subscribes and counts received messages
    Sub(self::cmd::subscribe::SubCommand),
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig {
        verbose: args.verbose,
        pretty: args.pretty,
        output: args.output.as_deref(),
    })?;

    tracing::info!("{} starting", utils::env::tool_identifier());

    #[cfg(target_family = "unix")]
    utils::os::raise_nofile(args.ulimit).context("set file descriptor limit")?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// run a benchmq cmd with the given args
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let config_path = args.config.unwrap_or_else(utils::env::config_path);
    let config = Config::load(&config_path)
        .await
        .with_context(|| format!("load config file '{}'", config_path.display()))?;
    tracing::info!(
        name = %config.name,
        version = %config.version,
        environment = %config.environment,
        "config ready",
    );

    let (error_tx, error_rx) = tokio::sync::oneshot::channel::<BoxError>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(error_rx, base_shutdown_signal));

    let failed = Arc::new(AtomicBool::new(false));
    graceful.spawn_task_fn({
        let failed = failed.clone();
        async move |guard| {
            let result = match args.cmds {
                CliCommands::Conn(conn_args) => {
                    self::cmd::conn::exec(config, guard, conn_args).await
                }
                CliCommands::Pub(pub_args) => {
                    self::cmd::publish::exec(config, guard, pub_args).await
                }
                CliCommands::Sub(sub_args) => {
                    self::cmd::subscribe::exec(config, guard, sub_args).await
                }
            };
            if let Err(err) = result {
                failed.store(true, Ordering::Release);
                let _ = error_tx.send(err);
            }
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");

    if failed.load(Ordering::Acquire) {
        return Err(BoxError::from("benchmark command failed"));
    }
    Ok(())
}

fn new_shutdown_signal(
    error_rx: tokio::sync::oneshot::Receiver<BoxError>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            result = error_rx => {
                match result {
                    Ok(err) => {
                        tracing::error!("fatal err received: {err}; abort");
                    },
                    Err(_) => {
                        tracing::debug!("command is finished without error, return control");
                    },
                }
            }
        }
    }
}
