use benchmq_lib::{bench::BenchmarkMode, config::Config};
use clap::Args;
use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
};

use super::{args::ClientArgs, runner};

#[derive(Debug, Clone, Args)]
/// connection benchmark
pub struct ConnCommand {
    #[clap(flatten)]
    client: ClientArgs,

    /// report json instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,
}

pub async fn exec(cfg: Config, guard: ShutdownGuard, args: ConnCommand) -> Result<(), BoxError> {
    let spec = super::args::spec_builder(&cfg, args.client, None)
        .build()
        .context("validate connection benchmark")?;

    runner::run(BenchmarkMode::Connections, spec, guard, args.json).await;
    Ok(())
}
