use benchmq_lib::{
    bench::{BenchmarkMode, listen_window},
    config::Config,
};
use clap::Args;
use rama::{
    error::{BoxError, ErrorContext as _},
    graceful::ShutdownGuard,
    telemetry::tracing,
};

use super::{
    args::{ClientArgs, TopicArgs},
    runner,
};

#[derive(Debug, Clone, Args)]
/// subscribe benchmark
pub struct SubCommand {
    #[clap(flatten)]
    client: ClientArgs,

    #[clap(flatten)]
    topic: TopicArgs,

    /// report json instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,
}

pub async fn exec(cfg: Config, guard: ShutdownGuard, args: SubCommand) -> Result<(), BoxError> {
    let spec = super::args::spec_builder(&cfg, args.client, Some(args.topic))
        .build()
        .context("validate subscribe benchmark")?;

    tracing::info!(
        window = ?listen_window(spec.delay(), spec.message_count()),
        "every subscriber listens for the duration of the window",
    );

    runner::run(BenchmarkMode::Subscribe, spec, guard, args.json).await;
    Ok(())
}
