use benchmq_lib::{bench::BenchmarkMode, config::Config};
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
/// publish benchmark
pub struct PubCommand {
    #[clap(flatten)]
    client: ClientArgs,

    #[clap(flatten)]
    topic: TopicArgs,

    /// message payload [default: "Hello, World!"]
    #[arg(long, short = 'm')]
    message: Option<String>,

    /// publish as retained message
    #[arg(long, short = 'r', default_value_t = false)]
    retain: bool,

    /// report json instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    json: bool,
}

pub async fn exec(cfg: Config, guard: ShutdownGuard, args: PubCommand) -> Result<(), BoxError> {
    let mut builder = super::args::spec_builder(&cfg, args.client, Some(args.topic));
    if let Some(message) = args.message {
        tracing::info!("property 'message': use cli flag ({} bytes)", message.len());
        builder = builder.with_message(message);
    }
    let spec = builder
        .with_retained(args.retain)
        .build()
        .context("validate publish benchmark")?;

    runner::run(BenchmarkMode::Publish, spec, guard, args.json).await;
    Ok(())
}
