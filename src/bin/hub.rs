use std::sync::Arc;

use channel_monitoring::{
    api::{ApiState, spawn_api_server},
    config::{Config, read_config_file},
    coordinator::Coordinator,
    notifier::TelexNotifier,
};
use clap::Parser;
use tracing::{info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file
    #[arg(short)]
    file: Option<String>,
}

fn init() {
    let filter = filter::Targets::new().with_targets(vec![
        ("channel_monitoring", LevelFilter::TRACE),
        ("hub", LevelFilter::TRACE),
        ("tower_http", LevelFilter::DEBUG),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(file) => read_config_file(file)?,
        None => Config::default(),
    }
    .with_env_overrides();

    let notifier = Arc::new(TelexNotifier::new(config.telex.clone()));
    let coordinator = Coordinator::start(&config, notifier).await?;

    let state = ApiState::new(
        coordinator.clone(),
        config.api.public_url.clone(),
        config.telex.app_name.clone(),
    );
    spawn_api_server(config.api.bind, state).await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    coordinator.shutdown().await;

    Ok(())
}
