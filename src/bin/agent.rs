use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use channel_monitoring::{
    bridge::{
        Command as BridgeCommand, PubSubPorts, Requester, RequesterConfig, ResolvedAddress,
        ResponderHandle, SubscriberConfig, resolve, spawn_subscriber,
    },
    metrics::{MetricsSource, SysinfoCollector, ThresholdWatch, check_thresholds, format},
    store::{AgentSettings, SettingsStore},
};
use clap::{Parser, Subcommand};
use tracing::{error, info, level_filters::LevelFilter, trace};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

/// Time `status` waits for the local agent
const STATUS_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Parser)]
#[command(name = "channel-agent", version, about = "Server metrics agent of a chat channel")]
struct Args {
    /// Settings file, defaults to ~/.channel-monitor/agent.toml
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Debug, Clone, Subcommand)]
enum Cmd {
    /// Configure the agent for a channel
    Setup {
        #[arg(long)]
        channel_id: String,

        /// Subscribe to the hub instead of listening on the channel port
        #[arg(long)]
        pubsub: bool,

        /// Host of the hub (pub/sub only)
        #[arg(long)]
        coordinator_host: Option<String>,

        /// First port of the hub's pub/sub pair
        #[arg(long)]
        base_port: Option<u16>,

        /// Interface to listen on
        #[arg(long)]
        bind_host: Option<String>,

        /// CPU usage in percent above which the agent warns
        #[arg(long)]
        cpu_threshold: Option<f64>,

        /// Memory usage in percent above which the agent warns
        #[arg(long)]
        memory_threshold: Option<f64>,

        /// Disk usage in percent above which the agent warns, per mount
        #[arg(long)]
        disk_threshold: Option<f64>,
    },

    /// Serve metrics until interrupted
    Start,

    /// Check whether the local agent answers
    Status,

    /// Forget the configuration
    Reset,

    /// Print the local metrics once
    Metrics,
}

fn init() {
    dotenv::dotenv().ok();

    let filter = filter::Targets::new().with_targets(vec![
        ("channel_monitoring", LevelFilter::DEBUG),
        ("agent", LevelFilter::TRACE),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(true),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init();
    let args = Args::parse();
    trace!("started with args: {args:?}");

    let store = match args.settings {
        Some(path) => SettingsStore::new(path),
        None => SettingsStore::default_location()?,
    };

    match args.command {
        Cmd::Setup {
            channel_id,
            pubsub,
            coordinator_host,
            base_port,
            bind_host,
            cpu_threshold,
            memory_threshold,
            disk_threshold,
        } => {
            let mut settings = AgentSettings::new(channel_id);
            settings.pubsub = pubsub;
            if let Some(host) = coordinator_host {
                settings.coordinator_host = host;
            }
            if let Some(port) = base_port {
                settings.base_port = port;
            }
            if let Some(host) = bind_host {
                settings.bind_host = host;
            }
            if let Some(cpu) = cpu_threshold {
                settings.thresholds.cpu = cpu;
            }
            if let Some(memory) = memory_threshold {
                settings.thresholds.memory = memory;
            }
            if let Some(disk) = disk_threshold {
                settings.thresholds.disk = disk;
            }
            setup(&store, settings)
        }
        Cmd::Start => start(load(&store)?).await,
        Cmd::Status => status(load(&store)?).await,
        Cmd::Reset => {
            if store.clear()? {
                println!("Configuration removed");
            } else {
                println!("Nothing to reset");
            }
            Ok(())
        }
        Cmd::Metrics => {
            let settings = store.load()?;
            let collector = settings
                .as_ref()
                .map(|settings| SysinfoCollector::new(settings.metrics))
                .unwrap_or_default();
            let thresholds = settings.map(|settings| settings.thresholds).unwrap_or_default();

            let snapshot = collector.snapshot().await?;
            println!("{}", format(&snapshot));

            let alerts = check_thresholds(&snapshot, &thresholds);
            if !alerts.is_empty() {
                println!();
                for message in alerts.values() {
                    println!("⚠️ {message}");
                }
            }
            Ok(())
        }
    }
}

fn load(store: &SettingsStore) -> anyhow::Result<AgentSettings> {
    store.load()?.ok_or_else(|| {
        anyhow!(
            "agent is not set up, run `channel-agent setup --channel-id <id>` first ({} missing)",
            store.path().display()
        )
    })
}

fn setup(store: &SettingsStore, settings: AgentSettings) -> anyhow::Result<()> {
    if settings.channel_id.trim().is_empty() {
        return Err(anyhow!("channel id must not be empty"));
    }

    store.save(&settings)?;

    println!("Agent configured for channel {}", settings.channel_id);
    if settings.pubsub {
        println!(
            "Commands from {}:{}, replies to port {}",
            settings.coordinator_host,
            settings.base_port,
            settings.base_port.saturating_add(1)
        );
    } else {
        println!(
            "Listening on {}",
            ResolvedAddress::for_channel(&settings.bind_host, &settings.channel_id)
        );
    }
    println!("Run `channel-agent start` to begin serving metrics");
    Ok(())
}

async fn start(settings: AgentSettings) -> anyhow::Result<()> {
    let source: Arc<dyn MetricsSource> = Arc::new(ThresholdWatch::new(
        SysinfoCollector::new(settings.metrics),
        settings.thresholds,
    ));

    if settings.pubsub {
        let ports = PubSubPorts::from_base(settings.base_port)
            .with_context(|| format!("invalid base port {}", settings.base_port))?;
        let subscriber = spawn_subscriber(
            SubscriberConfig::new(&settings.channel_id, &settings.coordinator_host, ports),
            source,
        );
        info!(
            "subscribed to {}:{} as {}",
            settings.coordinator_host, ports.commands, settings.channel_id
        );

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("interrupted"),
            _ = subscriber.stopped() => error!("subscriber exited unexpectedly"),
        }
        subscriber.stop();
        subscriber.stopped().await;
        return Ok(());
    }

    let address = ResolvedAddress::for_channel(&settings.bind_host, &settings.channel_id);
    let responder = match ResponderHandle::spawn(address.clone(), source).await {
        Ok(responder) => responder,
        Err(e) if e.is_fatal() => {
            error!("{e}");
            return Err(e).with_context(|| {
                format!(
                    "cannot serve channel {}, is another agent already running on {address}?",
                    settings.channel_id
                )
            });
        }
        Err(e) => return Err(e.into()),
    };
    info!("serving channel {} on {}", settings.channel_id, responder.local_addr());

    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
        _ = responder.stopped() => error!("responder exited unexpectedly"),
    }
    responder.stop();
    responder.stopped().await;
    Ok(())
}

async fn status(settings: AgentSettings) -> anyhow::Result<()> {
    println!("Channel: {}", settings.channel_id);

    if settings.pubsub {
        println!(
            "Mode: pub/sub via {}:{}, liveness is only visible to the hub",
            settings.coordinator_host, settings.base_port
        );
        return Ok(());
    }

    let requester = Requester::new(RequesterConfig {
        timeout: STATUS_TIMEOUT,
        ..RequesterConfig::default()
    });
    println!("Port: {}", resolve(&settings.channel_id));

    if !requester.ping(&settings.channel_id).await {
        println!("Status: not running");
        requester.close().await;
        return Ok(());
    }

    println!("Status: running");
    match requester
        .request_formatted(&settings.channel_id, BridgeCommand::GetCpuUsage)
        .await
    {
        Ok(text) => println!("{text}"),
        Err(e) => println!("Could not read CPU usage: {e}"),
    }

    requester.close().await;
    Ok(())
}
