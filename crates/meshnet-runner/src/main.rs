//! MeshNet base station.
//!
//! ```text
//! meshnet --link 192.168.1.20:2000 --link 192.168.1.21:2000 --rediscover-secs 300
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use meshnet_base::{CancelToken, DeviceRegistry, DiscoveryError, NetworkConfig, NetworkController};
use meshnet_runner::report::{format_devices, format_tree};
use meshnet_runner::tcp_link::connect_link;
use meshnet_runner::RunnerError;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "meshnet", version, about = "MeshNet base station")]
struct Args {
    /// Network configuration (YAML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Serial-over-TCP bridge, `host:port`. Repeat for more links.
    #[arg(short, long = "link", required = true)]
    links: Vec<String>,

    /// Our link address on every link (random per link if omitted).
    #[arg(long)]
    link_addr: Option<u8>,

    /// Seconds between discovery rounds; 0 runs a single round.
    #[arg(long, default_value_t = 0)]
    rediscover_secs: u64,

    /// Ask every addressed node that has not identified to do so.
    #[arg(long)]
    identify: bool,

    /// Serve Prometheus metrics on this address.
    #[cfg(feature = "prometheus")]
    #[arg(long)]
    metrics_addr: Option<std::net::SocketAddr>,
}

fn main() {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    if let Err(e) = run(args) {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<(), RunnerError> {
    let config = match &args.config {
        Some(path) => NetworkConfig::load(path)?,
        None => NetworkConfig::default(),
    };

    #[cfg(feature = "prometheus")]
    if let Some(addr) = args.metrics_addr {
        meshnet_metrics::install_prometheus(addr)
            .map_err(|e| RunnerError::Metrics(e.to_string()))?;
        info!("Serving metrics on {}", addr);
    }

    let shutdown = CancelToken::new();
    let handler_token = shutdown.clone();
    ctrlc::set_handler(move || handler_token.cancel())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(RunnerError::Runtime)?;
    runtime.block_on(serve(args, config, shutdown))
}

async fn serve(args: Args, config: NetworkConfig, shutdown: CancelToken) -> Result<(), RunnerError> {
    meshnet_metrics::describe_metrics();
    let registry = Arc::new(DeviceRegistry::new());
    let controller = NetworkController::new(config, registry.clone());

    let mut links = Vec::with_capacity(args.links.len());
    for addr in &args.links {
        let link = connect_link(&controller, addr.as_str(), args.link_addr)
            .await
            .map_err(|source| RunnerError::Link {
                addr: addr.clone(),
                source,
            })?;
        links.push(link);
    }

    loop {
        match controller.run_discovery(shutdown.clone()).await {
            Ok(report) => {
                info!(
                    "Active tree: {} nodes, {} assigned after {} assign rounds",
                    report.addressed, report.assigned, report.assign_rounds
                );
                let summary = controller.active_summary();
                for line in format_tree(&summary).lines() {
                    info!("  {}", line);
                }
                if args.identify {
                    let sent = controller.request_identify();
                    info!("Sent {} identify requests", sent);
                }
            }
            Err(DiscoveryError::Cancelled) => break,
            Err(e @ DiscoveryError::Topology(_)) => warn!("Discarded discovery round: {}", e),
            Err(e) => return Err(e.into()),
        }

        for link in links.iter().filter(|link| link.is_closed()) {
            warn!("{} ({}) is closed", link.link_id, link.peer);
        }

        if args.rediscover_secs == 0 {
            shutdown.cancelled().await;
            break;
        }
        if shutdown
            .sleep(Duration::from_secs(args.rediscover_secs))
            .await
            .is_err()
        {
            break;
        }
    }

    for line in format_devices(&registry.devices()).lines() {
        info!("{}", line);
    }
    for link in &links {
        link.abort();
    }
    info!("Shutting down");
    Ok(())
}
