//! WWCP Node - simulated charging hierarchy
//!
//! Builds one roaming network with a single operator, drives random EVSE
//! status changes and pushes every change to a set of simulated roaming
//! receivers through the fan-out driver.
//!
//! # Usage
//!
//! ```bash
//! # Defaults: 2 stations with 2 EVSEs each, 20 ticks
//! wwcp-node
//!
//! # Custom layout and timing
//! wwcp-node --stations 4 --evses 3 --ticks 100 --interval-ms 50
//!
//! # Load history bounds and push settings from JSON
//! wwcp-node --config sync.json --log-level debug
//! ```

mod receivers;

use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use wwcp_core::{
    system_clock, AuthId, ChargingPool, ChargingPoolId, ChargingStation, ChargingStationId, ChargingStationOperator,
    ChargingStationOperatorId, Clock, EntityGroupId, Evse, EvseGroup, EvseId, EvseStatusType, EvseStatusUpdate, FanOut,
    HasStatusSchedule, Identifiable, PullFanOut, PushResult, RoamingNetwork, RoamingNetworkId, StatusUpdateQueue, SyncConfig,
    TransmissionType,
};

use receivers::{Behavior, SimulatedReceiver};

/// Simulated WWCP charging hierarchy with outbound status sync
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON configuration file (history bounds, push settings)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Roaming network identifier
    #[arg(long, default_value = "PROD")]
    network: String,

    /// Charging station operator identifier
    #[arg(long, default_value = "DE*GEF")]
    operator: String,

    /// Number of charging stations
    #[arg(long, default_value = "2")]
    stations: u32,

    /// EVSEs per charging station
    #[arg(long, default_value = "2")]
    evses: u32,

    /// Number of simulated status changes
    #[arg(long, default_value = "20")]
    ticks: u32,

    /// Delay between status changes
    #[arg(long, default_value = "200")]
    interval_ms: u64,

    /// Per-receiver deadline (overrides the config file)
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// Hand updates to receiver queues instead of waiting for them
    #[arg(long)]
    enqueue: bool,

    /// Seed for the status generator
    #[arg(long, default_value = "7")]
    seed: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Setup logging, RUST_LOG wins over --log-level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    // Build configuration
    let mut config = match &args.config {
        Some(path) => SyncConfig::load(path)?,
        None => SyncConfig::default(),
    };
    if let Some(ms) = args.timeout_ms {
        config = config.with_request_timeout(Duration::from_millis(ms));
    }
    if args.enqueue {
        config = config.with_transmission_type(TransmissionType::Enqueue);
    }

    // Print banner
    println!();
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║              WWCP Node - Charging Status Sync                ║");
    println!("╠══════════════════════════════════════════════════════════════╣");
    println!("║  Network:  {:<50} ║", args.network);
    println!("║  Operator: {:<50} ║", args.operator);
    println!("║  Layout:   {:<50} ║", format!("{} station(s) x {} EVSE(s)", args.stations, args.evses));
    println!("║  Timeout:  {:<50} ║", format!("{:?}", config.push.request_timeout));
    println!("║  Mode:     {:<50} ║", format!("{:?}", config.push.transmission_type));
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let clock = system_clock();
    let (network, operator) = build_hierarchy(&args, &config, &clock)?;
    let evses = network.evses();
    info!("Hierarchy ready: {} EVSE(s) below {}", evses.len(), network.id());

    let group: Arc<EvseGroup> = EvseGroup::evse_builder(EntityGroupId::new("ALL"), "All EVSEs", &operator)
        .with_history(config.schedule.group)
        .with_clock(clock.clone())
        .build()?;
    operator.add_evse_group(group.clone())?;
    group.on_status_changed(|update| info!("Group {}: {:?} -> {:?}", update.id, update.old.value, update.new.value));

    network.on_status_changed(|update| {
        info!("Network {}: {:?} -> {:?}", update.id, update.old.value, update.new.value)
    });

    // Simulated receivers
    let receivers: Vec<Arc<SimulatedReceiver>> = vec![
        Arc::new(SimulatedReceiver::new("hubject", Behavior::Accept { reject_rate: 0.05 })),
        Arc::new(SimulatedReceiver::new("ocpi-slow", Behavior::Slow(Duration::from_millis(50)))),
        Arc::new(SimulatedReceiver::new("ochp", Behavior::OutOfService).disabled()),
        Arc::new(SimulatedReceiver::new("gireve", Behavior::LockTimeout)),
        Arc::new(SimulatedReceiver::new("legacy", Behavior::Fail)),
    ];

    let mut fanout = FanOut::<EvseStatusUpdate>::new(&config.push);
    let mut pull = PullFanOut::<(EvseId, EvseStatusType)>::new(&config.push);
    for receiver in &receivers {
        fanout.register(receiver.clone());
        pull.register(receiver.clone());
    }
    info!("Registered receivers: {:?}", fanout.receiver_ids());

    let queue = StatusUpdateQueue::start(fanout, AuthId::new(args.operator.clone()), report);
    let watches = queue.watch_all(&evses);

    // Drive random status changes
    let mut rng = StdRng::seed_from_u64(args.seed);
    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    for tick in 0..args.ticks {
        ticker.tick().await;
        if evses.is_empty() {
            break;
        }
        let evse = &evses[rng.gen_range(0..evses.len())];
        let status = random_status(&mut rng);
        debug!("Tick {}: {} -> {:?}", tick, evse.id(), status);
        evse.set_status(status, None);
    }

    // Stop watching, then drain the queue
    for (evse, watch) in evses.iter().zip(watches) {
        evse.status_subscribers().unsubscribe(watch);
    }
    let batches = queue.shutdown().await;
    info!("Pushed {} batch(es)", batches);

    let pulled = pull.pull(AuthId::new(args.operator.clone())).await;
    info!(
        "Pulled remote view: {} ({} entries)",
        pulled.outcome(),
        pulled.data().len()
    );

    for receiver in &receivers {
        info!("{}: {} EVSE(s) known remotely", receiver.name(), receiver.accepted_count());
    }
    info!(
        "Final status: station(s) {:?}, network {:?}, group {:?}",
        operator
            .pools()
            .iter()
            .flat_map(|pool| pool.stations())
            .map(|station| station.status().value)
            .collect::<Vec<_>>(),
        network.status().value,
        group.status().value
    );

    Ok(())
}

/// Build network → operator → pool → stations → EVSEs
fn build_hierarchy(
    args: &Args,
    config: &SyncConfig,
    clock: &Arc<dyn Clock>,
) -> Result<(Arc<RoamingNetwork>, Arc<ChargingStationOperator>), Box<dyn std::error::Error>> {
    let history = config.schedule;

    let network = RoamingNetwork::new(RoamingNetworkId::new(&args.network), history.roaming_network, clock.clone())?;
    let operator = network.add_operator(ChargingStationOperator::new(
        ChargingStationOperatorId::new(&args.operator),
        history.operator,
        clock.clone(),
    )?)?;
    let pool = operator.add_pool(ChargingPool::new(
        ChargingPoolId::new(format!("{}*P1", args.operator)),
        history.charging_pool,
        clock.clone(),
    )?)?;

    for s in 1..=args.stations {
        let station = pool.add_station(ChargingStation::new(
            ChargingStationId::new(format!("{}*S{}", args.operator, s)),
            history.charging_station,
            clock.clone(),
        )?)?;
        for e in 1..=args.evses {
            station.add_evse(Evse::new(
                EvseId::new(format!("{}*E{}*{}", args.operator, s, e)),
                history.evse,
                clock.clone(),
            )?)?;
        }
    }

    Ok((network, operator))
}

fn random_status(rng: &mut StdRng) -> EvseStatusType {
    match rng.gen_range(0..10) {
        0..=3 => EvseStatusType::Available,
        4..=6 => EvseStatusType::Occupied,
        7 => EvseStatusType::Reserved,
        8 => EvseStatusType::Faulted,
        _ => EvseStatusType::Offline,
    }
}

/// Log the reconciled result of one pushed batch
fn report(result: PushResult<EvseStatusUpdate>) {
    if result.is_success_like() {
        info!("Push {}: {}", result.auth_id(), result.outcome());
    } else {
        warn!(
            "Push {}: {} ({} rejected){}",
            result.auth_id(),
            result.outcome(),
            result.rejected().len(),
            result
                .description()
                .map(|d| format!(": {}", d.replace('\n', "; ")))
                .unwrap_or_default()
        );
    }
    match serde_json::to_string(&result) {
        Ok(json) => debug!("Push result: {}", json),
        Err(e) => warn!("Push result not serializable: {}", e),
    }
}
