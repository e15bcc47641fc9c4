use clap::{Parser, ValueEnum};
use log::{error, info, warn};
use pinclaim_agent::claim::PinClaim;
use pinclaim_agent::config::{Config, load_dotenv};
use pinclaim_agent::delivery::{
    HookDelivery, JobSubmitter, KubernetesJobSubmitter, RecordingHookDelivery,
    RecordingJobSubmitter, ReqwestHookDelivery,
};
use pinclaim_agent::error::Result;
use pinclaim_agent::monitor::{MonitorDeps, MonitorRegistry};
use pinclaim_agent::pin::{PinProvider, SimulatedPinProvider, SysfsPinProvider, run_square_wave};
use pinclaim_agent::repository::{
    ClaimRepository, FileClaimRepository, MemoryClaimRepository, load_claims,
};
use pinclaim_agent::shutdown::ShutdownSignal;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum PinBackend {
    /// Linux sysfs GPIO and IIO ADC channels
    Sysfs,
    /// In-memory pins, for running without hardware
    Simulated,
}

#[derive(Parser)]
#[command(name = "pinclaim-agent")]
#[command(about = "Watches pin claims and fires their triggers, reports and outputs")]
struct Args {
    /// JSON file holding the claims (an array, or an object with `items`)
    #[arg(long, env = "PINCLAIM_CLAIMS")]
    claims: PathBuf,

    /// Where claim status is persisted (overrides PINCLAIM_STATUS_FILE)
    #[arg(long)]
    status_file: Option<PathBuf>,

    /// Pin backend
    #[arg(long, value_enum, default_value_t = PinBackend::Sysfs)]
    pins: PinBackend,

    /// Sampling period for input pins (overrides PINCLAIM_SAMPLE_INTERVAL_MS)
    #[arg(long)]
    sample_interval_ms: Option<u64>,

    /// Toggle every simulated input pin with this period
    #[arg(long)]
    simulate_period_secs: Option<u64>,

    /// Log deliveries instead of sending them; status stays in memory
    #[arg(long)]
    dry_run: bool,

    /// Re-read the claims file this often and reconcile (0 disables)
    #[arg(long, default_value_t = 0)]
    reload_secs: u64,
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn main() {
    // Before the runtime exists, so setting env vars is still sound
    load_dotenv();
    init_logger();
    let args = Args::parse();

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to start async runtime: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = runtime.block_on(run(args)) {
        error!("{}", e);
        std::process::exit(1);
    }
}

/// Square-wave drivers for simulated input pins, keyed by pin.
struct Simulation {
    provider: Arc<SimulatedPinProvider>,
    high: f64,
    period: Duration,
    drivers: HashMap<String, JoinHandle<()>>,
}

impl Simulation {
    fn drive(&mut self, claims: &[PinClaim]) {
        for claim in claims.iter().filter(|c| c.spec.mode.is_input()) {
            if self.drivers.contains_key(&claim.spec.pin) {
                continue;
            }
            let pin = self.provider.pin(&claim.spec.pin);
            info!("[Sim] Driving pin {} with a {:?} square wave", claim.spec.pin, self.period);
            let driver = run_square_wave(pin, self.high, self.period);
            self.drivers.insert(claim.spec.pin.clone(), driver);
        }
    }

    fn stop(self) {
        for driver in self.drivers.into_values() {
            driver.abort();
        }
    }
}

async fn run(args: Args) -> Result<()> {
    info!("Starting pinclaim-agent");

    let mut config = Config::from_env();
    if let Some(path) = args.status_file {
        config.status_file = path;
    }
    if let Some(ms) = args.sample_interval_ms.filter(|ms| *ms > 0) {
        config.sampling.interval_ms = ms;
    }
    info!("Configuration loaded:");
    info!("  Claims file: {:?}", args.claims);
    info!("  Pins: {:?}", args.pins);
    info!("  Sample interval: {} ms", config.sampling.interval_ms);
    info!("  Logic high: {} V", config.sampling.logic_high_volts);
    info!("  Job namespace: {}", config.jobs.namespace);

    let (hooks, jobs, repository): (Arc<dyn HookDelivery>, Arc<dyn JobSubmitter>, Arc<dyn ClaimRepository>) =
        if args.dry_run {
            info!("  Dry run: deliveries are logged, status is not persisted");
            (
                Arc::new(RecordingHookDelivery::new()),
                Arc::new(RecordingJobSubmitter::new(config.jobs.namespace.clone())),
                Arc::new(MemoryClaimRepository::new()),
            )
        } else {
            info!("  Status file: {:?}", config.status_file);
            info!("  Kubernetes API: {}", config.jobs.api_base);
            (
                Arc::new(ReqwestHookDelivery::new(config.hook_timeout())?),
                Arc::new(KubernetesJobSubmitter::in_cluster(
                    &config.jobs.api_base,
                    &config.jobs.namespace,
                    config.hook_timeout(),
                )?),
                Arc::new(FileClaimRepository::open(&config.status_file).await?),
            )
        };

    let logic_high = config.sampling.logic_high_volts;
    let mut simulation = None;
    let provider: Arc<dyn PinProvider> = match args.pins {
        PinBackend::Sysfs => Arc::new(SysfsPinProvider::new(logic_high)),
        PinBackend::Simulated => {
            let provider = Arc::new(SimulatedPinProvider::new());
            if let Some(secs) = args.simulate_period_secs.filter(|s| *s > 0) {
                simulation = Some(Simulation {
                    provider: provider.clone(),
                    high: logic_high,
                    period: Duration::from_secs(secs),
                    drivers: HashMap::new(),
                });
            }
            provider
        }
    };

    let deps = MonitorDeps {
        hooks,
        jobs,
        repository,
        settings: config.monitor_settings(),
    };
    let mut registry = MonitorRegistry::new(provider, deps);

    let mut shutdown = ShutdownSignal::install()?;

    let claims = load_claims(&args.claims)?;
    if let Some(simulation) = simulation.as_mut() {
        simulation.drive(&claims);
    }
    let report = registry.sync(claims).await;
    for (id, reason) in &report.failed {
        warn!("Claim {} not running: {}", id, reason);
    }

    info!("pinclaim-agent is running with {} monitor(s)", registry.len());
    info!("  - Press Ctrl+C or send SIGTERM to exit");

    let mut reload = (args.reload_secs > 0).then(|| {
        let mut ticker = tokio::time::interval(Duration::from_secs(args.reload_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.reset();
        ticker
    });

    loop {
        tokio::select! {
            result = shutdown.recv() => {
                match result {
                    Ok(name) => info!("Received {}, shutting down", name),
                    Err(e) => error!("Failed to listen for shutdown signal: {}", e),
                }
                break;
            }
            _ = async {
                match reload.as_mut() {
                    Some(ticker) => { ticker.tick().await; }
                    None => std::future::pending::<()>().await,
                }
            } => {
                match load_claims(&args.claims) {
                    Ok(claims) => {
                        if let Some(simulation) = simulation.as_mut() {
                            simulation.drive(&claims);
                        }
                        registry.sync(claims).await;
                    }
                    Err(e) => warn!("Keeping current claims; reload failed: {}", e),
                }
            }
        }
    }

    registry.stop_all().await;
    if let Some(simulation) = simulation {
        simulation.stop();
    }
    info!("pinclaim-agent stopped");
    Ok(())
}
