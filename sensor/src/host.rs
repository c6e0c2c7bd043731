use std::{path::PathBuf, time::Duration};

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use trailcounter_common::{
    sim::{SimBehavior, SimGauge, SimModem, SimMotion, SimPowerKey},
    Board, CellularModem, CounterConfig, CycleOutcome, DeviceIdentity, PersistentCounters,
    RetainedCounters, SleepPlan, StdClock, WakeCause, WakeCycle,
};

const SIMULATED_MAC: [u8; 6] = [0x02, 0x00, 0x5e, 0x10, 0x00, 0x01];
const SIMULATED_VCELL_RAW: u16 = 50_000;
const DEFAULT_RETAINED_PATH: &str = "trailcounter-retained.json";

struct RetainedStore {
    path: PathBuf,
}

impl RetainedStore {
    fn load_counters(&self) -> PersistentCounters {
        let retained = match std::fs::read_to_string(&self.path) {
            Ok(json) => serde_json::from_str::<RetainedCounters>(&json).unwrap_or_else(|err| {
                warn!("discarding unreadable retained snapshot: {err}");
                RetainedCounters::EMPTY
            }),
            Err(_) => RetainedCounters::EMPTY,
        };
        retained.load()
    }

    fn save_counters(&self, counters: PersistentCounters) -> anyhow::Result<()> {
        let payload = serde_json::to_string(&RetainedCounters::seal(counters))?;
        std::fs::write(&self.path, payload)
            .with_context(|| format!("failed to write {}", self.path.display()))
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = load_config()?;
    let store = RetainedStore {
        path: std::env::var("TRAILCOUNTER_RETAINED")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_RETAINED_PATH)),
    };
    let identity = DeviceIdentity::from_mac(SIMULATED_MAC);

    info!("counter simulator {identity} started; press Enter to simulate motion");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut cause = WakeCause::PowerOnOrOther;

    loop {
        let snapshot = store.load_counters();
        let outcome = activate(config.clone(), identity.clone(), snapshot, cause).await?;
        store.save_counters(outcome.counters)?;

        cause = tokio::select! {
            line = lines.next_line() => match line.context("failed to read stdin")? {
                Some(_) => WakeCause::MotionTriggered,
                None => {
                    info!("stdin closed; stopping simulator");
                    return Ok(());
                }
            },
            _ = sleep_until_timer(outcome.plan) => WakeCause::TimerExpired,
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted; stopping simulator");
                return Ok(());
            }
        };
    }
}

fn load_config() -> anyhow::Result<CounterConfig> {
    let Ok(path) = std::env::var("TRAILCOUNTER_CONFIG") else {
        return Ok(CounterConfig::default());
    };

    let json =
        std::fs::read_to_string(&path).with_context(|| format!("failed to read config {path}"))?;
    CounterConfig::from_json(&json).with_context(|| format!("invalid config {path}"))
}

async fn sleep_until_timer(plan: SleepPlan) {
    match plan.timer_s {
        Some(secs) => tokio::time::sleep(Duration::from_secs(secs)).await,
        None => std::future::pending::<()>().await,
    }
}

async fn activate(
    config: CounterConfig,
    identity: DeviceIdentity,
    snapshot: PersistentCounters,
    cause: WakeCause,
) -> anyhow::Result<CycleOutcome> {
    info!("wake: {cause:?}, retained total={} batch={}", snapshot.total, snapshot.batch);

    tokio::task::spawn_blocking(move || {
        let modem = CellularModem::new(
            SimModem::new(SimBehavior::default()),
            SimPowerKey::default(),
            StdClock::new(),
            config.modem.clone(),
            config.registration.clone(),
        );
        let mut board = Board::new(
            modem,
            SimGauge::reading(SIMULATED_VCELL_RAW),
            SimMotion::default(),
        );

        let outcome =
            WakeCycle::new(&config.cycle, &identity).transition(snapshot, cause, &mut board);

        for transaction in board.modem().engine().transcript() {
            debug!(
                "{} -> {:?} ({} bytes)",
                transaction.command,
                transaction.outcome,
                transaction.response.len()
            );
        }
        outcome
    })
    .await
    .context("wake cycle task failed")
}
