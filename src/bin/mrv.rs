//! Command-line front end for the conflict model, the adjustment simulation,
//! and a live contended workload.
#![forbid(unsafe_code)]

use std::error::Error;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use clap::{Args, Parser, Subcommand, ValueEnum};
use mrv::{
    config::MrvConfig,
    control::{
        simulate_adjustment, AdjustBounds, AdjustPolicy, Controller, Monitor, SimulationParams,
        TxStatusTracker,
    },
    model,
    storage::MrvStore,
    types::{LogicalKey, MrvError, Value},
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "mrv",
    version,
    about = "Multi-record value conflict model and controller tooling",
    disable_help_subcommand = true
)]
struct Cli {
    #[arg(
        long,
        global = true,
        value_enum,
        default_value_t = OutputFormat::Csv,
        help = "Output format for emitted rows"
    )]
    format: OutputFormat,

    #[arg(long, global = true, default_value_t = 42, help = "Seed for the random source")]
    seed: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Csv,
    Json,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Closed-form abort rate for every client and record count
    Formula,
    /// Monte Carlo abort rate for every client and record count
    Simulate {
        #[arg(long, default_value_t = 1000, help = "Trials per point")]
        trials: u32,
    },
    /// Time-overlap abort rate for one record count
    Overlap {
        #[arg(long, help = "Number of fragments")]
        records: u32,
        #[command(flatten)]
        load: LoadArgs,
        #[arg(long, default_value_t = 10, help = "Independent windows averaged")]
        runs: u32,
    },
    /// Replay the adjustment policies against the time-overlap model
    Adjust(AdjustCmd),
    /// Abort rate per record count, or the records needed for a target rate
    Provision(ProvisionCmd),
    /// Drive concurrent updates against a live store with the controller on
    Workload(WorkloadCmd),
}

#[derive(Args, Debug)]
struct LoadArgs {
    #[arg(long, default_value_t = 1000, help = "Transactions per second")]
    tx_s: u32,
    #[arg(long, default_value_t = 5, help = "Transaction duration (ms)")]
    tx_time: u32,
}

#[derive(Args, Debug)]
struct AdjustCmd {
    #[arg(long, help = "Single policy to run (default: all)")]
    policy: Option<AdjustPolicy>,
    #[command(flatten)]
    load: LoadArgs,
    #[arg(long, default_value_t = 1000, help = "Milliseconds between adjustments")]
    tick_ms: u32,
    #[arg(long, default_value_t = 1)]
    initial_records: usize,
    #[arg(long, default_value_t = 150, help = "Simulated seconds")]
    duration: u32,
    #[arg(long, default_value_t = 0.05)]
    ar_goal: f64,
    #[arg(long, default_value_t = 0.01)]
    ar_min: f64,
    #[arg(long, default_value_t = 1024)]
    max_records: usize,
}

#[derive(Args, Debug)]
struct ProvisionCmd {
    #[command(flatten)]
    load: LoadArgs,
    #[arg(long, help = "Report the records needed to reach this abort rate")]
    target: Option<f64>,
    #[arg(long, default_value_t = 300, help = "Largest record count considered")]
    max_records: u32,
}

#[derive(Args, Debug)]
struct WorkloadCmd {
    #[arg(long, value_name = "FILE", env = "MRV_CONFIG", help = "Configuration file")]
    config: Option<PathBuf>,
    #[arg(long, default_value_t = 1)]
    keys: u64,
    #[arg(long, default_value_t = 8)]
    threads: u64,
    #[arg(long, default_value_t = 3)]
    seconds: u64,
    #[arg(long, default_value_t = 1_000_000, help = "Initial value of every key")]
    initial: Value,
    #[arg(long, default_value_t = 1, help = "Initial fragments per key")]
    fragments: usize,
}

#[derive(Serialize)]
struct AdjustRow {
    policy: AdjustPolicy,
    t: u32,
    records: usize,
    ar: f64,
}

#[derive(Serialize)]
struct RateRow {
    records: u32,
    ar: f64,
}

#[derive(Serialize)]
struct TargetRow {
    tx_s: u32,
    target: f64,
    records: Option<u32>,
}

fn main() {
    init_tracing();
    if let Err(err) = run() {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

fn init_tracing() {
    static INIT: OnceLock<()> = OnceLock::new();
    INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(io::stderr)
            .with_ansi(false)
            .try_init();
    });
}

fn run() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    let mut rng = ChaCha8Rng::seed_from_u64(cli.seed);
    match cli.command {
        Command::Formula => emit(cli.format, model::formula_sweep())?,
        Command::Simulate { trials } => emit(cli.format, model::simulation_sweep(trials, &mut rng))?,
        Command::Overlap { records, load, runs } => {
            let ar = model::overlap_abort_rate(records, load.tx_s, load.tx_time, runs, &mut rng);
            emit(cli.format, [RateRow { records, ar }])?;
        }
        Command::Adjust(cmd) => emit(cli.format, run_adjust(&cmd, &mut rng))?,
        Command::Provision(cmd) => match cmd.target {
            Some(target) => {
                let records = model::records_to_reach(
                    target,
                    cmd.load.tx_s,
                    cmd.load.tx_time,
                    cmd.max_records,
                    &mut rng,
                );
                emit(
                    cli.format,
                    [TargetRow {
                        tx_s: cmd.load.tx_s,
                        target,
                        records,
                    }],
                )?;
            }
            None => {
                let rows = model::ar_per_records(
                    1..=cmd.max_records,
                    cmd.load.tx_s,
                    cmd.load.tx_time,
                    &mut rng,
                )
                .into_iter()
                .map(|(records, ar)| RateRow { records, ar });
                emit(cli.format, rows)?;
            }
        },
        Command::Workload(cmd) => run_workload(&cmd, cli.format, cli.seed)?,
    }
    Ok(())
}

fn run_adjust(cmd: &AdjustCmd, rng: &mut ChaCha8Rng) -> Vec<AdjustRow> {
    let params = SimulationParams {
        tick_ms: cmd.tick_ms,
        tx_s: cmd.load.tx_s,
        tx_time: cmd.load.tx_time,
        initial_records: cmd.initial_records,
        duration_s: cmd.duration,
        bounds: AdjustBounds {
            min_records: 1,
            max_records: cmd.max_records,
            ar_goal: cmd.ar_goal,
            ar_min: cmd.ar_min,
        },
    };
    let policies = match cmd.policy {
        Some(policy) => vec![policy],
        None => AdjustPolicy::ALL.to_vec(),
    };
    let mut rows = Vec::new();
    for policy in policies {
        rows.extend(
            simulate_adjustment(policy, &params, rng)
                .into_iter()
                .map(|step| AdjustRow {
                    policy,
                    t: step.t,
                    records: step.records,
                    ar: step.ar,
                }),
        );
    }
    rows
}

fn run_workload(cmd: &WorkloadCmd, format: OutputFormat, seed: u64) -> Result<(), Box<dyn Error>> {
    if cmd.keys == 0 || cmd.threads == 0 {
        return Err("workload needs at least one key and one thread".into());
    }
    let config = MrvConfig::load(cmd.config.clone())?;
    let tracker = Arc::new(TxStatusTracker::new());
    let store = Arc::new(MrvStore::open(
        config.store_options().metrics(tracker.clone()),
    )?);
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    for id in 0..cmd.keys {
        store.create(&LogicalKey::from(id), cmd.initial, cmd.fragments, &mut rng)?;
    }

    let mut controller_cfg = config.controller().clone();
    controller_cfg.max_records = controller_cfg
        .max_records
        .min(usize::from(store.options().max_nodes));
    let controller = Controller::new(store.clone(), tracker.clone(), controller_cfg)?;
    for key in store.keys() {
        controller.spawn(&key)?;
    }
    let monitor = Monitor::start(store.clone(), tracker.clone(), config.monitor());

    let deadline = Instant::now() + Duration::from_secs(cmd.seconds);
    thread::scope(|scope| {
        for worker in 0..cmd.threads {
            let store = &store;
            scope.spawn(move || {
                let mut rng = ChaCha8Rng::seed_from_u64(seed.wrapping_add(worker + 1));
                while Instant::now() < deadline {
                    let key = LogicalKey::from(rng.gen_range(0..cmd.keys));
                    let delta = if rng.gen_bool(0.5) { 1 } else { -1 };
                    match store.update(&key, delta, &mut rng) {
                        Ok(()) | Err(MrvError::Conflict { .. }) => {}
                        Err(MrvError::InsufficientValue { .. }) => {}
                        Err(err) => warn!(%key, error = %err, "mrv.workload.update_failed"),
                    }
                }
            });
        }
    });

    controller.shutdown();
    let report = monitor.stop();
    for key in store.keys() {
        let stats = store.stats(&key)?;
        info!(
            %key,
            fragments = stats.fragments,
            total = stats.total,
            variation = stats.variation,
            zeros = stats.zeros,
            "mrv.workload.done"
        );
    }
    emit(format, report.nodes)
}

fn emit<T, I>(format: OutputFormat, rows: I) -> Result<(), Box<dyn Error>>
where
    T: Serialize,
    I: IntoIterator<Item = T>,
{
    let stdout = io::stdout();
    match format {
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(stdout.lock());
            for row in rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        OutputFormat::Json => {
            let mut out = stdout.lock();
            for row in rows {
                serde_json::to_writer(&mut out, &row)?;
                out.write_all(b"\n")?;
            }
            out.flush()?;
        }
    }
    Ok(())
}
