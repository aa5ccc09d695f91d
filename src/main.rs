use anyhow::{Context, Result};
use chrono::Local;
use clap::Parser;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use exo_gsac::config::{GsacConfig, FORCE_IP_ENV};
use exo_gsac::device::{MotorDevice, SimulatedBoot, SimulatedForcePlate};
use exo_gsac::{GsacError, Session, SessionOptions, TrialSpec};

/// Body weight the simulated force plates report, in newtons.
const SIM_BODY_WEIGHT_N: f64 = 700.0;

#[derive(Parser, Debug)]
#[command(name = "exo_bench")]
#[command(about = "Exoskeleton bench: activation windows, trial logs and subject prompts", long_about = None)]
struct Args {
    /// Subject id (letters, digits, '_' or '-')
    #[arg(long)]
    subject: String,

    /// Trial type (VAS, VICKREY, JND, PREF)
    #[arg(long = "trial-type")]
    trial_type: String,

    /// Condition (NAT, ZT, LOW, MED, HIGH)
    #[arg(long)]
    cond: String,

    /// Description (FAM, PRE, MAIN, POST)
    #[arg(long)]
    desc: String,

    /// Open the boots on their backup ports
    #[arg(long)]
    use_backup: bool,

    /// JSON config file; missing keys keep their defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds (0 = run until every round is recorded)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// No terminal HUD: log status lines and read responses from stdin
    #[arg(long)]
    no_hud: bool,
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("[{}] error: {:#}", ts_now(), e);
            ExitCode::FAILURE
        }
    }
}

fn config_error(e: &GsacError) -> ExitCode {
    eprintln!("[{}] {}: {}", ts_now(), e.kind(), e);
    ExitCode::from(2)
}

fn run(args: Args) -> Result<ExitCode> {
    let mut config = match &args.config {
        Some(path) => GsacConfig::load(path).with_context(|| format!("loading config {}", path.display()))?,
        None => GsacConfig::default(),
    };
    config.apply_force_ip(std::env::var(FORCE_IP_ENV).ok());

    // everything that can be wrong with the request fails here, before any device is touched
    let trial = match TrialSpec::parse(&args.subject, &args.trial_type, &args.cond, &args.desc) {
        Ok(trial) => trial,
        Err(e) => return Ok(config_error(&e)),
    };
    if let Err(e) = config.validate() {
        return Ok(config_error(&e));
    }

    let trial_dir = trial.ensure_trial_dir(&config.data_root)?;
    init_logging(!args.no_hud, &trial_dir)?;

    println!("[{}] exo bench starting", ts_now());
    println!(
        "  Trial: {} {} {} {}",
        trial.subject, trial.trial_type, trial.condition, trial.description
    );
    println!("  Output Dir: {}", trial_dir.display());
    println!("  Force plates: {}", config.force_plate.endpoint);
    println!("  Duration: {} seconds (0=until done)", args.duration);

    let boots: Vec<Box<dyn MotorDevice>> = config
        .boots
        .iter()
        .map(|b| Box::new(SimulatedBoot::new(b.side)) as Box<dyn MotorDevice>)
        .collect();
    let plate = Box::new(SimulatedForcePlate::new(SIM_BODY_WEIGHT_N));

    let options = SessionOptions {
        use_backup: args.use_backup,
        duration: (args.duration > 0).then(|| Duration::from_secs(args.duration)),
        hud: !args.no_hud,
        stdin_responses: args.no_hud,
    };

    match Session::new(config, trial, options).run(boots, plate) {
        Ok(report) => {
            println!("[{}] trial {} finished", ts_now(), report.stem);
            for r in &report.readers {
                println!(
                    "  {}: {} samples, {} windows, {} skipped reads, mean period {}",
                    r.side,
                    r.iterations,
                    r.log.starts(),
                    r.transient_errors,
                    r.mean_period
                        .map(|p| format!("{:.3} ms", p * 1000.0))
                        .unwrap_or_else(|| "n/a".into())
                );
            }
            for (device, rows, dropped) in &report.drain.devices {
                println!("  {}: {} rows logged, {} dropped", device, rows, dropped);
            }
            if let Some(responses) = &report.responses {
                println!(
                    "  {} round(s) recorded{}",
                    responses.rounds.len(),
                    if responses.complete { "" } else { " (incomplete)" }
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(failure) => {
            eprintln!("[{}] session failed: {}", ts_now(), failure.error);
            eprintln!("  kind: {}", failure.error.kind());
            eprintln!("  device: {}", failure.device.as_deref().unwrap_or("-"));
            eprintln!("  last snapshot version: {}", failure.last_version);
            Ok(ExitCode::FAILURE)
        }
    }
}

/// Log to stderr, or to `session.log` in the trial directory while the HUD owns the terminal.
fn init_logging(to_file: bool, trial_dir: &Path) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if to_file {
        let path = trial_dir.join("session.log");
        let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

fn ts_now() -> String {
    Local::now().format("%H:%M:%S").to_string()
}
