use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use exo_gsac::config::DetectorConfig;
use exo_gsac::trial_log::{read_trial_log, write_activations};
use exo_gsac::{ActivationDetector, Channel};

/// Re-run activation detection over a recorded trial log with other settings.
#[derive(Parser, Debug)]
#[command(name = "replay")]
struct Args {
    /// Trial log CSV (<stem>_<side>.csv)
    #[arg(long)]
    log: PathBuf,

    /// z-score threshold
    #[arg(long, default_value = "2.0")]
    z_threshold: f64,

    /// Quiet samples that close a window
    #[arg(long, default_value = "10")]
    run_length: u32,

    /// Wait for one quiet stretch before the first window
    #[arg(long, default_value_t = false)]
    require_prior_quiet: bool,

    /// Channel scored by the detector
    #[arg(long, default_value = "accelz")]
    channel: String,

    /// Write the replayed windows here
    #[arg(long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let channel = Channel::from_name(&args.channel)
        .with_context(|| format!("unknown channel '{}'", args.channel))?;
    let rows = read_trial_log(&args.log).with_context(|| format!("reading {}", args.log.display()))?;

    let mut detector = ActivationDetector::new(&DetectorConfig {
        z_threshold: args.z_threshold,
        run_length: args.run_length,
        require_prior_quiet: args.require_prior_quiet,
        channel,
    });
    for row in &rows {
        detector.update(row.values[channel.index()], row.time_s);
    }
    let log = detector.take_log();

    let recorded_active = rows.iter().filter(|r| r.active).count();
    let replay_active = log.status.iter().filter(|a| **a).count();
    let disagreements = rows
        .iter()
        .zip(&log.status)
        .filter(|(r, a)| r.active != **a)
        .count();

    println!("Replayed {} samples from {}", rows.len(), args.log.display());
    println!(
        "  Z={} R={} require_prior_quiet={} channel={}",
        args.z_threshold, args.run_length, args.require_prior_quiet, channel
    );
    println!(
        "  windows: {} started, {} closed{}",
        log.starts(),
        log.peaks(),
        if log.has_open_window() { " (last still open)" } else { "" }
    );
    if let Some(max_peak) = log.peak_z.iter().cloned().reduce(f64::max) {
        println!("  highest peak z: {:.2}", max_peak);
    }
    println!(
        "  active samples: recorded {}, replayed {}, {} disagree",
        recorded_active, replay_active, disagreements
    );

    if let Some(out) = &args.out {
        write_activations(out, &log)?;
        println!("Wrote {}", out.display());
    }
    Ok(())
}
