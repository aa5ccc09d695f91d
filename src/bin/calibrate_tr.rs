use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use exo_gsac::calibration::{rms_residual, TransmissionRatio};
use exo_gsac::config::TrConfig;
use exo_gsac::trial_log::read_trial_log;
use exo_gsac::Channel;

/// Fit motor angle against ankle angle from recorded trial logs and write the
/// two-row transmission-ratio file.
#[derive(Parser, Debug)]
#[command(name = "calibrate_tr")]
struct Args {
    /// Trial log CSV(s) recorded while sweeping the ankle
    #[arg(long = "log", required = true)]
    logs: Vec<PathBuf>,

    /// Polynomial degree of the motor-angle fit
    #[arg(long, default_value = "3")]
    degree: usize,

    /// Output file
    #[arg(long, default_value = "tr_coefs.csv")]
    out: PathBuf,

    /// Refuse to write when the RMS residual exceeds this (motor angle units)
    #[arg(long)]
    max_rms: Option<f64>,

    /// Lower clamp on the reported ratio
    #[arg(long, default_value = "0.1")]
    floor: f64,

    /// Upper clamp on the reported ratio
    #[arg(long, default_value = "20.0")]
    ceiling: f64,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut ank_ang = Vec::new();
    let mut mot_ang = Vec::new();
    for path in &args.logs {
        let rows = read_trial_log(path).with_context(|| format!("reading {}", path.display()))?;
        log::info!("{}: {} rows", path.display(), rows.len());
        for row in rows {
            ank_ang.push(row.values[Channel::AnkAng.index()]);
            mot_ang.push(row.values[Channel::MotAng.index()]);
        }
    }
    if ank_ang.is_empty() {
        bail!("no samples in the given logs");
    }

    let cfg = TrConfig {
        path: Some(args.out.clone()),
        floor: args.floor,
        ceiling: args.ceiling,
    };
    let (tr, rms) = TransmissionRatio::calibrate(&ank_ang, &mot_ang, args.degree, &cfg)?;

    println!("Fit over {} samples, degree {}", ank_ang.len(), args.degree);
    println!("  motor angle coefs: {:?}", tr.motor_angle.coefs());
    println!("  ratio coefs:       {:?}", tr.ratio.coefs());
    println!("  RMS residual:      {:.4}", rms);

    if let Some(limit) = args.max_rms {
        if rms > limit {
            bail!("RMS residual {:.4} exceeds --max-rms {:.4}; not writing {}", rms, limit, args.out.display());
        }
    }

    tr.save(&args.out)?;

    // what gets loaded at trial time must reproduce the fit
    let reloaded = TransmissionRatio::load(&args.out, &cfg)?;
    let check = rms_residual(&reloaded.motor_angle, &ank_ang, &mot_ang);
    if (check - rms).abs() > 1e-9 * rms.max(1.0) {
        bail!("reloaded coefficients do not reproduce the fit ({} vs {})", check, rms);
    }

    let lo = ank_ang.iter().cloned().fold(f64::INFINITY, f64::min);
    let hi = ank_ang.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    println!(
        "  ratio over [{:.0}, {:.0}]: {:.3} .. {:.3}",
        lo,
        hi,
        reloaded.ratio_at(lo),
        reloaded.ratio_at(hi)
    );
    println!("Wrote {}", args.out.display());
    Ok(())
}
