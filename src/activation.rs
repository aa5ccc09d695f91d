//! Activation-window detection on the z-scored change in acceleration.
//!
//! Each sample's absolute change from the previous one is fed into running
//! statistics and scored. `run_len` counts samples since the last score above
//! the threshold. A window opens while `run_len <= R` and closes once it
//! exceeds `R`; the highest score seen while open is its peak.
//!
//! Entry quirk: at rest the scores sit below the threshold, so `run_len` is
//! small right after a reset and the literal rule opens a window on the very
//! first sample. That behaviour is kept by default for reproducibility of
//! recorded trials. `require_prior_quiet` instead waits until one quiet stretch
//! (`run_len > R`) has been seen before the first window may open.

use crate::config::DetectorConfig;
use crate::stats::RunningStats;

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ActivationEvent {
    Started { time: f64, z: f64 },
    PeakUpdated { time: f64, z: f64 },
    Ended { peak_time: f64, peak_z: f64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ActivationState {
    pub active: bool,
    pub run_len: u32,
    pub prev_accel: f64,
    pub local_peak_time: f64,
    pub local_peak_z: f64,
    quiet_seen: bool,
}

/// Append-only record of one trial's windows.
///
/// `start_*` and `peak_*` are parallel; the last start has no peak while a
/// window is still open. `status` has one entry per processed sample.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ActivationLog {
    pub start_time: Vec<f64>,
    pub start_z: Vec<f64>,
    pub peak_time: Vec<f64>,
    pub peak_z: Vec<f64>,
    pub status: Vec<bool>,
}

impl ActivationLog {
    pub fn starts(&self) -> usize {
        self.start_time.len()
    }

    pub fn peaks(&self) -> usize {
        self.peak_time.len()
    }

    pub fn has_open_window(&self) -> bool {
        self.starts() > self.peaks()
    }

    /// (start_time, start_z, closing peak) per window.
    pub fn windows(&self) -> impl Iterator<Item = (f64, f64, Option<(f64, f64)>)> + '_ {
        self.start_time
            .iter()
            .zip(self.start_z.iter())
            .enumerate()
            .map(move |(i, (&t, &z))| {
                let peak = self.peak_time.get(i).copied().zip(self.peak_z.get(i).copied());
                (t, z, peak)
            })
    }
}

pub struct ActivationDetector {
    z_threshold: f64,
    run_length: u32,
    require_prior_quiet: bool,
    stats: RunningStats,
    state: ActivationState,
    log: ActivationLog,
    last_z: f64,
}

impl ActivationDetector {
    pub fn new(cfg: &DetectorConfig) -> Self {
        Self {
            z_threshold: cfg.z_threshold,
            run_length: cfg.run_length,
            require_prior_quiet: cfg.require_prior_quiet,
            stats: RunningStats::new(),
            state: ActivationState::default(),
            log: ActivationLog::default(),
            last_z: 0.0,
        }
    }

    /// Score one acceleration sample taken at `now` and advance the window state.
    pub fn update(&mut self, accel: f64, now: f64) -> Option<ActivationEvent> {
        let d = (accel - self.state.prev_accel).abs();
        self.state.prev_accel = accel;
        self.stats.update(d);
        let z = self.stats.z(d);
        self.step_z(z, now)
    }

    /// Advance the window state with an already computed score.
    pub fn step_z(&mut self, z: f64, now: f64) -> Option<ActivationEvent> {
        let st = &mut self.state;
        if z > self.z_threshold {
            st.run_len = 0;
        } else {
            st.run_len = st.run_len.saturating_add(1);
        }

        let quiet = st.run_len > self.run_length;
        if quiet {
            st.quiet_seen = true;
        }

        let event = if !st.active && !quiet && (st.quiet_seen || !self.require_prior_quiet) {
            st.active = true;
            st.local_peak_time = now;
            st.local_peak_z = z;
            self.log.start_time.push(now);
            self.log.start_z.push(z);
            Some(ActivationEvent::Started { time: now, z })
        } else if st.active && quiet {
            st.active = false;
            self.log.peak_time.push(st.local_peak_time);
            self.log.peak_z.push(st.local_peak_z);
            Some(ActivationEvent::Ended {
                peak_time: st.local_peak_time,
                peak_z: st.local_peak_z,
            })
        } else if st.active && z > st.local_peak_z {
            st.local_peak_time = now;
            st.local_peak_z = z;
            Some(ActivationEvent::PeakUpdated { time: now, z })
        } else {
            None
        };

        self.log.status.push(st.active);
        self.last_z = z;
        event
    }

    pub fn state(&self) -> &ActivationState {
        &self.state
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn log(&self) -> &ActivationLog {
        &self.log
    }

    pub fn last_z(&self) -> f64 {
        self.last_z
    }

    /// Hand over the trial's log, leaving an empty one behind.
    pub fn take_log(&mut self) -> ActivationLog {
        std::mem::take(&mut self.log)
    }

    /// Trial start: statistics, window state and log all start over.
    pub fn reset(&mut self) {
        self.stats.reset();
        self.state = ActivationState::default();
        self.log = ActivationLog::default();
        self.last_z = 0.0;
    }
}
