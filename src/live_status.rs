use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::publisher::Published;

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct DeviceStatus {
    pub device: String,
    pub side: String,
    pub snapshot_version: u64,
    pub iteration: u64,
    pub active: bool,
    pub z: f64,
    pub accel_mean: f64,
    pub accel_std: f64,
    pub ank_ang: f64,
    // Drain health
    pub ring_pending: usize,
    pub rows_dropped: u64,
}

impl DeviceStatus {
    pub fn fill_from(&mut self, published: Published) {
        if let Published::Snapshot(s) = published {
            self.snapshot_version = s.version;
            self.iteration = s.iteration;
            self.active = s.active;
            self.z = s.z;
            self.accel_mean = s.mean;
            self.accel_std = s.std;
            self.ank_ang = s.ank_ang;
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct LiveStatus {
    pub timestamp: f64,
    pub uptime_seconds: u64,
    pub trial: String,
    pub phase: String,
    pub round: u32,
    pub rounds: u32,
    pub strides_this_round: usize,
    pub strides_total: usize,
    pub devices: Vec<DeviceStatus>,
    // Force plates and transmission
    pub plate_load_n: f64,
    pub transmission_ratio: Option<f64>,
}

impl LiveStatus {
    pub fn new(trial: &str) -> Self {
        Self {
            timestamp: current_timestamp(),
            trial: trial.to_string(),
            phase: "walking".to_string(),
            ..Self::default()
        }
    }

    /// Write atomically: a reader polling the file never sees half a document.
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }

    /// One-line summary for headless runs.
    pub fn summary_line(&self) -> String {
        let devices: Vec<String> = self
            .devices
            .iter()
            .map(|d| {
                format!(
                    "{} v{} z={:+.2}{} drop={}",
                    d.side,
                    d.snapshot_version,
                    d.z,
                    if d.active { " ACTIVE" } else { "" },
                    d.rows_dropped
                )
            })
            .collect();
        format!(
            "{} round {}/{} strides {} | {} | load {:.0} N",
            self.phase,
            (self.round + 1).min(self.rounds.max(1)),
            self.rounds,
            self.strides_this_round,
            devices.join(" | "),
            self.plate_load_n
        )
    }
}

pub fn current_timestamp() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::publisher::Snapshot;

    #[test]
    fn test_fill_from_snapshot() {
        let mut d = DeviceStatus::default();
        d.fill_from(Published::Empty);
        assert_eq!(d.snapshot_version, 0);
        d.fill_from(Published::Snapshot(Snapshot {
            version: 7,
            iteration: 6,
            active: true,
            z: 3.25,
            ..Snapshot::default()
        }));
        assert_eq!(d.snapshot_version, 7);
        assert!(d.active);
        assert_eq!(d.z, 3.25);
    }

    #[test]
    fn test_save_and_reload() {
        let mut status = LiveStatus::new("S01_VAS_LOW_MAIN_20240101_000000");
        status.rounds = 5;
        status.devices.push(DeviceStatus {
            side: "left".into(),
            ..DeviceStatus::default()
        });
        let path = std::env::temp_dir().join(format!("exo_gsac_{}_live_status.json", std::process::id()));
        status.save(&path).unwrap();
        let back: LiveStatus = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(back, status);
        assert!(status.summary_line().starts_with("walking round 1/5"));
        std::fs::remove_file(&path).ok();
    }
}
