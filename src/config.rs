use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::channels::Channel;
use crate::device::Gains;
use crate::error::{GsacError, GsacResult};

/// Environment variable overriding the motion-capture endpoint.
pub const FORCE_IP_ENV: &str = "FORCE_IP";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Left => "left",
            Side::Right => "right",
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Sections ────────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Reader loop period in seconds.
    pub period_secs: f64,
    /// Number of measured periods kept for the sliding period estimate.
    pub period_history: usize,
    /// Streaming rate requested from the boot firmware.
    pub stream_freq_hz: u32,
    /// Rows a device ring may hold before new rows are dropped.
    pub ring_soft_cap: usize,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            period_secs: 0.001,
            period_history: 100,
            stream_freq_hz: 1000,
            ring_soft_cap: 60_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BootConfig {
    pub side: Side,
    pub port: String,
    pub backup_port: String,
    pub baud: u32,
    /// Per-axis sign applied to accel{x,y,z}.
    pub accel_signs: [f64; 3],
    /// Per-axis sign applied to gyro{x,y,z}.
    pub gyro_signs: [f64; 3],
}

impl BootConfig {
    pub fn left() -> Self {
        Self {
            side: Side::Left,
            port: "/dev/ttyACM0".to_string(),
            backup_port: "/dev/ttyACM2".to_string(),
            baud: 230_400,
            accel_signs: [1.0, 1.0, 1.0],
            gyro_signs: [1.0, 1.0, 1.0],
        }
    }

    pub fn right() -> Self {
        Self {
            side: Side::Right,
            port: "/dev/ttyACM1".to_string(),
            backup_port: "/dev/ttyACM3".to_string(),
            baud: 230_400,
            accel_signs: [1.0, -1.0, 1.0],
            gyro_signs: [-1.0, 1.0, -1.0],
        }
    }

    pub fn port_for(&self, use_backup: bool) -> &str {
        if use_backup {
            &self.backup_port
        } else {
            &self.port
        }
    }
}

impl Default for BootConfig {
    fn default() -> Self {
        Self::left()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ChannelConfig {
    /// Raw accelerometer counts to g.
    pub accel_gain: f64,
    /// Raw gyroscope counts to deg/s.
    pub gyro_gain: f64,
    /// Low-pass cutoff applied to gyroz, in Hz.
    pub gyroz_cutoff_hz: f64,
    /// Calibrated ank_ang offset; identity when absent.
    pub ank_ang_offset: Option<f64>,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            accel_gain: 1.0 / 8192.0,
            gyro_gain: 1.0 / 32.8,
            gyroz_cutoff_hz: 5.0,
            ank_ang_offset: None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub z_threshold: f64,
    pub run_length: u32,
    /// Require one quiet stretch (run_len > R) before the first activation.
    pub require_prior_quiet: bool,
    /// Channel fed into the activation detector.
    pub channel: Channel,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            z_threshold: 2.0,
            run_length: 10,
            require_prior_quiet: false,
            channel: Channel::AccelZ,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SafetyConfig {
    pub current_limit_ma: f64,
    pub open_attempts: u32,
    pub open_backoff_secs: f64,
    pub open_backoff_cap_secs: f64,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            current_limit_ma: 28_000.0,
            open_attempts: 5,
            open_backoff_secs: 0.5,
            open_backoff_cap_secs: 5.0,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub period_secs: f64,
    pub hud_period_secs: f64,
    pub drain_period_secs: f64,
    pub status_period_secs: f64,
    pub gains: Gains,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            period_secs: 0.01,
            hud_period_secs: 0.05,
            drain_period_secs: 0.1,
            status_period_secs: 2.0,
            gains: Gains::current_loop(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrialConfig {
    /// Activation windows walked between prompts.
    pub strides_per_round: usize,
    pub rounds: u32,
    /// Seconds before an unanswered prompt is re-issued.
    pub prompt_timeout_secs: f64,
    /// Second-price clearing prices per Vickrey round, cycled when shorter than `rounds`.
    pub clearing_prices: Vec<f64>,
}

impl Default for TrialConfig {
    fn default() -> Self {
        Self {
            strides_per_round: 20,
            rounds: 5,
            prompt_timeout_secs: 30.0,
            clearing_prices: vec![1.25, 0.50, 2.00, 0.75, 1.50],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ForcePlateConfig {
    pub endpoint: String,
    pub plates: Vec<usize>,
    pub outputs: Vec<usize>,
    pub components: Vec<usize>,
}

impl Default for ForcePlateConfig {
    fn default() -> Self {
        Self {
            endpoint: "localhost:801".to_string(),
            plates: vec![0, 1],
            outputs: vec![0],
            components: vec![2],
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TrConfig {
    pub path: Option<PathBuf>,
    pub floor: f64,
    pub ceiling: f64,
}

impl Default for TrConfig {
    fn default() -> Self {
        Self {
            path: None,
            floor: 0.1,
            ceiling: 20.0,
        }
    }
}

// ─── Top level ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GsacConfig {
    pub sensor: SensorConfig,
    pub boots: Vec<BootConfig>,
    pub channels: ChannelConfig,
    pub detector: DetectorConfig,
    pub safety: SafetyConfig,
    pub control: ControlConfig,
    pub trial: TrialConfig,
    pub force_plate: ForcePlateConfig,
    pub tr: TrConfig,
    pub data_root: PathBuf,
}

impl Default for GsacConfig {
    fn default() -> Self {
        Self {
            sensor: SensorConfig::default(),
            boots: vec![BootConfig::left(), BootConfig::right()],
            channels: ChannelConfig::default(),
            detector: DetectorConfig::default(),
            safety: SafetyConfig::default(),
            control: ControlConfig::default(),
            trial: TrialConfig::default(),
            force_plate: ForcePlateConfig::default(),
            tr: TrConfig::default(),
            data_root: PathBuf::from("subject_data"),
        }
    }
}

impl GsacConfig {
    /// Load a JSON config; missing keys take their defaults.
    pub fn load(path: &Path) -> GsacResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: GsacConfig = serde_json::from_str(&text)?;
        Ok(config)
    }

    /// Apply the `FORCE_IP` override when set and non-empty.
    pub fn apply_force_ip(&mut self, force_ip: Option<String>) {
        if let Some(ip) = force_ip.map(|s| s.trim().to_string()) {
            if !ip.is_empty() {
                log::info!("Motion-capture endpoint overridden by {}: {}", FORCE_IP_ENV, ip);
                self.force_plate.endpoint = ip;
            }
        }
    }

    pub fn validate(&self) -> GsacResult<()> {
        fn check(ok: bool, msg: &str) -> GsacResult<()> {
            if ok {
                Ok(())
            } else {
                Err(GsacError::Configuration(msg.to_string()))
            }
        }

        check(self.sensor.period_secs > 0.0, "sensor.period_secs must be positive")?;
        check(self.sensor.period_history >= 1, "sensor.period_history must be at least 1")?;
        check(self.sensor.ring_soft_cap >= 1, "sensor.ring_soft_cap must be at least 1")?;
        check(!self.boots.is_empty(), "at least one boot must be configured")?;
        for (i, boot) in self.boots.iter().enumerate() {
            check(
                !self.boots[..i].iter().any(|b| b.side == boot.side),
                "boot sides must be distinct",
            )?;
            let signs_ok = boot
                .accel_signs
                .iter()
                .chain(boot.gyro_signs.iter())
                .all(|s| *s == 1.0 || *s == -1.0);
            check(signs_ok, "accel/gyro signs must be +1 or -1")?;
        }
        check(self.channels.gyroz_cutoff_hz > 0.0, "channels.gyroz_cutoff_hz must be positive")?;
        check(self.detector.z_threshold > 0.0, "detector.z_threshold must be positive")?;
        check(self.safety.current_limit_ma > 0.0, "safety.current_limit_ma must be positive")?;
        check(self.safety.open_attempts >= 1, "safety.open_attempts must be at least 1")?;
        check(self.control.period_secs > 0.0, "control.period_secs must be positive")?;
        check(self.control.hud_period_secs > 0.0, "control.hud_period_secs must be positive")?;
        check(self.control.drain_period_secs > 0.0, "control.drain_period_secs must be positive")?;
        check(self.trial.strides_per_round >= 1, "trial.strides_per_round must be at least 1")?;
        check(self.trial.rounds >= 1, "trial.rounds must be at least 1")?;
        check(!self.trial.clearing_prices.is_empty(), "trial.clearing_prices must not be empty")?;
        check(
            self.tr.floor > 0.0 && self.tr.ceiling > self.tr.floor,
            "tr bounds must satisfy 0 < floor < ceiling",
        )?;
        Ok(())
    }
}
