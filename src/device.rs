//! Device seams: the motor driver of each boot and the force-plate client.
//!
//! The vendor drivers live outside this crate; what is here is the contract the
//! reader and supervisor program against, plus deterministic simulators so the
//! bench runs end to end without hardware.

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use std::thread;
use std::time::{Duration, Instant};

use crate::channels::RawFrame;
use crate::config::{SafetyConfig, Side};
use crate::error::{GsacError, GsacResult};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
    pub k: f64,
    pub b: f64,
    pub ff: f64,
}

impl Gains {
    pub const fn zero() -> Self {
        Self {
            kp: 0.0,
            ki: 0.0,
            kd: 0.0,
            k: 0.0,
            b: 0.0,
            ff: 0.0,
        }
    }

    /// Current-loop gains used for torque commands.
    pub const fn current_loop() -> Self {
        Self {
            kp: 40.0,
            ki: 400.0,
            kd: 0.0,
            k: 0.0,
            b: 0.0,
            ff: 128.0,
        }
    }
}

impl Default for Gains {
    fn default() -> Self {
        Self::current_loop()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    Current,
}

pub trait MotorDevice: Send {
    fn id(&self) -> &str;
    fn open(&mut self, port: &str, baud: u32) -> GsacResult<()>;
    fn start_streaming(&mut self, freq_hz: u32) -> GsacResult<()>;
    /// Blocks until the next frame is available.
    fn read(&mut self) -> GsacResult<RawFrame>;
    fn set_gains(&mut self, gains: Gains) -> GsacResult<()>;
    fn send_motor_command(&mut self, mode: ControlMode, value: f64) -> GsacResult<()>;
    fn close(&mut self) -> GsacResult<()>;
}

pub trait ForcePlateClient: Send {
    /// Latest sample flattened in plates → outputs → components order (Newtons).
    fn get_latest_device_values(
        &mut self,
        plates: &[usize],
        outputs: &[usize],
        components: &[usize],
    ) -> GsacResult<Vec<f64>>;
}

// ─── Open retry ──────────────────────────────────────────────────────────────

/// Exponential backoff between open attempts: ×1.5 per failure, capped.
#[derive(Clone, Debug)]
pub struct Backoff {
    current: Duration,
    cap: Duration,
}

impl Backoff {
    pub fn new(base_secs: f64, cap_secs: f64) -> Self {
        Self {
            current: Duration::from_secs_f64(base_secs.max(0.0)),
            cap: Duration::from_secs_f64(cap_secs.max(0.0)),
        }
    }

    /// Delay to wait now; the following delay grows.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.cap);
        self.current = Duration::from_secs_f64((self.current.as_secs_f64() * 1.5).min(self.cap.as_secs_f64()));
        delay
    }
}

/// Open `device`, retrying with backoff. Returns the number of attempts used.
pub fn open_with_retry(
    device: &mut dyn MotorDevice,
    port: &str,
    baud: u32,
    safety: &SafetyConfig,
) -> GsacResult<u32> {
    let mut backoff = Backoff::new(safety.open_backoff_secs, safety.open_backoff_cap_secs);
    let mut last_reason = String::new();

    for attempt in 1..=safety.open_attempts {
        match device.open(port, baud) {
            Ok(()) => {
                if attempt > 1 {
                    log::info!("[{}] opened {} after {} attempt(s)", device.id(), port, attempt);
                }
                return Ok(attempt);
            }
            Err(e) => {
                last_reason = e.to_string();
                if attempt < safety.open_attempts {
                    let delay = backoff.next_delay();
                    log::warn!(
                        "[{}] open {} failed (attempt {}/{}): {}; retrying in {:.2}s",
                        device.id(),
                        port,
                        attempt,
                        safety.open_attempts,
                        last_reason,
                        delay.as_secs_f64()
                    );
                    thread::sleep(delay);
                }
            }
        }
    }

    Err(GsacError::DeviceOpen {
        device: device.id().to_string(),
        attempts: safety.open_attempts,
        reason: last_reason,
    })
}

/// Zero current, zero gains, close. Every step is attempted; the first failure is returned.
pub fn safe_shutdown(device: &mut dyn MotorDevice) -> GsacResult<()> {
    let steps = [
        device.send_motor_command(ControlMode::Current, 0.0),
        device.set_gains(Gains::zero()),
        device.close(),
    ];
    let mut first_err = None;
    for result in steps {
        if let Err(e) = result {
            log::error!("[{}] shutdown step failed: {}", device.id(), e);
            first_err.get_or_insert(e);
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

// ─── Simulators ──────────────────────────────────────────────────────────────

/// Deterministic boot producing a walking-like stream in raw device units.
///
/// Heel strike every `stride_secs`: a sharp accel transient on top of 1 g and
/// low-amplitude ripple, ankle angle following the stride phase.
pub struct SimulatedBoot {
    id: String,
    opened: bool,
    streaming: bool,
    started: Instant,
    stride_secs: f64,
    gains: Gains,
    command_ma: f64,
}

impl SimulatedBoot {
    pub fn new(side: Side) -> Self {
        Self {
            id: side.to_string(),
            opened: false,
            streaming: false,
            started: Instant::now(),
            stride_secs: 1.1,
            gains: Gains::zero(),
            command_ma: 0.0,
        }
    }

    pub fn with_stride(mut self, stride_secs: f64) -> Self {
        self.stride_secs = stride_secs.max(0.1);
        self
    }

    /// Raw frame at `t` seconds since streaming started.
    pub fn frame_at(&self, t: f64) -> RawFrame {
        let phase = (t % self.stride_secs) / self.stride_secs;
        let ripple = (t * 2.0 * PI * 23.0).sin() * 0.3 + (t * 2.0 * PI * 41.0).cos() * 0.2;
        // heel-strike transient decaying over ~25 ms
        let strike_t = phase * self.stride_secs;
        let strike = 3.0 * (-strike_t / 0.025).exp() * (strike_t * 2.0 * PI * 30.0).cos();

        let counts_per_g = 8192.0;

        RawFrame {
            state_time_ms: (t * 1000.0).floor(),
            temperature: 30.0 + 2.0 * (t / 600.0).min(1.0),
            ank_ang: 2000.0 * (2.0 * PI * phase).sin(),
            ank_vel: 2000.0 * 2.0 * PI / self.stride_secs * (2.0 * PI * phase).cos(),
            mot_ang: 12000.0 * (2.0 * PI * phase).sin(),
            mot_vel: 600.0 * (2.0 * PI * phase).cos(),
            accel: [
                counts_per_g * 0.1 * (2.0 * PI * phase).sin(),
                counts_per_g * 0.05 * ripple,
                counts_per_g * (1.0 + 0.02 * ripple + strike),
            ],
            gyro: [
                32.8 * 40.0 * (2.0 * PI * phase).cos(),
                32.8 * 5.0 * ripple,
                32.8 * 120.0 * (2.0 * PI * phase).sin(),
            ],
            mot_cur: self.command_ma + 50.0 * ripple,
        }
    }
}

impl MotorDevice for SimulatedBoot {
    fn id(&self) -> &str {
        &self.id
    }

    fn open(&mut self, port: &str, baud: u32) -> GsacResult<()> {
        log::debug!("[{}] simulated open {} @ {} baud", self.id, port, baud);
        self.opened = true;
        Ok(())
    }

    fn start_streaming(&mut self, freq_hz: u32) -> GsacResult<()> {
        if !self.opened {
            return Err(GsacError::transient(&self.id, "start_streaming before open"));
        }
        log::debug!("[{}] simulated streaming at {} Hz", self.id, freq_hz);
        self.streaming = true;
        self.started = Instant::now();
        Ok(())
    }

    fn read(&mut self) -> GsacResult<RawFrame> {
        if !self.streaming {
            return Err(GsacError::transient(&self.id, "device is not streaming"));
        }
        Ok(self.frame_at(self.started.elapsed().as_secs_f64()))
    }

    fn set_gains(&mut self, gains: Gains) -> GsacResult<()> {
        self.gains = gains;
        Ok(())
    }

    fn send_motor_command(&mut self, mode: ControlMode, value: f64) -> GsacResult<()> {
        match mode {
            ControlMode::Current => self.command_ma = value,
        }
        Ok(())
    }

    fn close(&mut self) -> GsacResult<()> {
        self.streaming = false;
        self.opened = false;
        Ok(())
    }
}

/// Force plates reporting a walking subject's load.
pub struct SimulatedForcePlate {
    started: Instant,
    body_weight_n: f64,
    stride_secs: f64,
}

impl SimulatedForcePlate {
    pub fn new(body_weight_n: f64) -> Self {
        Self {
            started: Instant::now(),
            body_weight_n,
            stride_secs: 1.1,
        }
    }
}

impl ForcePlateClient for SimulatedForcePlate {
    fn get_latest_device_values(
        &mut self,
        plates: &[usize],
        outputs: &[usize],
        components: &[usize],
    ) -> GsacResult<Vec<f64>> {
        let t = self.started.elapsed().as_secs_f64();
        let mut values = Vec::with_capacity(plates.len() * outputs.len() * components.len());
        for &plate in plates {
            // plates alternate stance half a stride apart
            let phase = ((t / self.stride_secs) + 0.5 * plate as f64).fract();
            let stance = if phase < 0.6 {
                (PI * phase / 0.6).sin()
            } else {
                0.0
            };
            for _ in outputs {
                for &component in components {
                    let value = match component {
                        2 => self.body_weight_n * stance,
                        _ => 0.05 * self.body_weight_n * stance * (2.0 * PI * phase).sin(),
                    };
                    values.push(value);
                }
            }
        }
        Ok(values)
    }
}


#[cfg(test)]
mod tests {
    use super::testing::ScriptedBoot;
    use super::*;

    fn quick_safety(attempts: u32) -> SafetyConfig {
        SafetyConfig {
            open_attempts: attempts,
            open_backoff_secs: 0.001,
            open_backoff_cap_secs: 0.002,
            ..SafetyConfig::default()
        }
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let mut backoff = Backoff::new(1.0, 2.0);
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(1.0));
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(1.5));
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(2.0));
        assert_eq!(backoff.next_delay(), Duration::from_secs_f64(2.0));
    }

    #[test]
    fn test_open_retries_then_succeeds() {
        let mut boot = ScriptedBoot::new("left", vec![]).failing_opens(2);
        let calls = boot.calls.clone();
        let attempts = open_with_retry(&mut boot, "/dev/null", 230_400, &quick_safety(5)).unwrap();
        assert_eq!(attempts, 3);
        assert_eq!(calls.lock().unwrap().opens, 3);
    }

    #[test]
    fn test_open_exhaustion_is_device_open_error() {
        let mut boot = ScriptedBoot::new("right", vec![]).failing_opens(10);
        let err = open_with_retry(&mut boot, "/dev/null", 230_400, &quick_safety(3)).unwrap_err();
        match err {
            GsacError::DeviceOpen { device, attempts, .. } => {
                assert_eq!(device, "right");
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_safe_shutdown_zeroes_and_closes() {
        let mut boot = ScriptedBoot::new("left", vec![]);
        let calls = boot.calls.clone();
        safe_shutdown(&mut boot).unwrap();
        let log = calls.lock().unwrap();
        assert_eq!(log.commands, vec![(ControlMode::Current, 0.0)]);
        assert_eq!(log.gains, vec![Gains::zero()]);
        assert!(log.closed);
    }

    #[test]
    fn test_simulated_boot_requires_streaming() {
        let mut boot = SimulatedBoot::new(Side::Left);
        assert!(boot.read().is_err());
        boot.open("sim", 230_400).unwrap();
        boot.start_streaming(1000).unwrap();
        let frame = boot.read().unwrap();
        assert!(frame.state_time_ms >= 0.0);
        boot.close().unwrap();
        assert!(boot.read().is_err());
    }

    #[test]
    fn test_simulated_heel_strike_is_visible_in_accel() {
        let boot = SimulatedBoot::new(Side::Right).with_stride(1.0);
        let strike = boot.frame_at(2.0).accel[2];
        let mid_stance = boot.frame_at(2.5).accel[2];
        assert!(strike > 8192.0 * 3.0);
        assert!((mid_stance - 8192.0).abs() < 8192.0 * 0.05);
    }

    #[test]
    fn test_force_plate_layout() {
        let mut plates = SimulatedForcePlate::new(700.0);
        let values = plates
            .get_latest_device_values(&[0, 1], &[0], &[0, 1, 2])
            .unwrap();
        assert_eq!(values.len(), 6);
        assert!(values.iter().all(|v| v.is_finite()));
        assert!(values[2] >= 0.0 && values[2] <= 700.0);
    }
}
