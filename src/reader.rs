//! Per-boot sensor thread body.
//!
//! One `SensorReader` owns its device, channel schema, detector, ring and
//! snapshot cell; it is the only writer of all of them. Each period it reads
//! a frame, checks the current limit, transforms the frame, scores it, appends
//! the row, publishes a snapshot and sleeps.

use std::sync::Arc;

use crate::activation::{ActivationDetector, ActivationEvent, ActivationLog};
use crate::channels::{Channel, ChannelSchema};
use crate::clock::{Clock, FlexibleSleeper};
use crate::config::{BootConfig, GsacConfig, Side};
use crate::device::{safe_shutdown, ControlMode, MotorDevice};
use crate::error::{GsacError, GsacResult};
use crate::publisher::{Snapshot, SnapshotCell};
use crate::ring::{DeviceRing, TrialRow};
use crate::scheduler::GaitSink;
use crate::worker::QuitSignal;

/// What a reader leaves behind when its loop ends.
#[derive(Debug)]
pub struct ReaderSummary {
    pub device: String,
    pub side: Side,
    pub iterations: u64,
    pub transient_errors: u64,
    pub mean_period: Option<f64>,
    pub last_version: u64,
    pub log: ActivationLog,
    /// The fatal error that stopped the loop, if any.
    pub error: Option<GsacError>,
}

pub struct SensorReader {
    device: Box<dyn MotorDevice>,
    side: Side,
    schema: ChannelSchema,
    detector: ActivationDetector,
    source: Channel,
    ring: Arc<DeviceRing>,
    snapshots: Arc<SnapshotCell>,
    gait: Option<GaitSink>,
    clock: Arc<dyn Clock>,
    sleeper: FlexibleSleeper,
    current_limit_ma: f64,
    iteration: u64,
    transient_errors: u64,
}

impl SensorReader {
    /// `device` must already be open and streaming.
    pub fn new(
        device: Box<dyn MotorDevice>,
        boot: &BootConfig,
        config: &GsacConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            device,
            side: boot.side,
            schema: ChannelSchema::for_boot(boot, &config.channels),
            detector: ActivationDetector::new(&config.detector),
            source: config.detector.channel,
            ring: Arc::new(DeviceRing::new(config.sensor.ring_soft_cap)),
            snapshots: Arc::new(SnapshotCell::new()),
            gait: None,
            clock,
            sleeper: FlexibleSleeper::new(config.sensor.period_secs, config.sensor.period_history),
            current_limit_ma: config.safety.current_limit_ma,
            iteration: 0,
            transient_errors: 0,
        }
    }

    pub fn with_gait(mut self, sink: GaitSink) -> Self {
        self.gait = Some(sink);
        self
    }

    pub fn ring(&self) -> Arc<DeviceRing> {
        self.ring.clone()
    }

    pub fn snapshots(&self) -> Arc<SnapshotCell> {
        self.snapshots.clone()
    }

    pub fn device_id(&self) -> &str {
        self.device.id()
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// One read-transform-detect-publish pass. Errors leave all state untouched.
    pub fn step(&mut self) -> GsacResult<Option<ActivationEvent>> {
        let frame = self.device.read()?;

        // an unreadable current counts as over the limit
        if !frame.mot_cur.is_finite() || frame.mot_cur.abs() > self.current_limit_ma {
            return Err(GsacError::Safety {
                device: self.device.id().to_string(),
                current_ma: frame.mot_cur,
                limit_ma: self.current_limit_ma,
            });
        }
        if let Some(channel) = frame.non_finite_channel() {
            return Err(GsacError::transient(
                self.device.id(),
                format!("non-finite {} in frame", channel),
            ));
        }

        let values = self.schema.apply(&frame);
        let now = self.clock.now();
        let accel = values[self.source.index()];
        let event = self.detector.update(accel, now);

        let state = self.detector.state();
        let z = self.detector.last_z();
        self.ring.push(TrialRow {
            iteration: self.iteration,
            time_s: now,
            values,
            z,
            active: state.active,
            local_peak_z: state.local_peak_z,
        });

        let stats = self.detector.stats();
        self.snapshots.publish(Snapshot {
            version: 0,
            iteration: self.iteration,
            active: state.active,
            mean: stats.mean(),
            std: stats.std(),
            z,
            last_accel: accel,
            last_state_time: values[Channel::StateTime.index()],
            ank_ang: values[Channel::AnkAng.index()],
        });

        if let (Some(ActivationEvent::Ended { peak_time, .. }), Some(gait)) = (event, &self.gait) {
            gait.record_peak(peak_time);
        }

        self.iteration += 1;
        Ok(event)
    }

    /// Trial start: statistics, window state, filters and the snapshot cell start over.
    pub fn begin_trial(&mut self) {
        self.detector.reset();
        self.schema.reset();
        self.snapshots.clear();
        self.iteration = 0;
        self.transient_errors = 0;
        self.sleeper.reset();
    }

    /// Loop until `quit` is set or a safety error occurs, then shut the device down.
    pub fn run(mut self, quit: QuitSignal) -> ReaderSummary {
        log::info!(
            "[{}] reader started ({} side, period {:.1} ms)",
            self.device.id(),
            self.side,
            self.sleeper.target() * 1000.0
        );
        self.begin_trial();
        let mut fatal = None;

        while !quit.is_set() {
            match self.step() {
                Ok(_) => {}
                Err(e) if e.is_fatal() => {
                    log::error!("[{}] iteration {}: {}", self.device.id(), self.iteration, e);
                    if let Err(cmd_err) = self.device.send_motor_command(ControlMode::Current, 0.0) {
                        log::error!("[{}] zero-current command failed: {}", self.device.id(), cmd_err);
                    }
                    quit.set();
                    fatal = Some(e);
                    break;
                }
                Err(e) => {
                    self.transient_errors += 1;
                    log::warn!(
                        "[{}] iteration {} t={:.3}s: {} (skipped)",
                        self.device.id(),
                        self.iteration,
                        self.clock.now(),
                        e
                    );
                }
            }
            self.sleeper.sleep_and_return_period();
        }

        if let Err(e) = safe_shutdown(self.device.as_mut()) {
            log::error!("[{}] safe shutdown incomplete: {}", self.device.id(), e);
        }

        let summary = ReaderSummary {
            device: self.device.id().to_string(),
            side: self.side,
            iterations: self.iteration,
            transient_errors: self.transient_errors,
            mean_period: self.sleeper.mean_period(),
            last_version: self.snapshots.version(),
            log: self.detector.take_log(),
            error: fatal,
        };
        log::info!(
            "[{}] reader stopped: {} iterations, {} skipped, {} windows, mean period {}",
            summary.device,
            summary.iterations,
            summary.transient_errors,
            summary.log.starts(),
            summary
                .mean_period
                .map(|p| format!("{:.3} ms", p * 1000.0))
                .unwrap_or_else(|| "n/a".into())
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RawFrame;
    use crate::clock::ManualClock;
    use crate::device::testing::{CallLog, ScriptedBoot};
    use crate::device::Gains;
    use crate::publisher::Published;
    use crate::scheduler::gait_channel;
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn frame(ms: f64, accel_z_counts: f64) -> RawFrame {
        RawFrame {
            state_time_ms: ms,
            ank_ang: 150.0,
            accel: [0.0, 0.0, accel_z_counts],
            ..RawFrame::default()
        }
    }

    fn config() -> GsacConfig {
        let mut cfg = GsacConfig::default();
        cfg.sensor.period_secs = 0.0002;
        cfg.detector.require_prior_quiet = true;
        cfg
    }

    fn reader(script: Vec<GsacResult<RawFrame>>) -> (SensorReader, Arc<Mutex<CallLog>>) {
        let boot = ScriptedBoot::new("boot-L", script);
        let calls = boot.calls.clone();
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(0.0));
        let r = SensorReader::new(Box::new(boot), &BootConfig::left(), &config(), clock);
        (r, calls)
    }

    #[test]
    fn test_step_appends_row_and_publishes() {
        let (mut r, _) = reader(vec![Ok(frame(10.0, 8192.0)), Ok(frame(11.0, 8192.0))]);
        let ring = r.ring();
        let cell = r.snapshots();

        r.step().unwrap();
        r.step().unwrap();

        let rows = ring.flush();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].iteration, 0);
        assert_eq!(rows[1].iteration, 1);
        assert!((rows[1].values[Channel::AccelZ.index()] - 1.0).abs() < 1e-12);
        assert!((rows[1].values[Channel::StateTime.index()] - 0.011).abs() < 1e-12);

        match cell.latest() {
            Published::Snapshot(s) => {
                assert_eq!(s.version, 2);
                assert_eq!(s.iteration, 1);
                assert_eq!(s.ank_ang, 150.0);
                assert!((s.last_accel - 1.0).abs() < 1e-12);
            }
            Published::Empty => panic!("nothing published"),
        }
    }

    #[test]
    fn test_transient_error_does_not_advance_state() {
        let (mut r, _) = reader(vec![
            Ok(frame(1.0, 8192.0)),
            Err(GsacError::transient("boot-L", "short packet")),
            Ok(frame(3.0, 8192.0)),
        ]);
        let ring = r.ring();
        let cell = r.snapshots();

        r.step().unwrap();
        let err = r.step().unwrap_err();
        assert!(!err.is_fatal());
        assert_eq!(r.iteration(), 1);
        assert_eq!(ring.len(), 1);
        assert_eq!(cell.version(), 1);

        r.step().unwrap();
        assert_eq!(r.iteration(), 2);
    }

    #[test]
    fn test_non_finite_frame_is_skipped_without_poisoning_state() {
        let corrupt = RawFrame {
            state_time_ms: f64::NAN,
            temperature: f64::NAN,
            ank_ang: f64::NAN,
            ank_vel: f64::NAN,
            mot_ang: f64::NAN,
            mot_vel: f64::NAN,
            accel: [f64::NAN; 3],
            gyro: [f64::NAN, f64::NAN, f64::INFINITY],
            mot_cur: 0.0,
        };
        let mut script = vec![Ok(frame(1.0, 8192.0)), Ok(frame(2.0, 16384.0)), Ok(corrupt)];
        for i in 0..50 {
            let mut f = frame(3.0 + i as f64, 8192.0 * (1.0 + (i % 3) as f64));
            f.gyro[2] = 32.8 * i as f64;
            script.push(Ok(f));
        }
        let (mut r, _) = reader(script);
        let ring = r.ring();
        let cell = r.snapshots();

        r.step().unwrap();
        r.step().unwrap();
        let err = r.step().unwrap_err();
        assert_eq!(err.kind(), "TransientReadError");
        assert!(err.to_string().contains("non-finite"), "{err}");
        assert_eq!(r.iteration(), 2);
        assert_eq!(ring.len(), 2);
        assert_eq!(cell.version(), 2);

        for _ in 0..50 {
            r.step().unwrap();
        }
        let stats = r.detector.stats();
        assert!(stats.mean().is_finite());
        assert!(stats.std().is_finite() && stats.std() > 0.0);
        let rows = ring.flush();
        assert_eq!(rows.len(), 52);
        assert!(rows
            .iter()
            .all(|row| row.values.iter().all(|v| v.is_finite()) && row.z.is_finite()));
    }

    #[test]
    fn test_non_finite_current_trips_safety() {
        let mut unknown = frame(1.0, 8192.0);
        unknown.mot_cur = f64::NAN;
        let (mut r, _) = reader(vec![Ok(unknown)]);
        let err = r.step().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.kind(), "SafetyError");
        assert_eq!(r.iteration(), 0);
    }

    #[test]
    fn test_begin_trial_starts_over() {
        let (mut r, _) = reader(vec![Ok(frame(1.0, 8192.0)), Ok(frame(2.0, 24576.0))]);
        let cell = r.snapshots();
        r.step().unwrap();
        r.step().unwrap();
        assert_eq!(cell.version(), 2);

        r.begin_trial();
        assert_eq!(r.iteration(), 0);
        assert_eq!(cell.version(), 0);
        assert_eq!(r.detector.stats().count(), 0);
        assert!(r.detector.log().status.is_empty());
    }

    #[test]
    fn test_overcurrent_stops_loop_and_shuts_down() {
        let mut hot = frame(2.0, 8192.0);
        hot.mot_cur = -28_500.0;
        let script = vec![
            Ok(frame(1.0, 8192.0)),
            Err(GsacError::transient("boot-L", "crc")),
            Ok(hot),
        ];
        let (r, calls) = reader(script);
        let quit = QuitSignal::new();

        let summary = r.run(quit.clone());

        assert!(quit.is_set());
        assert_eq!(summary.iterations, 1);
        assert_eq!(summary.transient_errors, 1);
        assert_eq!(summary.last_version, 1);
        let err = summary.error.expect("safety error");
        assert_eq!(err.kind(), "SafetyError");
        assert_eq!(err.device(), Some("boot-L"));

        let calls = calls.lock().unwrap();
        assert_eq!(calls.commands.first(), Some(&(ControlMode::Current, 0.0)));
        assert_eq!(calls.gains.last(), Some(&Gains::zero()));
        assert!(calls.closed);
    }

    #[test]
    fn test_run_until_quit_counts_strides() {
        // quiet rest, one heel-strike jump, then quiet again
        let mut script = Vec::new();
        for i in 0..40 {
            script.push(Ok(frame(i as f64, 8192.0)));
        }
        script.push(Ok(frame(40.0, 8192.0 * 4.0)));
        for i in 41..80 {
            script.push(Ok(frame(i as f64, 8192.0 * 4.0)));
        }

        let (sink, mut counter) = gait_channel();
        let (r, _) = reader(script);
        let r = r.with_gait(sink);
        let ring = r.ring();
        let quit = QuitSignal::new();
        let q = quit.clone();

        let handle = thread::spawn(move || r.run(q));
        while ring.len() < 80 {
            thread::sleep(Duration::from_millis(1));
        }
        quit.set();
        let summary = handle.join().unwrap();

        assert!(summary.error.is_none());
        assert!(summary.iterations >= 80);
        assert_eq!(summary.log.starts(), 1);
        assert_eq!(summary.log.peaks(), 1);
        assert_eq!(counter.count_since(0.0), 1);
        assert!(summary.mean_period.is_some());
    }
}
