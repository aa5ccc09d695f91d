//! Session supervisor: opens the boots, runs every thread of a trial, and
//! tears everything down in order.
//!
//! Threads per session: one reader per boot, the drain actor, the control loop
//! (trial machine, force plates, live status) and optionally the HUD. They
//! share nothing mutable except rings, snapshot cells, the gait channel and
//! the board the HUD draws from.

use std::fs::File;
use std::io::{BufRead, BufWriter, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Local;
use crossbeam::channel::{self, Receiver, Sender};
use thiserror::Error;

use crate::calibration::TransmissionRatio;
use crate::clock::{Clock, FlexibleSleeper, MonotonicClock};
use crate::config::{ForcePlateConfig, GsacConfig};
use crate::device::{open_with_retry, ForcePlateClient, MotorDevice};
use crate::error::{GsacError, GsacResult};
use crate::filters::MovingAverage;
use crate::hud::{render_lines, Hud, Keypad, KeypadInput};
use crate::live_status::{current_timestamp, DeviceStatus, LiveStatus};
use crate::publisher::SnapshotCell;
use crate::reader::{ReaderSummary, SensorReader};
use crate::ring::DeviceRing;
use crate::scheduler::{gait_channel, GaitCounter};
use crate::trial::{TrialSpec, TrialType};
use crate::trial_log::{write_activations, DrainActor, DrainSummary, TrialLogWriter};
use crate::trial_machine::{TrialAction, TrialEvent, TrialMachine, TrialPhase, TrialResponses};
use crate::worker::{spawn_worker, QuitSignal, Worker};

/// Joins wait twice the worker's period, but never less than this.
const JOIN_FLOOR_SECS: f64 = 0.05;
/// Samples in the force-plate load average shown to the operator.
const LOAD_WINDOW: usize = 25;

fn join_window(period_secs: f64) -> Duration {
    Duration::from_secs_f64((2.0 * period_secs).max(JOIN_FLOOR_SECS))
}

#[derive(Clone, Debug, Default)]
pub struct SessionOptions {
    pub use_backup: bool,
    /// Stop after this long even if rounds remain.
    pub duration: Option<Duration>,
    /// Take over the terminal with the HUD and keypad.
    pub hud: bool,
    /// Read responses as lines from stdin (headless runs).
    pub stdin_responses: bool,
}

#[derive(Debug)]
pub struct SessionReport {
    pub trial_dir: PathBuf,
    pub stem: String,
    pub readers: Vec<ReaderSummary>,
    pub drain: DrainSummary,
    pub responses: Option<TrialResponses>,
}

/// A fatal outcome, carrying what the operator needs on exit.
#[derive(Debug, Error)]
#[error("{} on {} (last snapshot version {}): {}", .error.kind(), .device.as_deref().unwrap_or("-"), .last_version, .error)]
pub struct SessionFailure {
    pub error: GsacError,
    pub device: Option<String>,
    pub last_version: u64,
}

impl SessionFailure {
    fn before_start(error: GsacError) -> Self {
        Self {
            device: error.device().map(str::to_string),
            error,
            last_version: 0,
        }
    }
}

// ─── Shared board between control loop and HUD ──────────────────────────────

#[derive(Debug, Default)]
struct Board {
    status: LiveStatus,
    message: String,
}

type SharedBoard = Arc<Mutex<Board>>;

fn lock(board: &SharedBoard) -> MutexGuard<'_, Board> {
    match board.lock() {
        Ok(b) => b,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct Monitor {
    device: String,
    side: String,
    ring: Arc<DeviceRing>,
    cell: Arc<SnapshotCell>,
}

// ─── Control loop ────────────────────────────────────────────────────────────

struct ControlLoop {
    trial: TrialSpec,
    machine: TrialMachine,
    counter: GaitCounter,
    plate: Box<dyn ForcePlateClient>,
    plate_cfg: ForcePlateConfig,
    load: MovingAverage,
    tr: Option<TransmissionRatio>,
    monitors: Vec<Monitor>,
    responses: Receiver<f64>,
    board: SharedBoard,
    clock: Arc<dyn Clock>,
    period: f64,
    status_period: f64,
    status_path: PathBuf,
    log_status: bool,
    started: Instant,
}

impl ControlLoop {
    fn run(mut self, quit: QuitSignal) -> TrialResponses {
        let mut sleeper = FlexibleSleeper::new(self.period, 50);
        let mut last_status = f64::NEG_INFINITY;

        while !quit.is_set() {
            let now = self.clock.now();
            self.step(now);
            if now - last_status >= self.status_period {
                self.publish_status();
                last_status = now;
            }
            if self.machine.is_finished() {
                log::info!("all rounds recorded, ending trial");
                quit.set();
                break;
            }
            sleeper.sleep_and_return_period();
        }

        self.publish_status();
        self.machine.responses(&self.trial)
    }

    fn step(&mut self, now: f64) {
        let strides = match self.machine.round_start() {
            Some(t0) => self.counter.count_since(t0),
            None => 0,
        };
        let mut actions = self.machine.handle(TrialEvent::Tick { now, strides });
        let pending: Vec<f64> = self.responses.try_iter().collect();
        for value in pending {
            actions.extend(self.machine.handle(TrialEvent::Response(value)));
        }
        for action in &actions {
            self.announce(action);
        }

        match self.plate.get_latest_device_values(
            &self.plate_cfg.plates,
            &self.plate_cfg.outputs,
            &self.plate_cfg.components,
        ) {
            Ok(values) => self.load.update(values.iter().sum()),
            Err(e) => log::debug!("force plate read failed: {}", e),
        }

        self.refresh_board(strides);
    }

    fn prompt_text(&self, round: u32) -> String {
        let what = match self.trial.trial_type {
            TrialType::Vas => "rate the assistance 0-100".to_string(),
            TrialType::Vickrey => "enter a bid (>= 0)".to_string(),
            TrialType::Jnd => "which felt stronger, 1 or 2".to_string(),
            TrialType::Pref => "which do you prefer, 1 or 2".to_string(),
        };
        format!("round {}: {}", round + 1, what)
    }

    fn announce(&self, action: &TrialAction) {
        let message = match action {
            TrialAction::Prompt { round, repeat } => {
                let text = self.prompt_text(*round);
                if *repeat {
                    format!("{} (reminder)", text)
                } else {
                    text
                }
            }
            TrialAction::Record(result) => match result.auction {
                Some(a) if a.won => format!("round {}: bid {} won, pays {}", result.round + 1, a.bid, a.payment),
                Some(a) => format!("round {}: bid {} lost to {}", result.round + 1, a.bid, a.clearing_price),
                None => format!("round {}: recorded {}", result.round + 1, result.response),
            },
            TrialAction::Rejected { value, reason } => format!("rejected {}: {}", value, reason),
            TrialAction::Finish => "trial complete".to_string(),
        };
        lock(&self.board).message = message;
    }

    fn refresh_board(&mut self, strides: usize) {
        let total = self.counter.total();
        let (phase, round) = match self.machine.phase() {
            TrialPhase::Walking { round, .. } => ("walking", round),
            TrialPhase::Prompting { round, .. } => ("prompting", round),
            TrialPhase::Finished => ("finished", self.machine.results().len() as u32),
        };

        let devices: Vec<DeviceStatus> = self
            .monitors
            .iter()
            .map(|m| {
                let mut d = DeviceStatus {
                    device: m.device.clone(),
                    side: m.side.clone(),
                    ring_pending: m.ring.len(),
                    rows_dropped: m.ring.dropped(),
                    ..DeviceStatus::default()
                };
                d.fill_from(m.cell.latest());
                d
            })
            .collect();
        let tr = match (&self.tr, devices.first()) {
            (Some(tr), Some(d)) if d.snapshot_version > 0 => Some(tr.ratio_at(d.ank_ang)),
            _ => None,
        };

        let mut board = lock(&self.board);
        let status = &mut board.status;
        status.timestamp = current_timestamp();
        status.uptime_seconds = self.started.elapsed().as_secs();
        status.phase = phase.to_string();
        status.round = round;
        status.strides_this_round = strides;
        status.strides_total = total;
        status.devices = devices;
        status.plate_load_n = self.load.average();
        status.transmission_ratio = tr;
    }

    fn publish_status(&self) {
        let status = lock(&self.board).status.clone();
        if let Err(e) = status.save(&self.status_path) {
            log::warn!("could not write {}: {}", self.status_path.display(), e);
        }
        if self.log_status {
            log::info!("{}", status.summary_line());
        }
    }
}

// ─── Operator input ──────────────────────────────────────────────────────────

fn run_hud(board: SharedBoard, responses: Sender<f64>, quit: QuitSignal, period_secs: f64) -> GsacResult<()> {
    let mut hud = Hud::enter()?;
    let mut keypad = Keypad::default();
    let period = Duration::from_secs_f64(period_secs);

    while !quit.is_set() {
        let lines = {
            let b = lock(&board);
            render_lines(&b.status, &keypad, &b.message)
        };
        hud.draw(&lines)?;

        if let Some(key) = hud.poll_key(period)? {
            match keypad.handle_key(key) {
                KeypadInput::Submit(value) => {
                    let _ = responses.send(value);
                }
                KeypadInput::Invalid(entry) => {
                    lock(&board).message = format!("'{}' is not a number", entry);
                }
                KeypadInput::Quit => {
                    log::info!("operator quit");
                    quit.set();
                }
                KeypadInput::Pending => {}
            }
        }
    }
    Ok(())
}

/// Forward numeric stdin lines as responses. The thread stays blocked on
/// stdin after the session ends, so it is detached rather than joined.
fn spawn_stdin_responses(responses: Sender<f64>) -> GsacResult<()> {
    let worker = spawn_worker("stdin", move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match line.parse::<f64>() {
                Ok(value) => {
                    if responses.send(value).is_err() {
                        break;
                    }
                }
                Err(_) => log::warn!("ignoring '{}': not a number", line),
            }
        }
    })?;
    drop(worker);
    Ok(())
}

// ─── Session ─────────────────────────────────────────────────────────────────

pub struct Session {
    config: GsacConfig,
    trial: TrialSpec,
    options: SessionOptions,
}

impl Session {
    pub fn new(config: GsacConfig, trial: TrialSpec, options: SessionOptions) -> Self {
        Self {
            config,
            trial,
            options,
        }
    }

    fn open_devices(&self, mut boots: Vec<Box<dyn MotorDevice>>) -> GsacResult<Vec<Box<dyn MotorDevice>>> {
        for i in 0..boots.len() {
            let cfg = &self.config.boots[i];
            let port = cfg.port_for(self.options.use_backup);
            if let Err(e) = open_with_retry(boots[i].as_mut(), port, cfg.baud, &self.config.safety) {
                close_all(&mut boots[..i]);
                return Err(e);
            }
            let started = boots[i]
                .start_streaming(self.config.sensor.stream_freq_hz)
                .and_then(|_| boots[i].set_gains(self.config.control.gains));
            if let Err(e) = started {
                close_all(&mut boots[..=i]);
                return Err(e);
            }
            log::info!("[{}] {} boot streaming on {}", boots[i].id(), cfg.side, port);
        }
        Ok(boots)
    }

    /// Run one trial to completion, duration, operator quit or a fatal error.
    ///
    /// `boots` pair up with `config.boots` in order; they are opened here.
    pub fn run(
        &self,
        boots: Vec<Box<dyn MotorDevice>>,
        plate: Box<dyn ForcePlateClient>,
    ) -> Result<SessionReport, SessionFailure> {
        let cfg = &self.config;
        cfg.validate().map_err(SessionFailure::before_start)?;
        if boots.len() != cfg.boots.len() {
            return Err(SessionFailure::before_start(GsacError::Configuration(format!(
                "{} boot(s) configured but {} device(s) supplied",
                cfg.boots.len(),
                boots.len()
            ))));
        }

        let trial_dir = self
            .trial
            .ensure_trial_dir(&cfg.data_root)
            .map_err(SessionFailure::before_start)?;
        let stem = self.trial.file_stem(&Local::now());
        let tr = match &cfg.tr.path {
            Some(path) => Some(TransmissionRatio::load(path, &cfg.tr).map_err(SessionFailure::before_start)?),
            None => None,
        };
        let mut writers = Vec::with_capacity(cfg.boots.len());
        for boot in &cfg.boots {
            let path = trial_dir.join(format!("{}_{}.csv", stem, boot.side));
            writers.push(TrialLogWriter::create(&path).map_err(SessionFailure::before_start)?);
        }

        let load = MovingAverage::new(LOAD_WINDOW, 0.0).map_err(SessionFailure::before_start)?;

        let boots = self.open_devices(boots).map_err(SessionFailure::before_start)?;
        log::info!("trial {} -> {}", stem, trial_dir.display());

        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let quit = QuitSignal::new();
        let (gait_sink, gait_counter) = gait_channel();
        let (response_tx, response_rx) = channel::unbounded();
        let board: SharedBoard = Arc::new(Mutex::new(Board {
            status: LiveStatus::new(&stem),
            message: String::new(),
        }));
        lock(&board).status.rounds = cfg.trial.rounds;

        // strides are counted on the first boot only
        let mut readers = Vec::new();
        let mut monitors = Vec::new();
        let mut drain = DrainActor::new(cfg.control.drain_period_secs);
        for (i, ((device, boot), writer)) in boots.into_iter().zip(&cfg.boots).zip(writers).enumerate() {
            let mut reader = SensorReader::new(device, boot, cfg, clock.clone());
            if i == 0 {
                reader = reader.with_gait(gait_sink.clone());
            }
            let id = reader.device_id().to_string();
            drain.add(&id, reader.ring(), writer);
            monitors.push(Monitor {
                device: id,
                side: boot.side.to_string(),
                ring: reader.ring(),
                cell: reader.snapshots(),
            });
            readers.push((boot.side, reader));
        }
        drop(gait_sink);

        let control = ControlLoop {
            trial: self.trial.clone(),
            machine: TrialMachine::new(self.trial.trial_type, &cfg.trial, clock.now()),
            counter: gait_counter,
            plate,
            plate_cfg: cfg.force_plate.clone(),
            load,
            tr,
            monitors,
            responses: response_rx,
            board: board.clone(),
            clock: clock.clone(),
            period: cfg.control.period_secs,
            status_period: cfg.control.status_period_secs,
            status_path: trial_dir.join("live_status.json"),
            log_status: !self.options.hud,
            started: Instant::now(),
        };

        // From here on devices are live: failures set quit and fall through to teardown.
        let mut reader_workers: Vec<(String, Arc<SnapshotCell>, Worker<ReaderSummary>)> = Vec::new();
        let mut spawn_error = None;
        for (side, reader) in readers {
            let q = quit.clone();
            let (id, cell) = (reader.device_id().to_string(), reader.snapshots());
            match spawn_worker(&format!("reader-{}", side), move || reader.run(q)) {
                Ok(w) => reader_workers.push((id, cell, w)),
                Err(e) => {
                    spawn_error.get_or_insert(e);
                    quit.set();
                }
            }
        }
        // the drain outlives the readers so its final pass sees every row
        let drain_stop = QuitSignal::new();
        let drain_worker = {
            let q = drain_stop.clone();
            spawn_worker("drain", move || drain.run(q))
        };
        let control_worker = {
            let q = quit.clone();
            spawn_worker("control", move || control.run(q))
        };
        let hud_worker = if self.options.hud {
            let q = quit.clone();
            let (b, tx) = (board.clone(), response_tx.clone());
            let period = cfg.control.hud_period_secs;
            Some(spawn_worker("hud", move || run_hud(b, tx, q, period)))
        } else {
            None
        };
        if self.options.stdin_responses {
            if let Err(e) = spawn_stdin_responses(response_tx.clone()) {
                log::warn!("stdin responses unavailable: {}", e);
            }
        }
        drop(response_tx);

        let started = Instant::now();
        while !quit.is_set() {
            if let Some(limit) = self.options.duration {
                if started.elapsed() >= limit {
                    log::info!("session duration of {:.1}s reached", limit.as_secs_f64());
                    break;
                }
            }
            if reader_workers.iter().any(|(_, _, w)| w.is_finished()) {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        quit.set();

        let mut late_error: Option<GsacError> = spawn_error;
        let mut lost_version = 0;
        let mut summaries = Vec::new();
        for (device, cell, w) in reader_workers {
            match w.join_timeout(join_window(cfg.sensor.period_secs)) {
                Ok(summary) => summaries.push(summary),
                Err(e) => {
                    let last_version = cell.version();
                    log::error!("[{}] {}; summary lost at snapshot version {}", device, e, last_version);
                    if late_error.is_none() {
                        lost_version = last_version;
                    }
                    late_error.get_or_insert(GsacError::ReaderLost {
                        device,
                        reason: e.to_string(),
                    });
                }
            }
        }
        drain_stop.set();

        let drain_summary = match drain_worker {
            Ok(w) => match w.join_timeout(join_window(cfg.control.drain_period_secs)) {
                Ok(Ok(summary)) => summary,
                Ok(Err(e)) => {
                    log::error!("trial log writing failed: {}", e);
                    late_error.get_or_insert(e);
                    DrainSummary::default()
                }
                Err(e) => {
                    log::error!("{}", e);
                    DrainSummary::default()
                }
            },
            Err(e) => {
                late_error.get_or_insert(e);
                DrainSummary::default()
            }
        };
        let responses = match control_worker {
            Ok(w) => w
                .join_timeout(join_window(cfg.control.period_secs))
                .map_err(|e| log::error!("{}", e))
                .ok(),
            Err(e) => {
                late_error.get_or_insert(e);
                None
            }
        };
        match hud_worker {
            Some(Ok(w)) => match w.join_timeout(join_window(cfg.control.hud_period_secs)) {
                Ok(Err(e)) => log::warn!("HUD stopped with error: {}", e),
                Err(e) => log::warn!("{}", e),
                Ok(Ok(())) => {}
            },
            Some(Err(e)) => log::warn!("HUD could not start: {}", e),
            None => {}
        }

        for summary in &summaries {
            let path = trial_dir.join(format!("{}_{}_activations.csv", stem, summary.side));
            if let Err(e) = write_activations(&path, &summary.log) {
                log::error!("could not write {}: {}", path.display(), e);
            }
        }
        if let Some(responses) = &responses {
            let path = trial_dir.join(format!("{}_responses.json", stem));
            if let Err(e) = write_responses(&path, responses) {
                log::error!("could not write {}: {}", path.display(), e);
            }
        }

        let fatal = summaries.iter_mut().find_map(|s| {
            s.error
                .take()
                .map(|e| (e, s.device.clone(), s.last_version))
        });
        if let Some((error, device, last_version)) = fatal {
            return Err(SessionFailure {
                error,
                device: Some(device),
                last_version,
            });
        }
        if let Some(error) = late_error {
            let last_version = summaries
                .iter()
                .map(|s| s.last_version)
                .max()
                .unwrap_or(0)
                .max(lost_version);
            return Err(SessionFailure {
                device: error.device().map(str::to_string),
                error,
                last_version,
            });
        }

        Ok(SessionReport {
            trial_dir,
            stem,
            readers: summaries,
            drain: drain_summary,
            responses,
        })
    }
}

fn close_all(devices: &mut [Box<dyn MotorDevice>]) {
    for device in devices {
        if let Err(e) = device.close() {
            log::warn!("[{}] close after failed start: {}", device.id(), e);
        }
    }
}

fn write_responses(path: &std::path::Path, responses: &TrialResponses) -> GsacResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(&mut out, responses)?;
    out.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::RawFrame;
    use crate::device::testing::ScriptedBoot;
    use crate::device::SimulatedForcePlate;
    use crate::trial::{Condition, Description};
    use crate::trial_log::read_trial_log;

    fn config(name: &str) -> GsacConfig {
        let mut cfg = GsacConfig::default();
        cfg.data_root = std::env::temp_dir().join(format!("exo_gsac_{}_{}", std::process::id(), name));
        cfg.safety.open_backoff_secs = 0.001;
        cfg.safety.open_backoff_cap_secs = 0.002;
        cfg.control.status_period_secs = 0.02;
        cfg
    }

    fn trial() -> TrialSpec {
        TrialSpec::new("T01", TrialType::Vas, Condition::Zt, Description::Pre).unwrap()
    }

    fn options(millis: u64) -> SessionOptions {
        SessionOptions {
            duration: Some(Duration::from_millis(millis)),
            ..SessionOptions::default()
        }
    }

    fn plate() -> Box<dyn ForcePlateClient> {
        Box::new(SimulatedForcePlate::new(700.0))
    }

    #[test]
    fn test_session_writes_trial_files() {
        let cfg = config("session_ok");
        let boots: Vec<Box<dyn MotorDevice>> = vec![
            Box::new(ScriptedBoot::new("boot-L", Vec::new())),
            Box::new(ScriptedBoot::new("boot-R", Vec::new())),
        ];
        let report = Session::new(cfg.clone(), trial(), options(150))
            .run(boots, plate())
            .unwrap();

        assert_eq!(report.readers.len(), 2);
        for summary in &report.readers {
            assert!(summary.iterations > 0);
            assert!(summary.error.is_none());
            let log_path = report.trial_dir.join(format!("{}_{}.csv", report.stem, summary.side));
            let rows = read_trial_log(&log_path).unwrap();
            assert_eq!(rows.len() as u64, summary.iterations);
            assert!(report
                .trial_dir
                .join(format!("{}_{}_activations.csv", report.stem, summary.side))
                .exists());
        }
        assert!(report.trial_dir.join(format!("{}_responses.json", report.stem)).exists());
        assert!(report.trial_dir.join("live_status.json").exists());
        assert_eq!(report.trial_dir, cfg.data_root.join("T01").join("VAS"));
        assert!(!report.responses.unwrap().complete);

        std::fs::remove_dir_all(&cfg.data_root).ok();
    }

    #[test]
    fn test_overcurrent_is_reported_with_device_and_version() {
        let cfg = config("session_safety");
        let mut script: Vec<GsacResult<RawFrame>> = (0..5)
            .map(|i| {
                Ok(RawFrame {
                    state_time_ms: i as f64,
                    ..RawFrame::default()
                })
            })
            .collect();
        script.push(Ok(RawFrame {
            state_time_ms: 5.0,
            mot_cur: 40_000.0,
            ..RawFrame::default()
        }));
        let right = ScriptedBoot::new("boot-R", script);
        let right_calls = right.calls.clone();
        let boots: Vec<Box<dyn MotorDevice>> = vec![Box::new(ScriptedBoot::new("boot-L", Vec::new())), Box::new(right)];

        let failure = Session::new(cfg.clone(), trial(), options(5_000))
            .run(boots, plate())
            .unwrap_err();

        assert_eq!(failure.error.kind(), "SafetyError");
        assert_eq!(failure.device.as_deref(), Some("boot-R"));
        assert_eq!(failure.last_version, 5);
        assert!(failure.to_string().starts_with("SafetyError on boot-R"));
        assert!(right_calls.lock().unwrap().closed);

        std::fs::remove_dir_all(&cfg.data_root).ok();
    }

    #[test]
    fn test_open_exhaustion_closes_opened_boots() {
        let mut cfg = config("session_open");
        cfg.safety.open_attempts = 2;
        let left = ScriptedBoot::new("boot-L", Vec::new());
        let left_calls = left.calls.clone();
        let right = ScriptedBoot::new("boot-R", Vec::new()).failing_opens(10);
        let boots: Vec<Box<dyn MotorDevice>> = vec![Box::new(left), Box::new(right)];

        let failure = Session::new(cfg.clone(), trial(), options(100))
            .run(boots, plate())
            .unwrap_err();

        assert_eq!(failure.error.kind(), "DeviceOpenError");
        assert_eq!(failure.device.as_deref(), Some("boot-R"));
        assert_eq!(failure.last_version, 0);
        assert!(left_calls.lock().unwrap().closed);

        std::fs::remove_dir_all(&cfg.data_root).ok();
    }

    #[test]
    fn test_stalled_reader_is_reported_after_join_timeout() {
        let cfg = config("session_stalled");
        let right = ScriptedBoot::new("boot-R", Vec::new()).with_read_delay(Duration::from_millis(400));
        let boots: Vec<Box<dyn MotorDevice>> = vec![Box::new(ScriptedBoot::new("boot-L", Vec::new())), Box::new(right)];

        let failure = Session::new(cfg.clone(), trial(), options(100))
            .run(boots, plate())
            .unwrap_err();

        assert_eq!(failure.error.kind(), "ReaderLostError");
        assert_eq!(failure.device.as_deref(), Some("boot-R"));
        assert!(failure.error.to_string().contains("join timeout"), "{}", failure.error);

        // the boot that did stop still gets its files
        let trial_dir = cfg.data_root.join("T01").join("VAS");
        let stems: Vec<_> = std::fs::read_dir(&trial_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(stems.iter().any(|n| n.ends_with("_left_activations.csv")), "{:?}", stems);
        assert!(!stems.iter().any(|n| n.ends_with("_right_activations.csv")), "{:?}", stems);

        std::fs::remove_dir_all(&cfg.data_root).ok();
    }

    #[test]
    fn test_device_count_must_match_config() {
        let cfg = config("session_count");
        let boots: Vec<Box<dyn MotorDevice>> = vec![Box::new(ScriptedBoot::new("boot-L", Vec::new()))];
        let failure = Session::new(cfg, trial(), options(100)).run(boots, plate()).unwrap_err();
        assert_eq!(failure.error.kind(), "ConfigurationError");
        assert!(failure.device.is_none());
    }

    #[test]
    fn test_join_window_has_floor() {
        assert_eq!(join_window(0.001), Duration::from_secs_f64(JOIN_FLOOR_SECS));
        assert_eq!(join_window(0.1), Duration::from_secs_f64(0.2));
    }
}
