//! Trial log CSV files and the actor that fills them.
//!
//! Floats are written with `Display`, which prints the shortest text that
//! parses back to the same bits, so a log reads back exactly.

use std::fs::File;
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::activation::ActivationLog;
use crate::channels::{CHANNELS, CHANNEL_COUNT};
use crate::clock::FlexibleSleeper;
use crate::error::{GsacError, GsacResult};
use crate::ring::{DeviceRing, TrialRow};
use crate::worker::QuitSignal;

/// Column names of a trial log, in order.
pub fn trial_log_header() -> Vec<&'static str> {
    let mut header = vec!["iteration", "time_s"];
    header.extend(CHANNELS.iter().map(|c| c.name()));
    header.extend(["z", "active", "local_peak_z"]);
    header
}

pub struct TrialLogWriter {
    path: PathBuf,
    out: BufWriter<File>,
    rows: u64,
}

impl TrialLogWriter {
    /// Create (truncating) the file and write the header line.
    pub fn create(path: &Path) -> GsacResult<Self> {
        let mut out = BufWriter::new(File::create(path)?);
        writeln!(out, "{}", trial_log_header().join(","))?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
            rows: 0,
        })
    }

    pub fn write_row(&mut self, row: &TrialRow) -> GsacResult<()> {
        write!(self.out, "{},{}", row.iteration, row.time_s)?;
        for v in &row.values {
            write!(self.out, ",{}", v)?;
        }
        writeln!(
            self.out,
            ",{},{},{}",
            row.z,
            u8::from(row.active),
            row.local_peak_z
        )?;
        self.rows += 1;
        Ok(())
    }

    pub fn flush(&mut self) -> GsacResult<()> {
        self.out.flush()?;
        Ok(())
    }

    pub fn rows(&self) -> u64 {
        self.rows
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, line_no: usize, name: &str) -> GsacResult<T> {
    let field = field.ok_or_else(|| GsacError::Parse(format!("line {}: missing column {}", line_no, name)))?;
    field
        .trim()
        .parse()
        .map_err(|_| GsacError::Parse(format!("line {}: bad {} value '{}'", line_no, name, field)))
}

/// Parse a trial log written by [`TrialLogWriter`].
pub fn read_trial_log(path: &Path) -> GsacResult<Vec<TrialRow>> {
    let reader = BufReader::new(File::open(path)?);
    let mut lines = reader.lines();

    let header = lines
        .next()
        .transpose()?
        .ok_or_else(|| GsacError::Parse(format!("{}: empty file", path.display())))?;
    let expected = trial_log_header().join(",");
    if header.trim() != expected {
        return Err(GsacError::Parse(format!(
            "{}: unexpected header '{}'",
            path.display(),
            header.trim()
        )));
    }

    let mut rows = Vec::new();
    for (i, line) in lines.enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let line_no = i + 2;
        let mut fields = line.split(',');
        let iteration = parse_field(fields.next(), line_no, "iteration")?;
        let time_s = parse_field(fields.next(), line_no, "time_s")?;
        let mut values = [0.0; CHANNEL_COUNT];
        for (v, channel) in values.iter_mut().zip(CHANNELS.iter()) {
            *v = parse_field(fields.next(), line_no, channel.name())?;
        }
        let z = parse_field(fields.next(), line_no, "z")?;
        let active: u8 = parse_field(fields.next(), line_no, "active")?;
        let local_peak_z = parse_field(fields.next(), line_no, "local_peak_z")?;
        if fields.next().is_some() {
            return Err(GsacError::Parse(format!("line {}: too many columns", line_no)));
        }
        rows.push(TrialRow {
            iteration,
            time_s,
            values,
            z,
            active: active != 0,
            local_peak_z,
        });
    }
    Ok(rows)
}

/// Write `<stem>_activations.csv`; an open window leaves its peak cells empty.
pub fn write_activations(path: &Path, log: &ActivationLog) -> GsacResult<()> {
    let mut out = BufWriter::new(File::create(path)?);
    writeln!(out, "start_time,start_z,peak_time,peak_z")?;
    for (start_time, start_z, peak) in log.windows() {
        match peak {
            Some((peak_time, peak_z)) => writeln!(out, "{},{},{},{}", start_time, start_z, peak_time, peak_z)?,
            None => writeln!(out, "{},{},,", start_time, start_z)?,
        }
    }
    out.flush()?;
    Ok(())
}

// ─── Drain actor ─────────────────────────────────────────────────────────────

struct DrainTarget {
    device: String,
    ring: Arc<DeviceRing>,
    writer: TrialLogWriter,
    seen_dropped: u64,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DrainSummary {
    /// (device, rows written, rows dropped at the ring)
    pub devices: Vec<(String, u64, u64)>,
    pub lag_events: u64,
}

/// The only writer of trial log files: flushes every ring each period.
pub struct DrainActor {
    targets: Vec<DrainTarget>,
    period: Duration,
    lag_events: u64,
}

impl DrainActor {
    pub fn new(period_secs: f64) -> Self {
        Self {
            targets: Vec::new(),
            period: Duration::from_secs_f64(period_secs.max(0.001)),
            lag_events: 0,
        }
    }

    pub fn add(&mut self, device: &str, ring: Arc<DeviceRing>, writer: TrialLogWriter) {
        self.targets.push(DrainTarget {
            device: device.to_string(),
            ring,
            writer,
            seen_dropped: 0,
        });
    }

    /// Move everything pending into the files. Returns rows written.
    pub fn drain_once(&mut self) -> GsacResult<usize> {
        let mut written = 0;
        for target in &mut self.targets {
            let rows = target.ring.flush();
            for row in &rows {
                target.writer.write_row(row)?;
            }
            written += rows.len();

            let dropped = target.ring.dropped();
            if dropped > target.seen_dropped {
                target.seen_dropped = dropped;
                self.lag_events += 1;
                let lag = GsacError::DrainLag {
                    device: target.device.clone(),
                    dropped,
                };
                log::warn!("{}", lag);
            }
        }
        Ok(written)
    }

    /// Drain until `quit`, then drain once more and flush the files.
    pub fn run(mut self, quit: QuitSignal) -> GsacResult<DrainSummary> {
        let mut sleeper = FlexibleSleeper::new(self.period.as_secs_f64(), 10);
        while !quit.is_set() {
            self.drain_once()?;
            sleeper.sleep_and_return_period();
        }
        self.finish()
    }

    pub fn finish(mut self) -> GsacResult<DrainSummary> {
        self.drain_once()?;
        let mut devices = Vec::with_capacity(self.targets.len());
        for target in &mut self.targets {
            target.writer.flush()?;
            log::info!(
                "[{}] wrote {} rows to {}",
                target.device,
                target.writer.rows(),
                target.writer.path().display()
            );
            devices.push((target.device.clone(), target.writer.rows(), target.ring.dropped()));
        }
        Ok(DrainSummary {
            devices,
            lag_events: self.lag_events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::row;
    use std::fs;
    use std::thread;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("exo_gsac_{}_{}", std::process::id(), name))
    }

    #[test]
    fn test_header_layout() {
        let header = trial_log_header();
        assert_eq!(header.len(), CHANNEL_COUNT + 5);
        assert_eq!(header[0], "iteration");
        assert_eq!(header[2], "state_time");
        assert_eq!(header[10], "accelz");
        assert_eq!(header[header.len() - 3..], ["z", "active", "local_peak_z"]);
    }

    #[test]
    fn test_write_then_read_is_exact() {
        let path = temp_path("roundtrip.csv");
        let mut rows: Vec<TrialRow> = (0..50).map(row).collect();
        rows[3].values[4] = 0.1 + 0.2;
        rows[4].z = -1.0e-12;
        rows[5].local_peak_z = 123456.789012345;
        rows[6].time_s = 1.0 / 3.0;

        let mut writer = TrialLogWriter::create(&path).unwrap();
        for r in &rows {
            writer.write_row(r).unwrap();
        }
        writer.flush().unwrap();
        assert_eq!(writer.rows(), 50);

        let back = read_trial_log(&path).unwrap();
        assert_eq!(back, rows);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_rejects_foreign_header() {
        let path = temp_path("foreign.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").unwrap();
        let err = read_trial_log(&path).unwrap_err();
        assert_eq!(err.kind(), "ParseError");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_read_reports_bad_line() {
        let path = temp_path("badline.csv");
        let mut text = trial_log_header().join(",");
        text.push_str("\n1,0.5,oops\n");
        fs::write(&path, text).unwrap();
        let err = read_trial_log(&path).unwrap_err().to_string();
        assert!(err.contains("line 2"), "{err}");
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_activation_csv_leaves_open_peak_empty() {
        let path = temp_path("activations.csv");
        let log = ActivationLog {
            start_time: vec![1.0, 3.0],
            start_z: vec![2.5, 3.5],
            peak_time: vec![1.25],
            peak_z: vec![6.0],
            status: Vec::new(),
        };
        write_activations(&path, &log).unwrap();
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines, ["start_time,start_z,peak_time,peak_z", "1,2.5,1.25,6", "3,3.5,,"]);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_drain_actor_writes_all_rows_and_counts_lag() {
        let path = temp_path("drain.csv");
        let ring = Arc::new(DeviceRing::new(10));
        let mut actor = DrainActor::new(0.001);
        actor.add("left", ring.clone(), TrialLogWriter::create(&path).unwrap());

        for i in 0..15 {
            ring.push(row(i));
        }
        assert_eq!(actor.drain_once().unwrap(), 10);
        for i in 15..20 {
            ring.push(row(i));
        }

        let summary = actor.finish().unwrap();
        assert_eq!(summary.lag_events, 1);
        assert_eq!(summary.devices, vec![("left".to_string(), 15, 5)]);

        let back = read_trial_log(&path).unwrap();
        assert_eq!(back.len(), 15);
        assert_eq!(back.last().unwrap().iteration, 19);
        fs::remove_file(&path).ok();
    }

    #[test]
    fn test_drain_actor_runs_until_quit() {
        let path = temp_path("drain_run.csv");
        let ring = Arc::new(DeviceRing::new(100_000));
        let mut actor = DrainActor::new(0.002);
        actor.add("right", ring.clone(), TrialLogWriter::create(&path).unwrap());
        let quit = QuitSignal::new();
        let q = quit.clone();
        let handle = thread::spawn(move || actor.run(q));

        for i in 0..2_000 {
            ring.push(row(i));
        }
        thread::sleep(std::time::Duration::from_millis(10));
        quit.set();
        let summary = handle.join().unwrap().unwrap();
        assert_eq!(summary.devices[0].1, 2_000);
        assert_eq!(read_trial_log(&path).unwrap().len(), 2_000);
        fs::remove_file(&path).ok();
    }
}
