use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use crate::channels::CHANNEL_COUNT;

/// One logged sample: transformed channels plus the detector's view of it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrialRow {
    pub iteration: u64,
    /// Session clock time in seconds.
    pub time_s: f64,
    pub values: [f64; CHANNEL_COUNT],
    pub z: f64,
    pub active: bool,
    pub local_peak_z: f64,
}

/// Per-device buffer between the sensor thread and the drain actor.
///
/// The sensor thread is the only writer. Once `soft_cap` rows are pending,
/// further rows are dropped and counted rather than growing without bound.
#[derive(Debug)]
pub struct DeviceRing {
    rows: Mutex<VecDeque<TrialRow>>,
    soft_cap: usize,
    dropped: AtomicU64,
}

impl DeviceRing {
    pub fn new(soft_cap: usize) -> Self {
        let soft_cap = soft_cap.max(1);
        Self {
            rows: Mutex::new(VecDeque::with_capacity(soft_cap.min(4096))),
            soft_cap,
            dropped: AtomicU64::new(0),
        }
    }

    /// Append a row; returns false when it was dropped at the cap.
    pub fn push(&self, row: TrialRow) -> bool {
        let mut rows = match self.rows.lock() {
            Ok(rows) => rows,
            Err(poisoned) => poisoned.into_inner(),
        };
        if rows.len() >= self.soft_cap {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        rows.push_back(row);
        true
    }

    /// Take everything pending, leaving the ring empty.
    pub fn flush(&self) -> Vec<TrialRow> {
        let mut rows = match self.rows.lock() {
            Ok(rows) => rows,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::take(&mut *rows).into()
    }

    pub fn len(&self) -> usize {
        self.rows.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
pub(crate) fn row(iteration: u64) -> TrialRow {
    let mut values = [0.0; CHANNEL_COUNT];
    for (i, v) in values.iter_mut().enumerate() {
        *v = iteration as f64 + i as f64 * 0.125;
    }
    TrialRow {
        iteration,
        time_s: iteration as f64 * 0.001,
        values,
        z: 0.5,
        active: iteration % 2 == 0,
        local_peak_z: 1.5,
    }
}
