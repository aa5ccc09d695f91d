use crate::error::{GsacError, GsacResult};

/// Fixed-size moving average over a circular buffer.
///
/// The buffer starts filled with a caller-supplied value so `average()` is
/// meaningful before `size` samples have arrived. Averaging walks the whole
/// buffer; sizes stay small enough (a few hundred) that this is not a concern.
#[derive(Clone, Debug)]
pub struct MovingAverage {
    buffer: Vec<f64>,
    pointer: usize,
}

impl MovingAverage {
    pub fn new(size: usize, init: f64) -> GsacResult<Self> {
        if size == 0 {
            return Err(GsacError::Configuration(
                "moving average size must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            buffer: vec![init; size],
            pointer: 0,
        })
    }

    pub fn update(&mut self, x: f64) {
        self.buffer[self.pointer] = x;
        self.pointer = (self.pointer + 1) % self.buffer.len();
    }

    pub fn average(&self) -> f64 {
        self.buffer.iter().sum::<f64>() / self.buffer.len() as f64
    }

    /// Mean with the single largest and single smallest entries dropped.
    ///
    /// `None` for buffers shorter than three.
    pub fn trimmed_average(&self) -> Option<f64> {
        let n = self.buffer.len();
        if n < 3 {
            return None;
        }
        let (mut lo, mut hi, mut sum) = (f64::INFINITY, f64::NEG_INFINITY, 0.0);
        for &x in &self.buffer {
            lo = lo.min(x);
            hi = hi.max(x);
            sum += x;
        }
        Some((sum - lo - hi) / (n - 2) as f64)
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }
}
