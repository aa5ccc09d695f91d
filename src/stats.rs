/// Incremental mean and population variance (Welford's recurrence).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningStats {
    n: u64,
    mean: f64,
    s: f64,
}

impl RunningStats {
    pub const fn new() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            s: 0.0,
        }
    }

    pub fn update(&mut self, x: f64) {
        self.n += 1;
        let mean_new = self.mean + (x - self.mean) / self.n as f64;
        self.s += (x - mean_new) * (x - self.mean);
        self.mean = mean_new;
    }

    pub fn count(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        self.mean
    }

    pub fn variance(&self) -> f64 {
        self.s / self.n.max(1) as f64
    }

    /// Population standard deviation.
    pub fn std(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Standard score of `x`; zero while the deviation is zero.
    pub fn z(&self, x: f64) -> f64 {
        let std = self.std();
        if std > 0.0 {
            (x - self.mean) / std
        } else {
            0.0
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}
