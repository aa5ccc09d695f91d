use std::f64::consts::PI;

/// First-order low-pass filter, bilinear transformed, for irregular sample times.
///
/// The coefficients are recomputed from the actual `dt` on every update, so the
/// filter tracks a jittery sensor clock without assuming a fixed rate.
///
/// Samples whose timestamp does not advance (`dt <= 0`) return the previous
/// output and leave the state untouched.
#[derive(Clone, Debug)]
pub struct LowPassFilter {
    omega: f64,
    x_prev: f64,
    y_prev: f64,
    t_prev: f64,
    cold: bool,
}

impl LowPassFilter {
    /// Cutoff given as an angular frequency in rad/s.
    pub fn new(omega: f64) -> Self {
        Self {
            omega,
            x_prev: 0.0,
            y_prev: 0.0,
            t_prev: 0.0,
            cold: true,
        }
    }

    pub fn from_cutoff_hz(cutoff_hz: f64) -> Self {
        Self::new(2.0 * PI * cutoff_hz)
    }

    pub fn update(&mut self, x: f64, t: f64) -> f64 {
        if self.cold {
            self.x_prev = x;
            self.y_prev = x;
            self.t_prev = t;
            self.cold = false;
            return x;
        }

        let dt = t - self.t_prev;
        if dt <= 0.0 {
            return self.y_prev;
        }

        let wdt = self.omega * dt;
        let a = -(wdt - 2.0) / (wdt + 2.0);
        let b = wdt / (wdt + 2.0);
        let y = a * self.y_prev + b * (x + self.x_prev);

        self.x_prev = x;
        self.y_prev = y;
        self.t_prev = t;
        y
    }

    /// Forget history; the next sample re-initialises the filter.
    pub fn reset(&mut self) {
        self.cold = true;
    }
}
