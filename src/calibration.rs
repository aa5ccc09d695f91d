//! Transmission ratio: motor angle as a polynomial in ankle angle, and its derivative.
//!
//! The calibration file is two CSV rows of coefficients, highest power first:
//! row 1 the motor-angle polynomial, row 2 its derivative (the ratio).

use std::fs;
use std::path::Path;

use nalgebra::{DMatrix, DVector};

use crate::config::TrConfig;
use crate::error::{GsacError, GsacResult};

#[derive(Clone, Debug, PartialEq)]
pub struct Polynomial {
    coefs: Vec<f64>,
}

impl Polynomial {
    /// Coefficients highest power first. An empty list is the zero polynomial.
    pub fn new(coefs: Vec<f64>) -> Self {
        if coefs.is_empty() {
            return Self { coefs: vec![0.0] };
        }
        Self { coefs }
    }

    pub fn coefs(&self) -> &[f64] {
        &self.coefs
    }

    pub fn degree(&self) -> usize {
        self.coefs.len() - 1
    }

    pub fn eval(&self, x: f64) -> f64 {
        self.coefs.iter().fold(0.0, |acc, &c| acc * x + c)
    }

    pub fn derivative(&self) -> Polynomial {
        let n = self.degree();
        if n == 0 {
            return Polynomial::new(vec![0.0]);
        }
        let coefs = self.coefs[..n]
            .iter()
            .enumerate()
            .map(|(i, &c)| c * (n - i) as f64)
            .collect();
        Polynomial::new(coefs)
    }

    /// Least-squares fit of the given degree.
    ///
    /// Vandermonde columns are normalised before the SVD solve; raw ankle
    /// counts reach the thousands, so x^5 columns otherwise swamp the rest.
    pub fn fit(xs: &[f64], ys: &[f64], degree: usize) -> GsacResult<Polynomial> {
        if xs.len() != ys.len() {
            return Err(GsacError::Parse(format!(
                "fit needs equal lengths, got {} x and {} y",
                xs.len(),
                ys.len()
            )));
        }
        if xs.len() <= degree {
            return Err(GsacError::Parse(format!(
                "degree {} fit needs more than {} samples",
                degree,
                xs.len()
            )));
        }

        let cols = degree + 1;
        let mut a = DMatrix::from_fn(xs.len(), cols, |r, c| xs[r].powi((degree - c) as i32));
        let mut norms = vec![1.0; cols];
        for (c, norm) in norms.iter_mut().enumerate() {
            let n = a.column(c).norm();
            if n > 0.0 {
                *norm = n;
                a.column_mut(c).scale_mut(1.0 / n);
            }
        }
        let b = DVector::from_column_slice(ys);

        let svd = a.svd(true, true);
        let solution = svd
            .solve(&b, 1e-12)
            .map_err(|e| GsacError::Parse(format!("least-squares solve failed: {}", e)))?;

        let coefs = solution.iter().zip(norms.iter()).map(|(s, n)| s / n).collect();
        Ok(Polynomial::new(coefs))
    }
}

/// Root-mean-square of `ys - p(xs)`.
pub fn rms_residual(poly: &Polynomial, xs: &[f64], ys: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    let sum: f64 = xs
        .iter()
        .zip(ys)
        .map(|(&x, &y)| (y - poly.eval(x)).powi(2))
        .sum();
    (sum / xs.len() as f64).sqrt()
}

#[derive(Clone, Debug, PartialEq)]
pub struct TransmissionRatio {
    pub motor_angle: Polynomial,
    pub ratio: Polynomial,
    floor: f64,
    ceiling: f64,
}

impl TransmissionRatio {
    pub fn from_motor_angle(motor_angle: Polynomial, cfg: &TrConfig) -> Self {
        let ratio = motor_angle.derivative();
        Self {
            motor_angle,
            ratio,
            floor: cfg.floor,
            ceiling: cfg.ceiling,
        }
    }

    /// Fit motor angle against ankle angle and return the ratio with the fit's RMS residual.
    pub fn calibrate(
        ank_ang: &[f64],
        mot_ang: &[f64],
        degree: usize,
        cfg: &TrConfig,
    ) -> GsacResult<(Self, f64)> {
        let poly = Polynomial::fit(ank_ang, mot_ang, degree)?;
        let rms = rms_residual(&poly, ank_ang, mot_ang);
        Ok((Self::from_motor_angle(poly, cfg), rms))
    }

    pub fn load(path: &Path, cfg: &TrConfig) -> GsacResult<Self> {
        let text = fs::read_to_string(path)?;
        let mut rows = text.lines().filter(|l| !l.trim().is_empty()).map(|line| {
            line.split(',')
                .map(|f| {
                    f.trim()
                        .parse::<f64>()
                        .map_err(|_| GsacError::Parse(format!("{}: bad coefficient '{}'", path.display(), f)))
                })
                .collect::<GsacResult<Vec<f64>>>()
        });

        let mut next_row = |what: &str| {
            rows.next()
                .unwrap_or_else(|| Err(GsacError::Parse(format!("{}: missing {} row", path.display(), what))))
        };
        let motor_angle = Polynomial::new(next_row("motor-angle")?);
        let ratio = Polynomial::new(next_row("ratio")?);

        Ok(Self {
            motor_angle,
            ratio,
            floor: cfg.floor,
            ceiling: cfg.ceiling,
        })
    }

    pub fn save(&self, path: &Path) -> GsacResult<()> {
        let row = |p: &Polynomial| {
            p.coefs()
                .iter()
                .map(|c| c.to_string())
                .collect::<Vec<_>>()
                .join(",")
        };
        fs::write(path, format!("{}\n{}\n", row(&self.motor_angle), row(&self.ratio)))?;
        Ok(())
    }

    /// Ratio at `ank_ang`, clamped to the configured floor and ceiling.
    pub fn ratio_at(&self, ank_ang: f64) -> f64 {
        let tr = self.ratio.eval(ank_ang);
        if tr.is_nan() {
            return self.floor;
        }
        tr.clamp(self.floor, self.ceiling)
    }
}
