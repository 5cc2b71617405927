use nalgebra::DMatrix;
use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use super::bus::Phases;

/// A ZIP load: constant impedance, constant current and constant power parts.
///
/// Each matrix is indexed by bus phase. The diagonal holds phase-to-ground
/// terms and entry `(i, k)` with `i < k` a term between phases `i` and `k`.
/// The lower triangle is ignored. All three describe consumption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Zip {
    pub id: String,
    pub bus: String,
    pub in_service: bool,
    pub y_const: DMatrix<Complex64>,
    pub i_const: DMatrix<Complex64>,
    pub s_const: DMatrix<Complex64>,
}

impl Zip {
    /// An empty load sized for `n` phases.
    pub fn new(id: impl Into<String>, bus: impl Into<String>, n: usize) -> Self {
        Zip {
            id: id.into(),
            bus: bus.into(),
            in_service: true,
            y_const: DMatrix::zeros(n, n),
            i_const: DMatrix::zeros(n, n),
            s_const: DMatrix::zeros(n, n),
        }
    }

    /// Wye-connected constant power load, one value per phase.
    pub fn constant_power(id: impl Into<String>, bus: impl Into<String>, s: &[Complex64]) -> Self {
        let mut zip = Self::new(id, bus, s.len());
        zip.s_const = DMatrix::from_diagonal(&nalgebra::DVector::from_column_slice(s));
        zip
    }

    pub fn with_y_const(mut self, y: DMatrix<Complex64>) -> Self {
        self.y_const = y;
        self
    }

    pub fn with_i_const(mut self, i: DMatrix<Complex64>) -> Self {
        self.i_const = i;
        self
    }

    pub fn with_s_const(mut self, s: DMatrix<Complex64>) -> Self {
        self.s_const = s;
        self
    }

    pub fn n_phases(&self) -> usize {
        self.y_const.nrows()
    }

    /// Power drawn per phase at voltages `v`.
    ///
    /// Phase-to-phase terms are booked against the lower-indexed phase.
    pub fn s_drawn(&self, v: &[Complex64], phases: &Phases) -> Vec<Complex64> {
        let n = phases.len().min(self.n_phases());
        let mut s = vec![Complex64::new(0.0, 0.0); phases.len()];
        for i in 0..n {
            for k in i..n {
                let u = if i == k { v[i] } else { v[i] - v[k] };
                let y = self.y_const[(i, k)];
                let ic = self.i_const[(i, k)];
                let sc = self.s_const[(i, k)];
                s[i] += (y * u).conj() * u + sc;
                if u.norm() > 0.0 {
                    s[i] += u * (ic * u / u.norm()).conj();
                }
            }
        }
        s
    }
}
